/*
 * Fuzzdeck Server - HTTP surface over the job coordinator
 *
 * Routes:
 * - POST   /api/fuzz/{tool}                        submit a job
 * - DELETE /api/fuzz/{tool}?jobId=                 stop a job
 * - GET    /api/fuzz/{tool}/jobs/{jobId}           job record
 * - GET    /api/fuzz/{tool}/jobs/{jobId}/events    live record snapshots (SSE)
 * - GET    /api/fuzz/{tool}/artifacts?jobId=&type= download results
 * - GET    /health
 */

pub mod error;
pub mod handlers;
pub mod router;
pub mod settings;
pub mod state;
pub mod telemetry;

pub use error::{ApiError, ApiResult, ErrorBody};
pub use router::create_router;
pub use settings::Settings;
pub use state::AppState;
pub use telemetry::init_tracing;
