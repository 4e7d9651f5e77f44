//! Progress Sampler
//!
//! Timer task reading a tool's on-disk progress at a fixed interval while
//! the job runs. A tick that finds nothing writes nothing; a tick that fails
//! is logged and the next one tries again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::recorder::JobRecorder;
use crate::tools::ToolMonitor;

pub fn spawn_sampler(
    monitor: Arc<dyn ToolMonitor>,
    recorder: JobRecorder,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match monitor.sample().await {
                Ok(Some(patch)) => recorder.apply_or_warn(patch.touch(), "progress sample").await,
                Ok(None) => {}
                Err(e) => warn!(job_id = %recorder.job_id(), error = %e, "Progress sample failed"),
            }
        }
        debug!(job_id = %recorder.job_id(), "Sampler stopped");
    })
}
