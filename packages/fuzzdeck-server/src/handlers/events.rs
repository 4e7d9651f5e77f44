//! Live record updates as Server-Sent Events.
//!
//! The first event is the current snapshot; every later write to the record
//! follows as a `record` event. The stream ends after the first terminal
//! snapshot.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use fuzzdeck_orchestration::Tool;
use fuzzdeck_storage::{JobRecord, RecordWatch};

use crate::error::ApiResult;
use crate::state::AppState;

pub const RECORD_EVENT: &str = "record";

#[tracing::instrument(skip(state))]
pub async fn events_handler(
    State(state): State<AppState>,
    Path((tool, job_id)): Path<(String, String)>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let tool = Tool::from_str(&tool)?;
    let (current, watch) = state.coordinator.watch(tool, &job_id).await?;
    Ok(Sse::new(record_events(current, watch)).keep_alive(KeepAlive::default()))
}

fn record_events(
    current: JobRecord,
    watch: RecordWatch,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(Some((Some(current), watch)), |state| async move {
        let (pending, mut watch) = state?;
        let record = match pending {
            Some(record) => record,
            None => loop {
                let doc = watch.next().await?;
                match JobRecord::from_document((*doc).clone()) {
                    Ok(record) => break record,
                    Err(e) => {
                        tracing::warn!(job_id = %watch.job_id(), error = %e, "Skipping unreadable snapshot")
                    }
                }
            },
        };

        let event = match Event::default().event(RECORD_EVENT).json_data(&record) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(job_id = %record.job_id, error = %e, "Failed to encode snapshot");
                Event::default().event(RECORD_EVENT).comment("encoding failed")
            }
        };
        let next = (!record.is_terminal()).then_some((None, watch));
        Some((Ok(event), next))
    })
}
