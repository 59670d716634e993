//! Best-effort removal of a partially created remote item.
//!
//! Cleanup works exclusively through task cancellation; the server
//! garbage-collects the orphaned item once its import tasks are cancelled.
//! Nothing in here propagates an error: cleanup runs on a failure path and
//! must not mask the failure that triggered it.

use std::sync::Arc;
use std::time::Duration;

use cloudlift_api::types::{self, UploadEntity};
use cloudlift_api::{Task, Transport};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Polls for the import task to appear at most this many times.
const MAX_TASK_POLLS: u32 = 12;

/// Cancels every import task owned by the provisional entity.
///
/// Polls the entity until it exposes at least one task, then issues one
/// cancel per task. Tasks are matched on the entity's unique id, not its
/// display name, since concurrent uploads may share a name.
pub(crate) async fn cancel_entity_tasks(
    transport: &Arc<dyn Transport>,
    entity: &UploadEntity,
    poll: Duration,
) {
    for attempt in 0..MAX_TASK_POLLS {
        let current = match fetch_entity(transport, &entity.href).await {
            Ok(current) => current,
            Err(err) => {
                warn!(href = %entity.href, error = %err, "cleanup: failed to read entity");
                return;
            }
        };

        if !current.tasks.task.is_empty() {
            for body in current.tasks.task {
                if let Some(owner) = &body.owner {
                    if !entity.id.is_empty() && !owner.id.is_empty() && owner.id != entity.id {
                        continue;
                    }
                }
                let href = body.href.clone();
                let task = Task::new(Arc::clone(transport), body);
                match task.cancel().await {
                    Ok(()) => debug!(task = %href, "cleanup: cancelled import task"),
                    Err(err) => {
                        warn!(task = %href, error = %err, "cleanup: failed to cancel import task");
                    }
                }
            }
            return;
        }

        debug!(href = %entity.href, attempt, "cleanup: waiting for import task to appear");
        sleep(poll).await;
    }

    warn!(href = %entity.href, "cleanup: no import task appeared, leaving orphaned item");
}

async fn fetch_entity(
    transport: &Arc<dyn Transport>,
    href: &str,
) -> Result<UploadEntity, cloudlift_api::ApiError> {
    let xml = transport.get(href).await?;
    types::parse(&xml)
}
