//! Handle over one server-side asynchronous job, driven by polling.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, trace};

use crate::ApiError;
use crate::transport::Transport;
use crate::types::{self, TaskBody, TaskStatus};

/// Errors produced while driving a remote task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("task has no href to poll")]
    MissingHref,

    #[error("task failed ({major}/{minor}): {message}")]
    Failed {
        major: i32,
        minor: String,
        message: String,
    },

    #[error("task did not reach a terminal state within {0:?}")]
    Timeout(Duration),
}

/// A server-side asynchronous job reference.
///
/// The local representation is only ever mutated by [`refresh`](Task::refresh),
/// which replaces the whole body.
pub struct Task {
    transport: Arc<dyn Transport>,
    body: TaskBody,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

impl Task {
    pub fn new(transport: Arc<dyn Transport>, body: TaskBody) -> Self {
        Self { transport, body }
    }

    pub fn body(&self) -> &TaskBody {
        &self.body
    }

    pub fn status(&self) -> TaskStatus {
        self.body.status
    }

    /// Re-reads the task from the server.
    ///
    /// The whole body is replaced, never merged: merging nested collections
    /// across repeated polls would accumulate duplicate entries.
    pub async fn refresh(&mut self) -> Result<(), TaskError> {
        if self.body.href.is_empty() {
            return Err(TaskError::MissingHref);
        }
        let xml = self.transport.get(&self.body.href).await?;
        self.body = types::parse(&xml)?;
        trace!(href = %self.body.href, status = ?self.body.status, "task refreshed");
        Ok(())
    }

    /// Polls until the task reaches a terminal state.
    ///
    /// Returns `Ok(())` on `success`, [`TaskError::Failed`] with the
    /// server-reported codes on `error`, and [`TaskError::Timeout`] when a
    /// `deadline` is given and elapses first.
    pub async fn wait_completion(
        &mut self,
        poll: Duration,
        deadline: Option<Duration>,
    ) -> Result<(), TaskError> {
        self.wait_inspect(poll, deadline, |_, _| {}).await
    }

    /// Like [`wait_completion`](Task::wait_completion), invoking `on_poll`
    /// after every refresh. The second argument is `true` exactly once, on
    /// the terminal poll.
    pub async fn wait_inspect(
        &mut self,
        poll: Duration,
        deadline: Option<Duration>,
        mut on_poll: impl FnMut(&TaskBody, bool),
    ) -> Result<(), TaskError> {
        let started = Instant::now();
        loop {
            self.refresh().await?;
            if self.body.status.is_terminal() {
                on_poll(&self.body, true);
                return self.terminal_result();
            }
            on_poll(&self.body, false);

            if let Some(limit) = deadline {
                if started.elapsed() >= limit {
                    return Err(TaskError::Timeout(limit));
                }
            }
            debug!(href = %self.body.href, status = ?self.body.status, "task not terminal yet");
            sleep(poll).await;
        }
    }

    /// Requests cancellation of the remote job.
    ///
    /// Best-effort: the job may already be past a cancellable phase, and a
    /// cancel error does not change the job's observed state.
    pub async fn cancel(&self) -> Result<(), TaskError> {
        if self.body.href.is_empty() {
            return Err(TaskError::MissingHref);
        }
        let href = format!("{}/action/cancel", self.body.href);
        self.transport
            .post(&href, "application/xml", String::new())
            .await?;
        Ok(())
    }

    /// Refreshes and returns the server-reported completion percentage.
    ///
    /// Fails with the task's fault when the task is in the error state.
    pub async fn progress_percent(&mut self) -> Result<i32, TaskError> {
        self.refresh().await?;
        if self.body.status == TaskStatus::Error {
            self.terminal_result()?;
        }
        Ok(self.body.progress)
    }

    fn terminal_result(&self) -> Result<(), TaskError> {
        if self.body.status != TaskStatus::Error {
            return Ok(());
        }
        let fault = self.body.error.clone().unwrap_or_default();
        Err(TaskError::Failed {
            major: fault.major_error_code,
            minor: fault.minor_error_code,
            message: fault.message,
        })
    }
}
