use std::future::Future;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, Instrument};

#[derive(Debug, thiserror::Error)]
pub enum LivenessCheckError {
    #[error("Liveness of job '{job}' could not be determined: {reason}")]
    Unavailable { job: String, reason: String },
}

/// Starts harvest runs and reports whether the last one is still executing.
pub trait JobLauncher: Send {
    /// Start a run as an independent unit of work and return immediately.
    fn launch(&mut self);

    fn liveness(&mut self) -> Result<bool, LivenessCheckError>;
}

/// Launches each run as a detached tokio task and keeps its handle to answer
/// liveness queries.
pub struct TaskLauncher<F> {
    job_name: String,
    make_run: F,
    handle: Option<JoinHandle<()>>,
}

impl<F, Fut> TaskLauncher<F>
where
    F: Fn() -> Fut + Send,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(job_name: impl Into<String>, make_run: F) -> Self {
        Self {
            job_name: job_name.into(),
            make_run,
            handle: None,
        }
    }
}

impl<F, Fut> JobLauncher for TaskLauncher<F>
where
    F: Fn() -> Fut + Send,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn launch(&mut self) {
        let span = info_span!("harvest_run", job = %self.job_name);
        debug!("Spawning {} run", self.job_name);
        self.handle = Some(tokio::spawn((self.make_run)().instrument(span)));
    }

    fn liveness(&mut self) -> Result<bool, LivenessCheckError> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(false);
        };

        if !handle.is_finished() {
            return Ok(true);
        }

        // Reap the finished task so a panic inside the run gets logged.
        if let Some(Err(e)) = handle.now_or_never() {
            error!("{} run terminated abnormally: {}", self.job_name, e);
        }
        self.handle = None;
        Ok(false)
    }
}
