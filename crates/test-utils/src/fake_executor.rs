use std::sync::{Arc, Mutex};

use cmdwatch::errors::Result;
use cmdwatch::exec::{BoxFuture, ExecutorBackend, ShellJob};

/// An executor backend that only records submitted jobs.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    jobs: Arc<Mutex<Vec<ShellJob>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<ShellJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.jobs().into_iter().map(|j| j.line).collect()
    }
}

impl ExecutorBackend for RecordingBackend {
    fn submit(&mut self, job: ShellJob) -> BoxFuture<'_, Result<()>> {
        let jobs = Arc::clone(&self.jobs);
        Box::pin(async move {
            jobs.lock().unwrap().push(job);
            Ok(())
        })
    }
}
