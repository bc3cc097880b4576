//! In-process test environment: an [`InMemoryBackend`], workers and a client wired
//! to the same data converter.

use std::sync::Arc;

use crate::backend::{Backend, InMemoryBackend};
use crate::client::WorkflowClient;
use crate::converter::{DataConverter, default_converter};
use crate::runtime::{Worker, WorkerHandle, WorkerOptions};

#[derive(Clone)]
pub struct TestEnvironmentOptions {
    pub data_converter: Arc<dyn DataConverter>,
    pub worker_options: WorkerOptions,
}

impl Default for TestEnvironmentOptions {
    fn default() -> Self {
        Self {
            data_converter: default_converter(),
            worker_options: WorkerOptions::default(),
        }
    }
}

pub struct TestWorkflowEnvironment {
    backend: Arc<InMemoryBackend>,
    options: TestEnvironmentOptions,
    pending: Vec<Worker>,
    running: Vec<WorkerHandle>,
}

impl TestWorkflowEnvironment {
    pub fn new(options: TestEnvironmentOptions) -> Self {
        crate::logging::init_default_subscriber();
        Self {
            backend: Arc::new(InMemoryBackend::new()),
            options,
            pending: Vec::new(),
            running: Vec::new(),
        }
    }

    /// Create a worker for `task_queue`. It starts polling on [`Self::start`].
    pub fn new_worker(&mut self, task_queue: &str) -> &mut Worker {
        let backend: Arc<dyn Backend> = self.backend.clone();
        self.pending.push(Worker::new(
            backend,
            task_queue,
            Arc::clone(&self.options.data_converter),
            self.options.worker_options.clone(),
        ));
        let last = self.pending.len() - 1;
        &mut self.pending[last]
    }

    /// Start every worker created since the last call.
    pub fn start(&mut self) {
        for worker in self.pending.drain(..) {
            self.running.push(worker.start());
        }
    }

    pub fn client(&self) -> WorkflowClient {
        let backend: Arc<dyn Backend> = self.backend.clone();
        WorkflowClient::new(backend, Arc::clone(&self.options.data_converter))
    }

    pub fn backend(&self) -> Arc<InMemoryBackend> {
        Arc::clone(&self.backend)
    }

    pub async fn shutdown(self) {
        for handle in self.running {
            handle.shutdown().await;
        }
    }
}
