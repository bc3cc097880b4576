//! Workflow implementations and the per-queue registry a worker dispatches from.

use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::{FnWorkflow, WorkflowHandler};
use crate::errors::{RegistryError, WorkflowError};
use crate::stub::WorkflowInterface;
use crate::WorkflowContext;

/// Handlers for every workflow method of one interface.
pub struct WorkflowImplementation {
    interface: WorkflowInterface,
    methods: HashMap<String, Arc<dyn WorkflowHandler>>,
}

impl WorkflowImplementation {
    pub fn builder(interface: &WorkflowInterface) -> WorkflowImplementationBuilder {
        WorkflowImplementationBuilder {
            interface: interface.clone(),
            methods: HashMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn interface(&self) -> &WorkflowInterface {
        &self.interface
    }

    pub fn handler(&self, method: &str) -> Option<Arc<dyn WorkflowHandler>> {
        self.methods.get(method).cloned()
    }
}

pub struct WorkflowImplementationBuilder {
    interface: WorkflowInterface,
    methods: HashMap<String, Arc<dyn WorkflowHandler>>,
    errors: Vec<RegistryError>,
}

impl WorkflowImplementationBuilder {
    /// Register a handler over raw payload strings.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(WorkflowContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, WorkflowError>> + Send + 'static,
    {
        let name = name.into();
        if !self.interface.declares(&name) {
            self.errors.push(RegistryError::UndeclaredMethod {
                interface: self.interface.name().to_string(),
                method: name,
            });
            return self;
        }
        self.methods.insert(name, Arc::new(FnWorkflow(f)));
        self
    }

    /// Register a typed handler. Input that fails to decode fails the workflow with
    /// `WorkflowError::DataConversion` before `f` runs.
    pub fn method_typed<In, Out, F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        In: DeserializeOwned + Send + 'static,
        Out: Serialize + Send + 'static,
        F: Fn(WorkflowContext, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, WorkflowError>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.method(name, move |ctx: WorkflowContext, input: String| {
            let f = Arc::clone(&f);
            async move {
                let typed: In = ctx.decode(&input)?;
                let out = f(ctx.clone(), typed).await?;
                ctx.encode(&out)
            }
        })
    }

    pub fn build(self) -> Result<WorkflowImplementation, RegistryError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        if let Some(missing) = self
            .interface
            .methods()
            .iter()
            .find(|m| !self.methods.contains_key(&m.name))
        {
            return Err(RegistryError::MissingMethod {
                interface: self.interface.name().to_string(),
                method: missing.name.clone(),
            });
        }
        Ok(WorkflowImplementation {
            interface: self.interface,
            methods: self.methods,
        })
    }
}

/// Implementations registered on one task queue, keyed by interface name.
#[derive(Default)]
pub struct WorkflowRegistry {
    task_queue: String,
    inner: HashMap<String, Arc<WorkflowImplementation>>,
}

impl WorkflowRegistry {
    pub fn new(task_queue: impl Into<String>) -> Self {
        Self {
            task_queue: task_queue.into(),
            inner: HashMap::new(),
        }
    }

    pub fn register(&mut self, implementation: WorkflowImplementation) -> Result<(), RegistryError> {
        let name = implementation.interface().name().to_string();
        if self.inner.contains_key(&name) {
            return Err(RegistryError::Duplicate {
                interface: name,
                task_queue: self.task_queue.clone(),
            });
        }
        self.inner.insert(name, Arc::new(implementation));
        Ok(())
    }

    pub fn resolve(&self, workflow_type: &str, method: &str) -> Option<Arc<dyn WorkflowHandler>> {
        let handler = self.inner.get(workflow_type).and_then(|i| i.handler(method));
        if handler.is_none() {
            self.log_registry_miss(workflow_type, method);
        }
        handler
    }

    pub fn has(&self, workflow_type: &str) -> bool {
        self.inner.contains_key(workflow_type)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Registered interface names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.keys().cloned().collect();
        names.sort();
        names
    }

    fn log_registry_miss(&self, workflow_type: &str, method: &str) {
        tracing::debug!(
            target: "durochild::runtime::registry",
            task_queue = %self.task_queue,
            workflow_type,
            method,
            registered = ?self.names(),
            "workflow not found in registry"
        );
    }
}
