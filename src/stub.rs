//! Workflow interfaces, child stubs and method references.
//!
//! There is no runtime reflection: an interface is declared once with its workflow
//! methods, and a stub dispatches by looking the method name up in that declaration.
//! A [`MethodRef`] carries its [`Eligibility`] from the moment it is created, so
//! [`invoke_async`] only inspects a field before deciding whether to start a child.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::Duration;

use crate::WorkflowContext;
use crate::errors::{IneligibleReferenceError, WorkflowError};
use crate::futures::{AsyncFuture, TypedFuture};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodKind {
    /// Entry point of a workflow execution; invoking it starts a child.
    Workflow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSignature {
    pub name: String,
    pub kind: MethodKind,
}

/// Declared capability set of a workflow type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowInterface {
    name: String,
    methods: Vec<MethodSignature>,
}

impl WorkflowInterface {
    pub fn builder(name: impl Into<String>) -> WorkflowInterfaceBuilder {
        WorkflowInterfaceBuilder {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Workflow type name used on the wire and in the worker registry.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodSignature] {
        &self.methods
    }

    pub fn method(&self, name: &str) -> Option<&MethodSignature> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.method(name).is_some()
    }
}

pub struct WorkflowInterfaceBuilder {
    name: String,
    methods: Vec<MethodSignature>,
}

impl WorkflowInterfaceBuilder {
    /// Declare a workflow method. Declaring the same name twice keeps the first.
    pub fn workflow_method(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.methods.iter().any(|m| m.name == name) {
            self.methods.push(MethodSignature {
                name,
                kind: MethodKind::Workflow,
            });
        }
        self
    }

    pub fn build(self) -> WorkflowInterface {
        WorkflowInterface {
            name: self.name,
            methods: self.methods,
        }
    }
}

/// Options for children started through a [`WorkflowStub`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildWorkflowOptions {
    /// Defaults to `"{parent_id}::{seq}"`.
    pub workflow_id: Option<String>,
    /// Defaults to the parent's task queue.
    pub task_queue: Option<String>,
    /// The backend times the child out after this long.
    pub execution_timeout: Option<Duration>,
    /// Detached children are not cancelled with their parent.
    pub detached: bool,
}

struct StubBinding {
    ctx: WorkflowContext,
    interface: WorkflowInterface,
    options: ChildWorkflowOptions,
}

impl StubBinding {
    fn start<A: Serialize + ?Sized>(&self, method: &str, args: &A) -> AsyncFuture {
        if !self.interface.declares(method) {
            return AsyncFuture::failed(
                self.ctx.clone(),
                WorkflowError::UnknownMethod {
                    interface: self.interface.name().to_string(),
                    method: method.to_string(),
                },
            );
        }
        match self.ctx.encode(args) {
            Ok(input) => self.ctx.start_child(&self.interface, method, &self.options, input),
            Err(e) => AsyncFuture::failed(self.ctx.clone(), e),
        }
    }
}

/// Proxy for starting children of one workflow interface. Holds no execution state;
/// every invocation issues exactly one start command at call time.
#[derive(Clone)]
pub struct WorkflowStub {
    binding: Arc<StubBinding>,
}

impl WorkflowStub {
    pub(crate) fn new(ctx: WorkflowContext, interface: WorkflowInterface, options: ChildWorkflowOptions) -> Self {
        Self {
            binding: Arc::new(StubBinding {
                ctx,
                interface,
                options,
            }),
        }
    }

    pub fn interface(&self) -> &WorkflowInterface {
        &self.binding.interface
    }

    pub fn options(&self) -> &ChildWorkflowOptions {
        &self.binding.options
    }

    /// Start the child and return a future for its typed result. Awaiting it right
    /// away is a direct call; an undeclared method yields `UnknownMethod` and issues
    /// no command.
    pub fn call<A, T>(&self, method: &str, args: &A) -> TypedFuture<T>
    where
        A: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.binding.start(method, args).typed()
    }

    /// A reference to `method`, eligible for [`invoke_async`] if declared.
    pub fn method(&self, name: &str) -> MethodRef {
        let eligibility = match self.binding.interface.method(name) {
            Some(MethodSignature {
                kind: MethodKind::Workflow,
                ..
            }) => Eligibility::Eligible,
            None => Eligibility::Ineligible {
                reason: format!("{} declares no method {name}", self.binding.interface.name()),
            },
        };
        MethodRef {
            name: name.to_string(),
            eligibility,
            binding: Some(Arc::clone(&self.binding)),
        }
    }
}

impl std::fmt::Debug for WorkflowStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowStub")
            .field("interface", &self.binding.interface.name())
            .field("options", &self.binding.options)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Ineligible { reason: String },
}

/// A method reference captured for later invocation.
#[derive(Clone)]
pub struct MethodRef {
    name: String,
    eligibility: Eligibility,
    binding: Option<Arc<StubBinding>>,
}

impl MethodRef {
    /// Reference to a method of an ordinary object. Never eligible.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            eligibility: Eligibility::Ineligible {
                reason: "not obtained from a workflow stub".to_string(),
            },
            binding: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn eligibility(&self) -> &Eligibility {
        &self.eligibility
    }

    pub fn is_async_eligible(&self) -> bool {
        self.eligibility == Eligibility::Eligible
    }
}

impl std::fmt::Debug for MethodRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRef")
            .field("name", &self.name)
            .field("eligibility", &self.eligibility)
            .finish()
    }
}

/// Start the child behind `method` and return its future without suspending.
///
/// Issues exactly the command a direct [`WorkflowStub::call`] would issue.
pub fn invoke_async<A: Serialize + ?Sized>(
    method: &MethodRef,
    args: &A,
) -> Result<AsyncFuture, IneligibleReferenceError> {
    let binding = match (&method.eligibility, &method.binding) {
        (Eligibility::Eligible, Some(binding)) => binding,
        (Eligibility::Ineligible { reason }, _) => {
            return Err(IneligibleReferenceError {
                method: method.name.clone(),
                reason: reason.clone(),
            });
        }
        (Eligibility::Eligible, None) => {
            return Err(IneligibleReferenceError {
                method: method.name.clone(),
                reason: "reference is not bound to a stub".to_string(),
            });
        }
    };
    Ok(binding.start(&method.name, args))
}
