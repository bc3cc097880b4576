//! Per-child state machine of one parent execution.
//!
//! ```text
//! Starting --started--> Running
//! Starting | Running --> Completed | Failed | Cancelled | TimedOut
//! ```
//!
//! Terminal states are one-way. Any other transition means history does not belong to
//! this code and is reported as [`LifecycleError`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::WorkflowError;
use crate::futures::FutureId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildState {
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl ChildState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChildState::Completed | ChildState::Failed | ChildState::Cancelled | ChildState::TimedOut
        )
    }
}

#[derive(Debug, Clone)]
pub struct ChildWorkflowExecution {
    pub seq: u64,
    pub workflow_type: String,
    pub method: String,
    pub workflow_id: String,
    pub run_id: Option<String>,
    pub state: ChildState,
    pub result: Option<Result<String, WorkflowError>>,
    pub detached: bool,
    pub cancel_requested: bool,
    pub(crate) future: FutureId,
}

impl ChildWorkflowExecution {
    pub(crate) fn new(
        seq: u64,
        workflow_type: &str,
        method: &str,
        workflow_id: &str,
        future: FutureId,
        detached: bool,
    ) -> Self {
        Self {
            seq,
            workflow_type: workflow_type.to_string(),
            method: method.to_string(),
            workflow_id: workflow_id.to_string(),
            run_id: None,
            state: ChildState::Starting,
            result: None,
            detached,
            cancel_requested: false,
            future,
        }
    }
}

/// Input that moves a child through its state machine.
#[derive(Debug, Clone)]
pub enum ChildTransition {
    Started { run_id: String },
    StartFailed { cause: WorkflowError },
    Completed { result: String },
    Failed { cause: WorkflowError },
    Cancelled { reason: String },
    TimedOut,
}

impl ChildTransition {
    fn name(&self) -> &'static str {
        match self {
            ChildTransition::Started { .. } => "started",
            ChildTransition::StartFailed { .. } => "start failed",
            ChildTransition::Completed { .. } => "completed",
            ChildTransition::Failed { .. } => "failed",
            ChildTransition::Cancelled { .. } => "cancelled",
            ChildTransition::TimedOut => "timed out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("no child workflow with seq {seq}")]
    UnknownChild { seq: u64 },
    #[error("child workflow seq {seq} cannot go from {from:?} to {to}")]
    InvalidTransition {
        seq: u64,
        from: ChildState,
        to: &'static str,
    },
}

#[derive(Debug, Default)]
pub struct ChildLifecycleManager {
    children: BTreeMap<u64, ChildWorkflowExecution>,
}

impl ChildLifecycleManager {
    pub(crate) fn register(&mut self, child: ChildWorkflowExecution) {
        self.children.insert(child.seq, child);
    }

    pub fn get(&self, seq: u64) -> Option<&ChildWorkflowExecution> {
        self.children.get(&seq)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChildWorkflowExecution> {
        self.children.values()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn mark_detached(&mut self, seq: u64) {
        if let Some(child) = self.children.get_mut(&seq) {
            child.detached = true;
        }
    }

    /// Apply `transition` to child `seq`. On a terminal transition returns the future
    /// to resolve and the outcome its awaiter observes.
    pub(crate) fn apply(
        &mut self,
        seq: u64,
        transition: ChildTransition,
    ) -> Result<Option<(FutureId, Result<String, WorkflowError>)>, LifecycleError> {
        let child = self
            .children
            .get_mut(&seq)
            .ok_or(LifecycleError::UnknownChild { seq })?;
        let invalid = |from| LifecycleError::InvalidTransition {
            seq,
            from,
            to: transition.name(),
        };

        let (next, outcome) = match (child.state, &transition) {
            (ChildState::Starting, ChildTransition::Started { run_id }) => {
                child.run_id = Some(run_id.clone());
                child.state = ChildState::Running;
                return Ok(None);
            }
            (from, ChildTransition::Started { .. }) => return Err(invalid(from)),
            (from, _) if from.is_terminal() => return Err(invalid(from)),
            (ChildState::Starting, ChildTransition::StartFailed { cause }) => (
                ChildState::Failed,
                Err(WorkflowError::ChildWorkflowFailure {
                    workflow_type: child.workflow_type.clone(),
                    workflow_id: child.workflow_id.clone(),
                    cause: Box::new(cause.clone()),
                }),
            ),
            (from, ChildTransition::StartFailed { .. }) => return Err(invalid(from)),
            (_, ChildTransition::Completed { result }) => (ChildState::Completed, Ok(result.clone())),
            (_, ChildTransition::Failed { cause }) => (
                ChildState::Failed,
                Err(WorkflowError::ChildWorkflowFailure {
                    workflow_type: child.workflow_type.clone(),
                    workflow_id: child.workflow_id.clone(),
                    cause: Box::new(cause.clone()),
                }),
            ),
            (_, ChildTransition::Cancelled { reason }) => (
                ChildState::Cancelled,
                Err(WorkflowError::ChildWorkflowCancelled {
                    workflow_type: child.workflow_type.clone(),
                    workflow_id: child.workflow_id.clone(),
                    reason: reason.clone(),
                }),
            ),
            (_, ChildTransition::TimedOut) => (
                ChildState::TimedOut,
                Err(WorkflowError::ChildWorkflowTimeout {
                    workflow_type: child.workflow_type.clone(),
                    workflow_id: child.workflow_id.clone(),
                }),
            ),
        };

        child.state = next;
        child.result = Some(outcome.clone());
        Ok(Some((child.future, outcome)))
    }

    /// Attached children that have not reached a terminal state, in start order.
    pub fn pending_attached(&self) -> impl Iterator<Item = &ChildWorkflowExecution> {
        self.children
            .values()
            .filter(|c| !c.detached && !c.state.is_terminal())
    }

    /// Flag every pending attached child for cancellation and return the ones newly
    /// flagged, in start order.
    pub(crate) fn request_cancel_attached(&mut self) -> Vec<(u64, String)> {
        self.children
            .values_mut()
            .filter(|c| !c.detached && !c.state.is_terminal() && !c.cancel_requested)
            .map(|c| {
                c.cancel_requested = true;
                (c.seq, c.workflow_id.clone())
            })
            .collect()
    }
}
