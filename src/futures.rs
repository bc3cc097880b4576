use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use crate::WorkflowContext;
use crate::errors::WorkflowError;
use crate::runtime::children::ChildState;

pub(crate) type FutureId = u64;

/// What an [`AsyncFuture`] is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureKind {
    Child { seq: u64 },
    Timer { seq: u64 },
    Thread,
    /// Resolved at creation, e.g. a call to an undeclared method.
    Immediate,
}

struct FutureSlot {
    result: Option<Result<String, WorkflowError>>,
    continuations: Vec<Waker>,
}

/// Result slots of every future created by one execution context.
#[derive(Default)]
pub(crate) struct FutureTable {
    slots: BTreeMap<FutureId, FutureSlot>,
    next_id: FutureId,
}

impl FutureTable {
    pub(crate) fn create(&mut self) -> FutureId {
        self.next_id += 1;
        let id = self.next_id;
        self.slots.insert(
            id,
            FutureSlot {
                result: None,
                continuations: Vec::new(),
            },
        );
        id
    }

    /// Resolve `id` once and wake its continuations in registration order. Returns
    /// false if the slot was already resolved or does not exist.
    pub(crate) fn resolve(&mut self, id: FutureId, result: Result<String, WorkflowError>) -> bool {
        let Some(slot) = self.slots.get_mut(&id) else {
            return false;
        };
        if slot.result.is_some() {
            return false;
        }
        slot.result = Some(result);
        for waker in slot.continuations.drain(..) {
            waker.wake();
        }
        true
    }

    pub(crate) fn is_resolved(&self, id: FutureId) -> bool {
        self.slots.get(&id).is_some_and(|s| s.result.is_some())
    }

    pub(crate) fn poll_slot(&mut self, id: FutureId, waker: &Waker) -> Poll<Result<String, WorkflowError>> {
        let Some(slot) = self.slots.get_mut(&id) else {
            return Poll::Ready(Err(WorkflowError::application(format!("unknown future {id}"))));
        };
        if let Some(result) = &slot.result {
            return Poll::Ready(result.clone());
        }
        if !slot.continuations.iter().any(|w| w.will_wake(waker)) {
            slot.continuations.push(waker.clone());
        }
        Poll::Pending
    }
}

/// Handle to the eventual result of a child workflow, timer or logical thread.
///
/// Awaiting suspends only the current logical thread. Clones share one result slot,
/// so several threads may await the same child; all of them observe the same value.
#[derive(Clone)]
pub struct AsyncFuture {
    id: FutureId,
    kind: FutureKind,
    ctx: WorkflowContext,
}

impl AsyncFuture {
    pub(crate) fn new(id: FutureId, kind: FutureKind, ctx: WorkflowContext) -> Self {
        Self { id, kind, ctx }
    }

    pub(crate) fn failed(ctx: WorkflowContext, error: WorkflowError) -> Self {
        let id = {
            let mut st = ctx.lock();
            let id = st.futures.create();
            st.futures.resolve(id, Err(error));
            id
        };
        Self::new(id, FutureKind::Immediate, ctx)
    }

    pub fn kind(&self) -> FutureKind {
        self.kind
    }

    pub fn is_ready(&self) -> bool {
        self.ctx.lock().futures.is_resolved(self.id)
    }

    /// Decode the payload as `T` once resolved.
    pub fn typed<T: DeserializeOwned>(self) -> TypedFuture<T> {
        TypedFuture {
            inner: self,
            _marker: PhantomData,
        }
    }

    /// Detach the child behind this future: parent cancellation will no longer reach
    /// it. No effect for timers and threads.
    pub fn abandon(&self) {
        if let FutureKind::Child { seq } = self.kind {
            self.ctx.lock().children.mark_detached(seq);
        }
    }

    pub fn child_state(&self) -> Option<ChildState> {
        match self.kind {
            FutureKind::Child { seq } => self.ctx.lock().children.get(seq).map(|c| c.state),
            _ => None,
        }
    }

    pub fn child_workflow_id(&self) -> Option<String> {
        match self.kind {
            FutureKind::Child { seq } => self.ctx.lock().children.get(seq).map(|c| c.workflow_id.clone()),
            _ => None,
        }
    }

    /// Known once the backend acknowledged the start.
    pub fn child_run_id(&self) -> Option<String> {
        match self.kind {
            FutureKind::Child { seq } => self.ctx.lock().children.get(seq).and_then(|c| c.run_id.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for AsyncFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFuture")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Future for AsyncFuture {
    type Output = Result<String, WorkflowError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.ctx.lock().futures.poll_slot(self.id, cx.waker())
    }
}

/// [`AsyncFuture`] whose payload is decoded with the context's converter.
pub struct TypedFuture<T> {
    inner: AsyncFuture,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedFuture<T> {
    pub fn untyped(&self) -> &AsyncFuture {
        &self.inner
    }
}

impl<T: DeserializeOwned> Future for TypedFuture<T> {
    type Output = Result<T, WorkflowError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(Ok(payload)) => Poll::Ready(self.inner.ctx.decode(&payload)),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}
