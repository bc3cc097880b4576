//! Cooperative scheduler for the logical threads of one execution context.
//!
//! Threads are plain futures. A thread that returns `Pending` is `Blocked` and stamped
//! with a monotonically increasing `since` value. Wakeups are only collected; when the
//! scheduler looks for work it moves woken threads to the run queue sorted by `since`,
//! so resumption order is the order in which threads blocked, not the order in which
//! their conditions resolved. Exactly one thread is polled at a time and the host
//! regains control as soon as nothing is runnable.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Wake, Waker};

pub(crate) type ThreadFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Runnable,
    Blocked { since: u64 },
    Completed,
}

/// A logical thread panicked while being polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadPanic {
    pub thread: ThreadId,
    pub message: String,
}

struct LogicalThread {
    future: ThreadFuture,
    state: ThreadState,
    waker: Waker,
}

struct ThreadWaker {
    id: ThreadId,
    woken: Arc<Mutex<Vec<ThreadId>>>,
}

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.woken
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.id);
    }
}

pub struct DeterministicScheduler {
    threads: BTreeMap<ThreadId, LogicalThread>,
    completed: Vec<ThreadId>,
    run_queue: VecDeque<ThreadId>,
    woken: Arc<Mutex<Vec<ThreadId>>>,
    next_thread: u64,
    block_clock: u64,
}

impl Default for DeterministicScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl DeterministicScheduler {
    pub fn new() -> Self {
        Self {
            threads: BTreeMap::new(),
            completed: Vec::new(),
            run_queue: VecDeque::new(),
            woken: Arc::new(Mutex::new(Vec::new())),
            next_thread: 0,
            block_clock: 0,
        }
    }

    /// Add a runnable thread at the back of the run queue.
    pub(crate) fn spawn(&mut self, future: ThreadFuture) -> ThreadId {
        let id = ThreadId(self.next_thread);
        self.next_thread += 1;
        let waker = Waker::from(Arc::new(ThreadWaker {
            id,
            woken: Arc::clone(&self.woken),
        }));
        self.threads.insert(
            id,
            LogicalThread {
                future,
                state: ThreadState::Runnable,
                waker,
            },
        );
        self.run_queue.push_back(id);
        id
    }

    pub fn state(&self, id: ThreadId) -> Option<ThreadState> {
        if self.completed.contains(&id) {
            return Some(ThreadState::Completed);
        }
        self.threads.get(&id).map(|t| t.state)
    }

    /// Threads that have not completed.
    pub fn live_threads(&self) -> usize {
        self.threads.len()
    }

    /// Poll runnable threads one at a time until none is runnable.
    ///
    /// `adopt` is consulted before every poll and returns threads spawned by workflow
    /// code since the last call; they join the back of the run queue in spawn order.
    pub(crate) fn run_until_blocked(
        &mut self,
        adopt: &mut dyn FnMut() -> Vec<ThreadFuture>,
    ) -> Result<(), ThreadPanic> {
        loop {
            for future in adopt() {
                self.spawn(future);
            }
            self.collect_woken();

            let Some(id) = self.run_queue.pop_front() else {
                return Ok(());
            };
            let Some(thread) = self.threads.get_mut(&id) else {
                continue;
            };

            let waker = thread.waker.clone();
            let mut cx = Context::from_waker(&waker);
            let polled = catch_unwind(AssertUnwindSafe(|| thread.future.as_mut().poll(&mut cx)));
            match polled {
                Ok(Poll::Ready(())) => {
                    self.threads.remove(&id);
                    self.completed.push(id);
                }
                Ok(Poll::Pending) => {
                    thread.state = ThreadState::Blocked {
                        since: self.block_clock,
                    };
                    self.block_clock += 1;
                }
                Err(payload) => {
                    self.threads.remove(&id);
                    self.completed.push(id);
                    return Err(ThreadPanic {
                        thread: id,
                        message: panic_message(payload.as_ref()),
                    });
                }
            }
        }
    }

    fn collect_woken(&mut self) {
        let woken = std::mem::take(&mut *self.woken.lock().unwrap_or_else(PoisonError::into_inner));
        let mut ready: Vec<(u64, ThreadId)> = Vec::new();
        for id in woken {
            if let Some(thread) = self.threads.get_mut(&id)
                && let ThreadState::Blocked { since } = thread.state
            {
                thread.state = ThreadState::Runnable;
                ready.push((since, id));
            }
        }
        ready.sort_unstable();
        self.run_queue.extend(ready.into_iter().map(|(_, id)| id));
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
