// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Tasks, their result slots and the handles callers wait on

use crate::error::TaskError;
use crate::pool::PoolConfig;
use crate::spatial::{cell_pool, CellPool};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Unique id of a submitted task
pub type TaskId = u64;

/// Kind of work; each category has its own sub-pool of workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    /// Force layout ticks and chunks
    Layout,
    /// General physics work
    Physics,
    /// Read-only analysis of layout results
    Analysis,
}

impl TaskCategory {
    /// Every category
    pub const ALL: [TaskCategory; 3] = [TaskCategory::Layout, TaskCategory::Physics, TaskCategory::Analysis];

    /// Lower-case name used in thread names and logs
    pub fn as_str(self) -> &'static str {
        match self {
            TaskCategory::Layout => "layout",
            TaskCategory::Physics => "physics",
            TaskCategory::Analysis => "analysis",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority; higher runs first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work
    Low,
    /// Default
    #[default]
    Normal,
    /// Latency sensitive
    High,
    /// Runs ahead of everything else
    Critical,
}

/// Per-thread state handed to every payload
///
/// Each worker thread owns one context, so the cell pool inside it is never
/// shared between threads.
pub struct WorkerContext {
    name: String,
    category: TaskCategory,
    cells: CellPool,
    tasks_run: u64,
}

impl WorkerContext {
    pub(crate) fn new(name: String, category: TaskCategory, cells: PoolConfig) -> Self {
        WorkerContext {
            name,
            category,
            cells: cell_pool(cells),
            tasks_run: 0,
        }
    }

    /// Name of the worker thread
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Category the worker serves
    pub fn category(&self) -> TaskCategory {
        self.category
    }

    /// This thread's octree cell pool
    pub fn cell_pool(&mut self) -> &mut CellPool {
        &mut self.cells
    }

    /// Tasks this worker has started, including the current one
    pub fn tasks_run(&self) -> u64 {
        self.tasks_run
    }

    pub(crate) fn begin_task(&mut self) {
        self.tasks_run += 1;
    }
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("tasks_run", &self.tasks_run)
            .finish()
    }
}

/// Work a task performs; may run more than once if its worker faults
pub type Payload<T> = Arc<dyn Fn(&mut WorkerContext) -> Result<T, String> + Send + Sync>;

struct SlotState<T> {
    result: Option<Result<T, TaskError>>,
    resolved: bool,
    waker: Option<Waker>,
}

/// Single-assignment result cell; the first resolution wins
pub(crate) struct ResultSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> ResultSlot<T> {
    pub(crate) fn new() -> Self {
        ResultSlot {
            state: Mutex::new(SlotState {
                result: None,
                resolved: false,
                waker: None,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the result unless one was stored already
    pub(crate) fn complete(&self, result: Result<T, TaskError>) -> bool {
        let mut state = self.lock();
        if state.resolved {
            return false;
        }
        state.resolved = true;
        state.result = Some(result);
        let waker = state.waker.take();
        drop(state);
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.lock().resolved
    }
}

/// Type-erased view of a queued task used by workers and the supervisor
pub(crate) trait Runnable: Send + Sync {
    fn run(&self, ctx: &mut WorkerContext) -> bool;
    fn fail(&self, error: TaskError) -> bool;
    fn is_resolved(&self) -> bool;
}

struct TaskCell<T> {
    id: TaskId,
    payload: Payload<T>,
    slot: Arc<ResultSlot<T>>,
}

impl<T> Drop for TaskCell<T> {
    /// A task dropped without a result can never get one
    fn drop(&mut self) {
        self.slot.complete(Err(TaskError::Cancelled(self.id)));
    }
}

impl<T: Send + 'static> Runnable for TaskCell<T> {
    /// Run the payload; returns whether it succeeded
    fn run(&self, ctx: &mut WorkerContext) -> bool {
        let result = (self.payload)(ctx).map_err(TaskError::Failed);
        let ok = result.is_ok();
        self.slot.complete(result);
        ok
    }

    fn fail(&self, error: TaskError) -> bool {
        self.slot.complete(Err(error))
    }

    fn is_resolved(&self) -> bool {
        self.slot.is_resolved()
    }
}

/// A task as it travels between the pool, workers and the supervisor
#[derive(Clone)]
pub(crate) struct Job {
    pub id: TaskId,
    pub category: TaskCategory,
    pub priority: Priority,
    pub deadline: Option<Instant>,
    /// Submission order, for FIFO within a priority
    pub seq: u64,
    pub attempts: u32,
    pub task: Arc<dyn Runnable>,
}

impl Job {
    pub(crate) fn new<T: Send + 'static>(
        id: TaskId,
        category: TaskCategory,
        priority: Priority,
        deadline: Option<Instant>,
        seq: u64,
        payload: Payload<T>,
    ) -> (Job, TaskHandle<T>) {
        let slot = Arc::new(ResultSlot::new());
        let job = Job {
            id,
            category,
            priority,
            deadline,
            seq,
            attempts: 0,
            task: Arc::new(TaskCell {
                id,
                payload,
                slot: Arc::clone(&slot),
            }),
        };
        (job, TaskHandle { id, deadline, slot })
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.deadline.map_or(false, |d| now >= d)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .field("attempts", &self.attempts)
            .finish()
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    /// Max-heap order: higher priority first, then earlier submission
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Pending result of a submitted task
///
/// Await it, or block with [`TaskHandle::wait`]. A task whose deadline
/// passes resolves as [`TaskError::Timeout`] even if it is still running;
/// a result it produces later is discarded. A task dropped by the pool
/// without running resolves as [`TaskError::Cancelled`].
pub struct TaskHandle<T> {
    id: TaskId,
    deadline: Option<Instant>,
    slot: Arc<ResultSlot<T>>,
}

impl<T> TaskHandle<T> {
    /// A handle with no worker behind it, resolved through the returned slot
    pub(crate) fn detached(id: TaskId) -> (TaskHandle<T>, Arc<ResultSlot<T>>) {
        let slot = Arc::new(ResultSlot::new());
        (
            TaskHandle {
                id,
                deadline: None,
                slot: Arc::clone(&slot),
            },
            slot,
        )
    }

    /// A handle that is already resolved
    pub(crate) fn resolved(id: TaskId, result: Result<T, TaskError>) -> TaskHandle<T> {
        let (handle, slot) = Self::detached(id);
        slot.complete(result);
        handle
    }

    /// Task id
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Deadline, if one was requested
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Check if a result is available
    pub fn is_finished(&self) -> bool {
        self.slot.is_resolved()
    }

    /// Take the result if it is available
    pub fn try_result(&self) -> Option<Result<T, TaskError>> {
        let mut state = self.slot.lock();
        self.expire(&mut state);
        state.result.take()
    }

    /// Block until the task resolves
    pub fn wait(self) -> Result<T, TaskError> {
        let mut state = self.slot.lock();
        loop {
            self.expire(&mut state);
            if state.resolved {
                return state.result.take().unwrap_or(Err(TaskError::Cancelled(self.id)));
            }
            state = match self.deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    self.slot
                        .ready
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .slot
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Block for at most `timeout`
    ///
    /// Returns `None` if the task is still pending; the handle can be waited
    /// on again. A result is only ever returned once.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, TaskError>> {
        let until = Instant::now() + timeout;
        let mut state = self.slot.lock();
        loop {
            self.expire(&mut state);
            if state.resolved {
                return state.result.take();
            }
            let now = Instant::now();
            if now >= until {
                return None;
            }
            let mut wake_at = until;
            if let Some(deadline) = self.deadline {
                wake_at = wake_at.min(deadline);
            }
            state = self
                .slot
                .ready
                .wait_timeout(state, wake_at.saturating_duration_since(now))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Resolve as timed out if the deadline has passed
    fn expire(&self, state: &mut SlotState<T>) {
        if state.resolved {
            return;
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                state.resolved = true;
                state.result = Some(Err(TaskError::Timeout(self.id)));
            }
        }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.slot.lock();
        self.expire(&mut state);
        if state.resolved {
            return Poll::Ready(state.result.take().unwrap_or(Err(TaskError::Cancelled(self.id))));
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;
    use std::thread;

    fn job(priority: Priority, seq: u64) -> Job {
        let payload: Payload<()> = Arc::new(|_| Ok(()));
        Job::new(seq, TaskCategory::Layout, priority, None, seq, payload).0
    }

    #[test]
    fn test_heap_orders_by_priority_then_fifo() {
        let mut heap = BinaryHeap::new();
        heap.push(job(Priority::Low, 0));
        heap.push(job(Priority::High, 1));
        heap.push(job(Priority::Normal, 2));
        heap.push(job(Priority::High, 3));
        heap.push(job(Priority::Critical, 4));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|j| j.seq)).collect();
        assert_eq!(order, vec![4, 1, 3, 2, 0]);
    }

    #[test]
    fn test_first_resolution_wins() {
        let (handle, slot) = TaskHandle::<u32>::detached(1);
        assert!(slot.complete(Ok(5)));
        assert!(!slot.complete(Err(TaskError::Timeout(1))));
        assert_eq!(handle.wait(), Ok(5));
    }

    #[test]
    fn test_wait_blocks_until_resolved() {
        let (handle, slot) = TaskHandle::<&'static str>::detached(2);
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            slot.complete(Ok("done"));
        });
        assert_eq!(handle.wait(), Ok("done"));
        t.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_returns_none_while_pending() {
        let (handle, slot) = TaskHandle::<u8>::detached(3);
        assert_eq!(handle.wait_timeout(Duration::from_millis(5)), None);
        slot.complete(Ok(1));
        assert_eq!(handle.wait_timeout(Duration::from_millis(5)), Some(Ok(1)));
        assert_eq!(handle.try_result(), None);
    }

    #[test]
    fn test_deadline_resolves_as_timeout() {
        let payload: Payload<u8> = Arc::new(|_| Ok(1));
        let deadline = Instant::now() + Duration::from_millis(10);
        let (job, handle) = Job::new(9, TaskCategory::Physics, Priority::Normal, Some(deadline), 0, payload);
        assert_eq!(handle.wait(), Err(TaskError::Timeout(9)));

        // the late result is discarded
        let mut ctx = WorkerContext::new("w".into(), TaskCategory::Physics, PoolConfig::default());
        job.task.run(&mut ctx);
        assert!(job.task.is_resolved());
    }

    #[test]
    fn test_payload_error_maps_to_failed() {
        let payload: Payload<u8> = Arc::new(|_| Err("bad input".to_string()));
        let (job, handle) = Job::new(4, TaskCategory::Analysis, Priority::Low, None, 0, payload);
        let mut ctx = WorkerContext::new("w".into(), TaskCategory::Analysis, PoolConfig::default());
        assert!(!job.task.run(&mut ctx));
        assert_eq!(handle.wait(), Err(TaskError::Failed("bad input".into())));
    }

    #[test]
    fn test_dropped_job_cancels() {
        let payload: Payload<u8> = Arc::new(|_| Ok(1));
        let (job, handle) = Job::new(5, TaskCategory::Layout, Priority::Normal, None, 0, payload);
        let copy = job.clone();
        drop(job);
        assert!(!handle.is_finished());
        drop(copy);
        assert_eq!(handle.wait(), Err(TaskError::Cancelled(5)));
    }

    #[test]
    fn test_resolved_handle() {
        let handle = TaskHandle::<u8>::resolved(7, Err(TaskError::Rejected("closed".into())));
        assert!(handle.is_finished());
        assert_eq!(handle.wait(), Err(TaskError::Rejected("closed".into())));
    }
}
