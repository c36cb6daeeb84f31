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
//! Worker pool with per-category sub-pools and a supervisor thread
//!
//! Every worker owns a typed inbox and a private priority queue. The
//! supervisor probes workers for liveness, restarts the ones that fault and
//! resolves tasks whose deadline has passed.

use super::runner::{cancel, SupervisorEvent, Worker, WorkerMessage, WorkerSnapshot, WorkerStats};
use super::task::{Job, Payload, Priority, TaskCategory, TaskHandle, TaskId, WorkerContext};
use crate::error::{LayoutError, TaskError};
use crate::pool::PoolConfig;
use crossbeam_channel::{after, select, unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How the scheduler picks a worker within a category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Rotate through healthy workers
    RoundRobin,
    /// Fewest queued plus running tasks
    #[default]
    LeastLoaded,
    /// An idle worker if one exists (rotating among idle ones), else least loaded
    WorkStealing,
}

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Workers serving [`TaskCategory::Layout`]
    pub layout_workers: usize,
    /// Workers serving [`TaskCategory::Physics`]
    pub physics_workers: usize,
    /// Workers serving [`TaskCategory::Analysis`]
    pub analysis_workers: usize,
    /// Worker selection policy
    pub strategy: SelectionStrategy,
    /// Restart a worker after it faults
    pub restart_on_error: bool,
    /// Times a task interrupted by a fault is retried
    pub max_retries: u32,
    /// Milliseconds between liveness probes
    pub probe_interval_ms: u64,
    /// Milliseconds a worker has to answer a probe
    pub probe_timeout_ms: u64,
    /// Cell pool each worker thread owns
    pub cell_pool: PoolConfig,
    /// Prefix of worker thread names
    pub name_prefix: String,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings {
            layout_workers: 2,
            physics_workers: 1,
            analysis_workers: 1,
            strategy: SelectionStrategy::default(),
            restart_on_error: true,
            max_retries: 1,
            probe_interval_ms: 200,
            probe_timeout_ms: 1000,
            cell_pool: PoolConfig::default(),
            name_prefix: "force-layout".to_string(),
        }
    }
}

impl PoolSettings {
    /// Settings with `threads` layout workers and one worker for each other category
    pub fn with_layout_workers(threads: usize) -> Self {
        PoolSettings {
            layout_workers: threads,
            ..Default::default()
        }
    }

    /// Set the selection strategy
    pub fn with_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Workers configured for `category`
    pub fn workers_for(&self, category: TaskCategory) -> usize {
        match category {
            TaskCategory::Layout => self.layout_workers,
            TaskCategory::Physics => self.physics_workers,
            TaskCategory::Analysis => self.analysis_workers,
        }
    }

    /// Check every field
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.layout_workers + self.physics_workers + self.analysis_workers == 0 {
            return Err(LayoutError::config("layout_workers", "pool needs at least one worker"));
        }
        if self.probe_interval_ms == 0 {
            return Err(LayoutError::config("probe_interval_ms", "must be positive"));
        }
        if self.probe_timeout_ms == 0 {
            return Err(LayoutError::config("probe_timeout_ms", "must be positive"));
        }
        self.cell_pool.validate()
    }

    fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

struct WorkerSlot {
    name: String,
    category: TaskCategory,
    generation: u32,
    stats: Arc<WorkerStats>,
    inbox: Sender<WorkerMessage>,
    thread: Option<JoinHandle<()>>,
}

struct Registry {
    slots: Vec<WorkerSlot>,
    events: Sender<SupervisorEvent>,
    cursors: HashMap<TaskCategory, usize>,
    /// Threads of replaced workers, joined on shutdown
    retired: Vec<JoinHandle<()>>,
    closed: bool,
    restarts: u64,
}

impl Registry {
    fn pick(&mut self, category: TaskCategory, strategy: SelectionStrategy) -> Option<usize> {
        let candidates: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.category == category && s.stats.is_healthy())
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let least_loaded = |slots: &[WorkerSlot]| {
            candidates
                .iter()
                .copied()
                .min_by_key(|&i| slots[i].stats.load())
        };
        match strategy {
            SelectionStrategy::RoundRobin => {
                let cursor = self.cursors.entry(category).or_insert(0);
                let chosen = candidates[*cursor % candidates.len()];
                *cursor = cursor.wrapping_add(1);
                Some(chosen)
            }
            SelectionStrategy::LeastLoaded => least_loaded(&self.slots),
            SelectionStrategy::WorkStealing => {
                let cursor = self.cursors.entry(category).or_insert(0);
                let start = *cursor % candidates.len();
                let idle = (0..candidates.len())
                    .map(|k| candidates[(start + k) % candidates.len()])
                    .find(|&i| self.slots[i].stats.load() == 0);
                *cursor = cursor.wrapping_add(1);
                idle.or_else(|| least_loaded(&self.slots))
            }
        }
    }

    /// Hand `job` to a healthy worker of its category
    fn dispatch(&mut self, mut job: Job, strategy: SelectionStrategy) -> Result<usize, Job> {
        loop {
            let Some(index) = self.pick(job.category, strategy) else {
                return Err(job);
            };
            let slot = &self.slots[index];
            slot.stats.queued.fetch_add(1, Ordering::Relaxed);
            match slot.inbox.send(WorkerMessage::Run(job)) {
                Ok(()) => return Ok(index),
                Err(returned) => {
                    // The thread is gone; never pick it again
                    slot.stats.queued.fetch_sub(1, Ordering::Relaxed);
                    slot.stats.healthy.store(false, Ordering::Release);
                    match returned.0 {
                        WorkerMessage::Run(back) => job = back,
                        _ => unreachable!("only Run messages are dispatched"),
                    }
                }
            }
        }
    }
}

struct PoolInner {
    settings: PoolSettings,
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
}

impl PoolInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_worker(
        &self,
        slot: usize,
        category: TaskCategory,
        ordinal: usize,
        generation: u32,
        events: Sender<SupervisorEvent>,
    ) -> Result<WorkerSlot, LayoutError> {
        let name = format!("{}-{}-{}", self.settings.name_prefix, category, ordinal);
        let (inbox, rx) = unbounded();
        let stats = Arc::new(WorkerStats::new());
        let worker = Worker {
            slot,
            generation,
            ctx: WorkerContext::new(name.clone(), category, self.settings.cell_pool.clone()),
            stats: Arc::clone(&stats),
            inbox: rx,
            events,
        };
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run())
            .map_err(|e| LayoutError::WorkerPool(format!("failed to spawn {}: {}", name, e)))?;
        Ok(WorkerSlot {
            name,
            category,
            generation,
            stats,
            inbox,
            thread: Some(thread),
        })
    }

    /// Replace or retire a faulted worker and route its work elsewhere
    fn handle_fault(&self, slot: usize, generation: u32, job: Option<Job>, message: String) {
        let strategy = self.settings.strategy;
        let mut registry = self.registry();
        if registry.closed {
            if let Some(job) = job {
                cancel(vec![job]);
            }
            return;
        }
        let Some(entry) = registry.slots.get(slot) else {
            return;
        };
        let worker = entry.name.clone();
        let category = entry.category;
        let current = entry.generation == generation;
        if current {
            entry.stats.healthy.store(false, Ordering::Release);
        }
        warn!(%worker, generation, %message, "worker fault");

        if current && self.settings.restart_on_error {
            let ordinal = registry.slots[..slot].iter().filter(|s| s.category == category).count();
            let events = registry.events.clone();
            match self.spawn_worker(slot, category, ordinal, generation + 1, events) {
                Ok(fresh) => {
                    let mut old = std::mem::replace(&mut registry.slots[slot], fresh);
                    let _ = old.inbox.send(WorkerMessage::Shutdown { handover: true });
                    if let Some(thread) = old.thread.take() {
                        registry.retired.push(thread);
                    }
                    registry.restarts += 1;
                    info!(%worker, generation = generation + 1, "worker restarted");
                }
                Err(e) => warn!(%worker, error = %e, "worker restart failed"),
            }
        } else if current {
            let _ = registry.slots[slot].inbox.send(WorkerMessage::Shutdown { handover: true });
        }

        let Some(mut job) = job else {
            return;
        };
        if job.task.is_resolved() {
            return;
        }
        job.attempts += 1;
        if self.settings.restart_on_error && job.attempts <= self.settings.max_retries {
            debug!(task = job.id, attempt = job.attempts, "requeueing faulted task");
            if let Err(job) = registry.dispatch(job, strategy) {
                job.task.fail(TaskError::NoHealthyWorker(category.to_string()));
            }
        } else {
            job.task.fail(TaskError::WorkerFault { worker, message });
        }
    }

    fn requeue(&self, jobs: Vec<Job>) {
        let strategy = self.settings.strategy;
        let mut registry = self.registry();
        if registry.closed {
            cancel(jobs);
            return;
        }
        for job in jobs {
            if job.task.is_resolved() {
                continue;
            }
            let category = job.category;
            if let Err(job) = registry.dispatch(job, strategy) {
                job.task.fail(TaskError::NoHealthyWorker(category.to_string()));
            }
        }
    }
}

struct Deadline {
    at: Instant,
    job: Job,
}

impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}

impl Eq for Deadline {}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at.cmp(&other.at)
    }
}

struct Supervisor {
    inner: Arc<PoolInner>,
    events: Receiver<SupervisorEvent>,
    deadlines: BinaryHeap<Reverse<Deadline>>,
    /// Outstanding probe per (slot, generation): token and send time
    probes: HashMap<(usize, u32), (u64, Instant)>,
    next_token: u64,
}

impl Supervisor {
    fn run(mut self) -> Receiver<SupervisorEvent> {
        let interval = self.inner.settings.probe_interval();
        let mut next_probe = Instant::now() + interval;
        let events = self.events.clone();

        loop {
            let now = Instant::now();
            self.expire_deadlines(now);
            if now >= next_probe {
                self.check_probes(now);
                self.send_probes(now);
                next_probe = now + interval;
            }

            let mut wake = next_probe;
            if let Some(Reverse(first)) = self.deadlines.peek() {
                wake = wake.min(first.at);
            }
            let timer = after(wake.saturating_duration_since(Instant::now()));
            let event = select! {
                recv(events) -> event => Some(event),
                recv(timer) -> _ => None,
            };
            match event {
                None => {}
                Some(Ok(SupervisorEvent::Shutdown)) | Some(Err(_)) => break,
                Some(Ok(event)) => self.handle(event, &mut next_probe),
            }
        }
        debug!("supervisor stopped");
        self.events
    }

    fn handle(&mut self, event: SupervisorEvent, next_probe: &mut Instant) {
        match event {
            SupervisorEvent::Fault {
                slot,
                generation,
                job,
                message,
            } => {
                self.probes.remove(&(slot, generation));
                self.inner.handle_fault(slot, generation, job, message);
            }
            SupervisorEvent::ProbeReply { slot, generation, token } => {
                if self.probes.get(&(slot, generation)).map(|p| p.0) == Some(token) {
                    self.probes.remove(&(slot, generation));
                }
            }
            SupervisorEvent::Handover(jobs) => self.inner.requeue(jobs),
            SupervisorEvent::Deadline(job) => {
                if let Some(at) = job.deadline {
                    self.deadlines.push(Reverse(Deadline { at, job }));
                }
            }
            SupervisorEvent::ProbeNow => *next_probe = Instant::now(),
            SupervisorEvent::Shutdown => {}
        }
    }

    fn expire_deadlines(&mut self, now: Instant) {
        while let Some(Reverse(first)) = self.deadlines.peek() {
            if first.at > now {
                break;
            }
            if let Some(Reverse(entry)) = self.deadlines.pop() {
                if entry.job.task.fail(TaskError::Timeout(entry.job.id)) {
                    warn!(task = entry.job.id, category = %entry.job.category, "task timed out");
                }
            }
        }
    }

    fn send_probes(&mut self, now: Instant) {
        let registry = self.inner.registry();
        for (slot, worker) in registry.slots.iter().enumerate() {
            let key = (slot, worker.generation);
            if !worker.stats.is_healthy() || self.probes.contains_key(&key) {
                continue;
            }
            self.next_token += 1;
            if worker.inbox.send(WorkerMessage::Probe { token: self.next_token }).is_ok() {
                self.probes.insert(key, (self.next_token, now));
            }
        }
    }

    fn check_probes(&mut self, now: Instant) {
        let timeout = self.inner.settings.probe_timeout();
        let missed: Vec<(usize, u32)> = self
            .probes
            .iter()
            .filter(|(_, (_, sent))| now.duration_since(*sent) > timeout)
            .map(|(key, _)| *key)
            .collect();
        for (slot, generation) in missed {
            self.probes.remove(&(slot, generation));
            self.inner
                .handle_fault(slot, generation, None, "missed liveness probe".to_string());
        }
    }
}

/// Pool of named worker threads grouped by [`TaskCategory`]
///
/// # Example
///
/// ```
/// use force_layout::worker::{PoolSettings, Priority, TaskCategory, WorkerPool};
///
/// let pool = WorkerPool::new(PoolSettings::default()).unwrap();
/// let handle = pool.submit_task(TaskCategory::Analysis, Priority::Normal, None, |_| Ok(21 * 2));
/// assert_eq!(handle.wait(), Ok(42));
/// pool.shutdown();
/// ```
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    supervisor: Mutex<Option<JoinHandle<Receiver<SupervisorEvent>>>>,
    shut_down: AtomicBool,
}

impl WorkerPool {
    /// Start every worker and the supervisor
    pub fn new(settings: PoolSettings) -> Result<Self, LayoutError> {
        settings.validate()?;
        let (events, events_rx) = unbounded();
        let inner = Arc::new(PoolInner {
            registry: Mutex::new(Registry {
                slots: Vec::new(),
                events: events.clone(),
                cursors: HashMap::new(),
                retired: Vec::new(),
                closed: false,
                restarts: 0,
            }),
            settings,
            next_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(0),
        });

        let mut slots = Vec::new();
        for category in TaskCategory::ALL {
            for ordinal in 0..inner.settings.workers_for(category) {
                match inner.spawn_worker(slots.len(), category, ordinal, 0, events.clone()) {
                    Ok(slot) => slots.push(slot),
                    Err(e) => {
                        for slot in &slots {
                            let _ = slot.inbox.send(WorkerMessage::Shutdown { handover: false });
                        }
                        return Err(e);
                    }
                }
            }
        }
        let workers = slots.len();
        inner.registry().slots = slots;

        let supervisor = Supervisor {
            inner: Arc::clone(&inner),
            events: events_rx,
            deadlines: BinaryHeap::new(),
            probes: HashMap::new(),
            next_token: 0,
        };
        let thread = thread::Builder::new()
            .name(format!("{}-supervisor", inner.settings.name_prefix))
            .spawn(move || supervisor.run())
            .map_err(|e| LayoutError::WorkerPool(format!("failed to spawn supervisor: {}", e)))?;

        info!(
            workers,
            strategy = ?inner.settings.strategy,
            restart_on_error = inner.settings.restart_on_error,
            "worker pool started"
        );
        Ok(WorkerPool {
            inner,
            supervisor: Mutex::new(Some(thread)),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Queue `payload` on a worker of `category`
    ///
    /// The returned handle resolves with the payload's value, or with a
    /// [`TaskError`] if the payload fails, its worker faults, the optional
    /// `timeout` elapses, or the pool is shut down.
    pub fn submit_task<T, F>(
        &self,
        category: TaskCategory,
        priority: Priority,
        timeout: Option<Duration>,
        payload: F,
    ) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: Fn(&mut WorkerContext) -> Result<T, String> + Send + Sync + 'static,
    {
        let id: TaskId = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let deadline = timeout.map(|t| Instant::now() + t);
        let payload: Payload<T> = Arc::new(payload);
        let (job, handle) = Job::new(id, category, priority, deadline, seq, payload);

        let mut registry = self.inner.registry();
        if registry.closed {
            return TaskHandle::resolved(id, Err(TaskError::Rejected("worker pool is shut down".to_string())));
        }
        let watch = deadline.map(|_| job.clone());
        match registry.dispatch(job, self.inner.settings.strategy) {
            Ok(index) => {
                debug!(task = id, %category, ?priority, worker = %registry.slots[index].name, "task queued");
                if let Some(job) = watch {
                    let _ = registry.events.send(SupervisorEvent::Deadline(job));
                }
            }
            Err(job) => {
                warn!(task = id, %category, "no healthy worker");
                job.task.fail(TaskError::NoHealthyWorker(category.to_string()));
            }
        }
        handle
    }

    /// [`submit_task`](Self::submit_task) with normal priority and no deadline
    pub fn submit<T, F>(&self, category: TaskCategory, payload: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: Fn(&mut WorkerContext) -> Result<T, String> + Send + Sync + 'static,
    {
        self.submit_task(category, Priority::Normal, None, payload)
    }

    /// Snapshot of every worker serving `category`
    pub fn worker_stats(&self, category: TaskCategory) -> Vec<WorkerSnapshot> {
        self.inner
            .registry()
            .slots
            .iter()
            .filter(|s| s.category == category)
            .map(|s| WorkerSnapshot::capture(&s.name, s.category, s.generation, &s.stats))
            .collect()
    }

    /// Healthy workers serving `category`
    pub fn healthy_workers(&self, category: TaskCategory) -> usize {
        self.inner
            .registry()
            .slots
            .iter()
            .filter(|s| s.category == category && s.stats.is_healthy())
            .count()
    }

    /// Total workers, healthy or not
    pub fn worker_count(&self) -> usize {
        self.inner.registry().slots.len()
    }

    /// Number of worker restarts so far
    pub fn restarts(&self) -> u64 {
        self.inner.registry().restarts
    }

    /// Ask the supervisor for an immediate probe round
    pub fn check_health(&self) {
        let registry = self.inner.registry();
        if !registry.closed {
            let _ = registry.events.send(SupervisorEvent::ProbeNow);
        }
    }

    /// Active settings
    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    /// Check if [`shutdown`](Self::shutdown) has run
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop the supervisor and every worker
    ///
    /// Queued tasks resolve as [`TaskError::Cancelled`]; running tasks finish
    /// first. Later submissions resolve as [`TaskError::Rejected`]. Calling
    /// this more than once is a no-op.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        // Stop the supervisor first so nothing restarts while workers exit
        let _ = self.inner.registry().events.send(SupervisorEvent::Shutdown);
        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let events = supervisor.and_then(|t| t.join().ok());

        let (threads, stuck) = {
            let mut registry = self.inner.registry();
            registry.closed = true;
            let mut threads = Vec::new();
            let mut stuck = 0;
            let retired: Vec<JoinHandle<()>> = registry.retired.drain(..).collect();
            for thread in retired {
                if thread.is_finished() {
                    threads.push(thread);
                } else {
                    stuck += 1;
                }
            }
            for slot in registry.slots.iter_mut() {
                let _ = slot.inbox.send(WorkerMessage::Shutdown { handover: false });
                let healthy = slot.stats.healthy.swap(false, Ordering::AcqRel);
                match slot.thread.take() {
                    Some(thread) if healthy || thread.is_finished() => threads.push(thread),
                    Some(_) => stuck += 1,
                    None => {}
                }
            }
            (threads, stuck)
        };
        if stuck > 0 {
            warn!(stuck, "detaching unresponsive worker threads");
        }
        let workers = threads.len();
        for thread in threads {
            let _ = thread.join();
        }

        // Anything a retiring worker handed back after the supervisor stopped
        if let Some(events) = events {
            while let Ok(event) = events.try_recv() {
                match event {
                    SupervisorEvent::Handover(jobs) => cancel(jobs),
                    SupervisorEvent::Fault { job: Some(job), .. } => cancel(vec![job]),
                    _ => {}
                }
            }
        }
        info!(workers, "worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.worker_count())
            .field("strategy", &self.inner.settings.strategy)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(layout: usize) -> PoolSettings {
        PoolSettings {
            layout_workers: layout,
            physics_workers: 1,
            analysis_workers: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_settings_validation() {
        assert!(PoolSettings::default().validate().is_ok());
        let none = PoolSettings {
            layout_workers: 0,
            physics_workers: 0,
            analysis_workers: 0,
            ..Default::default()
        };
        assert!(matches!(
            WorkerPool::new(none),
            Err(LayoutError::Configuration { field: "layout_workers", .. })
        ));
    }

    #[test]
    fn test_worker_names() {
        let pool = WorkerPool::new(settings(2)).unwrap();
        let names: Vec<String> = pool
            .worker_stats(TaskCategory::Layout)
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["force-layout-layout-0", "force-layout-layout-1"]);
        assert_eq!(pool.worker_count(), 3);
    }

    #[test]
    fn test_task_sees_its_worker_context() {
        let pool = WorkerPool::new(settings(1)).unwrap();
        let handle = pool.submit(TaskCategory::Physics, |ctx| Ok((ctx.category(), ctx.name().to_string())));
        let (category, name) = handle.wait().unwrap();
        assert_eq!(category, TaskCategory::Physics);
        assert_eq!(name, "force-layout-physics-0");
    }

    #[test]
    fn test_empty_category_has_no_worker() {
        let pool = WorkerPool::new(settings(1)).unwrap();
        let handle = pool.submit(TaskCategory::Analysis, |_| Ok(()));
        assert_eq!(handle.wait(), Err(TaskError::NoHealthyWorker("analysis".to_string())));
    }

    #[test]
    fn test_round_robin_pick() {
        let pool = WorkerPool::new(settings(3).with_strategy(SelectionStrategy::RoundRobin)).unwrap();
        let mut registry = pool.inner.registry();
        let picks: Vec<usize> = (0..6)
            .filter_map(|_| registry.pick(TaskCategory::Layout, SelectionStrategy::RoundRobin))
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_unhealthy_workers_are_skipped() {
        let pool = WorkerPool::new(settings(2)).unwrap();
        let mut registry = pool.inner.registry();
        registry.slots[0].stats.healthy.store(false, Ordering::Release);
        for strategy in [
            SelectionStrategy::RoundRobin,
            SelectionStrategy::LeastLoaded,
            SelectionStrategy::WorkStealing,
        ] {
            assert_eq!(registry.pick(TaskCategory::Layout, strategy), Some(1));
        }
    }

    #[test]
    fn test_least_loaded_and_idle_first() {
        let pool = WorkerPool::new(settings(3)).unwrap();
        let mut registry = pool.inner.registry();
        registry.slots[0].stats.queued.store(4, Ordering::Relaxed);
        registry.slots[1].stats.queued.store(1, Ordering::Relaxed);
        registry.slots[2].stats.queued.store(2, Ordering::Relaxed);
        assert_eq!(registry.pick(TaskCategory::Layout, SelectionStrategy::LeastLoaded), Some(1));
        assert_eq!(registry.pick(TaskCategory::Layout, SelectionStrategy::WorkStealing), Some(1));

        registry.slots[2].stats.queued.store(0, Ordering::Relaxed);
        assert_eq!(registry.pick(TaskCategory::Layout, SelectionStrategy::WorkStealing), Some(2));
    }

    #[test]
    fn test_deserialize_settings() {
        let s: PoolSettings = serde_json::from_str(r#"{"layout_workers": 4, "strategy": "work_stealing"}"#).unwrap();
        assert_eq!(s.layout_workers, 4);
        assert_eq!(s.strategy, SelectionStrategy::WorkStealing);
        assert!(s.restart_on_error);
    }
}
