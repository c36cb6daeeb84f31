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
//! The loop each worker thread runs

use super::task::{Job, TaskCategory, WorkerContext};
use crate::error::TaskError;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use serde::Serialize;
use std::any::Any;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Messages a worker accepts
pub(crate) enum WorkerMessage {
    Run(Job),
    Probe { token: u64 },
    /// Stop; with `handover` queued jobs go back to the supervisor instead of being cancelled
    Shutdown { handover: bool },
}

/// What workers report to the supervisor
pub(crate) enum SupervisorEvent {
    Fault {
        slot: usize,
        generation: u32,
        job: Option<Job>,
        message: String,
    },
    ProbeReply {
        slot: usize,
        generation: u32,
        token: u64,
    },
    Handover(Vec<Job>),
    Deadline(Job),
    ProbeNow,
    Shutdown,
}

/// Live counters of one worker, shared with the pool
#[derive(Debug, Default)]
pub(crate) struct WorkerStats {
    pub healthy: AtomicBool,
    pub queued: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    /// Exponentially weighted mean task latency in microseconds
    pub latency_us: AtomicU64,
}

impl WorkerStats {
    pub(crate) fn new() -> Self {
        WorkerStats {
            healthy: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub(crate) fn load(&self) -> usize {
        self.queued.load(Ordering::Relaxed) + self.in_flight.load(Ordering::Relaxed)
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn record_latency(&self, elapsed: Duration) {
        let sample = elapsed.as_micros().min(u64::MAX as u128) as u64;
        let old = self.latency_us.load(Ordering::Relaxed);
        let next = if old == 0 { sample } else { (old * 7 + sample) / 8 };
        self.latency_us.store(next, Ordering::Relaxed);
    }
}

/// Point-in-time view of a worker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSnapshot {
    /// Thread name
    pub name: String,
    /// Category served
    pub category: TaskCategory,
    /// Incremented each time the worker is restarted
    pub generation: u32,
    /// Whether the scheduler may pick this worker
    pub healthy: bool,
    /// Jobs waiting in the worker's queue
    pub queued: usize,
    /// Jobs currently running (0 or 1)
    pub in_flight: usize,
    /// Jobs that returned `Ok`
    pub completed: u64,
    /// Jobs that returned an error, expired or panicked
    pub failed: u64,
    /// Smoothed task latency
    pub mean_latency: Duration,
}

impl WorkerSnapshot {
    pub(crate) fn capture(name: &str, category: TaskCategory, generation: u32, stats: &WorkerStats) -> Self {
        WorkerSnapshot {
            name: name.to_string(),
            category,
            generation,
            healthy: stats.is_healthy(),
            queued: stats.queued.load(Ordering::Relaxed),
            in_flight: stats.in_flight.load(Ordering::Relaxed),
            completed: stats.completed.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
            mean_latency: Duration::from_micros(stats.latency_us.load(Ordering::Relaxed)),
        }
    }
}

pub(crate) struct Worker {
    pub slot: usize,
    pub generation: u32,
    pub ctx: WorkerContext,
    pub stats: Arc<WorkerStats>,
    pub inbox: Receiver<WorkerMessage>,
    pub events: Sender<SupervisorEvent>,
}

enum Control {
    Continue,
    Stop { handover: bool },
}

impl Worker {
    pub(crate) fn run(mut self) {
        debug!(worker = self.ctx.name(), generation = self.generation, "worker started");
        let mut queue = BinaryHeap::new();
        let mut faulted = false;

        loop {
            let first = if queue.is_empty() || faulted {
                match self.inbox.recv() {
                    Ok(message) => Some(message),
                    Err(_) => {
                        self.finish(queue, false);
                        return;
                    }
                }
            } else {
                None
            };

            let mut control = match first {
                Some(message) => self.accept(message, &mut queue, faulted),
                None => Control::Continue,
            };
            // Take everything already waiting so priorities are compared across it
            while let Control::Continue = control {
                match self.inbox.try_recv() {
                    Ok(message) => control = self.accept(message, &mut queue, faulted),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => control = Control::Stop { handover: false },
                }
            }
            if let Control::Stop { handover } = control {
                self.finish(queue, handover);
                return;
            }

            if faulted {
                continue;
            }
            if let Some(job) = queue.pop() {
                if let Some(message) = self.execute(&job) {
                    faulted = true;
                    self.stats.healthy.store(false, Ordering::Release);
                    let _ = self.events.send(SupervisorEvent::Fault {
                        slot: self.slot,
                        generation: self.generation,
                        job: Some(job),
                        message,
                    });
                }
            }
        }
    }

    fn accept(&mut self, message: WorkerMessage, queue: &mut BinaryHeap<Job>, faulted: bool) -> Control {
        match message {
            WorkerMessage::Run(job) => queue.push(job),
            WorkerMessage::Probe { token } => {
                if !faulted {
                    let _ = self.events.send(SupervisorEvent::ProbeReply {
                        slot: self.slot,
                        generation: self.generation,
                        token,
                    });
                }
            }
            WorkerMessage::Shutdown { handover } => return Control::Stop { handover },
        }
        Control::Continue
    }

    /// Run one job; returns the panic message if the payload panicked
    fn execute(&mut self, job: &Job) -> Option<String> {
        self.stats.queued.fetch_sub(1, Ordering::Relaxed);
        if job.task.is_resolved() {
            return None;
        }
        if job.is_expired(Instant::now()) {
            if job.task.fail(TaskError::Timeout(job.id)) {
                warn!(worker = self.ctx.name(), task = job.id, "task expired before it started");
            }
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.stats.in_flight.store(1, Ordering::Relaxed);
        self.ctx.begin_task();
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.task.run(&mut self.ctx)));
        let elapsed = start.elapsed();
        self.stats.in_flight.store(0, Ordering::Relaxed);
        self.stats.record_latency(elapsed);

        match outcome {
            Ok(true) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    worker = self.ctx.name(),
                    task = job.id,
                    elapsed_us = elapsed.as_micros() as u64,
                    "task completed"
                );
                None
            }
            Ok(false) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                debug!(worker = self.ctx.name(), task = job.id, "task failed");
                None
            }
            Err(payload) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                let message = panic_message(payload.as_ref());
                warn!(worker = self.ctx.name(), task = job.id, %message, "worker panicked");
                Some(message)
            }
        }
    }

    fn finish(&mut self, queue: BinaryHeap<Job>, handover: bool) {
        let mut jobs = queue.into_vec();
        while let Ok(message) = self.inbox.try_recv() {
            if let WorkerMessage::Run(job) = message {
                jobs.push(job);
            }
        }
        self.stats.queued.store(0, Ordering::Relaxed);

        if handover && !jobs.is_empty() {
            debug!(worker = self.ctx.name(), jobs = jobs.len(), "handing over queued jobs");
            if let Err(returned) = self.events.send(SupervisorEvent::Handover(jobs)) {
                if let SupervisorEvent::Handover(jobs) = returned.0 {
                    cancel(jobs);
                }
            }
        } else {
            cancel(jobs);
        }
        debug!(worker = self.ctx.name(), generation = self.generation, "worker stopped");
    }
}

pub(crate) fn cancel(jobs: Vec<Job>) {
    for job in jobs {
        job.task.fail(TaskError::Cancelled(job.id));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use crate::worker::task::{Payload, Priority, TaskHandle};
    use crossbeam_channel::{bounded, unbounded};
    use std::sync::Mutex;
    use std::thread;

    fn spawn() -> (Sender<WorkerMessage>, Receiver<SupervisorEvent>, Arc<WorkerStats>, thread::JoinHandle<()>) {
        let (tx, inbox) = unbounded();
        let (events, events_rx) = unbounded();
        let stats = Arc::new(WorkerStats::new());
        let worker = Worker {
            slot: 0,
            generation: 0,
            ctx: WorkerContext::new("test-0".into(), TaskCategory::Layout, PoolConfig::default()),
            stats: Arc::clone(&stats),
            inbox,
            events,
        };
        let handle = thread::spawn(move || worker.run());
        (tx, events_rx, stats, handle)
    }

    fn job<T: Send + 'static>(
        seq: u64,
        priority: Priority,
        f: impl Fn(&mut WorkerContext) -> Result<T, String> + Send + Sync + 'static,
    ) -> (Job, TaskHandle<T>) {
        let payload: Payload<T> = Arc::new(f);
        Job::new(seq, TaskCategory::Layout, priority, None, seq, payload)
    }

    fn send(tx: &Sender<WorkerMessage>, stats: &WorkerStats, job: Job) {
        stats.queued.fetch_add(1, Ordering::Relaxed);
        tx.send(WorkerMessage::Run(job)).unwrap();
    }

    #[test]
    fn test_runs_jobs_and_answers_probes() {
        let (tx, events, stats, handle) = spawn();
        let (j, h) = job(0, Priority::Normal, |ctx| Ok(ctx.name().to_string()));
        send(&tx, &stats, j);
        assert_eq!(h.wait(), Ok("test-0".to_string()));

        tx.send(WorkerMessage::Probe { token: 7 }).unwrap();
        match events.recv_timeout(Duration::from_secs(5)).unwrap() {
            SupervisorEvent::ProbeReply { token, .. } => assert_eq!(token, 7),
            _ => panic!("expected probe reply"),
        }

        tx.send(WorkerMessage::Shutdown { handover: false }).unwrap();
        handle.join().unwrap();
        assert_eq!(stats.completed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_priority_order_within_a_batch() {
        let (tx, _events, stats, handle) = spawn();
        let order = Arc::new(Mutex::new(Vec::new()));

        // Hold the worker so the rest queue up behind it
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let (blocker, blocker_handle) = job(0, Priority::Normal, move |_| {
            let _ = gate_rx.recv();
            Ok(())
        });
        send(&tx, &stats, blocker);

        let mut handles = Vec::new();
        for (seq, priority) in [(1, Priority::Low), (2, Priority::High), (3, Priority::Normal), (4, Priority::High)] {
            let order = Arc::clone(&order);
            let (j, h) = job(seq, priority, move |_| {
                order.lock().unwrap().push(seq);
                Ok(())
            });
            send(&tx, &stats, j);
            handles.push(h);
        }
        gate_tx.send(()).unwrap();
        blocker_handle.wait().unwrap();
        for h in handles {
            h.wait().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![2, 4, 3, 1]);

        tx.send(WorkerMessage::Shutdown { handover: false }).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_panic_reports_fault_and_hands_over() {
        let (tx, events, stats, handle) = spawn();
        let (bad, bad_handle) = job(0, Priority::Normal, |_| -> Result<(), String> { panic!("boom") });
        send(&tx, &stats, bad);

        match events.recv_timeout(Duration::from_secs(5)).unwrap() {
            SupervisorEvent::Fault { job, message, .. } => {
                assert_eq!(message, "boom");
                assert_eq!(job.map(|j| j.id), Some(0));
            }
            _ => panic!("expected fault"),
        }
        assert!(!stats.is_healthy());
        // the reported job was dropped above without being requeued
        assert_eq!(bad_handle.wait(), Err(TaskError::Cancelled(0)));

        // a faulted worker no longer runs jobs; they come back on handover
        let (queued, queued_handle) = job(1, Priority::Normal, |_| Ok(1u8));
        send(&tx, &stats, queued);
        tx.send(WorkerMessage::Shutdown { handover: true }).unwrap();
        handle.join().unwrap();

        match events.recv_timeout(Duration::from_secs(5)).unwrap() {
            SupervisorEvent::Handover(jobs) => {
                assert_eq!(jobs.len(), 1);
                assert!(!queued_handle.is_finished());
            }
            _ => panic!("expected handover"),
        }
        assert_eq!(queued_handle.wait(), Err(TaskError::Cancelled(1)));
    }

    #[test]
    fn test_shutdown_cancels_queue() {
        let (tx, _events, stats, handle) = spawn();
        let (started_tx, started_rx) = bounded::<()>(1);
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let (blocker, blocker_handle) = job(0, Priority::Normal, move |_| {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
            Ok(())
        });
        send(&tx, &stats, blocker);
        // Only queue the rest once the blocker is running
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let (queued, queued_handle) = job(1, Priority::Normal, |_| Ok(()));
        send(&tx, &stats, queued);
        tx.send(WorkerMessage::Shutdown { handover: false }).unwrap();
        gate_tx.send(()).unwrap();
        handle.join().unwrap();

        assert_eq!(blocker_handle.wait(), Ok(()));
        assert_eq!(queued_handle.wait(), Err(TaskError::Cancelled(1)));
        assert_eq!(stats.completed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u32), "non-string panic payload");
    }
}
