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
//! Running a layout inline, on a background thread, or across a worker pool
//!
//! [`Simulation::start`] validates every input before any thread exists.
//! Threaded modes take interactive updates through a command channel that
//! is drained at each tick boundary, and report progress as
//! [`SimulationEvent`]s.

use crate::buffer::{Field, SharedBuffer, DEFAULT_SHARED_LIMIT};
use crate::config::{validate_theta, ExecutionMode, SimulationParams};
use crate::controller::{AdaptiveController, ControllerConfig};
use crate::engine::{Body, BodyId, Engine, Link, RunSummary, Snapshot, TickStats};
use crate::error::{LayoutError, TaskError};
use crate::math::{Axis, Vec3};
use crate::visibility::{self, ViewVolume};
use crate::worker::{ChunkedLayout, PoolSettings, ResultSlot, TaskHandle, WorkerPool};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Progress reported by a running simulation
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationEvent {
    /// Positions after a tick
    Tick(Snapshot),
    /// The run ended, by converging or by being stopped
    Converged(RunSummary),
}

/// Options beyond the numeric layout parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationOptions {
    /// Emit a [`SimulationEvent::Tick`] every this many ticks
    pub snapshot_every: u32,
    /// Largest shared buffer pooled mode may allocate, in bytes
    pub shared_memory_limit: usize,
    /// Time each layout chunk gets before it is recomputed inline
    pub chunk_timeout_ms: u64,
    /// Worker pool used in pooled mode; `layout_workers` is taken from the mode
    pub pool: PoolSettings,
    /// Start with adaptive theta control
    pub adaptive: Option<ControllerConfig>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        SimulationOptions {
            snapshot_every: 1,
            shared_memory_limit: DEFAULT_SHARED_LIMIT,
            chunk_timeout_ms: 1000,
            pool: PoolSettings::default(),
            adaptive: None,
        }
    }
}

impl SimulationOptions {
    /// Check every field
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.snapshot_every == 0 {
            return Err(LayoutError::config("snapshot_every", "must be at least 1"));
        }
        if self.chunk_timeout_ms == 0 {
            return Err(LayoutError::config("chunk_timeout_ms", "must be positive"));
        }
        if let Some(adaptive) = &self.adaptive {
            adaptive.validate()?;
        }
        Ok(())
    }
}

enum Command {
    SetPinned { id: BodyId, axis: Axis, value: Option<f64> },
    SetTheta(f64),
    EnableAdaptive(ControllerConfig),
}

/// Stop and pause flags shared with the tick loop
#[derive(Default)]
struct Control {
    stop: AtomicBool,
    paused: Mutex<bool>,
    wake: Condvar,
}

impl Control {
    fn paused(&self) -> MutexGuard<'_, bool> {
        self.paused.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        let _guard = self.paused();
        self.wake.notify_all();
    }

    fn set_paused(&self, value: bool) {
        *self.paused() = value;
        self.wake.notify_all();
    }

    fn wait_while_paused(&self) {
        let mut paused = self.paused();
        while *paused && !self.is_stopped() {
            paused = self.wake.wait(paused).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// State owned by whichever thread ticks the engine
struct Runner {
    engine: Engine,
    controller: Option<AdaptiveController>,
    pooled: Option<Pooled>,
    events: Sender<SimulationEvent>,
    latest: Arc<Mutex<Snapshot>>,
    snapshot_every: u32,
}

struct Pooled {
    pool: WorkerPool,
    layout: ChunkedLayout,
}

impl Runner {
    fn apply(&mut self, command: Command) {
        let result = match command {
            Command::SetPinned { id, axis, value } => self.engine.set_pinned(id, axis, value),
            Command::SetTheta(theta) => {
                self.controller = None;
                self.engine.set_theta(theta)
            }
            Command::EnableAdaptive(config) => {
                AdaptiveController::new(config, self.engine.theta()).map(|c| self.controller = Some(c))
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "ignoring interactive update");
        }
    }

    fn tick(&mut self) -> TickStats {
        let start = Instant::now();
        let mut stats = match &mut self.pooled {
            None => self.engine.tick(),
            Some(Pooled { pool, layout }) => {
                self.engine.resolve_parameters();
                if let Err(e) = self.engine.publish(layout.buffer()) {
                    warn!(error = %e, "failed to publish positions");
                }
                let charges: Arc<[f64]> = self.engine.charges().into();
                let params = self.engine.params();
                let step = layout.compute(pool, charges, params.theta, self.engine.law(), params.force_mode);
                let stats = self.engine.tick_with_repulsion(&step.repulsion, step.cell_count);
                if let Err(e) = self.engine.publish(layout.buffer()) {
                    warn!(error = %e, "failed to publish positions");
                }
                stats
            }
        };
        stats.duration = start.elapsed();

        if let Some(controller) = &mut self.controller {
            if let Some(theta) = controller.record(stats.duration) {
                if let Err(e) = self.engine.set_theta(theta) {
                    warn!(error = %e, "controller chose an invalid theta");
                }
            }
        }

        let snapshot = self.engine.snapshot();
        let halted = self.engine.is_converged();
        if stats.tick % self.snapshot_every == 0 || halted {
            let _ = self.events.send(SimulationEvent::Tick(snapshot.clone()));
        }
        *lock(&self.latest) = snapshot;
        stats
    }

    fn finish(&mut self, start: Instant, stopped: bool) -> RunSummary {
        // Updates applied after the last tick still show in the final state
        if let Some(Pooled { layout, .. }) = &self.pooled {
            if let Err(e) = self.engine.publish(layout.buffer()) {
                warn!(error = %e, "failed to publish positions");
            }
        }
        *lock(&self.latest) = self.engine.snapshot();

        let summary = self.engine.summary(start.elapsed(), stopped);
        let _ = self.events.send(SimulationEvent::Converged(summary));
        info!(
            ticks = summary.ticks,
            alpha = summary.alpha,
            stopped,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "simulation finished"
        );
        summary
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tick loop of the threaded modes
fn drive(
    mut runner: Runner,
    control: Arc<Control>,
    commands: Receiver<Command>,
    done: Arc<ResultSlot<RunSummary>>,
    summary_out: Arc<Mutex<Option<RunSummary>>>,
) {
    let start = Instant::now();
    let mut stopped = false;
    loop {
        control.wait_while_paused();
        while let Ok(command) = commands.try_recv() {
            runner.apply(command);
        }
        if control.is_stopped() {
            stopped = true;
            break;
        }
        if runner.engine.is_converged() {
            break;
        }
        runner.tick();
    }

    let summary = runner.finish(start, stopped);
    *lock(&summary_out) = Some(summary);
    done.complete(Ok(summary));
    if let Some(pooled) = runner.pooled.take() {
        pooled.pool.shutdown();
    }
}

enum Driver {
    Inline {
        runner: Box<Runner>,
        started: Option<Instant>,
        done: Arc<ResultSlot<RunSummary>>,
        summary: Option<RunSummary>,
    },
    Threaded {
        commands: Sender<Command>,
        buffer: Option<SharedBuffer>,
        thread: Option<JoinHandle<()>>,
        summary: Arc<Mutex<Option<RunSummary>>>,
    },
}

/// A force layout run and the handle to steer it
///
/// # Example
///
/// ```
/// use force_layout::config::{ExecutionMode, SimulationParams};
/// use force_layout::engine::{Body, Link};
/// use force_layout::math::Vec3;
/// use force_layout::simulation::Simulation;
///
/// let bodies = vec![
///     Body::new(1, Vec3::new(0.0, 0.0, 0.0)),
///     Body::new(2, Vec3::new(5.0, 0.0, 0.0)),
/// ];
/// let links = vec![Link::new(1, 2)];
/// let params = SimulationParams::default().with_max_ticks(50);
///
/// let sim = Simulation::start(bodies, links, params, ExecutionMode::Background).unwrap();
/// let summary = sim.wait().unwrap();
/// assert!(summary.ticks <= 50);
/// ```
pub struct Simulation {
    mode: ExecutionMode,
    control: Arc<Control>,
    driver: Driver,
    events: Receiver<SimulationEvent>,
    completion: Option<TaskHandle<RunSummary>>,
    latest: Arc<Mutex<Snapshot>>,
    index: HashMap<BodyId, usize>,
}

impl Simulation {
    /// Validate inputs and start a run with default options
    pub fn start(
        bodies: Vec<Body>,
        links: Vec<Link>,
        params: SimulationParams,
        mode: ExecutionMode,
    ) -> Result<Self, LayoutError> {
        Self::start_with(bodies, links, params, mode, SimulationOptions::default())
    }

    /// Validate inputs and start a run
    ///
    /// Pooled mode falls back to background mode when a shared buffer of the
    /// required size cannot be created; [`Simulation::mode`] reports the
    /// mode actually used.
    pub fn start_with(
        bodies: Vec<Body>,
        links: Vec<Link>,
        params: SimulationParams,
        mode: ExecutionMode,
        options: SimulationOptions,
    ) -> Result<Self, LayoutError> {
        options.validate()?;
        if let ExecutionMode::Pooled { threads } = mode {
            if threads == 0 {
                return Err(LayoutError::config("threads", "pooled mode needs at least one thread"));
            }
        }
        let link_count = links.len();
        let engine = Engine::new(bodies, links, params)?;
        let controller = options
            .adaptive
            .clone()
            .map(|config| AdaptiveController::new(config, engine.theta()))
            .transpose()?;

        let index: HashMap<BodyId, usize> = engine
            .store()
            .ids()
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        // Everything fallible that does not need a thread happens first
        let mut effective = mode;
        let mut shared = None;
        if let ExecutionMode::Pooled { threads } = mode {
            let pool_settings = PoolSettings {
                layout_workers: threads,
                ..options.pool.clone()
            };
            pool_settings.validate()?;
            match SharedBuffer::try_with_limit(engine.len(), options.shared_memory_limit) {
                Ok(buffer) => {
                    engine.publish(&buffer)?;
                    shared = Some((buffer, pool_settings, threads));
                }
                Err(e) => {
                    warn!(error = %e, "shared buffer unavailable, falling back to background mode");
                    effective = ExecutionMode::Background;
                }
            }
        }

        let (events_tx, events) = unbounded();
        let latest = Arc::new(Mutex::new(engine.snapshot()));
        let control = Arc::new(Control::default());
        let (completion, done) = TaskHandle::detached(0);

        info!(
            mode = ?effective,
            bodies = engine.len(),
            links = link_count,
            "simulation starting"
        );

        let mut runner = Runner {
            engine,
            controller,
            pooled: None,
            events: events_tx,
            latest: Arc::clone(&latest),
            snapshot_every: options.snapshot_every,
        };

        let driver = match effective {
            ExecutionMode::Inline => Driver::Inline {
                runner: Box::new(runner),
                started: None,
                done,
                summary: None,
            },
            ExecutionMode::Background | ExecutionMode::Pooled { .. } => {
                let mut buffer = None;
                if let Some((shared, settings, threads)) = shared {
                    let pool = WorkerPool::new(settings)?;
                    let timeout = Duration::from_millis(options.chunk_timeout_ms);
                    runner.pooled = Some(Pooled {
                        pool,
                        layout: ChunkedLayout::new(shared.clone(), threads, timeout),
                    });
                    buffer = Some(shared);
                }
                let (commands, commands_rx) = unbounded();
                let summary = Arc::new(Mutex::new(None));
                let thread = {
                    let control = Arc::clone(&control);
                    let summary = Arc::clone(&summary);
                    thread::Builder::new()
                        .name("force-layout-simulation".to_string())
                        .spawn(move || drive(runner, control, commands_rx, done, summary))
                        .map_err(|e| LayoutError::WorkerPool(format!("failed to spawn simulation thread: {}", e)))?
                };
                Driver::Threaded {
                    commands,
                    buffer,
                    thread: Some(thread),
                    summary,
                }
            }
        };

        Ok(Simulation {
            mode: effective,
            control,
            driver,
            events,
            completion: Some(completion),
            latest,
            index,
        })
    }

    /// The mode the run actually uses
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Receiver of tick snapshots and the final summary
    pub fn events(&self) -> &Receiver<SimulationEvent> {
        &self.events
    }

    /// Take the completion handle; resolves with the final [`RunSummary`]
    ///
    /// Returns `None` after the first call.
    pub fn completion(&mut self) -> Option<TaskHandle<RunSummary>> {
        self.completion.take()
    }

    /// Advance an inline run by one tick
    ///
    /// Returns `None` in threaded modes, or once the run has halted or been
    /// stopped.
    pub fn step(&mut self) -> Option<TickStats> {
        let Driver::Inline {
            runner,
            started,
            done,
            summary,
        } = &mut self.driver
        else {
            return None;
        };
        if summary.is_some() {
            return None;
        }
        let start = *started.get_or_insert_with(Instant::now);
        let stopped = self.control.is_stopped();
        if stopped || runner.engine.is_converged() {
            let result = runner.finish(start, stopped);
            *summary = Some(result);
            done.complete(Ok(result));
            return None;
        }
        Some(runner.tick())
    }

    /// Tick an inline run until it halts or is stopped
    ///
    /// In threaded modes this blocks until the background run finishes.
    pub fn run(&mut self) -> Result<RunSummary, TaskError> {
        if let Driver::Inline { .. } = self.driver {
            while self.step().is_some() {}
            if let Driver::Inline { summary: Some(s), .. } = &self.driver {
                return Ok(*s);
            }
        }
        self.join()
    }

    /// Block until the run ends and return its summary
    pub fn wait(mut self) -> Result<RunSummary, TaskError> {
        self.run()
    }

    fn join(&mut self) -> Result<RunSummary, TaskError> {
        match &mut self.driver {
            Driver::Inline { summary, .. } => summary.ok_or(TaskError::Cancelled(0)),
            Driver::Threaded { thread, summary, .. } => {
                if let Some(thread) = thread.take() {
                    if thread.join().is_err() {
                        return Err(TaskError::WorkerFault {
                            worker: "force-layout-simulation".to_string(),
                            message: "simulation thread panicked".to_string(),
                        });
                    }
                }
                (*lock(summary)).ok_or(TaskError::Cancelled(0))
            }
        }
    }

    /// Check if the run has ended
    pub fn is_finished(&self) -> bool {
        match &self.driver {
            Driver::Inline { summary, .. } => summary.is_some(),
            Driver::Threaded { summary, .. } => lock(summary).is_some(),
        }
    }

    /// Stop the run at the next tick boundary; repeated calls are no-ops
    pub fn stop(&self) {
        if !self.control.is_stopped() {
            debug!("simulation stop requested");
        }
        self.control.stop();
    }

    /// Park the tick loop at the next tick boundary
    pub fn pause(&self) {
        self.control.set_paused(true);
    }

    /// Continue a paused run
    pub fn resume(&self) {
        self.control.set_paused(false);
    }

    /// Check if the run is paused
    pub fn is_paused(&self) -> bool {
        *self.control.paused()
    }

    /// Pin one axis of a body, or release it with `None`
    ///
    /// Takes effect at the next tick boundary.
    pub fn set_pinned(&mut self, id: BodyId, axis: Axis, value: Option<f64>) -> Result<(), LayoutError> {
        if !self.index.contains_key(&id) {
            return Err(LayoutError::UnknownBody(id));
        }
        match &mut self.driver {
            Driver::Inline { runner, .. } => runner.engine.set_pinned(id, axis, value),
            Driver::Threaded { commands, .. } => {
                if let Some(v) = value {
                    if !v.is_finite() {
                        return Err(LayoutError::config("pin", format!("non-finite pin {} for body {}", v, id)));
                    }
                }
                send(commands, Command::SetPinned { id, axis, value });
                Ok(())
            }
        }
    }

    /// Set theta and turn adaptive control off
    pub fn set_theta(&mut self, theta: f64) -> Result<(), LayoutError> {
        validate_theta(theta)?;
        match &mut self.driver {
            Driver::Inline { runner, .. } => {
                runner.controller = None;
                runner.engine.set_theta(theta)
            }
            Driver::Threaded { commands, .. } => {
                send(commands, Command::SetTheta(theta));
                Ok(())
            }
        }
    }

    /// Let an [`AdaptiveController`] drive theta from now on
    pub fn enable_adaptive(&mut self, config: ControllerConfig) -> Result<(), LayoutError> {
        config.validate()?;
        match &mut self.driver {
            Driver::Inline { runner, .. } => {
                runner.controller = Some(AdaptiveController::new(config, runner.engine.theta())?);
                Ok(())
            }
            Driver::Threaded { commands, .. } => {
                send(commands, Command::EnableAdaptive(config));
                Ok(())
            }
        }
    }

    /// Current theta of an inline run; `None` in threaded modes
    pub fn theta(&self) -> Option<f64> {
        match &self.driver {
            Driver::Inline { runner, .. } => Some(runner.engine.theta()),
            Driver::Threaded { .. } => None,
        }
    }

    /// Most recent position of a body
    ///
    /// Pooled runs read the shared buffer, so the value may be mid-update
    /// on another axis.
    pub fn position(&self, id: BodyId) -> Option<Vec3> {
        let index = *self.index.get(&id)?;
        match &self.driver {
            Driver::Inline { runner, .. } => runner.engine.position(id),
            Driver::Threaded {
                buffer: Some(buffer), ..
            } => Some(buffer.load_vec3(index, Field::Position)),
            Driver::Threaded { .. } => lock(&self.latest).positions.get(index).copied(),
        }
    }

    /// Latest snapshot of every position
    pub fn snapshot(&self) -> Snapshot {
        match &self.driver {
            Driver::Inline { runner, .. } => runner.engine.snapshot(),
            Driver::Threaded { .. } => lock(&self.latest).clone(),
        }
    }

    /// Dense indices of bodies inside `volume` and within `culling_distance` of `eye`
    pub fn visible_bodies(&self, volume: &ViewVolume, eye: Vec3, culling_distance: f64) -> Vec<usize> {
        match &self.driver {
            Driver::Inline { runner, .. } => runner.engine.visible_bodies(volume, eye, culling_distance),
            Driver::Threaded { .. } => {
                let latest = lock(&self.latest);
                visibility::visible_bodies(&latest.positions, volume, eye, culling_distance)
            }
        }
    }

    /// Number of bodies
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Check if the run has no bodies
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

fn send(commands: &Sender<Command>, command: Command) {
    if commands.send(command).is_err() {
        debug!("simulation already finished, update dropped");
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        if let Driver::Threaded { thread, .. } = &mut self.driver {
            if let Some(thread) = thread.take() {
                self.control.stop();
                let _ = thread.join();
            }
        }
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("mode", &self.mode)
            .field("bodies", &self.index.len())
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Vec<Body>, Vec<Link>) {
        (
            vec![Body::new(1, Vec3::ZERO), Body::new(2, Vec3::new(10.0, 0.0, 0.0))],
            vec![Link::new(1, 2)],
        )
    }

    #[test]
    fn test_validation_happens_before_start() {
        let (bodies, _) = pair();
        let err = Simulation::start(bodies.clone(), vec![Link::new(1, 9)], SimulationParams::default(), ExecutionMode::Background)
            .unwrap_err();
        assert_eq!(err, LayoutError::UnknownBody(BodyId(9)));

        let bad = SimulationParams::default().with_theta(1.5);
        assert!(Simulation::start(bodies.clone(), vec![], bad, ExecutionMode::Inline).is_err());

        let err = Simulation::start(bodies, vec![], SimulationParams::default(), ExecutionMode::Pooled { threads: 0 })
            .unwrap_err();
        assert!(matches!(err, LayoutError::Configuration { field: "threads", .. }));
    }

    #[test]
    fn test_inline_step_until_halt() {
        let (bodies, links) = pair();
        let params = SimulationParams::default().with_max_ticks(20);
        let mut sim = Simulation::start(bodies, links, params, ExecutionMode::Inline).unwrap();
        let mut ticks = 0;
        while sim.step().is_some() {
            ticks += 1;
        }
        assert_eq!(ticks, 20);
        assert!(sim.is_finished());
        let summary = sim.completion().unwrap().wait().unwrap();
        assert_eq!(summary.ticks, 20);
        assert!(!summary.stopped);
    }

    #[test]
    fn test_inline_events() {
        let (bodies, links) = pair();
        let params = SimulationParams::default().with_max_ticks(6);
        let options = SimulationOptions {
            snapshot_every: 3,
            ..Default::default()
        };
        let mut sim = Simulation::start_with(bodies, links, params, ExecutionMode::Inline, options).unwrap();
        sim.run().unwrap();
        let events: Vec<SimulationEvent> = sim.events().try_iter().collect();
        let ticks: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                SimulationEvent::Tick(s) => Some(s.tick),
                _ => None,
            })
            .collect();
        assert_eq!(ticks, vec![3, 6]);
        assert!(matches!(events.last(), Some(SimulationEvent::Converged(_))));
    }

    #[test]
    fn test_control_flags() {
        let control = Control::default();
        control.set_paused(true);
        assert!(*control.paused());
        control.stop();
        // a stopped loop never parks
        control.wait_while_paused();
        assert!(control.is_stopped());
    }

    #[test]
    fn test_options_validation() {
        let options = SimulationOptions {
            snapshot_every: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
        let parsed: SimulationOptions = serde_json::from_str(r#"{"chunk_timeout_ms": 250}"#).unwrap();
        assert_eq!(parsed.chunk_timeout_ms, 250);
        assert_eq!(parsed.snapshot_every, 1);
    }
}
