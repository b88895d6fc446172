//! Per-partition worker.
//!
//! A [`Worker`] drives one partition on its own OS thread. It owns the
//! partition's receiving units outright, pulls messages from its queue in
//! time order, and takes part in the window barrier whenever it reaches its
//! sentinel.
//!
//! ```text
//!            sentinel, time < horizon           released
//!  Running ────────────────────────────▶ AtBarrier ──────▶ Running
//!     │
//!     │ sentinel, time >= horizon (or queue closed)
//!     ▼
//!  Terminated
//! ```

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageKind, Payload, SelfHandler};
use crate::queue::Take;
use crate::scheduler::{RouteError, Scheduler, Window};
use crate::sink::{SimEvent, SimEventKind};
use crate::stats::{PartitionStats, Timer};
use crate::types::{PartitionId, SimTime, UnitId};
use crate::unit::{DispatchContext, DispatchError, ReceivingUnit};

/// Lifecycle state of a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Running,
    AtBarrier,
    Terminated,
}

/// Takes the worker off the barrier when `run` returns or unwinds, so peers
/// are never left waiting for it.
struct Deregistration {
    scheduler: Arc<Scheduler>,
    id: PartitionId,
}

impl Drop for Deregistration {
    fn drop(&mut self) {
        self.scheduler.deregister(self.id);
    }
}

/// Executes the messages of one partition.
pub struct Worker {
    id: PartitionId,
    scheduler: Arc<Scheduler>,
    units: HashMap<UnitId, Box<dyn ReceivingUnit>>,
    state: WorkerState,
    local_time: SimTime,
    window: Window,
    stats: PartitionStats,
}

impl Worker {
    /// Creates the worker for `id`. Its queue is `scheduler.queue(id)`.
    pub fn new(id: PartitionId, scheduler: Arc<Scheduler>) -> Self {
        let window = Window::new(0, scheduler.params().window_width);
        Self {
            id,
            scheduler,
            units: HashMap::new(),
            state: WorkerState::Running,
            local_time: 0,
            window,
            stats: PartitionStats {
                id,
                ..Default::default()
            },
        }
    }

    /// Hands a unit to this worker. The scheduler's routing table must map
    /// the unit to this partition.
    pub fn add_unit(&mut self, unit: Box<dyn ReceivingUnit>) {
        self.units.insert(unit.id(), unit);
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Arrival time of the last message this worker processed.
    pub fn local_time(&self) -> SimTime {
        self.local_time
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Runs the worker loop until the horizon is reached or the queue is
    /// closed, then deregisters from the scheduler.
    pub fn run(mut self) -> PartitionStats {
        let timer = Timer::start();
        let deregistration = Deregistration {
            scheduler: Arc::clone(&self.scheduler),
            id: self.id,
        };

        for unit in self.units.values_mut() {
            unit.init();
        }
        self.state = WorkerState::Running;
        tracing::debug!(worker = self.id, units = self.units.len(), "Worker started");

        while self.state != WorkerState::Terminated {
            let message = match self.scheduler.queue(self.id).take_next() {
                Take::Message(message) => message,
                Take::Closed => {
                    tracing::debug!(worker = self.id, "Queue closed");
                    self.state = WorkerState::Terminated;
                    break;
                }
            };
            self.process(message);
        }

        self.stats.final_time = self.local_time;
        self.stats.unit_count = self.units.len();
        self.stats.peak_queue_len = self.scheduler.queue(self.id).peak_len();
        self.finish_units();
        self.stats.wall_time_ms = timer.elapsed_ms();
        tracing::debug!(
            worker = self.id,
            local_time = self.local_time,
            dispatched = self.stats.messages_dispatched,
            wall_time_ms = self.stats.wall_time_ms,
            "Worker terminated"
        );

        drop(deregistration);
        self.stats
    }

    /// Closes out every unit at the worker's final time and, when requested,
    /// collects their statistics. A unit that panics here only loses its own
    /// statistics.
    fn finish_units(&mut self) {
        let end = self.local_time;
        let collect = self.scheduler.params().collect_stats;
        let mut ids: Vec<_> = self.units.keys().copied().collect();
        ids.sort_unstable();

        for id in ids {
            let Some(unit) = self.units.get_mut(&id) else {
                continue;
            };
            let exported = panic::catch_unwind(AssertUnwindSafe(|| {
                unit.finish(end);
                collect.then(|| unit.export_stats())
            }));
            match exported {
                Ok(Some(stats)) => self.stats.units.push(stats),
                Ok(None) => {}
                Err(cause) => {
                    let reason = panic_message(cause.as_ref());
                    tracing::warn!(worker = self.id, unit = id, %reason, "Unit panicked while finishing");
                    if collect {
                        self.stats.units.push(serde_json::json!({ "id": id, "error": reason }));
                    }
                }
            }
        }
    }

    fn process(&mut self, message: Message) {
        self.local_time = message.arrival_time();
        let time = self.local_time;

        match message.into_kind() {
            MessageKind::BarrierSentinel => self.on_sentinel(),
            MessageKind::Regular { target, payload } => self.dispatch_regular(time, target, payload),
            MessageKind::SelfHandling { handler, .. } => self.dispatch_self(time, handler),
        }
    }

    fn on_sentinel(&mut self) {
        let horizon = self.scheduler.params().horizon;
        if self.local_time >= horizon {
            tracing::debug!(worker = self.id, horizon, "Reached horizon");
            self.state = WorkerState::Terminated;
            return;
        }

        self.state = WorkerState::AtBarrier;
        let waited = self.scheduler.barrier().wait(self.id, |window, round| {
            window.advance();
            tracing::debug!(round, boundary = window.boundary, "Advancing window");
        });

        match waited {
            Ok(result) => {
                self.window = result.state;
                self.stats.rounds += 1;
                if result.is_leader {
                    self.stats.rounds_led += 1;
                }
            }
            Err(e) => {
                tracing::error!(worker = self.id, error = %e, "Barrier wait failed");
                self.state = WorkerState::Terminated;
                return;
            }
        }

        self.state = WorkerState::Running;
        // The last window is cut short at the horizon.
        let sentinel = Message::barrier_sentinel(self.window.boundary.min(horizon));
        if self.scheduler.queue(self.id).put(sentinel).is_err() {
            self.state = WorkerState::Terminated;
        }
    }

    fn dispatch_regular(&mut self, time: SimTime, target: UnitId, payload: Payload) {
        let vehicle = payload.vehicle();
        let Some(unit) = self.units.get_mut(&target) else {
            self.stats.dispatch_failures += 1;
            tracing::warn!(worker = self.id, time, unit = target, "Unit not owned by this partition; dropping message");
            return;
        };

        tracing::trace!(worker = self.id, time, unit = target, payload = payload.name(), "Dispatching message");

        let mut ctx = DispatchContext::new(time, self.id, self.scheduler.sink());
        let result = panic::catch_unwind(AssertUnwindSafe(|| unit.dispatch(&mut ctx, payload)))
            .unwrap_or_else(|cause| Err(DispatchError::Panicked(panic_message(cause.as_ref()))));
        self.stats.events_emitted += ctx.emitted();

        match result {
            Ok(follow_ons) => {
                self.stats.messages_dispatched += 1;
                self.route_all(time, follow_ons);
            }
            Err(e) => {
                self.stats.dispatch_failures += 1;
                tracing::warn!(
                    worker = self.id,
                    time,
                    unit = target,
                    vehicle = ?vehicle,
                    error = %e,
                    "Dispatch failed; dropping message"
                );
            }
        }
    }

    fn dispatch_self(&mut self, time: SimTime, handler: Box<dyn SelfHandler>) {
        tracing::trace!(worker = self.id, time, "Running self-handling message");

        let mut ctx = DispatchContext::new(time, self.id, self.scheduler.sink());
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&mut ctx)))
            .unwrap_or_else(|cause| Err(DispatchError::Panicked(panic_message(cause.as_ref()))));
        self.stats.events_emitted += ctx.emitted();

        match result {
            Ok(follow_ons) => {
                self.stats.self_handled += 1;
                self.route_all(time, follow_ons);
            }
            Err(e) => {
                self.stats.dispatch_failures += 1;
                tracing::warn!(worker = self.id, time, error = %e, "Self-handling message failed; dropping it");
            }
        }
    }

    fn route_all(&mut self, origin: SimTime, messages: Vec<Message>) {
        for message in messages {
            let time = message.arrival_time();
            let vehicle = message.payload().and_then(Payload::vehicle);

            match self.scheduler.route(message) {
                Ok(partition) if partition == self.id => {
                    self.stats.routed_local += 1;
                    if time < origin {
                        self.report_violation(origin, time, partition);
                    }
                }
                Ok(partition) => {
                    self.stats.routed_remote += 1;
                    if time < self.window.boundary {
                        self.report_violation(origin, time, partition);
                    }
                }
                Err(RouteError::UnknownUnit(unit)) => {
                    self.stats.messages_dropped += 1;
                    tracing::warn!(worker = self.id, time = origin, unit, vehicle = ?vehicle, "No partition owns target unit; dropping message");
                    if let Some(vehicle) = vehicle {
                        self.stats.events_emitted += 1;
                        self.scheduler.sink().handle(SimEvent {
                            time: origin,
                            partition: self.id,
                            unit: Some(unit),
                            kind: SimEventKind::Stuck { vehicle },
                        });
                    }
                }
                Err(e) => {
                    self.stats.messages_dropped += 1;
                    tracing::warn!(worker = self.id, time = origin, error = %e, "Could not route message; dropping it");
                }
            }
        }
    }

    fn report_violation(&mut self, origin: SimTime, time: SimTime, partition: PartitionId) {
        self.stats.causality_violations += 1;
        tracing::warn!(
            worker = self.id,
            origin,
            time,
            partition,
            window_end = self.window.boundary,
            "Follow-on message scheduled before the current window end"
        );
    }
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
