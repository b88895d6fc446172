//! Simulation setup and execution.
//!
//! [`SimulationBuilder`] collects the receiving units of every partition and
//! the initial message schedule, checks the lookahead invariant, and produces
//! a [`Simulation`]. [`Simulation::run`] starts one named OS thread per
//! partition, waits for all of them, and returns the combined [`RunStats`].
//!
//! # Example
//!
//! ```
//! use pdes::{EngineParams, Message, Payload, SimulationBuilder};
//! use pdes::units::LinkUnit;
//!
//! let mut builder = SimulationBuilder::new(EngineParams::new(100, 10, 2));
//! builder.add_unit(0, Box::new(LinkUnit::new(1, 10)));
//! builder.add_unit(1, Box::new(LinkUnit::new(2, 15)));
//! builder.schedule(Message::regular(0, 1, Payload::Departure { vehicle: 7, route: vec![1, 2] }));
//!
//! let stats = builder.build().unwrap().run().unwrap();
//! assert_eq!(stats.messages_dispatched(), 3);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use thiserror::Error;

use crate::config::{ConfigError, SimConfig};
use crate::message::{Message, Payload};
use crate::registry::UnitRegistry;
use crate::scheduler::{check_lookahead, EngineParams, RouteError, Scheduler};
use crate::sink::{EventSink, NullSink};
use crate::stats::{PartitionStats, RunStats, Timer};
use crate::types::{PartitionId, SimTime, UnitId};
use crate::unit::ReceivingUnit;
use crate::units::Heartbeat;
use crate::worker::Worker;

/// Errors that prevent a simulation from being built or completed.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid engine parameters: {0}")]
    InvalidParams(String),

    #[error(
        "Window width {window_width} exceeds the minimum causal delay {min_causal_delay}; \
         events could be dispatched out of causal order"
    )]
    Causality {
        window_width: SimTime,
        min_causal_delay: SimTime,
    },

    #[error("Unit {unit} assigned to partition {partition}, but only {partition_count} partitions exist")]
    UnknownPartition {
        unit: UnitId,
        partition: PartitionId,
        partition_count: usize,
    },

    #[error("Duplicate unit ID: {0}")]
    DuplicateUnit(UnitId),

    #[error("Initial message at time {time} cannot be routed: {source}")]
    Unroutable {
        time: SimTime,
        #[source]
        source: RouteError,
    },

    #[error("Failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: PartitionId,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker {0} panicked")]
    WorkerPanicked(PartitionId),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Collects units and initial messages for a run.
pub struct SimulationBuilder {
    params: EngineParams,
    units: Vec<(PartitionId, Box<dyn ReceivingUnit>)>,
    initial: Vec<Message>,
    sink: Arc<dyn EventSink>,
}

impl SimulationBuilder {
    /// Creates a builder with a [`NullSink`].
    pub fn new(params: EngineParams) -> Self {
        Self {
            params,
            units: Vec::new(),
            initial: Vec::new(),
            sink: Arc::new(NullSink),
        }
    }

    /// Builds the network and departure schedule described by `config`.
    ///
    /// Units are created through `registry`. If the configuration sets a
    /// heartbeat interval, partition 0 also gets a periodic progress report.
    pub fn from_config(config: &SimConfig, registry: &UnitRegistry) -> EngineResult<Self> {
        config.validate()?;
        let mut builder = Self::new(config.simulation.engine_params());

        for unit in &config.units {
            let created = registry.create(&unit.unit_type, unit.id, &unit.attrs)?;
            builder.add_unit(unit.partition, created);
        }

        for departure in &config.departures {
            // Validation guarantees a non-empty route.
            if let Some(&first) = departure.route.first() {
                builder.schedule(Message::regular(
                    departure.time,
                    first,
                    Payload::Departure {
                        vehicle: departure.vehicle,
                        route: departure.route.clone(),
                    },
                ));
            }
        }

        if let Some(interval) = config.simulation.heartbeat_interval {
            let heartbeat = Heartbeat::new(0, interval, config.simulation.horizon);
            builder.schedule(heartbeat.message(0));
        }

        Ok(builder)
    }

    /// Sets the sink receiving domain events.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Assigns `unit` to `partition` for the whole run.
    pub fn add_unit(&mut self, partition: PartitionId, unit: Box<dyn ReceivingUnit>) {
        self.units.push((partition, unit));
    }

    /// Schedules a message before the run starts.
    pub fn schedule(&mut self, message: Message) {
        self.initial.push(message);
    }

    /// Schedules several messages before the run starts.
    pub fn schedule_all(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.initial.extend(messages);
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Smallest causal delay reported by the declared units, if any.
    pub fn min_unit_delay(&self) -> Option<SimTime> {
        self.units
            .iter()
            .filter_map(|(_, unit)| unit.min_causal_delay())
            .min()
    }

    /// Validates the setup and distributes units and messages to partitions.
    ///
    /// Fails fast if the window width exceeds either the declared minimum
    /// causal delay or the smallest delay reported by a unit.
    pub fn build(self) -> EngineResult<Simulation> {
        self.params.validate()?;
        if let Some(min_delay) = self.min_unit_delay() {
            check_lookahead(self.params.window_width, min_delay)?;
        }

        let partition_count = self.params.partition_count;
        let mut routing = HashMap::with_capacity(self.units.len());
        for (partition, unit) in &self.units {
            if *partition >= partition_count {
                return Err(EngineError::UnknownPartition {
                    unit: unit.id(),
                    partition: *partition,
                    partition_count,
                });
            }
            if routing.insert(unit.id(), *partition).is_some() {
                return Err(EngineError::DuplicateUnit(unit.id()));
            }
        }

        let scheduler = Arc::new(Scheduler::new(self.params, routing, self.sink));

        for message in self.initial {
            let time = message.arrival_time();
            scheduler
                .route(message)
                .map_err(|source| EngineError::Unroutable { time, source })?;
        }

        let mut workers: Vec<_> = (0..partition_count)
            .map(|id| Worker::new(id, Arc::clone(&scheduler)))
            .collect();
        for (partition, unit) in self.units {
            workers[partition].add_unit(unit);
        }

        Ok(Simulation { scheduler, workers })
    }
}

/// A fully set up run, ready to execute.
pub struct Simulation {
    scheduler: Arc<Scheduler>,
    workers: Vec<Worker>,
}

impl Simulation {
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn partition_count(&self) -> usize {
        self.workers.len()
    }

    /// Runs every partition on its own thread until all workers have
    /// terminated.
    pub fn run(self) -> EngineResult<RunStats> {
        let Simulation { scheduler, workers } = self;
        let params = scheduler.params().clone();
        let timer = Timer::start();

        tracing::info!(
            partitions = params.partition_count,
            horizon = params.horizon,
            window_width = params.window_width,
            "Starting simulation"
        );

        let mut partitions = Vec::with_capacity(workers.len());
        let mut failure = None;

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers.len());
            let mut unstarted = Vec::new();

            for worker in workers {
                let id = worker.id();
                if failure.is_some() {
                    unstarted.push(id);
                    continue;
                }
                let spawned = thread::Builder::new()
                    .name(format!("pdes-worker-{}", id))
                    .spawn_scoped(scope, move || worker.run());
                match spawned {
                    Ok(handle) => handles.push((id, handle)),
                    Err(source) => {
                        tracing::error!(worker = id, error = %source, "Failed to spawn worker");
                        unstarted.push(id);
                        failure = Some(EngineError::Spawn { worker: id, source });
                    }
                }
            }

            // Peers must not wait at the barrier for workers that never ran.
            for id in unstarted {
                scheduler.deregister(id);
            }

            for (id, handle) in handles {
                match handle.join() {
                    Ok(stats) => partitions.push(stats),
                    Err(_) => {
                        tracing::error!(worker = id, "Worker panicked");
                        partitions.push(PartitionStats {
                            id,
                            ..Default::default()
                        });
                        failure.get_or_insert(EngineError::WorkerPanicked(id));
                    }
                }
            }
        });

        scheduler.sink().flush();

        if let Some(err) = failure {
            return Err(err);
        }

        for stats in &mut partitions {
            stats.pending_messages = scheduler.queue(stats.id).len();
        }
        partitions.sort_by_key(|p| p.id);

        let stats = RunStats {
            horizon: params.horizon,
            window_width: params.window_width,
            rounds: scheduler.rounds(),
            final_boundary: scheduler.window_boundary().min(params.horizon),
            partitions,
            wall_time_ms: timer.elapsed_ms(),
        };

        tracing::info!(
            rounds = stats.rounds,
            dispatched = stats.messages_dispatched(),
            failures = stats.dispatch_failures(),
            wall_time_ms = stats.wall_time_ms,
            "Simulation finished"
        );

        Ok(stats)
    }
}
