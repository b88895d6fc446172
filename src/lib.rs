//! # pdes
//!
//! A windowed, barrier-synchronized parallel discrete-event simulation engine.
//!
//! ## Design Principles
//!
//! - **Static partitioning**: every receiving unit (link, node, vehicle proxy)
//!   belongs to exactly one partition for the whole run, and each partition is
//!   driven by its own OS thread. Unit state is never shared.
//! - **Time-ordered queues**: each partition owns a priority queue of
//!   messages ordered by arrival time. Any worker may put into any queue;
//!   only the owner takes from it.
//! - **Conservative windows**: simulated time advances in windows of fixed
//!   width. A barrier sentinel marks the end of each worker's window; once all
//!   workers reach it, the window advances. With a width no larger than the
//!   minimum cause → effect delay between partitions, no message ever arrives
//!   in a window that has already been processed.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use pdes::{EngineParams, Message, Payload, SimulationBuilder};
//! use pdes::sink::CollectingSink;
//! use pdes::units::LinkUnit;
//!
//! let sink = Arc::new(CollectingSink::new());
//! let mut builder = SimulationBuilder::new(EngineParams::new(100, 10, 2)).with_sink(sink.clone());
//!
//! // Link 1 on partition 0 feeds link 2 on partition 1
//! builder.add_unit(0, Box::new(LinkUnit::new(1, 12)));
//! builder.add_unit(1, Box::new(LinkUnit::new(2, 10)));
//! builder.schedule(Message::regular(5, 1, Payload::Departure { vehicle: 1, route: vec![1, 2] }));
//!
//! let stats = builder.build().unwrap().run().unwrap();
//! println!("{}", stats);
//! assert_eq!(sink.sorted().last().unwrap().time, 27);
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use pdes::{create_default_registry, SimConfig, SimulationBuilder};
//!
//! let config = SimConfig::from_file("network.yaml")?;
//! pdes::init_logging(&config.simulation.log_level);
//! let stats = SimulationBuilder::from_config(&config, &create_default_registry())?
//!     .build()?
//!     .run()?;
//! ```

pub mod types;
pub mod message;
pub mod unit;
pub mod sink;
pub mod queue;
pub mod barrier;
pub mod scheduler;
pub mod worker;
pub mod engine;
pub mod config;
pub mod registry;
pub mod stats;
pub mod units;

// Re-export commonly used types
pub use types::{PartitionId, SimTime, UnitId, VehicleId};
pub use message::{DispatchResult, Message, MessageKind, Payload, SelfHandler};
pub use unit::{DispatchContext, DispatchError, ReceivingUnit};
pub use sink::{CollectingSink, EventSink, JsonLinesSink, NullSink, SimEvent, SimEventKind};
pub use queue::{PartitionQueue, QueueClosed, Take};
pub use barrier::{Barrier, BarrierError, BarrierWaitResult};
pub use scheduler::{EngineParams, RouteError, Scheduler, Window};
pub use worker::{Worker, WorkerState};
pub use engine::{EngineError, EngineResult, Simulation, SimulationBuilder};
pub use config::{ConfigError, SimConfig, SimConfigBuilder};
pub use registry::{create_default_registry, UnitRegistry};
pub use stats::{PartitionStats, RunStats, Timer};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging. `RUST_LOG`
/// takes precedence over `level`. Thread names are shown so each line can be
/// attributed to its worker.
///
/// # Example
///
/// ```rust,ignore
/// pdes::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
