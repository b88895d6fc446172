//! Built-in receiving units and self-handling messages.
//!
//! # Available Units
//!
//! ## Network
//! - [`LinkUnit`] - Free-flow road link moving vehicles along their routes
//!
//! ## Reporting
//! - [`Heartbeat`] - Periodic self-handling progress report
//!
//! ## Testing (mock)
//! - [`CounterUnit`] - Counts dispatched messages
//! - [`ForwardUnit`] - Forwards data to another unit after a fixed delay
//! - [`FailingUnit`] - Fails or panics at chosen times

pub mod heartbeat;
pub mod link;
pub mod mock;

pub use heartbeat::Heartbeat;
pub use link::LinkUnit;
pub use mock::{CounterUnit, FailingUnit, ForwardUnit};
