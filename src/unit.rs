//! Receiving units and the dispatch contract.
//!
//! A receiving unit is a network entity (link, node or vehicle proxy) that
//! reacts to regular messages. Each unit is owned by exactly one partition for
//! the whole run and is only ever touched by that partition's worker, so unit
//! state needs no locking.

use thiserror::Error;

use crate::message::{DispatchResult, Payload};
use crate::sink::{EventSink, SimEvent, SimEventKind};
use crate::types::{PartitionId, SimTime, UnitId, VehicleId};

/// Errors a dispatch can report. The worker logs and drops the message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("unit {unit} failed: {reason}")]
    Failed { unit: UnitId, reason: String },

    #[error("unit {unit} does not handle {payload} messages")]
    UnsupportedPayload { unit: UnitId, payload: &'static str },

    #[error("vehicle {vehicle} has no leg {leg} on its route (unit {unit})")]
    InvalidRoute {
        unit: UnitId,
        vehicle: VehicleId,
        leg: usize,
    },

    #[error("vehicle {vehicle} is not on unit {unit}")]
    UnknownVehicle { unit: UnitId, vehicle: VehicleId },

    #[error("dispatch panicked: {0}")]
    Panicked(String),
}

impl DispatchError {
    /// Convenience constructor for [`DispatchError::Failed`].
    pub fn failed(unit: UnitId, reason: impl Into<String>) -> Self {
        DispatchError::Failed {
            unit,
            reason: reason.into(),
        }
    }
}

/// What a handler sees while it runs: the current time, its partition, and
/// the event sink.
pub struct DispatchContext<'a> {
    now: SimTime,
    partition: PartitionId,
    sink: &'a dyn EventSink,
    emitted: u64,
}

impl<'a> DispatchContext<'a> {
    pub fn new(now: SimTime, partition: PartitionId, sink: &'a dyn EventSink) -> Self {
        Self {
            now,
            partition,
            sink,
            emitted: 0,
        }
    }

    /// Arrival time of the message being handled.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Partition executing the handler.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Emits a domain event at the current time.
    pub fn emit(&mut self, unit: Option<UnitId>, kind: SimEventKind) {
        self.emitted += 1;
        self.sink.handle(SimEvent {
            time: self.now,
            partition: self.partition,
            unit,
            kind,
        });
    }

    /// Number of events emitted through this context.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

/// A network entity that handles regular messages.
///
/// `dispatch` may return follow-on messages for any unit, on any partition.
/// Follow-ons for units on other partitions must be timestamped at least
/// [`min_causal_delay`](ReceivingUnit::min_causal_delay) after the message
/// being handled.
pub trait ReceivingUnit: Send {
    fn id(&self) -> UnitId;

    /// Initialize the unit state. Called once on the owning worker's thread
    /// before the first window.
    fn init(&mut self) {}

    /// Called once after the worker's last message, with the worker's final
    /// local time, before statistics are exported.
    fn finish(&mut self, _end: SimTime) {}

    /// Handles one message addressed to this unit.
    fn dispatch(&mut self, ctx: &mut DispatchContext<'_>, payload: Payload) -> DispatchResult;

    /// Shortest delay between a handled message and any follow-on for
    /// another unit, when the unit knows it.
    fn min_causal_delay(&self) -> Option<SimTime> {
        None
    }

    /// Export unit-level statistics.
    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({ "id": self.id() })
    }
}
