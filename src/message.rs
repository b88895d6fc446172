//! Message definitions for the simulation engine.
//!
//! Messages are the only unit of work a worker processes. Every message
//! carries an arrival time and a [`MessageKind`] telling the worker how to
//! handle it: dispatch it to a receiving unit, run its own handler, or treat
//! it as the end-of-window marker of the barrier protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{PartitionId, SimTime, UnitId, VehicleId};
use crate::unit::{DispatchContext, DispatchError};

/// Result of handling one message: the follow-on messages it spawned.
pub type DispatchResult = Result<Vec<Message>, DispatchError>;

/// Logic carried by a [`MessageKind::SelfHandling`] message.
///
/// Self-handling messages are not tied to a persistent network entity
/// (periodic reporting, scripted injections). Any
/// `FnOnce(&mut DispatchContext) -> DispatchResult` closure qualifies.
pub trait SelfHandler: Send {
    /// Runs the handler on the partition the message was routed to.
    fn handle(self: Box<Self>, ctx: &mut DispatchContext<'_>) -> DispatchResult;
}

impl<F> SelfHandler for F
where
    F: FnOnce(&mut DispatchContext<'_>) -> DispatchResult + Send,
{
    fn handle(self: Box<Self>, ctx: &mut DispatchContext<'_>) -> DispatchResult {
        (*self)(ctx)
    }
}

/// Domain payload of a regular message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// A vehicle starts its trip on the first link of `route`.
    Departure {
        vehicle: VehicleId,
        route: Vec<UnitId>,
    },
    /// A vehicle enters `route[leg]`.
    EnterLink {
        vehicle: VehicleId,
        route: Vec<UnitId>,
        leg: usize,
    },
    /// A vehicle reaches the end of the last link of its route.
    Arrival { vehicle: VehicleId },
    /// Free-form data for custom units.
    Data(serde_json::Value),
}

impl Payload {
    /// Returns the vehicle this payload concerns, if any.
    pub fn vehicle(&self) -> Option<VehicleId> {
        match self {
            Payload::Departure { vehicle, .. }
            | Payload::EnterLink { vehicle, .. }
            | Payload::Arrival { vehicle } => Some(*vehicle),
            Payload::Data(_) => None,
        }
    }

    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Payload::Departure { .. } => "departure",
            Payload::EnterLink { .. } => "enter_link",
            Payload::Arrival { .. } => "arrival",
            Payload::Data(_) => "data",
        }
    }
}

/// How a worker handles a message.
pub enum MessageKind {
    /// Dispatched to the receiving unit `target`.
    Regular { target: UnitId, payload: Payload },
    /// Runs its own handler on `partition`; no unit lookup.
    SelfHandling {
        partition: PartitionId,
        handler: Box<dyn SelfHandler>,
    },
    /// End of the owning worker's window; its time is the window boundary.
    BarrierSentinel,
}

impl fmt::Debug for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Regular { target, payload } => f
                .debug_struct("Regular")
                .field("target", target)
                .field("payload", payload)
                .finish(),
            MessageKind::SelfHandling { partition, .. } => f
                .debug_struct("SelfHandling")
                .field("partition", partition)
                .finish_non_exhaustive(),
            MessageKind::BarrierSentinel => f.write_str("BarrierSentinel"),
        }
    }
}

/// A time-stamped unit of work.
///
/// The arrival time is fixed at construction and cannot change once the
/// message is enqueued.
#[derive(Debug)]
pub struct Message {
    time: SimTime,
    kind: MessageKind,
}

impl Message {
    /// Creates a message for the receiving unit `target`.
    pub fn regular(time: SimTime, target: UnitId, payload: Payload) -> Self {
        Self {
            time,
            kind: MessageKind::Regular { target, payload },
        }
    }

    /// Creates a message that carries its own handler and runs on `partition`.
    pub fn self_handling<F>(time: SimTime, partition: PartitionId, handler: F) -> Self
    where
        F: FnOnce(&mut DispatchContext<'_>) -> DispatchResult + Send + 'static,
    {
        Self {
            time,
            kind: MessageKind::SelfHandling {
                partition,
                handler: Box::new(handler),
            },
        }
    }

    /// Creates the end-of-window marker for a window ending at `boundary`.
    pub fn barrier_sentinel(boundary: SimTime) -> Self {
        Self {
            time: boundary,
            kind: MessageKind::BarrierSentinel,
        }
    }

    /// Simulated time at which this message must be handled.
    pub fn arrival_time(&self) -> SimTime {
        self.time
    }

    /// Target unit of a regular message.
    pub fn target(&self) -> Option<UnitId> {
        match &self.kind {
            MessageKind::Regular { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Payload of a regular message.
    pub fn payload(&self) -> Option<&Payload> {
        match &self.kind {
            MessageKind::Regular { payload, .. } => Some(payload),
            _ => None,
        }
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    pub fn into_kind(self) -> MessageKind {
        self.kind
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self.kind, MessageKind::BarrierSentinel)
    }

    /// Ordering rank among messages with equal arrival time.
    ///
    /// Sentinels rank first so a message timestamped exactly at a window
    /// boundary always falls into the next window.
    pub(crate) fn rank(&self) -> u8 {
        match self.kind {
            MessageKind::BarrierSentinel => 0,
            _ => 1,
        }
    }
}
