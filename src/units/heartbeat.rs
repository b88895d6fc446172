//! Periodic progress report.
//!
//! A heartbeat is a self-handling message: it is not tied to any unit, logs
//! the simulated time it runs at, emits a `Custom` event and reschedules
//! itself `interval` later on the same partition.

use crate::message::{DispatchResult, Message};
use crate::sink::SimEventKind;
use crate::types::{PartitionId, SimTime};
use crate::unit::DispatchContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    pub partition: PartitionId,
    pub interval: SimTime,
    /// No beat is scheduled at or after this time
    pub until: SimTime,
}

impl Heartbeat {
    pub fn new(partition: PartitionId, interval: SimTime, until: SimTime) -> Self {
        Self {
            partition,
            interval,
            until,
        }
    }

    /// The beat due at `time`.
    pub fn message(self, time: SimTime) -> Message {
        Message::self_handling(time, self.partition, move |ctx: &mut DispatchContext<'_>| {
            self.beat(ctx)
        })
    }

    fn beat(self, ctx: &mut DispatchContext<'_>) -> DispatchResult {
        let now = ctx.now();
        tracing::info!(time = now, partition = ctx.partition(), "Heartbeat");
        ctx.emit(
            None,
            SimEventKind::Custom {
                data: serde_json::json!({ "heartbeat": now }),
            },
        );

        let next = now + self.interval;
        if self.interval == 0 || next >= self.until {
            return Ok(Vec::new());
        }
        Ok(vec![self.message(next)])
    }
}
