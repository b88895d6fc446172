//! Mock unit implementations for testing.
//!
//! These units provide simple, predictable behaviors useful for
//! testing the engine.

use std::collections::BTreeSet;

use crate::message::{DispatchResult, Message, Payload};
use crate::sink::SimEventKind;
use crate::types::{SimTime, UnitId};
use crate::unit::{DispatchContext, DispatchError, ReceivingUnit};

/// A unit that counts dispatched messages.
///
/// Emits one `Custom` event per message carrying the running count.
#[derive(Debug, Default)]
pub struct CounterUnit {
    /// The unit's unique identifier
    pub id: UnitId,
    /// Number of messages handled
    pub count: u64,
    /// Arrival time of the last handled message
    pub last_time: Option<SimTime>,
}

impl CounterUnit {
    /// Creates a new counter unit with the given ID.
    pub fn new(id: UnitId) -> Self {
        Self {
            id,
            count: 0,
            last_time: None,
        }
    }
}

impl ReceivingUnit for CounterUnit {
    fn id(&self) -> UnitId {
        self.id
    }

    fn init(&mut self) {
        self.count = 0;
        self.last_time = None;
    }

    fn dispatch(&mut self, ctx: &mut DispatchContext<'_>, _payload: Payload) -> DispatchResult {
        self.count += 1;
        self.last_time = Some(ctx.now());
        ctx.emit(
            Some(self.id),
            SimEventKind::Custom {
                data: serde_json::json!({ "count": self.count }),
            },
        );
        Ok(Vec::new())
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "count": self.count,
            "last_time": self.last_time,
        })
    }
}

/// Forwards `{"hops": n}` data to a fixed target after `delay`, decrementing
/// `n` until it reaches zero.
///
/// Two forward units pointing at each other bounce a message back and forth,
/// which is handy for exercising cross-partition traffic.
#[derive(Debug)]
pub struct ForwardUnit {
    /// The unit's unique identifier
    pub id: UnitId,
    /// Unit receiving forwarded messages
    pub target: UnitId,
    /// Delay added to forwarded messages
    pub delay: SimTime,
    /// Number of messages received
    pub received: u64,
    /// Number of messages forwarded
    pub forwarded: u64,
}

impl ForwardUnit {
    pub fn new(id: UnitId, target: UnitId, delay: SimTime) -> Self {
        Self {
            id,
            target,
            delay,
            received: 0,
            forwarded: 0,
        }
    }

    /// Builds the payload that starts a chain of `hops` forwards.
    pub fn hops(hops: u64) -> Payload {
        Payload::Data(serde_json::json!({ "hops": hops }))
    }
}

impl ReceivingUnit for ForwardUnit {
    fn id(&self) -> UnitId {
        self.id
    }

    fn init(&mut self) {
        self.received = 0;
        self.forwarded = 0;
    }

    fn dispatch(&mut self, ctx: &mut DispatchContext<'_>, payload: Payload) -> DispatchResult {
        let data = match payload {
            Payload::Data(data) => data,
            other => {
                return Err(DispatchError::UnsupportedPayload {
                    unit: self.id,
                    payload: other.name(),
                })
            }
        };

        self.received += 1;
        let hops = data.get("hops").and_then(|h| h.as_u64()).unwrap_or(0);
        ctx.emit(Some(self.id), SimEventKind::Custom { data });

        if hops == 0 {
            return Ok(Vec::new());
        }

        self.forwarded += 1;
        Ok(vec![Message::regular(
            ctx.now() + self.delay,
            self.target,
            Self::hops(hops - 1),
        )])
    }

    fn min_causal_delay(&self) -> Option<SimTime> {
        Some(self.delay)
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "received": self.received,
            "forwarded": self.forwarded,
        })
    }
}

/// A unit that returns an error or panics at chosen arrival times and
/// handles everything else like a [`CounterUnit`].
#[derive(Debug, Default)]
pub struct FailingUnit {
    /// The unit's unique identifier
    pub id: UnitId,
    /// Times at which dispatch returns an error
    pub fail_times: BTreeSet<SimTime>,
    /// Times at which dispatch panics
    pub panic_times: BTreeSet<SimTime>,
    /// Number of messages handled successfully
    pub handled: u64,
}

impl FailingUnit {
    pub fn new(id: UnitId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Fails messages arriving at `time`.
    pub fn fail_at(mut self, time: SimTime) -> Self {
        self.fail_times.insert(time);
        self
    }

    /// Panics on messages arriving at `time`.
    pub fn panic_at(mut self, time: SimTime) -> Self {
        self.panic_times.insert(time);
        self
    }
}

impl ReceivingUnit for FailingUnit {
    fn id(&self) -> UnitId {
        self.id
    }

    fn dispatch(&mut self, ctx: &mut DispatchContext<'_>, _payload: Payload) -> DispatchResult {
        let now = ctx.now();
        if self.panic_times.contains(&now) {
            panic!("unit {} panicked at {}", self.id, now);
        }
        if self.fail_times.contains(&now) {
            return Err(DispatchError::failed(self.id, format!("scripted failure at {}", now)));
        }

        self.handled += 1;
        ctx.emit(
            Some(self.id),
            SimEventKind::Custom {
                data: serde_json::json!({ "handled": self.handled }),
            },
        );
        Ok(Vec::new())
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({ "id": self.id, "handled": self.handled })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::CollectingSink;

    #[test]
    fn test_counter_unit() {
        let sink = CollectingSink::new();
        let mut unit = CounterUnit::new(1);

        for time in [3, 8] {
            let mut ctx = DispatchContext::new(time, 0, &sink);
            assert!(unit.dispatch(&mut ctx, Payload::Data(serde_json::Value::Null)).unwrap().is_empty());
        }

        assert_eq!(unit.count, 2);
        assert_eq!(unit.last_time, Some(8));
        assert_eq!(sink.len(), 2);
        assert_eq!(unit.export_stats()["count"], 2);

        unit.init();
        assert_eq!(unit.count, 0);
    }

    #[test]
    fn test_forward_unit_counts_down() {
        let sink = CollectingSink::new();
        let mut unit = ForwardUnit::new(1, 2, 10);
        let mut ctx = DispatchContext::new(5, 0, &sink);

        let out = unit.dispatch(&mut ctx, ForwardUnit::hops(2)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].arrival_time(), 15);
        assert_eq!(out[0].target(), Some(2));
        assert_eq!(out[0].payload(), Some(&ForwardUnit::hops(1)));

        let out = unit.dispatch(&mut ctx, ForwardUnit::hops(0)).unwrap();
        assert!(out.is_empty());
        assert_eq!(unit.received, 2);
        assert_eq!(unit.forwarded, 1);
        assert_eq!(unit.min_causal_delay(), Some(10));
    }

    #[test]
    fn test_forward_unit_rejects_vehicle_payloads() {
        let sink = CollectingSink::new();
        let mut unit = ForwardUnit::new(1, 2, 10);
        let mut ctx = DispatchContext::new(0, 0, &sink);

        assert!(unit
            .dispatch(&mut ctx, Payload::Arrival { vehicle: 1 })
            .is_err());
        assert_eq!(unit.received, 0);
    }

    #[test]
    fn test_failing_unit_fails_at_scripted_time() {
        let sink = CollectingSink::new();
        let mut unit = FailingUnit::new(4).fail_at(2);

        let mut ctx = DispatchContext::new(2, 0, &sink);
        let err = unit.dispatch(&mut ctx, Payload::Data(serde_json::Value::Null)).unwrap_err();
        assert!(matches!(err, DispatchError::Failed { unit: 4, .. }));

        let mut ctx = DispatchContext::new(3, 0, &sink);
        assert!(unit.dispatch(&mut ctx, Payload::Data(serde_json::Value::Null)).is_ok());
        assert_eq!(unit.handled, 1);
    }

    #[test]
    #[should_panic(expected = "unit 4 panicked at 7")]
    fn test_failing_unit_panics_at_scripted_time() {
        let sink = CollectingSink::new();
        let mut unit = FailingUnit::new(4).panic_at(7);
        let mut ctx = DispatchContext::new(7, 0, &sink);
        let _ = unit.dispatch(&mut ctx, Payload::Data(serde_json::Value::Null));
    }
}
