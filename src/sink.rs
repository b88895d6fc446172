//! Domain event output.
//!
//! Receiving units report what happened to vehicles (departures, link
//! entries and exits, arrivals) through an [`EventSink`]. Sinks are shared by
//! all workers, so they must be `Send + Sync`.
//!
//! Emission order is causal across window boundaries and temporal within a
//! partition, but partitions interleave arbitrarily inside a window.
//! Consumers that need a strict global order must sort by timestamp, see
//! [`CollectingSink::sorted`].

use std::io::Write;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{PartitionId, SimTime, UnitId, VehicleId};

/// What happened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEventKind {
    Departure { vehicle: VehicleId },
    EnterLink { vehicle: VehicleId },
    LeaveLink { vehicle: VehicleId },
    Arrival { vehicle: VehicleId },
    /// The vehicle could not continue (its next unit does not exist).
    Stuck { vehicle: VehicleId },
    Custom { data: serde_json::Value },
}

/// A domain event emitted during dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimEvent {
    /// Simulated time of the event
    pub time: SimTime,
    /// Partition whose worker emitted it
    pub partition: PartitionId,
    /// Unit the event happened on, if any
    pub unit: Option<UnitId>,
    #[serde(flatten)]
    pub kind: SimEventKind,
}

/// Receiver of the engine's domain event stream.
pub trait EventSink: Send + Sync {
    /// Handles one event. Called concurrently from every worker.
    fn handle(&self, event: SimEvent);

    /// Flushes buffered output. Called once after all workers stopped.
    fn flush(&self) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn handle(&self, _event: SimEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<SimEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events in emission order.
    pub fn events(&self) -> Vec<SimEvent> {
        self.events.lock().clone()
    }

    /// Events ordered by timestamp. Emission order is kept among equal times.
    pub fn sorted(&self) -> Vec<SimEvent> {
        let mut events = self.events();
        events.sort_by_key(|e| e.time);
        events
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for CollectingSink {
    fn handle(&self, event: SimEvent) {
        self.events.lock().push(event);
    }
}

/// Writes each event as one JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Consumes the sink and returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn handle(&self, event: SimEvent) {
        let mut writer = self.writer.lock();
        let written = serde_json::to_writer(&mut *writer, &event)
            .map_err(std::io::Error::from)
            .and_then(|_| writer.write_all(b"\n"));
        if let Err(e) = written {
            tracing::warn!(time = event.time, error = %e, "Failed to write event");
        }
    }

    fn flush(&self) {
        if let Err(e) = self.writer.lock().flush() {
            tracing::warn!(error = %e, "Failed to flush event sink");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(time: SimTime, partition: PartitionId) -> SimEvent {
        SimEvent {
            time,
            partition,
            unit: Some(1),
            kind: SimEventKind::EnterLink { vehicle: 4 },
        }
    }

    #[test]
    fn test_collecting_sink_sorted() {
        let sink = CollectingSink::new();
        sink.handle(event(20, 0));
        sink.handle(event(5, 1));
        sink.handle(event(20, 1));

        assert_eq!(sink.len(), 3);
        let times: Vec<_> = sink.sorted().iter().map(|e| (e.time, e.partition)).collect();
        assert_eq!(times, vec![(5, 1), (20, 0), (20, 1)]);
    }

    #[test]
    fn test_null_sink() {
        let sink = NullSink;
        sink.handle(event(1, 0));
        sink.flush();
    }

    #[test]
    fn test_json_lines_sink() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.handle(event(10, 0));
        sink.handle(SimEvent {
            time: 12,
            partition: 1,
            unit: None,
            kind: SimEventKind::Custom {
                data: serde_json::json!({"round": 2}),
            },
        });
        sink.flush();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "enter_link");
        assert_eq!(first["vehicle"], 4);
        assert_eq!(first["time"], 10);

        let second: SimEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.time, 12);
        assert!(matches!(second.kind, SimEventKind::Custom { .. }));
    }
}
