//! Statistics collection and export.
//!
//! Each worker fills in a [`PartitionStats`] while it runs; the engine
//! combines them into [`RunStats`] once every worker has stopped. Stats can
//! be exported as JSON, CSV, or a human-readable summary.

use std::fmt;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{PartitionId, SimTime};

/// Counters of one partition's worker.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionStats {
    /// Partition (and worker) identifier
    pub id: PartitionId,

    /// Local simulated time when the worker stopped
    pub final_time: SimTime,

    /// Barrier rounds this worker took part in
    pub rounds: u64,

    /// Rounds in which this worker was the barrier leader
    pub rounds_led: u64,

    /// Regular messages dispatched successfully
    pub messages_dispatched: u64,

    /// Self-handling messages run successfully
    pub self_handled: u64,

    /// Messages whose dispatch failed and were dropped
    pub dispatch_failures: u64,

    /// Follow-on messages that could not be routed
    pub messages_dropped: u64,

    /// Follow-ons routed to this partition
    pub routed_local: u64,

    /// Follow-ons routed to other partitions
    pub routed_remote: u64,

    /// Follow-ons timestamped inside an already open or closed window
    pub causality_violations: u64,

    /// Domain events emitted to the sink
    pub events_emitted: u64,

    /// Peak queue length
    pub peak_queue_len: usize,

    /// Messages left in the queue after shutdown
    pub pending_messages: usize,

    /// Number of owned units
    pub unit_count: usize,

    /// Wall-clock time the worker ran, in milliseconds
    pub wall_time_ms: f64,

    /// Per-unit statistics, when collection is enabled
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<serde_json::Value>,
}

/// Statistics of a complete run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Configured horizon
    pub horizon: SimTime,

    /// Configured window width
    pub window_width: SimTime,

    /// Completed barrier rounds
    pub rounds: u64,

    /// Window boundary when the run ended
    pub final_boundary: SimTime,

    /// Per-partition statistics, ordered by partition id
    pub partitions: Vec<PartitionStats>,

    /// Total wall-clock time in milliseconds
    pub wall_time_ms: f64,
}

impl RunStats {
    fn total(&self, f: impl Fn(&PartitionStats) -> u64) -> u64 {
        self.partitions.iter().map(f).sum()
    }

    pub fn messages_dispatched(&self) -> u64 {
        self.total(|p| p.messages_dispatched)
    }

    pub fn self_handled(&self) -> u64 {
        self.total(|p| p.self_handled)
    }

    pub fn dispatch_failures(&self) -> u64 {
        self.total(|p| p.dispatch_failures)
    }

    pub fn messages_dropped(&self) -> u64 {
        self.total(|p| p.messages_dropped)
    }

    pub fn causality_violations(&self) -> u64 {
        self.total(|p| p.causality_violations)
    }

    pub fn events_emitted(&self) -> u64 {
        self.total(|p| p.events_emitted)
    }

    pub fn pending_messages(&self) -> usize {
        self.partitions.iter().map(|p| p.pending_messages).sum()
    }

    /// Dispatched messages per wall-clock second.
    pub fn messages_per_second(&self) -> f64 {
        if self.wall_time_ms > 0.0 {
            self.messages_dispatched() as f64 / (self.wall_time_ms / 1000.0)
        } else {
            0.0
        }
    }

    /// Exports statistics to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Exports statistics to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Exports summary statistics to CSV.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str("metric,value\n");
        csv.push_str(&format!("horizon,{}\n", self.horizon));
        csv.push_str(&format!("window_width,{}\n", self.window_width));
        csv.push_str(&format!("rounds,{}\n", self.rounds));
        csv.push_str(&format!("final_boundary,{}\n", self.final_boundary));
        csv.push_str(&format!("messages_dispatched,{}\n", self.messages_dispatched()));
        csv.push_str(&format!("self_handled,{}\n", self.self_handled()));
        csv.push_str(&format!("dispatch_failures,{}\n", self.dispatch_failures()));
        csv.push_str(&format!("messages_dropped,{}\n", self.messages_dropped()));
        csv.push_str(&format!("causality_violations,{}\n", self.causality_violations()));
        csv.push_str(&format!("pending_messages,{}\n", self.pending_messages()));
        csv.push_str(&format!("wall_time_ms,{:.2}\n", self.wall_time_ms));

        csv
    }

    /// Exports per-partition statistics to CSV.
    pub fn partitions_to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str("partition,final_time,rounds,dispatched,failures,dropped,routed_local,routed_remote,peak_queue_len,wall_time_ms\n");

        for p in &self.partitions {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{},{:.2}\n",
                p.id,
                p.final_time,
                p.rounds,
                p.messages_dispatched,
                p.dispatch_failures,
                p.messages_dropped,
                p.routed_local,
                p.routed_remote,
                p.peak_queue_len,
                p.wall_time_ms,
            ));
        }

        csv
    }

    /// Writes a human-readable summary to a writer.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        write!(w, "{}", self)
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Simulation Statistics ===")?;
        writeln!(f)?;

        writeln!(f, "--- Engine ---")?;
        writeln!(f, "Horizon: {}", self.horizon)?;
        writeln!(f, "Window width: {}", self.window_width)?;
        writeln!(f, "Barrier rounds: {}", self.rounds)?;
        writeln!(f, "Final boundary: {}", self.final_boundary)?;
        writeln!(f, "Messages dispatched: {}", self.messages_dispatched())?;
        writeln!(f, "Dispatch failures: {}", self.dispatch_failures())?;
        writeln!(f, "Messages dropped: {}", self.messages_dropped())?;
        writeln!(f, "Causality violations: {}", self.causality_violations())?;
        writeln!(f, "Pending at shutdown: {}", self.pending_messages())?;
        writeln!(f)?;

        writeln!(f, "--- Timing ---")?;
        writeln!(f, "Wall time: {:.2} ms", self.wall_time_ms)?;
        writeln!(f, "Messages/sec: {:.2}", self.messages_per_second())?;
        writeln!(f)?;

        writeln!(f, "--- Partitions ---")?;
        for p in &self.partitions {
            writeln!(f, "Partition {} ({} units):", p.id, p.unit_count)?;
            writeln!(f, "  Final time: {}", p.final_time)?;
            writeln!(f, "  Dispatched: {}, failed: {}", p.messages_dispatched, p.dispatch_failures)?;
            writeln!(f, "  Routed local: {}, remote: {}", p.routed_local, p.routed_remote)?;
        }

        Ok(())
    }
}

/// A simple timer for measuring wall-clock time.
#[derive(Debug)]
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    /// Starts a new timer.
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Returns elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns elapsed time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RunStats {
        RunStats {
            horizon: 30,
            window_width: 10,
            rounds: 3,
            final_boundary: 30,
            partitions: vec![
                PartitionStats {
                    id: 0,
                    final_time: 30,
                    messages_dispatched: 4,
                    dispatch_failures: 1,
                    routed_remote: 2,
                    ..Default::default()
                },
                PartitionStats {
                    id: 1,
                    final_time: 30,
                    messages_dispatched: 6,
                    pending_messages: 2,
                    ..Default::default()
                },
            ],
            wall_time_ms: 2000.0,
        }
    }

    #[test]
    fn test_totals() {
        let stats = sample();
        assert_eq!(stats.messages_dispatched(), 10);
        assert_eq!(stats.dispatch_failures(), 1);
        assert_eq!(stats.pending_messages(), 2);
        assert!((stats.messages_per_second() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_json_export() {
        let json = sample().to_json().unwrap();
        let restored: RunStats = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.rounds, 3);
        assert_eq!(restored.partitions.len(), 2);
    }

    #[test]
    fn test_csv_export() {
        let stats = sample();

        let csv = stats.to_csv();
        assert!(csv.contains("rounds,3"));
        assert!(csv.contains("messages_dispatched,10"));

        let partitions = stats.partitions_to_csv();
        assert!(partitions.contains("0,30,0,4,1,0,0,2"));
        assert_eq!(partitions.lines().count(), 3);
    }

    #[test]
    fn test_summary_output() {
        let summary = sample().to_string();
        assert!(summary.contains("Barrier rounds: 3"));
        assert!(summary.contains("Partition 1"));

        let mut buf = Vec::new();
        sample().write_summary(&mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), summary);
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10.0);
    }
}
