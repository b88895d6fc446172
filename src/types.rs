//! Core type definitions for the simulation engine.
//!
//! This module defines the fundamental identifiers and the time unit shared
//! by every partition.

/// Simulation time unit (e.g., seconds or milliseconds of simulated traffic).
///
/// Message arrival times, window boundaries and the horizon all use the same
/// `SimTime` representation, so window arithmetic is exact.
pub type SimTime = u64;

/// Unique identifier for a receiving unit (a link, node or vehicle proxy).
pub type UnitId = u64;

/// Identifier of a partition. Partition `i` is driven by worker `i`.
pub type PartitionId = usize;

/// Identifier of a simulated vehicle/agent.
pub type VehicleId = u64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_aliases() {
        let time: SimTime = 1000;
        let unit: UnitId = 42;
        let partition: PartitionId = 3;
        let vehicle: VehicleId = 7;

        assert_eq!(time, 1000);
        assert_eq!(unit, 42);
        assert_eq!(partition, 3);
        assert_eq!(vehicle, 7);
    }
}
