//! Global coordination state shared by all workers.
//!
//! The [`Scheduler`] owns one [`PartitionQueue`] per partition and the window
//! [`Barrier`]. Everything else it holds (run parameters, the unit → partition
//! routing table, the event sink) is immutable once the run starts. Workers
//! share it through an `Arc` and own their receiving units themselves.
//!
//! # Window protocol
//!
//! The current window is `[boundary - width, boundary)`. When every worker
//! has reached its sentinel for `boundary`, the barrier leader advances the
//! boundary by `width` and every worker re-seeds its sentinel at the new
//! boundary. With `width` no larger than the shortest cause → effect delay
//! between partitions, nothing produced inside a window can land in a window
//! that is already closed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::barrier::Barrier;
use crate::engine::EngineError;
use crate::message::{Message, MessageKind};
use crate::queue::{PartitionQueue, QueueClosed};
use crate::sink::EventSink;
use crate::types::{PartitionId, SimTime, UnitId};

/// Reasons a message could not be routed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("no partition owns unit {0}")]
    UnknownUnit(UnitId),

    #[error("partition {0} does not exist")]
    UnknownPartition(PartitionId),

    #[error("barrier sentinels are enqueued by their owning worker only")]
    Sentinel,

    #[error("queue of partition {0} is closed")]
    Closed(PartitionId),
}

impl From<QueueClosed> for RouteError {
    fn from(err: QueueClosed) -> Self {
        RouteError::Closed(err.partition)
    }
}

/// Run parameters of the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineParams {
    /// Simulated time at which all workers terminate
    pub horizon: SimTime,
    /// Window width (lookahead)
    pub window_width: SimTime,
    /// Number of partitions, one worker thread each
    pub partition_count: usize,
    /// Declared minimum cause → effect delay, if known
    #[serde(default)]
    pub min_causal_delay: Option<SimTime>,
    /// Whether workers collect per-unit statistics
    #[serde(default)]
    pub collect_stats: bool,
}

impl EngineParams {
    pub fn new(horizon: SimTime, window_width: SimTime, partition_count: usize) -> Self {
        Self {
            horizon,
            window_width,
            partition_count,
            min_causal_delay: None,
            collect_stats: false,
        }
    }

    pub fn with_min_causal_delay(mut self, delay: SimTime) -> Self {
        self.min_causal_delay = Some(delay);
        self
    }

    pub fn with_collect_stats(mut self, enable: bool) -> Self {
        self.collect_stats = enable;
        self
    }

    /// Checks the parameters, including the lookahead invariant against the
    /// declared minimum causal delay.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.window_width == 0 {
            return Err(EngineError::InvalidParams(
                "window_width must be positive".to_string(),
            ));
        }
        if self.partition_count == 0 {
            return Err(EngineError::InvalidParams(
                "partition_count must be at least 1".to_string(),
            ));
        }
        if self.horizon == 0 {
            return Err(EngineError::InvalidParams(
                "horizon must be positive".to_string(),
            ));
        }
        if let Some(min_delay) = self.min_causal_delay {
            check_lookahead(self.window_width, min_delay)?;
        }
        Ok(())
    }
}

/// Rejects a window wider than the minimum causal delay.
pub(crate) fn check_lookahead(window_width: SimTime, min_causal_delay: SimTime) -> Result<(), EngineError> {
    if window_width > min_causal_delay {
        return Err(EngineError::Causality {
            window_width,
            min_causal_delay,
        });
    }
    Ok(())
}

/// The current synchronization window, `[boundary - width, boundary)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// Exclusive end of the window
    pub boundary: SimTime,
    pub width: SimTime,
}

impl Window {
    pub fn new(boundary: SimTime, width: SimTime) -> Self {
        Self { boundary, width }
    }

    /// Inclusive start of the window.
    pub fn start(&self) -> SimTime {
        self.boundary.saturating_sub(self.width)
    }

    pub fn contains(&self, time: SimTime) -> bool {
        time >= self.start() && time < self.boundary
    }

    pub fn advance(&mut self) {
        self.boundary += self.width;
    }
}

/// Coordination state shared by all workers.
pub struct Scheduler {
    params: EngineParams,
    queues: Vec<PartitionQueue>,
    barrier: Barrier<Window>,
    routing: HashMap<UnitId, PartitionId>,
    sink: Arc<dyn EventSink>,
    terminated: AtomicBool,
}

impl Scheduler {
    /// Creates the scheduler and seeds every queue with a sentinel at time
    /// zero.
    pub fn new(
        params: EngineParams,
        routing: HashMap<UnitId, PartitionId>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let queues: Vec<_> = (0..params.partition_count)
            .map(PartitionQueue::new)
            .collect();
        for queue in &queues {
            // Fresh queues are open.
            let _ = queue.put(Message::barrier_sentinel(0));
        }

        Self {
            barrier: Barrier::new(params.partition_count, Window::new(0, params.window_width)),
            params,
            queues,
            routing,
            sink,
            terminated: AtomicBool::new(false),
        }
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    pub fn partition_count(&self) -> usize {
        self.queues.len()
    }

    /// Partition owning `unit`.
    pub fn partition_of(&self, unit: UnitId) -> Option<PartitionId> {
        self.routing.get(&unit).copied()
    }

    /// Queue of `partition`.
    ///
    /// # Panics
    ///
    /// Panics if `partition` is out of range.
    pub fn queue(&self, partition: PartitionId) -> &PartitionQueue {
        &self.queues[partition]
    }

    pub fn queues(&self) -> &[PartitionQueue] {
        &self.queues
    }

    pub fn barrier(&self) -> &Barrier<Window> {
        &self.barrier
    }

    pub fn sink(&self) -> &dyn EventSink {
        self.sink.as_ref()
    }

    /// Puts `message` into the queue of the partition that must handle it and
    /// returns that partition.
    pub fn route(&self, message: Message) -> Result<PartitionId, RouteError> {
        let partition = match message.kind() {
            MessageKind::Regular { target, .. } => self
                .partition_of(*target)
                .ok_or(RouteError::UnknownUnit(*target))?,
            MessageKind::SelfHandling { partition, .. } => {
                if *partition >= self.queues.len() {
                    return Err(RouteError::UnknownPartition(*partition));
                }
                *partition
            }
            MessageKind::BarrierSentinel => return Err(RouteError::Sentinel),
        };

        self.queues[partition].put(message)?;
        Ok(partition)
    }

    /// Current window as last published by the barrier leader.
    pub fn window(&self) -> Window {
        self.barrier.shared()
    }

    pub fn window_boundary(&self) -> SimTime {
        self.window().boundary
    }

    /// Number of completed barrier rounds.
    pub fn rounds(&self) -> u64 {
        self.barrier.round()
    }

    /// Number of workers that have not terminated yet.
    pub fn alive_workers(&self) -> usize {
        self.barrier.parties()
    }

    /// Removes a terminating worker from the barrier. When the last worker
    /// leaves, the run is marked terminated and every queue is closed so no
    /// taker stays blocked.
    ///
    /// Returns the number of workers still alive.
    pub fn deregister(&self, worker: PartitionId) -> usize {
        let remaining = self.barrier.leave(worker);
        tracing::debug!(worker, remaining, "Worker deregistered");

        if remaining == 0 && !self.terminated.swap(true, Ordering::AcqRel) {
            for queue in &self.queues {
                queue.close();
            }
            tracing::debug!(rounds = self.rounds(), "All workers terminated");
        }
        remaining
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Messages still queued, across all partitions.
    pub fn pending_messages(&self) -> usize {
        self.queues.iter().map(PartitionQueue::len).sum()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("params", &self.params)
            .field("units", &self.routing.len())
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DispatchResult, Payload};
    use crate::queue::Take;
    use crate::sink::NullSink;
    use crate::unit::DispatchContext;

    fn scheduler(partitions: usize) -> Scheduler {
        let routing = HashMap::from([(10, 0), (20, 1)]);
        Scheduler::new(EngineParams::new(30, 10, partitions), routing, Arc::new(NullSink))
    }

    fn data(time: SimTime, target: UnitId) -> Message {
        Message::regular(time, target, Payload::Data(serde_json::Value::Null))
    }

    #[test]
    fn test_queues_seeded_with_sentinels() {
        let scheduler = scheduler(2);

        for queue in scheduler.queues() {
            assert_eq!(queue.len(), 1);
            assert_eq!(queue.peek_time(), Some(0));
        }
        assert_eq!(scheduler.window(), Window::new(0, 10));
        assert_eq!(scheduler.window_boundary(), 0);
        assert_eq!(scheduler.alive_workers(), 2);
    }

    #[test]
    fn test_route_by_owner() {
        let scheduler = scheduler(2);

        assert_eq!(scheduler.route(data(5, 20)), Ok(1));
        assert_eq!(scheduler.queue(1).len(), 2);
        assert_eq!(scheduler.route(data(5, 99)), Err(RouteError::UnknownUnit(99)));
        assert_eq!(
            scheduler.route(Message::barrier_sentinel(10)),
            Err(RouteError::Sentinel)
        );
    }

    #[test]
    fn test_route_self_handling() {
        let scheduler = scheduler(2);
        let handler = |_: &mut DispatchContext<'_>| -> DispatchResult { Ok(Vec::new()) };

        assert_eq!(scheduler.route(Message::self_handling(3, 0, handler)), Ok(0));
        assert_eq!(
            scheduler.route(Message::self_handling(3, 7, handler)),
            Err(RouteError::UnknownPartition(7))
        );
    }

    #[test]
    fn test_deregister_closes_queues() {
        let scheduler = scheduler(2);

        assert_eq!(scheduler.deregister(0), 1);
        assert!(!scheduler.is_terminated());
        assert!(!scheduler.queue(1).is_closed());

        assert_eq!(scheduler.deregister(1), 0);
        assert!(scheduler.is_terminated());
        assert!(matches!(scheduler.queue(0).take_next(), Take::Closed));
        assert_eq!(scheduler.route(data(40, 10)), Err(RouteError::Closed(0)));
        assert_eq!(scheduler.pending_messages(), 2);
    }

    #[test]
    fn test_window() {
        let mut window = Window::new(10, 10);
        assert_eq!(window.start(), 0);
        assert!(window.contains(0));
        assert!(window.contains(9));
        assert!(!window.contains(10));

        window.advance();
        assert_eq!(window.boundary, 20);
        assert!(window.contains(10));
    }

    #[test]
    fn test_params_validation() {
        assert!(EngineParams::new(30, 10, 2).validate().is_ok());
        assert!(EngineParams::new(30, 0, 2).validate().is_err());
        assert!(EngineParams::new(30, 10, 0).validate().is_err());
        assert!(EngineParams::new(0, 10, 2).validate().is_err());

        let err = EngineParams::new(30, 10, 2)
            .with_min_causal_delay(5)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Causality {
                window_width: 10,
                min_causal_delay: 5
            }
        ));
        assert!(EngineParams::new(30, 10, 2)
            .with_min_causal_delay(10)
            .validate()
            .is_ok());
    }
}
