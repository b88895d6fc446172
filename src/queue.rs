//! Per-partition message queue.
//!
//! Every partition owns one [`PartitionQueue`]. Any worker may [`put`] into
//! any queue; only the owning worker takes from it. Taking is a single atomic
//! operation under the queue lock: it either removes the minimum entry or
//! parks on the condition variable until a `put` or [`close`] wakes it, so
//! there is no "check empty, then take" window for another thread to race.
//!
//! Entries are ordered by `(arrival time, rank, insertion sequence)`. Barrier
//! sentinels rank ahead of other messages with the same arrival time, and
//! messages of equal time and rank come out in insertion order.
//!
//! [`put`]: PartitionQueue::put
//! [`close`]: PartitionQueue::close

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::message::Message;
use crate::types::{PartitionId, SimTime};

/// Returned by [`PartitionQueue::put`] once the queue has been closed.
#[derive(Error, Debug)]
#[error("queue of partition {partition} is closed")]
pub struct QueueClosed {
    pub partition: PartitionId,
    /// The rejected message
    pub message: Message,
}

/// Outcome of a blocking take.
#[derive(Debug)]
pub enum Take {
    Message(Message),
    /// The queue was closed; no further messages will be handed out.
    Closed,
}

struct Entry {
    time: SimTime,
    rank: u8,
    seq: u64,
    message: Message,
}

impl Entry {
    fn key(&self) -> (SimTime, u8, u64) {
        (self.time, self.rank, self.seq)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed: BinaryHeap is a max-heap.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    closed: bool,
    peak_len: usize,
}

impl QueueState {
    fn pop(&mut self) -> Option<Message> {
        self.heap.pop().map(|entry| entry.message)
    }
}

/// Time-ordered multiple-producer / single-consumer mailbox of one partition.
pub struct PartitionQueue {
    owner: PartitionId,
    state: Mutex<QueueState>,
    available: Condvar,
}

impl PartitionQueue {
    /// Creates an empty queue owned by `owner`.
    pub fn new(owner: PartitionId) -> Self {
        Self {
            owner,
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
        }
    }

    pub fn owner(&self) -> PartitionId {
        self.owner
    }

    /// Inserts a message. Callable from any thread.
    pub fn put(&self, message: Message) -> Result<(), QueueClosed> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(QueueClosed {
                partition: self.owner,
                message,
            });
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry {
            time: message.arrival_time(),
            rank: message.rank(),
            seq,
            message,
        });
        state.peak_len = state.peak_len.max(state.heap.len());
        drop(state);

        self.available.notify_one();
        Ok(())
    }

    /// Removes and returns the minimum message, blocking while the queue is
    /// empty. Returns [`Take::Closed`] once the queue is closed.
    pub fn take_next(&self) -> Take {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Take::Closed;
            }
            if let Some(message) = state.pop() {
                return Take::Message(message);
            }
            self.available.wait(&mut state);
        }
    }

    /// Like [`take_next`](Self::take_next) but gives up after `timeout`,
    /// returning `None`.
    pub fn take_timeout(&self, timeout: Duration) -> Option<Take> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Some(Take::Closed);
            }
            if let Some(message) = state.pop() {
                return Some(Take::Message(message));
            }
            if self.available.wait_for(&mut state, timeout).timed_out() {
                if state.closed {
                    return Some(Take::Closed);
                }
                return state.pop().map(Take::Message);
            }
        }
    }

    /// Removes and returns the minimum message without blocking.
    pub fn try_take(&self) -> Option<Message> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.pop()
    }

    /// Closes the queue and wakes a blocked taker.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Arrival time of the minimum message.
    pub fn peek_time(&self) -> Option<SimTime> {
        self.state.lock().heap.peek().map(|entry| entry.time)
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().heap.is_empty()
    }

    /// Largest number of messages held at once.
    pub fn peak_len(&self) -> usize {
        self.state.lock().peak_len
    }

    /// Removes all remaining messages in order, whether or not the queue is
    /// closed.
    pub fn drain(&self) -> Vec<Message> {
        let mut state = self.state.lock();
        let mut drained = Vec::with_capacity(state.heap.len());
        while let Some(message) = state.pop() {
            drained.push(message);
        }
        drained
    }
}

impl std::fmt::Debug for PartitionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PartitionQueue")
            .field("owner", &self.owner)
            .field("len", &state.heap.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use std::sync::Arc;
    use std::thread;

    fn msg(time: SimTime, target: u64) -> Message {
        Message::regular(time, target, Payload::Data(serde_json::Value::Null))
    }

    fn take(queue: &PartitionQueue) -> Message {
        match queue.take_next() {
            Take::Message(m) => m,
            Take::Closed => panic!("queue unexpectedly closed"),
        }
    }

    #[test]
    fn test_min_time_first() {
        let queue = PartitionQueue::new(0);
        queue.put(msg(30, 1)).unwrap();
        queue.put(msg(10, 2)).unwrap();
        queue.put(msg(20, 3)).unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.peek_time(), Some(10));
        assert_eq!(take(&queue).arrival_time(), 10);
        assert_eq!(take(&queue).arrival_time(), 20);
        assert_eq!(take(&queue).arrival_time(), 30);
        assert!(queue.is_empty());
        assert_eq!(queue.peak_len(), 3);
    }

    #[test]
    fn test_fifo_on_equal_times() {
        let queue = PartitionQueue::new(0);
        for target in 1..=5 {
            queue.put(msg(10, target)).unwrap();
        }

        let targets: Vec<_> = (0..5).map(|_| take(&queue).target().unwrap()).collect();
        assert_eq!(targets, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_sentinel_precedes_boundary_messages() {
        let queue = PartitionQueue::new(0);
        queue.put(msg(10, 1)).unwrap();
        queue.put(Message::barrier_sentinel(10)).unwrap();
        queue.put(msg(9, 2)).unwrap();

        assert_eq!(take(&queue).target(), Some(2));
        assert!(take(&queue).is_sentinel());
        assert_eq!(take(&queue).target(), Some(1));
    }

    #[test]
    fn test_try_take_empty() {
        let queue = PartitionQueue::new(2);
        assert!(queue.try_take().is_none());
        assert_eq!(queue.owner(), 2);
    }

    #[test]
    fn test_take_blocks_until_put() {
        let queue = Arc::new(PartitionQueue::new(0));

        let taker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || take(&queue).arrival_time())
        };

        thread::sleep(Duration::from_millis(20));
        queue.put(msg(42, 1)).unwrap();

        assert_eq!(taker.join().unwrap(), 42);
    }

    #[test]
    fn test_close_unblocks_taker() {
        let queue = Arc::new(PartitionQueue::new(0));

        let taker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || matches!(queue.take_next(), Take::Closed))
        };

        thread::sleep(Duration::from_millis(20));
        queue.close();

        assert!(taker.join().unwrap());
        assert!(queue.is_closed());
    }

    #[test]
    fn test_put_after_close_is_rejected() {
        let queue = PartitionQueue::new(1);
        queue.close();

        let err = queue.put(msg(5, 9)).unwrap_err();
        assert_eq!(err.partition, 1);
        assert_eq!(err.message.target(), Some(9));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_take_timeout() {
        let queue = PartitionQueue::new(0);
        assert!(queue.take_timeout(Duration::from_millis(5)).is_none());

        queue.put(msg(1, 1)).unwrap();
        assert!(matches!(
            queue.take_timeout(Duration::from_millis(5)),
            Some(Take::Message(_))
        ));

        queue.close();
        assert!(matches!(
            queue.take_timeout(Duration::from_millis(5)),
            Some(Take::Closed)
        ));
    }

    #[test]
    fn test_drain_in_order() {
        let queue = PartitionQueue::new(0);
        queue.put(msg(3, 1)).unwrap();
        queue.put(msg(1, 1)).unwrap();
        queue.close();

        let times: Vec<_> = queue.drain().iter().map(Message::arrival_time).collect();
        assert_eq!(times, vec![1, 3]);
    }
}
