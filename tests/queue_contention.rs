//! Concurrency tests for the partition queue.
//!
//! Many producers put into one queue while its owner takes. Every message
//! must be handed out exactly once, and whatever is taken after the
//! producers finish must come out in time order.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pdes::queue::{PartitionQueue, Take};
use pdes::{Message, Payload, SimTime};

fn data(time: SimTime, tag: u64) -> Message {
    Message::regular(time, 0, Payload::Data(serde_json::json!({ "tag": tag })))
}

fn tag(message: &Message) -> u64 {
    match message.payload() {
        Some(Payload::Data(value)) => value["tag"].as_u64().unwrap(),
        other => panic!("unexpected payload {:?}", other),
    }
}

/// Minimal deterministic PRNG (xorshift64).
fn xorshift(state: &mut u64) -> u64 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    *state
}

#[test]
fn test_concurrent_puts_are_taken_in_time_order() {
    const PRODUCERS: u64 = 8;
    const PER_PRODUCER: u64 = 500;

    let queue = Arc::new(PartitionQueue::new(0));
    let handles: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut state = 0x2545_F491 + producer;
                for i in 0..PER_PRODUCER {
                    let time = xorshift(&mut state) % 1_000;
                    queue.put(data(time, producer * PER_PRODUCER + i)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(queue.len() as u64, PRODUCERS * PER_PRODUCER);

    let mut seen = vec![false; (PRODUCERS * PER_PRODUCER) as usize];
    let mut last = 0;
    while let Some(message) = queue.try_take() {
        assert!(message.arrival_time() >= last);
        last = message.arrival_time();
        let tag = tag(&message) as usize;
        assert!(!seen[tag], "message {} taken twice", tag);
        seen[tag] = true;
    }
    assert!(seen.iter().all(|&s| s));
}

#[test]
fn test_blocking_owner_receives_every_message() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 1_000;
    const TOTAL: u64 = PRODUCERS * PER_PRODUCER;

    let queue = Arc::new(PartitionQueue::new(3));

    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut seen = vec![false; TOTAL as usize];
            for _ in 0..TOTAL {
                match queue.take_next() {
                    Take::Message(message) => {
                        let tag = tag(&message) as usize;
                        assert!(!seen[tag], "message {} taken twice", tag);
                        seen[tag] = true;
                    }
                    Take::Closed => panic!("queue closed early"),
                }
            }
            seen
        })
    };

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut state = 0x9E37_79B9 ^ (producer + 1);
                for i in 0..PER_PRODUCER {
                    let time = xorshift(&mut state) % 10_000;
                    queue.put(data(time, producer * PER_PRODUCER + i)).unwrap();
                    if i % 100 == 0 {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let seen = consumer.join().unwrap();
    assert!(seen.iter().all(|&s| s));
    assert!(queue.is_empty());
    assert!(queue.peak_len() >= 1);
}

#[test]
fn test_close_releases_blocked_owner() {
    let queue = Arc::new(PartitionQueue::new(1));

    let owner = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || matches!(queue.take_next(), Take::Closed))
    };

    thread::sleep(Duration::from_millis(20));
    queue.close();

    assert!(owner.join().unwrap());
    assert!(queue.put(data(1, 0)).is_err());
}

#[test]
fn test_sentinel_precedes_message_put_at_same_time() {
    let queue = PartitionQueue::new(0);
    queue.put(data(10, 1)).unwrap();
    queue.put(Message::barrier_sentinel(10)).unwrap();
    queue.put(data(10, 2)).unwrap();

    assert!(queue.try_take().unwrap().is_sentinel());
    assert_eq!(tag(&queue.try_take().unwrap()), 1);
    assert_eq!(tag(&queue.try_take().unwrap()), 2);
}
