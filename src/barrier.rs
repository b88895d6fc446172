//! N-party barrier with round counting and a leader action.
//!
//! A [`Barrier`] guards a piece of shared state `S` (the scheduler keeps the
//! window boundary there). Each round, every member calls [`Barrier::wait`].
//! When all current members have arrived, the member with the lowest id runs
//! its leader action on the shared state, the round counter advances, and
//! every member is released with a copy of the updated state. No member
//! returns from `wait` before the leader action of its round has run.
//!
//! Members that stop participating call [`Barrier::leave`]; the round then
//! completes without them.

use std::collections::BTreeSet;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Errors reported by [`Barrier::wait`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BarrierError {
    #[error("worker {0} is not a member of the barrier")]
    NotAMember(usize),

    #[error("worker {0} already arrived in this round")]
    AlreadyArrived(usize),
}

/// What a member observes when released.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BarrierWaitResult<S> {
    /// The round that just completed
    pub round: u64,
    /// Whether this member ran the leader action
    pub is_leader: bool,
    /// Shared state after the leader action
    pub state: S,
}

struct BarrierState<S> {
    members: BTreeSet<usize>,
    arrived: BTreeSet<usize>,
    round: u64,
    shared: S,
}

impl<S> BarrierState<S> {
    fn is_complete(&self) -> bool {
        !self.members.is_empty() && self.arrived.len() == self.members.len()
    }

    fn leader(&self) -> Option<usize> {
        self.members.first().copied()
    }
}

/// Round-based rendezvous for a fixed set of members.
pub struct Barrier<S> {
    state: Mutex<BarrierState<S>>,
    released: Condvar,
}

impl<S: Clone> Barrier<S> {
    /// Creates a barrier for members `0..parties`.
    pub fn new(parties: usize, shared: S) -> Self {
        Self {
            state: Mutex::new(BarrierState {
                members: (0..parties).collect(),
                arrived: BTreeSet::new(),
                round: 0,
                shared,
            }),
            released: Condvar::new(),
        }
    }

    /// Blocks until every current member has arrived in this round.
    ///
    /// `leader_action` runs only if this member is the round's leader (lowest
    /// member id), under the barrier lock and before anyone is released.
    pub fn wait<F>(&self, id: usize, leader_action: F) -> Result<BarrierWaitResult<S>, BarrierError>
    where
        F: FnOnce(&mut S, u64),
    {
        let mut state = self.state.lock();
        if !state.members.contains(&id) {
            return Err(BarrierError::NotAMember(id));
        }
        if !state.arrived.insert(id) {
            return Err(BarrierError::AlreadyArrived(id));
        }

        let round = state.round;
        let mut leader_action = Some(leader_action);
        // Wake a leader that may already be waiting for us.
        self.released.notify_all();

        loop {
            if state.round != round {
                return Ok(BarrierWaitResult {
                    round,
                    is_leader: false,
                    state: state.shared.clone(),
                });
            }

            if state.is_complete() && state.leader() == Some(id) {
                if let Some(action) = leader_action.take() {
                    action(&mut state.shared, round);
                }
                state.arrived.clear();
                state.round += 1;
                tracing::trace!(round, leader = id, "Barrier round complete");
                self.released.notify_all();

                return Ok(BarrierWaitResult {
                    round,
                    is_leader: true,
                    state: state.shared.clone(),
                });
            }

            self.released.wait(&mut state);
        }
    }

    /// Removes `id` from the membership. Returns the number of remaining
    /// members.
    ///
    /// If the remaining members have all arrived, the new leader completes
    /// the round.
    pub fn leave(&self, id: usize) -> usize {
        let mut state = self.state.lock();
        state.members.remove(&id);
        state.arrived.remove(&id);
        let remaining = state.members.len();
        drop(state);

        self.released.notify_all();
        remaining
    }

    /// Number of completed rounds.
    pub fn round(&self) -> u64 {
        self.state.lock().round
    }

    /// Number of current members.
    pub fn parties(&self) -> usize {
        self.state.lock().members.len()
    }

    /// Number of members that arrived in the current round.
    pub fn arrived(&self) -> usize {
        self.state.lock().arrived.len()
    }

    /// Snapshot of the shared state.
    pub fn shared(&self) -> S {
        self.state.lock().shared.clone()
    }
}
