//! Free-flow road link.
//!
//! A `LinkUnit` moves every vehicle through in exactly `free_flow_time`. When
//! a vehicle has traversed the link, it is handed to the next link of its
//! route, or arrives if the link was the last one.

use std::collections::HashMap;

use crate::message::{DispatchResult, Message, Payload};
use crate::sink::SimEventKind;
use crate::types::{SimTime, UnitId, VehicleId};
use crate::unit::{DispatchContext, DispatchError, ReceivingUnit};

/// A vehicle currently traversing the link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Occupant {
    exit: SimTime,
    /// The trip ends on this link; an `Arrival` removes the vehicle.
    last_leg: bool,
}

/// A road link with a fixed traversal time.
///
/// Vehicles are never delayed by each other, so the link's causal delay is
/// its free-flow time.
///
/// # Example
///
/// ```rust
/// use pdes::sink::CollectingSink;
/// use pdes::unit::{DispatchContext, ReceivingUnit};
/// use pdes::units::LinkUnit;
/// use pdes::Payload;
///
/// let sink = CollectingSink::new();
/// let mut link = LinkUnit::new(1, 10);
/// let mut ctx = DispatchContext::new(5, 0, &sink);
///
/// let out = link
///     .dispatch(&mut ctx, Payload::Departure { vehicle: 7, route: vec![1, 2] })
///     .unwrap();
///
/// // The vehicle reaches link 2 at time 15 (5 + 10)
/// assert_eq!(out[0].arrival_time(), 15);
/// assert_eq!(out[0].target(), Some(2));
/// ```
#[derive(Debug)]
pub struct LinkUnit {
    /// The link's unique identifier
    pub id: UnitId,
    /// Time a vehicle needs to traverse the link
    pub free_flow_time: SimTime,
    /// Vehicles that started their trip on this link
    pub departures: u64,
    /// Vehicles that entered this link
    pub vehicles_entered: u64,
    /// Vehicles that left the link for the next one of their route
    pub handed_over: u64,
    /// Vehicles whose trip ended on this link
    pub arrivals: u64,
    occupants: HashMap<VehicleId, Occupant>,
    clock: SimTime,
}

impl LinkUnit {
    /// Creates a new link.
    ///
    /// # Arguments
    /// * `id` - The link's unique identifier
    /// * `free_flow_time` - Traversal time in simulation time units
    pub fn new(id: UnitId, free_flow_time: SimTime) -> Self {
        Self {
            id,
            free_flow_time,
            departures: 0,
            vehicles_entered: 0,
            handed_over: 0,
            arrivals: 0,
            occupants: HashMap::new(),
            clock: 0,
        }
    }

    /// Vehicles on the link as of the last time it handled a message.
    pub fn occupancy(&self) -> usize {
        self.occupancy_at(self.clock)
    }

    /// Vehicles on the link at `time`. A handed-over vehicle is gone once its
    /// exit time is reached; a vehicle ending its trip here stays until its
    /// arrival is handled.
    pub fn occupancy_at(&self, time: SimTime) -> usize {
        self.occupants
            .values()
            .filter(|o| o.last_leg || o.exit > time)
            .count()
    }

    /// Drops handed-over vehicles whose exit time is not after `now`.
    fn advance_clock(&mut self, now: SimTime) {
        self.clock = self.clock.max(now);
        let clock = self.clock;
        let before = self.occupants.len();
        self.occupants.retain(|_, o| o.last_leg || o.exit > clock);
        self.handed_over += (before - self.occupants.len()) as u64;
    }

    fn enter(
        &mut self,
        ctx: &mut DispatchContext<'_>,
        vehicle: VehicleId,
        route: Vec<UnitId>,
        leg: usize,
    ) -> DispatchResult {
        if route.get(leg) != Some(&self.id) {
            return Err(DispatchError::InvalidRoute {
                unit: self.id,
                vehicle,
                leg,
            });
        }

        if leg > 0 {
            ctx.emit(Some(route[leg - 1]), SimEventKind::LeaveLink { vehicle });
        }
        ctx.emit(Some(self.id), SimEventKind::EnterLink { vehicle });
        self.vehicles_entered += 1;

        let exit = ctx.now() + self.free_flow_time;
        let next_link = route.get(leg + 1).copied();
        self.occupants.insert(
            vehicle,
            Occupant {
                exit,
                last_leg: next_link.is_none(),
            },
        );

        let next = match next_link {
            Some(next_link) => Message::regular(
                exit,
                next_link,
                Payload::EnterLink {
                    vehicle,
                    route,
                    leg: leg + 1,
                },
            ),
            None => Message::regular(exit, self.id, Payload::Arrival { vehicle }),
        };
        Ok(vec![next])
    }

    fn arrive(&mut self, ctx: &mut DispatchContext<'_>, vehicle: VehicleId) -> DispatchResult {
        match self.occupants.get(&vehicle) {
            Some(occupant) if occupant.last_leg => {
                self.occupants.remove(&vehicle);
            }
            _ => {
                return Err(DispatchError::UnknownVehicle {
                    unit: self.id,
                    vehicle,
                })
            }
        }
        self.arrivals += 1;
        ctx.emit(Some(self.id), SimEventKind::LeaveLink { vehicle });
        ctx.emit(Some(self.id), SimEventKind::Arrival { vehicle });
        Ok(Vec::new())
    }
}

impl ReceivingUnit for LinkUnit {
    fn id(&self) -> UnitId {
        self.id
    }

    fn init(&mut self) {
        self.departures = 0;
        self.vehicles_entered = 0;
        self.arrivals = 0;
        self.handed_over = 0;
        self.occupants.clear();
        self.clock = 0;
    }

    fn finish(&mut self, end: SimTime) {
        self.advance_clock(end);
    }

    fn dispatch(&mut self, ctx: &mut DispatchContext<'_>, payload: Payload) -> DispatchResult {
        self.advance_clock(ctx.now());

        match payload {
            Payload::Departure { vehicle, route } => {
                if route.first() != Some(&self.id) {
                    return Err(DispatchError::InvalidRoute {
                        unit: self.id,
                        vehicle,
                        leg: 0,
                    });
                }
                self.departures += 1;
                ctx.emit(Some(self.id), SimEventKind::Departure { vehicle });
                self.enter(ctx, vehicle, route, 0)
            }
            Payload::EnterLink {
                vehicle,
                route,
                leg,
            } => self.enter(ctx, vehicle, route, leg),
            Payload::Arrival { vehicle } => self.arrive(ctx, vehicle),
            other => Err(DispatchError::UnsupportedPayload {
                unit: self.id,
                payload: other.name(),
            }),
        }
    }

    fn min_causal_delay(&self) -> Option<SimTime> {
        Some(self.free_flow_time)
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "free_flow_time": self.free_flow_time,
            "departures": self.departures,
            "vehicles_entered": self.vehicles_entered,
            "handed_over": self.handed_over,
            "arrivals": self.arrivals,
            "occupancy": self.occupancy(),
        })
    }
}
