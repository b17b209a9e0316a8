//! The door monitor loop.
//!
//! Each tick services at most one inbound broker message and then runs the
//! publish evaluation: a throttle gate followed by a change detector, in that
//! order. A change seen while the gate is closed is not lost, it is picked up
//! by the first tick after the gate reopens, provided the door is still in
//! the new position.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::hardware::DoorSensor;
use crate::messaging::MessageBus;
use crate::network::NetworkLink;
use crate::notifier::Notifier;
use crate::DoorState;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub status_topic: String,
    pub measure_interval_ms: u64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishState {
    last_reported: Option<DoorState>,
    last_publish_ms: Option<u64>,
}

impl PublishState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_reported(&self) -> Option<DoorState> {
        self.last_reported
    }

    pub fn last_publish_ms(&self) -> Option<u64> {
        self.last_publish_ms
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Throttled,
    Unchanged,
    Published(DoorState),
    PublishFailed(DoorState),
}

/// Run one publish evaluation.
///
/// The throttle is checked before the sensor is read, and an unchanged
/// reading leaves the timestamp alone. Publish failures are rate limited
/// exactly like successes. Opening the door fires the notifier once,
/// after the publish attempt, whatever its result.
pub fn evaluate<S, B, N>(
    state: &mut PublishState,
    now_ms: u64,
    settings: &Settings,
    sensor: &mut S,
    bus: &mut B,
    notifier: &mut N,
) -> Outcome
where
    S: DoorSensor + ?Sized,
    B: MessageBus + ?Sized,
    N: Notifier + ?Sized,
{
    if let Some(last) = state.last_publish_ms {
        if now_ms.saturating_sub(last) < settings.measure_interval_ms {
            return Outcome::Throttled;
        }
    }

    let door = sensor.read();
    if state.last_reported == Some(door) {
        return Outcome::Unchanged;
    }

    state.last_reported = Some(door);
    let payload = door.as_payload();
    let outcome = match bus.publish(&settings.status_topic, payload) {
        Ok(()) => {
            info!("published {} ({}) to {}", payload, door, settings.status_topic);
            Outcome::Published(door)
        }
        Err(err) => {
            warn!("publishing {} to {} failed: {}", payload, settings.status_topic, err);
            Outcome::PublishFailed(door)
        }
    };
    state.last_publish_ms = Some(now_ms);

    if door.is_open() {
        notifier.notify();
    }
    outcome
}

pub struct DoorMonitor<S, N, C> {
    sensor: S,
    notifier: N,
    clock: C,
    settings: Settings,
    state: PublishState,
}

impl<S, N, C> DoorMonitor<S, N, C>
where
    S: DoorSensor,
    N: Notifier,
    C: Clock,
{
    pub fn new(sensor: S, notifier: N, clock: C, settings: Settings) -> Self {
        DoorMonitor {
            sensor,
            notifier,
            clock,
            settings,
            state: PublishState::new(),
        }
    }

    pub fn state(&self) -> &PublishState {
        &self.state
    }

    pub fn tick<B: MessageBus + ?Sized>(&mut self, bus: &mut B) -> Outcome {
        if let Err(err) = bus.check_for_message() {
            warn!("message check failed: {}", err);
        }
        let now = self.clock.now_ms();
        evaluate(
            &mut self.state,
            now,
            &self.settings,
            &mut self.sensor,
            bus,
            &mut self.notifier,
        )
    }

    pub fn run<B: MessageBus + ?Sized>(&mut self, bus: &mut B, term: &AtomicBool) {
        info!(
            "monitoring door, publishing to {} at most every {} ms",
            self.settings.status_topic, self.settings.measure_interval_ms
        );
        while !term.load(Ordering::Relaxed) {
            self.tick(bus);
        }
        info!("monitor loop exiting");
    }
}

/// Network link plus broker session, released together exactly once.
///
/// Dropping the session closes it, so teardown happens on every way out of
/// the loop, including unwinding.
pub struct Session<L: NetworkLink, B: MessageBus> {
    link: L,
    bus: B,
    address: IpAddr,
    closed: bool,
}

impl<L: NetworkLink, B: MessageBus> Session<L, B> {
    pub fn establish<F>(mut link: L, connect: F) -> Result<Self>
    where
        F: FnOnce(IpAddr) -> Result<B>,
    {
        let address = link.connect()?;
        let bus = match connect(address) {
            Ok(bus) => bus,
            Err(err) => {
                link.disconnect();
                return Err(err);
            }
        };
        Ok(Session {
            link,
            bus,
            address,
            closed: false,
        })
    }

    pub fn bus(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.bus.disconnect();
        self.link.disconnect();
        info!("disconnected from broker and network");
    }
}

impl<L: NetworkLink, B: MessageBus> Drop for Session<L, B> {
    fn drop(&mut self) {
        self.close();
    }
}
