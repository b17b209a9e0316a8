use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use door_monitor::clock::Clock;
use door_monitor::command::LedCommandHandler;
use door_monitor::hardware::{DoorSensor, Indicator};
use door_monitor::messaging::{MessageBus, MessageHandler};
use door_monitor::monitor::{DoorMonitor, Outcome, Settings};
use door_monitor::notifier::Notifier;
use door_monitor::{DoorState, Error, Result};

const STATUS: &str = "alice/feeds/magnet";
const LIGHTS: &str = "alice/feeds/lights";

fn door(v: u8) -> DoorState {
    if v == 1 {
        DoorState::Open
    } else {
        DoorState::Closed
    }
}

#[derive(Clone, Default)]
struct Time(Rc<Cell<u64>>);

impl Time {
    fn set(&self, ms: u64) {
        self.0.set(ms)
    }
}

impl Clock for Time {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

/// Door position as a function of time: the latest entry at or before now.
struct Timeline {
    time: Time,
    changes: Vec<(u64, DoorState)>,
}

impl DoorSensor for Timeline {
    fn read(&mut self) -> DoorState {
        let now = self.time.now_ms();
        self.changes
            .iter()
            .rev()
            .find(|(at, _)| *at <= now)
            .map_or(DoorState::Closed, |(_, state)| *state)
    }
}

#[derive(Clone, Default)]
struct Notifications(Rc<RefCell<Vec<u64>>>);

struct TimedNotifier {
    time: Time,
    log: Notifications,
}

impl Notifier for TimedNotifier {
    fn notify(&mut self) {
        self.log.0.borrow_mut().push(self.time.now_ms());
    }
}

#[derive(Default)]
struct Broker {
    time: Time,
    fail_publish: bool,
    attempts: Vec<(u64, String)>,
    published: Vec<(u64, String)>,
    inbound: VecDeque<(String, Vec<u8>)>,
    handler: Option<Box<dyn MessageHandler>>,
}

impl MessageBus for Broker {
    fn set_callback(&mut self, handler: Box<dyn MessageHandler>) {
        self.handler = Some(handler);
    }

    fn subscribe(&mut self, _topic: &str) -> Result<()> {
        Ok(())
    }

    fn check_for_message(&mut self) -> Result<bool> {
        let message = self.inbound.pop_front();
        match (message, self.handler.as_mut()) {
            (Some((topic, payload)), Some(handler)) => {
                handler.handle(&topic, &payload);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        assert_eq!(topic, STATUS);
        let now = self.time.now_ms();
        self.attempts.push((now, payload.to_string()));
        if self.fail_publish {
            return Err(Error::Mqtt("broker unreachable".to_string()));
        }
        self.published.push((now, payload.to_string()));
        Ok(())
    }

    fn disconnect(&mut self) {}
}

struct Rig {
    time: Time,
    notifications: Notifications,
    broker: Broker,
    monitor: DoorMonitor<Timeline, TimedNotifier, Time>,
}

impl Rig {
    fn new(interval: u64, changes: &[(u64, u8)]) -> Rig {
        let time = Time::default();
        let notifications = Notifications::default();
        let sensor = Timeline {
            time: time.clone(),
            changes: changes
                .iter()
                .map(|&(at, v)| (at, door(v)))
                .collect(),
        };
        let notifier = TimedNotifier {
            time: time.clone(),
            log: notifications.clone(),
        };
        let settings = Settings {
            status_topic: STATUS.to_string(),
            measure_interval_ms: interval,
        };
        Rig {
            broker: Broker {
                time: time.clone(),
                ..Broker::default()
            },
            monitor: DoorMonitor::new(sensor, notifier, time.clone(), settings),
            time,
            notifications,
        }
    }

    fn tick_at(&mut self, ms: u64) -> Outcome {
        self.time.set(ms);
        self.monitor.tick(&mut self.broker)
    }

    fn run_until(&mut self, end: u64, step: u64) {
        let mut t = 0;
        while t <= end {
            self.tick_at(t);
            t += step;
        }
    }

    fn published(&self) -> Vec<(u64, &str)> {
        self.broker
            .published
            .iter()
            .map(|(at, payload)| (*at, payload.as_str()))
            .collect()
    }
}

#[test]
fn change_during_throttle_is_deferred_until_the_gate_opens() {
    // Readings 0,0,0,1,1,1 at one second spacing, 5 s interval.
    let mut rig = Rig::new(5000, &[(0, 0), (3000, 1)]);
    let outcomes: Vec<Outcome> = (0..6).map(|i| rig.tick_at(i * 1000)).collect();
    assert_eq!(outcomes[0], Outcome::Published(DoorState::Closed));
    assert!(outcomes[1..5].iter().all(|o| *o == Outcome::Throttled));
    assert_eq!(outcomes[5], Outcome::Published(DoorState::Open));
    assert_eq!(rig.published(), vec![(0, "0"), (5000, "1")]);
    assert_eq!(*rig.notifications.0.borrow(), vec![5000]);
}

#[test]
fn change_reverted_before_the_gate_opens_is_never_reported() {
    // Readings 0,0,0,1,1,0: the open spell falls entirely inside the throttle window.
    let mut rig = Rig::new(5000, &[(0, 0), (3000, 1), (5000, 0)]);
    rig.run_until(5000, 1000);
    assert_eq!(rig.published(), vec![(0, "0")]);
    assert!(rig.notifications.0.borrow().is_empty());
}

#[test]
fn first_tick_publishes_regardless_of_interval() {
    let mut rig = Rig::new(u64::MAX, &[(0, 1)]);
    assert_eq!(rig.tick_at(0), Outcome::Published(DoorState::Open));
    assert_eq!(rig.tick_at(1), Outcome::Throttled);
    assert_eq!(rig.published(), vec![(0, "1")]);
    assert_eq!(rig.notifications.0.borrow().len(), 1);
}

#[test]
fn unchanged_state_is_never_republished() {
    let mut rig = Rig::new(100, &[(0, 0)]);
    rig.run_until(60_000, 50);
    assert_eq!(rig.published(), vec![(0, "0")]);
}

#[test]
fn publishes_track_every_settled_change() {
    let changes = [
        (0, 0),
        (10_000, 1),
        (20_000, 0),
        (21_000, 1),
        (40_000, 0),
    ];
    let mut rig = Rig::new(5000, &changes);
    rig.run_until(60_000, 250);
    assert_eq!(
        rig.published(),
        vec![(0, "0"), (10_000, "1"), (20_000, "0"), (25_000, "1"), (40_000, "0")]
    );
    // Published values alternate: nothing is ever sent twice in a row.
    let published = rig.published();
    assert!(published.windows(2).all(|w| w[0].1 != w[1].1));
    assert_eq!(*rig.notifications.0.borrow(), vec![10_000, 25_000]);
}

#[test]
fn door_held_open_notifies_once() {
    let mut rig = Rig::new(1000, &[(0, 0), (2000, 1)]);
    rig.run_until(30_000, 100);
    assert_eq!(*rig.notifications.0.borrow(), vec![2000]);
}

#[test]
fn attempts_stay_spaced_under_permanent_publish_failure() {
    // The door flaps every 700 ms; every publish fails.
    let changes: Vec<(u64, u8)> = (0..100).map(|i| (i * 700, (i % 2) as u8)).collect();
    let mut rig = Rig::new(5000, &changes);
    rig.broker.fail_publish = true;
    rig.run_until(60_000, 100);

    let attempts: Vec<u64> = rig.broker.attempts.iter().map(|(at, _)| *at).collect();
    assert!(attempts.len() > 5, "loop stopped attempting: {:?}", attempts);
    assert!(attempts.windows(2).all(|w| w[1] - w[0] >= 5000), "{:?}", attempts);
    assert!(rig.broker.published.is_empty());
    assert_eq!(rig.monitor.state().last_publish_ms(), attempts.last().copied());
}

#[test]
fn open_notification_does_not_depend_on_publish_success() {
    let mut rig = Rig::new(5000, &[(0, 1)]);
    rig.broker.fail_publish = true;
    assert_eq!(rig.tick_at(0), Outcome::PublishFailed(DoorState::Open));
    assert_eq!(*rig.notifications.0.borrow(), vec![0]);
}

#[derive(Clone, Default)]
struct SharedLed(Rc<Cell<bool>>);

impl Indicator for SharedLed {
    fn set_active(&mut self, active: bool) {
        self.0.set(active)
    }

    fn is_active(&self) -> bool {
        self.0.get()
    }
}

#[test]
fn inbound_commands_drive_the_led_one_per_tick() {
    let mut rig = Rig::new(5000, &[(0, 0)]);
    let led = SharedLed::default();
    rig.broker
        .set_callback(Box::new(LedCommandHandler::new(led.clone())));
    for payload in ["ON", "BLINK", "OFF", "ON"] {
        rig.broker
            .inbound
            .push_back((LIGHTS.to_string(), payload.as_bytes().to_vec()));
    }

    let mut states = Vec::new();
    for t in 0..4 {
        rig.tick_at(t * 10);
        states.push(led.is_active());
    }
    assert_eq!(states, vec![true, true, false, true]);
    assert_eq!(rig.published(), vec![(0, "0")]);
}
