use std::fmt;

use rppal::gpio::Level;

// The discriminants are what goes over the wire on the status feed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DoorState {
    Closed = 0,
    Open = 1,
}

impl DoorState {
    pub fn as_payload(self) -> &'static str {
        match self {
            DoorState::Closed => "0",
            DoorState::Open => "1",
        }
    }

    pub fn is_open(self) -> bool {
        self == DoorState::Open
    }
}

impl From<Level> for DoorState {
    fn from(level: Level) -> Self {
        // The magnet holds the switch closed, pulling the input low.
        match level {
            Level::Low => DoorState::Closed,
            Level::High => DoorState::Open,
        }
    }
}

impl fmt::Display for DoorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DoorState::Open => f.write_str("Open"),
            DoorState::Closed => f.write_str("Closed"),
        }
    }
}
