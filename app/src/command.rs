use log::{debug, warn};

use crate::hardware::Indicator;
use crate::messaging::MessageHandler;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LedCommand {
    On,
    Off,
}

impl LedCommand {
    pub fn parse(payload: &[u8]) -> Option<LedCommand> {
        match payload {
            b"ON" => Some(LedCommand::On),
            b"OFF" => Some(LedCommand::Off),
            _ => None,
        }
    }
}

pub struct LedCommandHandler<I> {
    led: I,
}

impl<I: Indicator> LedCommandHandler<I> {
    pub fn new(led: I) -> Self {
        LedCommandHandler { led }
    }
}

impl<I: Indicator> MessageHandler for LedCommandHandler<I> {
    fn handle(&mut self, topic: &str, payload: &[u8]) {
        debug!("received {:?} on {}", String::from_utf8_lossy(payload), topic);
        match LedCommand::parse(payload) {
            Some(LedCommand::On) => self.led.set_active(true),
            Some(LedCommand::Off) => self.led.set_active(false),
            None => warn!(
                "unknown message {:?} on {}",
                String::from_utf8_lossy(payload),
                topic
            ),
        }
    }
}
