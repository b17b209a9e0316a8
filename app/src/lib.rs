pub mod camera;
pub mod clock;
pub mod command;
pub mod config;
mod door_state;
pub mod error;
pub mod hardware;
pub mod http;
pub mod messaging;
pub mod monitor;
pub mod network;
pub mod notifier;
pub mod relay;

use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::LevelFilter;
use syslog::Facility;

pub use door_state::DoorState;
pub use error::{Error, Result};

pub fn init_logging(process: &str, level: LevelFilter) {
    if let Err(err) = syslog::init(Facility::LOG_DAEMON, level, Some(process)) {
        eprintln!("unable to connect to syslog, logging disabled: {}", err);
    }
}

pub fn register_term_signals() -> io::Result<Arc<AtomicBool>> {
    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&term))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))?;
    Ok(term)
}
