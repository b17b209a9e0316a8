use std::path::PathBuf;
use std::{env, process};

use log::{error, info};

use door_monitor::clock::MonotonicClock;
use door_monitor::command::LedCommandHandler;
use door_monitor::config::{MonitorConfig, DEFAULT_MONITOR_CONFIG};
use door_monitor::hardware::setup_gpio;
use door_monitor::messaging::{MessageBus, MqttBus};
use door_monitor::monitor::{DoorMonitor, Session, Settings};
use door_monitor::network::HostNetwork;
use door_monitor::notifier::HttpNotifier;
use door_monitor::{init_logging, register_term_signals, Error};

fn main() {
    let path = env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MONITOR_CONFIG));
    let config = match MonitorConfig::load(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };
    init_logging("door-monitor", config.log_level);

    match run(config) {
        Ok(()) => {}
        Err(Error::Interrupted) => info!("interrupted during startup"),
        Err(err) => {
            error!("{}", err);
            eprintln!("door-monitor: {}", err);
            process::exit(1);
        }
    }
}

fn run(config: MonitorConfig) -> Result<(), Error> {
    let term = register_term_signals()?;
    let (sensor, led) = setup_gpio(config.door_pin, config.led_pin)?;

    let link = HostNetwork::new(&config.broker.host, config.broker.port);
    let mut session = Session::establish(link, |_| MqttBus::connect(&config.broker, &term))?;
    info!("network address {}", session.address());

    let bus = session.bus();
    bus.set_callback(Box::new(LedCommandHandler::new(led)));
    bus.subscribe(&config.lights_feed)?;
    info!(
        "connected to {}, subscribed to {}",
        config.broker.host, config.lights_feed
    );

    let settings = Settings {
        status_topic: config.magnet_feed.clone(),
        measure_interval_ms: config.measure_interval_ms,
    };
    let mut monitor = DoorMonitor::new(
        sensor,
        HttpNotifier::new(&config.trigger),
        MonotonicClock::new(),
        settings,
    );
    monitor.run(session.bus(), &term);

    session.close();
    Ok(())
}
