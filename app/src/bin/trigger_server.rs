use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::{env, process, thread};

use log::{error, info};

use door_monitor::camera::HttpCamera;
use door_monitor::config::{ServerConfig, DEFAULT_SERVER_CONFIG};
use door_monitor::http::{Server, TriggerPipeline};
use door_monitor::relay::HttpWebhook;
use door_monitor::{init_logging, register_term_signals};

const ONE_SECOND: Duration = Duration::from_secs(1);

fn main() {
    let path = env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SERVER_CONFIG));
    let config = match ServerConfig::load(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };
    init_logging("door-trigger-server", config.log_level);

    let term = match register_term_signals() {
        Ok(term) => term,
        Err(err) => {
            eprintln!("unable to register signal handlers: {}", err);
            process::exit(1);
        }
    };

    let addr = (config.bind_host.as_str(), config.bind_port);
    let server = match Server::new(addr) {
        Ok(server) => Arc::new(server),
        Err(err) => {
            error!("unable to start http server on {}:{}: {}", addr.0, addr.1, err);
            eprintln!("Unable to start http server on {}:{}: {}", addr.0, addr.1, err);
            process::exit(1);
        }
    };
    info!("trigger server listening on {}:{}", addr.0, addr.1);

    let mut pipeline = TriggerPipeline::new(
        HttpCamera::new(config.camera.clone()),
        HttpWebhook::new(config.webhook_url.clone(), config.webhook_timeout),
        config.caption.clone(),
        config.settle_delay,
    );
    let handle = {
        let server = Arc::clone(&server);
        thread::spawn(move || {
            server.handle_requests(&mut pipeline);
            info!("server thread exiting");
        })
    };

    // Wait for signals to exit
    while !term.load(Ordering::Relaxed) {
        thread::sleep(ONE_SECOND);
    }
    server.shutdown();
    let _ = handle.join();
}
