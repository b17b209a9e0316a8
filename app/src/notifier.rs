use std::time::Duration;

use json::object;
use log::{error, info, warn};

use crate::config::TriggerConfig;

pub trait Notifier {
    fn notify(&mut self);
}

pub struct HttpNotifier {
    agent: ureq::Agent,
    endpoint: String,
}

impl HttpNotifier {
    pub fn new(config: &TriggerConfig) -> Self {
        HttpNotifier::with_endpoint(config.endpoint(), config.timeout)
    }

    pub fn with_endpoint(endpoint: String, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        HttpNotifier { agent, endpoint }
    }
}

pub fn open_event_body() -> String {
    json::stringify(object! { status: "open" })
}

impl Notifier for HttpNotifier {
    fn notify(&mut self) {
        info!("sending trigger to {}", self.endpoint);
        let result = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .send_string(&open_event_body());

        // Reading the body to the end hands the connection back to the agent's pool.
        match result {
            Ok(response) => {
                let status = response.status();
                match response.into_string() {
                    Ok(body) => info!("trigger accepted ({}): {}", status, body.trim()),
                    Err(err) => warn!("trigger accepted ({}), unreadable body: {}", status, err),
                }
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                warn!("trigger rejected ({}): {}", status, body.trim());
            }
            Err(ureq::Error::Transport(err)) => error!("error sending trigger: {}", err),
        }
    }
}
