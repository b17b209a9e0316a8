use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rumqttc::{
    Client, ConnectReturnCode, Connection, Event, MqttOptions, Outgoing, Packet, QoS,
    RecvTimeoutError, TryRecvError,
};

use crate::config::BrokerConfig;
use crate::error::{Error, Result};

const REQUEST_CAPACITY: usize = 10;
// Non-publish events (pings, acks) consumed per check before giving up the tick.
const MAX_EVENTS_PER_CHECK: usize = 8;
const CONNECT_SLICE: Duration = Duration::from_millis(200);
const DISCONNECT_DRAIN: Duration = Duration::from_millis(500);
// First reconnect delay after the link drops; doubles per failed attempt up to the connect timeout.
const RECONNECT_BACKOFF: Duration = Duration::from_millis(250);
const MIN_IDLE: Duration = Duration::from_millis(1);

pub trait MessageHandler {
    fn handle(&mut self, topic: &str, payload: &[u8]);
}

impl<F> MessageHandler for F
where
    F: FnMut(&str, &[u8]),
{
    fn handle(&mut self, topic: &str, payload: &[u8]) {
        self(topic, payload)
    }
}

pub trait MessageBus {
    fn set_callback(&mut self, handler: Box<dyn MessageHandler>);

    fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Deliver at most one queued inbound message to the handler.
    ///
    /// Returns `Ok(true)` if a message was delivered and `Ok(false)` if none was waiting.
    fn check_for_message(&mut self) -> Result<bool>;

    fn publish(&mut self, topic: &str, payload: &str) -> Result<()>;

    fn disconnect(&mut self);
}

pub struct MqttBus {
    client: Client,
    connection: Connection,
    handler: Option<Box<dyn MessageHandler>>,
    topics: Vec<String>,
    poll_budget: Duration,
    reconnect_budget: Duration,
    link_up: bool,
    retry_delay: Duration,
    retry_at: Option<Instant>,
    disconnected: bool,
}

impl MqttBus {
    pub fn connect(config: &BrokerConfig, term: &AtomicBool) -> Result<MqttBus> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_credentials(&config.user, &config.key);
        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);

        let deadline = Instant::now() + config.connect_timeout;
        loop {
            if term.load(Ordering::Relaxed) {
                return Err(Error::Interrupted);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Mqtt(format!(
                    "no CONNACK from {}:{} within {:?}",
                    config.host, config.port, config.connect_timeout
                )));
            }
            match connection.recv_timeout(remaining.min(CONNECT_SLICE)) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(Error::Mqtt(format!("broker refused session: {:?}", ack.code)));
                    }
                    break;
                }
                Ok(Ok(_)) | Err(RecvTimeoutError::Timeout) => {}
                Ok(Err(err)) => return Err(err.into()),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Mqtt("event loop closed".to_string()))
                }
            }
        }
        info!("connected to {}:{} as {}", config.host, config.port, config.client_id);

        Ok(MqttBus {
            client,
            connection,
            handler: None,
            topics: Vec::new(),
            poll_budget: config.poll_budget,
            reconnect_budget: config.connect_timeout,
            link_up: true,
            retry_delay: RECONNECT_BACKOFF,
            retry_at: None,
            disconnected: false,
        })
    }

    fn next_event(&mut self) -> Result<Option<Event>> {
        if let Some(retry_at) = self.retry_at {
            let now = Instant::now();
            if now < retry_at {
                // Still pace the caller's loop while the backoff runs.
                thread::sleep(self.poll_budget.max(MIN_IDLE).min(retry_at - now));
                return Ok(None);
            }
        }

        // While the link is down a poll has to run long enough to finish a reconnect.
        let budget = if self.link_up {
            self.poll_budget
        } else {
            self.reconnect_budget
        };
        let polled = if budget.is_zero() {
            match self.connection.try_recv() {
                Ok(event) => Some(event),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => {
                    return Err(Error::Mqtt("event loop closed".to_string()))
                }
            }
        } else {
            match self.connection.recv_timeout(budget) {
                Ok(event) => Some(event),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Mqtt("event loop closed".to_string()))
                }
            }
        };
        match polled {
            Some(Ok(event)) => Ok(Some(event)),
            None if self.link_up => Ok(None),
            None => {
                debug!("reconnect to broker did not complete");
                self.schedule_retry();
                Ok(None)
            }
            Some(Err(err)) if self.link_up => {
                self.link_up = false;
                self.schedule_retry();
                Err(err.into())
            }
            Some(Err(err)) => {
                debug!("reconnect to broker failed: {}", err);
                self.schedule_retry();
                Ok(None)
            }
        }
    }

    fn schedule_retry(&mut self) {
        let delay = self.retry_delay;
        self.retry_at = Some(Instant::now() + delay);
        self.retry_delay = (delay * 2).min(self.reconnect_budget.max(RECONNECT_BACKOFF));
    }

    fn link_restored(&mut self) {
        self.link_up = true;
        self.retry_at = None;
        self.retry_delay = RECONNECT_BACKOFF;
    }

    fn resubscribe(&self) {
        for topic in &self.topics {
            if let Err(err) = self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                warn!("unable to resubscribe to {}: {}", topic, err);
            }
        }
    }
}

impl MessageBus for MqttBus {
    fn set_callback(&mut self, handler: Box<dyn MessageHandler>) {
        self.handler = Some(handler);
    }

    fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.client.subscribe(topic, QoS::AtMostOnce)?;
        self.topics.push(topic.to_string());
        Ok(())
    }

    fn check_for_message(&mut self) -> Result<bool> {
        if self.disconnected {
            return Ok(false);
        }
        for _ in 0..MAX_EVENTS_PER_CHECK {
            match self.next_event()? {
                None => return Ok(false),
                Some(Event::Incoming(Packet::Publish(publish))) => {
                    match self.handler.as_mut() {
                        Some(handler) => handler.handle(&publish.topic, &publish.payload),
                        None => debug!("dropping message on {}: no callback", publish.topic),
                    }
                    return Ok(true);
                }
                Some(Event::Incoming(Packet::ConnAck(_))) => {
                    // Clean sessions forget subscriptions across reconnects.
                    info!("reconnected to broker");
                    self.link_restored();
                    self.resubscribe();
                }
                Some(_) => {}
            }
        }
        Ok(false)
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        if self.disconnected {
            return Err(Error::Mqtt("session closed".to_string()));
        }
        if !self.link_up {
            return Err(Error::Mqtt("not connected".to_string()));
        }
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())?;
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;
        if !self.link_up {
            info!("broker link already down, session dropped");
            return;
        }
        if let Err(err) = self.client.try_disconnect() {
            warn!("unable to queue DISCONNECT: {}", err);
            return;
        }
        // Drive the event loop until DISCONNECT has actually been written.
        let deadline = Instant::now() + DISCONNECT_DRAIN;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match self.connection.recv_timeout(remaining) {
                Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => break,
                Ok(Ok(_)) => {}
                Ok(Err(_)) | Err(_) => break,
            }
        }
        info!("disconnected from broker");
    }
}
