use std::fs;
use std::path::Path;
use std::time::Duration;

use json::JsonValue;
use log::LevelFilter;

use crate::error::{Error, Result};

pub const DEFAULT_MONITOR_CONFIG: &str = "/etc/door-monitor.json";
pub const DEFAULT_SERVER_CONFIG: &str = "/etc/door-trigger-server.json";

const MACHINE_ID_PATH: &str = "/etc/machine-id";
const CLIENT_ID_PREFIX: &str = "door-monitor";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key: String,
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub poll_budget: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerConfig {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl TriggerConfig {
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}/door", self.host, self.port)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorConfig {
    pub broker: BrokerConfig,
    pub lights_feed: String,
    pub magnet_feed: String,
    pub trigger: TriggerConfig,
    pub door_pin: u8,
    pub led_pin: u8,
    pub measure_interval_ms: u64,
    pub log_level: LevelFilter,
}

impl MonitorConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = read_config(path.as_ref())?;
        let machine_id = fs::read_to_string(MACHINE_ID_PATH).ok();
        Self::parse(&text, machine_id.as_deref())
    }

    pub fn parse(text: &str, machine_id: Option<&str>) -> Result<Self> {
        let root = json::parse(text)?;
        let broker = &root["broker"];
        let user = required_str(broker, "broker.user", "user")?;
        let key = required_str(broker, "broker.key", "key")?;
        let client_id = match broker["client_id"].as_str() {
            Some(id) => id.to_string(),
            None => default_client_id(machine_id),
        };

        let feeds = &root["feeds"];
        let lights_feed = feeds["lights"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| format!("{}/feeds/lights", user));
        let magnet_feed = feeds["magnet"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| format!("{}/feeds/magnet", user));

        let trigger = &root["trigger"];
        let trigger = TriggerConfig {
            host: required_str(trigger, "trigger.host", "host")?,
            port: opt_u16(trigger, "trigger.port", "port", 5000)?,
            timeout: opt_millis(trigger, "trigger.timeout_ms", "timeout_ms", 5000)?,
        };

        let gpio = &root["gpio"];
        Ok(MonitorConfig {
            broker: BrokerConfig {
                host: opt_str(broker, "host", "io.adafruit.com"),
                port: opt_u16(broker, "broker.port", "port", 1883)?,
                user,
                key,
                client_id,
                keep_alive: Duration::from_secs(opt_u64(
                    broker,
                    "broker.keep_alive_secs",
                    "keep_alive_secs",
                    60,
                )?),
                connect_timeout: opt_millis(
                    broker,
                    "broker.connect_timeout_ms",
                    "connect_timeout_ms",
                    10_000,
                )?,
                poll_budget: opt_millis(broker, "broker.poll_budget_ms", "poll_budget_ms", 10)?,
            },
            lights_feed,
            magnet_feed,
            trigger,
            door_pin: opt_u8(gpio, "gpio.door_pin", "door_pin", 27)?,
            led_pin: opt_u8(gpio, "gpio.led_pin", "led_pin", 21)?,
            measure_interval_ms: opt_u64(&root, "measure_interval_ms", "measure_interval_ms", 5000)?,
            log_level: log_level(&root)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_host: String,
    pub bind_port: u16,
    pub camera: CameraConfig,
    pub webhook_url: String,
    pub webhook_timeout: Duration,
    pub caption: String,
    // Lets the camera adjust to the opened door.
    pub settle_delay: Duration,
    pub log_level: LevelFilter,
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::parse(&read_config(path.as_ref())?)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let root = json::parse(text)?;
        let bind = &root["bind"];
        let camera = &root["camera"];
        let webhook = &root["webhook"];
        Ok(ServerConfig {
            bind_host: opt_str(bind, "host", "0.0.0.0"),
            bind_port: opt_u16(bind, "bind.port", "port", 5000)?,
            camera: CameraConfig {
                url: required_str(camera, "camera.url", "url")?,
                user: opt_str(camera, "user", "root"),
                password: required_str(camera, "camera.password", "password")?,
                timeout: opt_millis(camera, "camera.timeout_ms", "timeout_ms", 10_000)?,
            },
            webhook_url: required_str(webhook, "webhook.url", "url")?,
            webhook_timeout: opt_millis(webhook, "webhook.timeout_ms", "timeout_ms", 10_000)?,
            caption: opt_str(&root, "caption", "🚪 Door opened!"),
            settle_delay: opt_millis(&root, "settle_delay_ms", "settle_delay_ms", 2000)?,
            log_level: log_level(&root)?,
        })
    }
}

pub fn default_client_id(machine_id: Option<&str>) -> String {
    let suffix: String = machine_id
        .unwrap_or("")
        .trim()
        .chars()
        .filter(char::is_ascii_hexdigit)
        .take(12)
        .collect();
    if suffix.is_empty() {
        CLIENT_ID_PREFIX.to_string()
    } else {
        format!("{}-{}", CLIENT_ID_PREFIX, suffix)
    }
}

fn read_config(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|err| Error::Config(format!("unable to read {}: {}", path.display(), err)))
}

fn required_str(obj: &JsonValue, name: &str, key: &str) -> Result<String> {
    obj[key]
        .as_str()
        .map(String::from)
        .ok_or_else(|| Error::Config(format!("missing required string `{}`", name)))
}

fn opt_str(obj: &JsonValue, key: &str, default: &str) -> String {
    obj[key].as_str().unwrap_or(default).to_string()
}

fn opt_u64(obj: &JsonValue, name: &str, key: &str, default: u64) -> Result<u64> {
    let value = &obj[key];
    if value.is_null() {
        return Ok(default);
    }
    value
        .as_u64()
        .ok_or_else(|| Error::Config(format!("`{}` must be a non-negative integer", name)))
}

fn opt_u16(obj: &JsonValue, name: &str, key: &str, default: u16) -> Result<u16> {
    let value = opt_u64(obj, name, key, u64::from(default))?;
    u16::try_from(value).map_err(|_| Error::Config(format!("`{}` is out of range", name)))
}

fn opt_u8(obj: &JsonValue, name: &str, key: &str, default: u8) -> Result<u8> {
    let value = opt_u64(obj, name, key, u64::from(default))?;
    u8::try_from(value).map_err(|_| Error::Config(format!("`{}` is out of range", name)))
}

fn opt_millis(obj: &JsonValue, name: &str, key: &str, default: u64) -> Result<Duration> {
    opt_u64(obj, name, key, default).map(Duration::from_millis)
}

fn log_level(root: &JsonValue) -> Result<LevelFilter> {
    match root["log_level"].as_str() {
        None => Ok(LevelFilter::Info),
        Some(level) => level
            .parse()
            .map_err(|_| Error::Config(format!("unknown log level `{}`", level))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "broker": { "user": "alice", "key": "aio_secret" },
        "trigger": { "host": "192.168.1.20" }
    }"#;

    #[test]
    fn minimal_monitor_config_takes_defaults() {
        let config = MonitorConfig::parse(MINIMAL, None).unwrap();
        assert_eq!(config.broker.host, "io.adafruit.com");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.client_id, "door-monitor");
        assert_eq!(config.lights_feed, "alice/feeds/lights");
        assert_eq!(config.magnet_feed, "alice/feeds/magnet");
        assert_eq!(config.trigger.endpoint(), "http://192.168.1.20:5000/door");
        assert_eq!(config.measure_interval_ms, 5000);
        assert_eq!(config.door_pin, 27);
        assert_eq!(config.broker.poll_budget, Duration::from_millis(10));
        assert_eq!(config.log_level, LevelFilter::Info);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let text = r#"{
            "broker": { "host": "localhost", "port": 8883, "user": "u", "key": "k",
                        "client_id": "porch", "keep_alive_secs": 30, "poll_budget_ms": 0 },
            "feeds": { "lights": "a/b", "magnet": "c/d" },
            "trigger": { "host": "h", "port": 8080, "timeout_ms": 1500 },
            "gpio": { "door_pin": 4, "led_pin": 17 },
            "measure_interval_ms": 250,
            "log_level": "debug"
        }"#;
        let config = MonitorConfig::parse(text, Some("abc")).unwrap();
        assert_eq!(config.broker.port, 8883);
        assert_eq!(config.broker.client_id, "porch");
        assert_eq!(config.broker.keep_alive, Duration::from_secs(30));
        assert_eq!(config.lights_feed, "a/b");
        assert_eq!(config.trigger.timeout, Duration::from_millis(1500));
        assert_eq!(config.led_pin, 17);
        assert_eq!(config.measure_interval_ms, 250);
        assert_eq!(config.broker.poll_budget, Duration::ZERO);
        assert_eq!(config.log_level, LevelFilter::Debug);
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let err = MonitorConfig::parse(r#"{ "trigger": { "host": "h" } }"#, None).unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("broker.user")));
    }

    #[test]
    fn out_of_range_pin_is_rejected() {
        let text = r#"{
            "broker": { "user": "u", "key": "k" },
            "trigger": { "host": "h" },
            "gpio": { "door_pin": 300 }
        }"#;
        assert!(matches!(MonitorConfig::parse(text, None), Err(Error::Config(_))));
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        assert!(matches!(MonitorConfig::parse("{", None), Err(Error::Config(_))));
    }

    #[test]
    fn client_id_uses_machine_id_prefix() {
        assert_eq!(
            default_client_id(Some("0123456789abcdef0123456789abcdef\n")),
            "door-monitor-0123456789ab"
        );
        assert_eq!(default_client_id(Some("  \n")), "door-monitor");
    }

    #[test]
    fn server_config_defaults() {
        let text = r#"{
            "camera": { "url": "http://10.0.0.5/axis-cgi/jpg/image.cgi", "password": "pw" },
            "webhook": { "url": "https://chat.example/api/webhooks/1/abc" }
        }"#;
        let config = ServerConfig::parse(text).unwrap();
        assert_eq!(config.bind_host, "0.0.0.0");
        assert_eq!(config.bind_port, 5000);
        assert_eq!(config.camera.user, "root");
        assert_eq!(config.caption, "🚪 Door opened!");
        assert_eq!(config.settle_delay, Duration::from_secs(2));
    }
}
