use std::{fmt, io};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Config(String),
    Io(io::Error),
    Gpio(rppal::gpio::Error),
    Mqtt(String),
    Network(String),
    Interrupted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "config: {}", msg),
            Error::Io(err) => write!(f, "I/O: {}", err),
            Error::Gpio(err) => write!(f, "GPIO: {}", err),
            Error::Mqtt(msg) => write!(f, "MQTT: {}", msg),
            Error::Network(msg) => write!(f, "network: {}", msg),
            Error::Interrupted => f.write_str("interrupted"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Gpio(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<rppal::gpio::Error> for Error {
    fn from(err: rppal::gpio::Error) -> Self {
        Error::Gpio(err)
    }
}

impl From<rumqttc::ClientError> for Error {
    fn from(err: rumqttc::ClientError) -> Self {
        Error::Mqtt(err.to_string())
    }
}

impl From<rumqttc::ConnectionError> for Error {
    fn from(err: rumqttc::ConnectionError) -> Self {
        Error::Mqtt(err.to_string())
    }
}

impl From<json::Error> for Error {
    fn from(err: json::Error) -> Self {
        Error::Config(err.to_string())
    }
}
