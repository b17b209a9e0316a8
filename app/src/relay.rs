use std::fmt;
use std::time::Duration;

use log::{info, warn};

#[derive(Debug)]
pub struct RelayError(String);

impl RelayError {
    pub fn new<S: Into<String>>(msg: S) -> Self {
        RelayError(msg.into())
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "webhook: {}", self.0)
    }
}

impl std::error::Error for RelayError {}

pub trait Webhook {
    fn post_snapshot(&mut self, caption: &str, filename: &str, image: &[u8]) -> Result<(), RelayError>;
}

pub struct Multipart {
    boundary: String,
    body: Vec<u8>,
}

impl Multipart {
    pub fn new() -> Self {
        Multipart::with_boundary(format!("door-monitor-{:032x}", rand::random::<u128>()))
    }

    pub fn with_boundary(boundary: String) -> Self {
        Multipart {
            boundary,
            body: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.open_part(&format!(r#"form-data; name="{}""#, name), None);
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn file(mut self, name: &str, filename: &str, content_type: &str, data: &[u8]) -> Self {
        self.open_part(
            &format!(r#"form-data; name="{}"; filename="{}""#, name, filename),
            Some(content_type),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", self.boundary),
            self.body,
        )
    }

    fn open_part(&mut self, disposition: &str, content_type: Option<&str>) {
        let mut head = format!(
            "--{}\r\nContent-Disposition: {}\r\n",
            self.boundary, disposition
        );
        if let Some(content_type) = content_type {
            head.push_str(&format!("Content-Type: {}\r\n", content_type));
        }
        head.push_str("\r\n");
        self.body.extend_from_slice(head.as_bytes());
    }
}

impl Default for Multipart {
    fn default() -> Self {
        Self::new()
    }
}

pub struct HttpWebhook {
    agent: ureq::Agent,
    url: String,
}

impl HttpWebhook {
    pub fn new(url: String, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        HttpWebhook { agent, url }
    }
}

impl Webhook for HttpWebhook {
    fn post_snapshot(&mut self, caption: &str, filename: &str, image: &[u8]) -> Result<(), RelayError> {
        let (content_type, body) = Multipart::new()
            .text("content", caption)
            .file("file", filename, "image/jpeg", image)
            .finish();
        match self
            .agent
            .post(&self.url)
            .set("Content-Type", &content_type)
            .send_bytes(&body)
        {
            Ok(response) => {
                info!("snapshot {} relayed ({})", filename, response.status());
                Ok(())
            }
            // The upload went through; a rejection is reported but does not fail the trigger.
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                warn!("webhook rejected {} ({}): {}", filename, status, body.trim());
                Ok(())
            }
            Err(ureq::Error::Transport(err)) => Err(RelayError::new(err.to_string())),
        }
    }
}
