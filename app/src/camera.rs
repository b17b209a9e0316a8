use std::fmt;
use std::io::Read;

use log::debug;
use md5::{Digest, Md5};

use crate::config::CameraConfig;

const MAX_IMAGE_BYTES: u64 = 16 * 1024 * 1024;

#[derive(Debug)]
pub enum CameraError {
    Status(u16),
    Auth(String),
    Transport(String),
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::Status(code) => write!(f, "camera responded {}", code),
            CameraError::Auth(msg) => write!(f, "authentication: {}", msg),
            CameraError::Transport(msg) => write!(f, "transport: {}", msg),
        }
    }
}

impl std::error::Error for CameraError {}

pub trait Camera {
    fn snapshot(&mut self) -> Result<Vec<u8>, CameraError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Algorithm {
    Md5,
    Md5Sess,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DigestChallenge {
    realm: String,
    nonce: String,
    opaque: Option<String>,
    // Without `qop=auth` the legacy RFC 2069 response is used.
    qop_auth: bool,
    algorithm: Algorithm,
}

impl DigestChallenge {
    pub fn parse(header: &str) -> Result<Self, CameraError> {
        let header = header.trim();
        let params = match header.split_once(char::is_whitespace) {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("digest") => rest,
            _ => return Err(CameraError::Auth(format!("not a digest challenge: {}", header))),
        };

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut qop_auth = false;
        let mut algorithm = Algorithm::Md5;
        for (key, value) in auth_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "opaque" => opaque = Some(value),
                "qop" => {
                    qop_auth = value
                        .split(',')
                        .any(|qop| qop.trim().eq_ignore_ascii_case("auth"))
                }
                "algorithm" => {
                    algorithm = if value.eq_ignore_ascii_case("md5") {
                        Algorithm::Md5
                    } else if value.eq_ignore_ascii_case("md5-sess") {
                        Algorithm::Md5Sess
                    } else {
                        return Err(CameraError::Auth(format!("unsupported algorithm {}", value)));
                    }
                }
                _ => {}
            }
        }

        Ok(DigestChallenge {
            realm: realm.ok_or_else(|| CameraError::Auth("challenge has no realm".to_string()))?,
            nonce: nonce.ok_or_else(|| CameraError::Auth("challenge has no nonce".to_string()))?,
            opaque,
            qop_auth,
            algorithm,
        })
    }

    pub fn authorization(
        &self,
        method: &str,
        uri: &str,
        user: &str,
        password: &str,
        cnonce: &str,
    ) -> String {
        const NC: &str = "00000001";

        let mut ha1 = md5_hex(&format!("{}:{}:{}", user, self.realm, password));
        if self.algorithm == Algorithm::Md5Sess {
            ha1 = md5_hex(&format!("{}:{}:{}", ha1, self.nonce, cnonce));
        }
        let ha2 = md5_hex(&format!("{}:{}", method, uri));
        let response = if self.qop_auth {
            md5_hex(&format!("{}:{}:{}:{}:auth:{}", ha1, self.nonce, NC, cnonce, ha2))
        } else {
            md5_hex(&format!("{}:{}:{}", ha1, self.nonce, ha2))
        };

        let mut header = format!(
            r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", response="{}""#,
            user, self.realm, self.nonce, uri, response
        );
        if self.algorithm == Algorithm::Md5Sess {
            header.push_str(", algorithm=MD5-sess");
        } else {
            header.push_str(", algorithm=MD5");
        }
        if self.qop_auth {
            header.push_str(&format!(r#", qop=auth, nc={}, cnonce="{}""#, NC, cnonce));
        }
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(r#", opaque="{}""#, opaque));
        }
        header
    }
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", Md5::digest(input.as_bytes()))
}

fn auth_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();
    loop {
        while chars.peek().map_or(false, |c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.is_empty() {
            break;
        }
        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.extend(chars.next()),
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
        }
        params.push((key.trim().to_string(), value.trim().to_string()));
    }
    params
}

pub fn request_uri(url: &str) -> &str {
    let after_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    match after_scheme.find('/') {
        Some(idx) => &after_scheme[idx..],
        None => "/",
    }
}

pub struct HttpCamera {
    agent: ureq::Agent,
    config: CameraConfig,
    max_image_bytes: u64,
}

impl HttpCamera {
    pub fn new(config: CameraConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.timeout)
            .timeout(config.timeout)
            .build();
        HttpCamera {
            agent,
            config,
            max_image_bytes: MAX_IMAGE_BYTES,
        }
    }

    fn read_image(&self, response: ureq::Response) -> Result<Vec<u8>, CameraError> {
        let status = response.status();
        if status != 200 {
            return Err(CameraError::Status(status));
        }
        let mut image = Vec::new();
        response
            .into_reader()
            .take(self.max_image_bytes + 1)
            .read_to_end(&mut image)
            .map_err(|err| CameraError::Transport(err.to_string()))?;
        if image.len() as u64 > self.max_image_bytes {
            return Err(CameraError::Transport(format!(
                "snapshot exceeds {} bytes",
                self.max_image_bytes
            )));
        }
        Ok(image)
    }
}

impl Camera for HttpCamera {
    fn snapshot(&mut self) -> Result<Vec<u8>, CameraError> {
        let challenge = match self.agent.get(&self.config.url).call() {
            Ok(response) => return self.read_image(response),
            Err(ureq::Error::Status(401, response)) => {
                let header = response
                    .header("WWW-Authenticate")
                    .ok_or_else(|| CameraError::Auth("401 without a challenge".to_string()))?;
                DigestChallenge::parse(header)?
            }
            Err(ureq::Error::Status(status, _)) => return Err(CameraError::Status(status)),
            Err(ureq::Error::Transport(err)) => return Err(CameraError::Transport(err.to_string())),
        };

        debug!("answering digest challenge from {}", self.config.url);
        let cnonce = format!("{:016x}", rand::random::<u64>());
        let authorization = challenge.authorization(
            "GET",
            request_uri(&self.config.url),
            &self.config.user,
            &self.config.password,
            &cnonce,
        );
        match self
            .agent
            .get(&self.config.url)
            .set("Authorization", &authorization)
            .call()
        {
            Ok(response) => self.read_image(response),
            Err(ureq::Error::Status(status, _)) => Err(CameraError::Status(status)),
            Err(ureq::Error::Transport(err)) => Err(CameraError::Transport(err.to_string())),
        }
    }
}
