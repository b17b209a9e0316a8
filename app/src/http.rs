use std::error::Error;
use std::io::Cursor;
use std::net::ToSocketAddrs;
use std::thread;
use std::time::Duration;

use json::object;
use log::{error, info, warn};
use tiny_http::{Header, Method, Response};

use crate::camera::{Camera, CameraError};
use crate::relay::Webhook;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerReply {
    Ok,
    CameraFailed,
    Exception,
}

impl TriggerReply {
    pub fn status_code(self) -> u16 {
        match self {
            TriggerReply::Ok => 200,
            TriggerReply::CameraFailed | TriggerReply::Exception => 500,
        }
    }

    pub fn body(self) -> String {
        let obj = match self {
            TriggerReply::Ok => object! { status: "ok" },
            TriggerReply::CameraFailed => object! { error: "Failed to fetch image" },
            TriggerReply::Exception => object! { error: "Exception during image fetch" },
        };
        json::stringify(obj)
    }
}

pub struct TriggerPipeline<C, W> {
    camera: C,
    webhook: W,
    caption: String,
    settle_delay: Duration,
}

impl<C: Camera, W: Webhook> TriggerPipeline<C, W> {
    pub fn new(camera: C, webhook: W, caption: String, settle_delay: Duration) -> Self {
        TriggerPipeline {
            camera,
            webhook,
            caption,
            settle_delay,
        }
    }

    pub fn run(&mut self, timestamp: &str) -> TriggerReply {
        info!("door trigger received");
        if !self.settle_delay.is_zero() {
            thread::sleep(self.settle_delay);
        }

        let image = match self.camera.snapshot() {
            Ok(image) => image,
            Err(CameraError::Status(status)) => {
                warn!("camera response: {}", status);
                return TriggerReply::CameraFailed;
            }
            Err(err) => {
                error!("snapshot failed: {}", err);
                return TriggerReply::Exception;
            }
        };

        let filename = format!("snapshot_{}.jpg", timestamp);
        match self.webhook.post_snapshot(&self.caption, &filename, &image) {
            Ok(()) => TriggerReply::Ok,
            Err(err) => {
                error!("relay failed: {}", err);
                TriggerReply::Exception
            }
        }
    }
}

pub fn snapshot_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

pub struct Server(tiny_http::Server);

impl Server {
    pub fn new<A>(addr: A) -> Result<Server, Box<dyn Error + Send + Sync + 'static>>
    where
        A: ToSocketAddrs,
    {
        tiny_http::Server::http(addr).map(Server)
    }

    pub fn handle_requests<C: Camera, W: Webhook>(&self, pipeline: &mut TriggerPipeline<C, W>) {
        for request in self.0.incoming_requests() {
            let response = match (request.method(), request.url()) {
                (Method::Post, "/door") => {
                    let reply = pipeline.run(&snapshot_timestamp());
                    json_response(reply.status_code(), reply.body())
                }
                (_, "/door") => Response::from_string("Method not allowed").with_status_code(405),
                _ => Response::from_string("Not found").with_status_code(404),
            };

            // Ignoring I/O errors that occur here so that we don't take down the process if there
            // is an issue sending the response.
            let _ = request.respond(response);
        }
    }

    pub fn shutdown(&self) {
        self.0.unblock();
    }
}

fn json_response(status: u16, body: String) -> Response<Cursor<Vec<u8>>> {
    let response = Response::from_string(body).with_status_code(status);
    match Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}
