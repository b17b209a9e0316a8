use std::net::{IpAddr, ToSocketAddrs, UdpSocket};

use log::info;

use crate::error::{Error, Result};

pub trait NetworkLink {
    fn connect(&mut self) -> Result<IpAddr>;

    fn disconnect(&mut self);
}

pub struct HostNetwork {
    remote: (String, u16),
    address: Option<IpAddr>,
}

impl HostNetwork {
    pub fn new(host: &str, port: u16) -> Self {
        HostNetwork {
            remote: (host.to_string(), port),
            address: None,
        }
    }
}

impl NetworkLink for HostNetwork {
    fn connect(&mut self) -> Result<IpAddr> {
        let (host, port) = (&self.remote.0, self.remote.1);
        let remote = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|err| Error::Network(format!("unable to resolve {}: {}", host, err)))?
            .next()
            .ok_or_else(|| Error::Network(format!("{} has no addresses", host)))?;

        // Connecting a UDP socket picks a route and source address without sending anything.
        let bind = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind)?;
        socket
            .connect(remote)
            .map_err(|err| Error::Network(format!("no route to {}: {}", remote, err)))?;
        let address = socket.local_addr()?.ip();

        info!("network up, local address {}", address);
        self.address = Some(address);
        Ok(address)
    }

    fn disconnect(&mut self) {
        if let Some(address) = self.address.take() {
            info!("network link {} released", address);
        }
    }
}
