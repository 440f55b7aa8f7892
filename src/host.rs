use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Error;

const DEFAULT_ADDRESS: &str = "localhost";

/// The address/port pair a node is reachable on.
///
/// The address may be a DNS name or an IP literal; resolution happens when a
/// connection is dialled. A host is the stable identity of a node: its ring
/// key is derived from it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    address: String,
    port: u16,
}

impl Host {
    pub fn new(address: impl Into<String>, port: u16) -> Host {
        warn_if_privileged(port);
        Host {
            address: address.into(),
            port,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The same address with another port. Used when binding to port 0 and
    /// the kernel picks the real one.
    pub(crate) fn with_port(&self, port: u16) -> Host {
        Host {
            address: self.address.clone(),
            port,
        }
    }
}

fn warn_if_privileged(port: u16) {
    if (1..1024).contains(&port) {
        warn!("port {port} is in the privileged range; binding it requires root");
    }
}

impl FromStr for Host {
    type Err = Error;

    /// Parse `<address>:<port>`, or a bare `<port>` which binds on
    /// localhost.
    fn from_str(input: &str) -> Result<Host, Error> {
        let invalid = || Error::InvalidHost(input.to_string());
        let parts: Vec<&str> = input.split(':').collect();

        let (address, port) = match parts.as_slice() {
            [port] => (DEFAULT_ADDRESS, port),
            [address, port] if !address.is_empty() => (*address, port),
            _ => return Err(invalid()),
        };

        let port: u16 = port.parse().map_err(|_| invalid())?;
        Ok(Host::new(address, port))
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}
