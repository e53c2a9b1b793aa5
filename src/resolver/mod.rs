// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The stub resolver used for discovery, zone loading, and passthru.
//!
//! The [`Resolver`] trait is the seam between the parts of the server
//! that need to ask the outside world questions (delegation discovery,
//! CNAME resolution during zone loads, passthru) and the network; tests
//! substitute scripted implementations. [`SystemResolver`] is the real
//! thing: recursive lookups go to the system's configured nameservers,
//! while [`full_exchange`](Resolver::full_exchange) speaks directly to
//! a given server, as discovery requires.

use std::fmt;
use std::io;
use std::net::IpAddr;
use std::time::Duration;

mod exchange;
pub use exchange::SystemResolver;

use crate::message::{Message, Question};
use crate::name::Name;

////////////////////////////////////////////////////////////////////////
// THE RESOLVER TRAIT                                                 //
////////////////////////////////////////////////////////////////////////

/// The transport an exchange uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// Per-exchange knobs.
#[derive(Clone, Copy, Debug)]
pub struct ExchangeConfig {
    pub transport: Transport,
    pub udp_size: u16,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Udp,
            udp_size: crate::edns::DEFAULT_UDP_SIZE,
        }
    }
}

/// The lookup and exchange operations the rest of the server relies
/// on.
pub trait Resolver: Send + Sync {
    /// Looks up the NS set of `name` via the system resolver. Returns
    /// the name-server host names.
    fn lookup_ns(&self, name: &Name) -> Result<Vec<Name>, Error>;

    /// Looks up the addresses of `host` via the system resolver.
    fn lookup_ip(&self, host: &Name) -> Result<Vec<IpAddr>, Error>;

    /// Performs one UDP or TCP exchange of `query` with `server`.
    /// `server` may be a bare IP address (the `domain` service is
    /// assumed) or `host:port`. `log_name` identifies the server in log
    /// output.
    fn single_exchange(
        &self,
        config: &ExchangeConfig,
        query: &Message,
        server: &str,
        log_name: &str,
    ) -> Result<(Message, Duration), Error>;

    /// Builds a fresh non-recursive EDNS query for `question` and
    /// exchanges it with `server`, retrying within bounds and falling
    /// back to TCP if the response is truncated.
    fn full_exchange(
        &self,
        question: &Question,
        server: &str,
        log_name: &str,
    ) -> Result<(Message, Duration), Error>;
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error encountered during a lookup or exchange.
///
/// The operating system's long-winded failure messages for the common
/// cases are shortened to keep log lines readable; the original error
/// is preserved as the wrapped cause.
#[derive(Debug)]
pub enum Error {
    Timeout(io::Error),
    ConnectionRefused(io::Error),
    Io(io::Error),
    Malformed(crate::message::reader::Error),
    BadServer(String),
    NoAnswer(Name),
}

impl Error {
    /// Classifies an I/O error, shortening the well-known cases.
    pub fn from_io(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout(error),
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused(error),
            _ => Self::Io(error),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Timeout(_) => f.write_str("Timeout"),
            Self::ConnectionRefused(_) => f.write_str("Connection refused"),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Malformed(e) => write!(f, "malformed reply: {}", e),
            Self::BadServer(server) => write!(f, "invalid server address '{}'", server),
            Self::NoAnswer(name) => write!(f, "no usable answer for {}", name),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Timeout(e) | Self::ConnectionRefused(e) | Self::Io(e) => Some(e),
            Self::Malformed(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_io_errors_are_shortened() {
        let timeout = Error::from_io(io::Error::new(io::ErrorKind::TimedOut, "very long message"));
        assert_eq!(timeout.to_string(), "Timeout");

        let refused = Error::from_io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused by peer at great length",
        ));
        assert_eq!(refused.to_string(), "Connection refused");

        // The original error survives as the cause.
        use std::error::Error as _;
        assert!(timeout.source().is_some());
    }
}
