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

//! The [`SystemResolver`]: blocking UDP/TCP exchanges with timeouts.

use std::fs;
use std::io::{Read, Write};
use std::net::{
    IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket,
};
use std::time::{Duration, Instant};

use log::debug;
use rand::Rng;

use super::{Error, ExchangeConfig, Resolver, Transport};
use crate::class::Class;
use crate::edns;
use crate::message::{Message, Question, Rcode};
use crate::name::Name;
use crate::rr::{Rdata, Type};

/// The deadline applied to each single exchange and each
/// resolver-backed lookup.
const SINGLE_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(4);

/// The overall deadline for a full exchange, covering all retries and
/// any TCP fallback.
const FULL_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(12);

/// Total attempts made by a full exchange.
const QUERY_TRIES: usize = 2;

/// The `domain` service.
const DNS_PORT: u16 = 53;

////////////////////////////////////////////////////////////////////////
// SYSTEM RESOLVER                                                    //
////////////////////////////////////////////////////////////////////////

/// The production [`Resolver`], backed by blocking sockets.
///
/// Recursive lookups ([`lookup_ns`](Resolver::lookup_ns) and
/// [`lookup_ip`](Resolver::lookup_ip)) are sent to the nameservers
/// listed in `/etc/resolv.conf`, falling back to the loopback resolver
/// when none can be read.
pub struct SystemResolver {
    nameservers: Vec<SocketAddr>,
}

impl SystemResolver {
    /// Creates a resolver seeded from the system configuration.
    pub fn new() -> Self {
        let mut nameservers = read_resolv_conf("/etc/resolv.conf");
        if nameservers.is_empty() {
            nameservers.push(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DNS_PORT));
        }
        Self { nameservers }
    }

    /// Sends a recursive query for `qname`/`qtype` to each configured
    /// nameserver in turn, returning the first successful reply.
    fn recursive_query(&self, qname: &Name, qtype: Type) -> Result<Message, Error> {
        let question = Question {
            qname: qname.clone(),
            qtype,
            qclass: Class::IN,
        };
        let mut last_error = Error::NoAnswer(qname.clone());
        for server in &self.nameservers {
            let mut query = Message::query(rand::thread_rng().gen());
            query.rd = true;
            query.questions.push(question.clone());
            match self.single_exchange(
                &ExchangeConfig::default(),
                &query,
                &server.to_string(),
                "system resolver",
            ) {
                Ok((reply, _)) if reply.rcode == Rcode::NoError => return Ok(reply),
                Ok(_) => last_error = Error::NoAnswer(qname.clone()),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for SystemResolver {
    fn lookup_ns(&self, name: &Name) -> Result<Vec<Name>, Error> {
        let reply = self.recursive_query(name, Type::NS)?;
        let hosts: Vec<Name> = reply
            .answers
            .iter()
            .filter_map(|rr| match &rr.rdata {
                Rdata::Ns(nsdname) if rr.owner == *name => Some(nsdname.clone()),
                _ => None,
            })
            .collect();
        if hosts.is_empty() {
            Err(Error::NoAnswer(name.clone()))
        } else {
            Ok(hosts)
        }
    }

    fn lookup_ip(&self, host: &Name) -> Result<Vec<IpAddr>, Error> {
        let mut addrs = Vec::new();
        let mut last_error = None;
        for qtype in [Type::AAAA, Type::A] {
            match self.recursive_query(host, qtype) {
                Ok(reply) => addrs.extend(reply.answers.iter().filter_map(|rr| rr.ip())),
                Err(e) => last_error = Some(e),
            }
        }
        if addrs.is_empty() {
            Err(last_error.unwrap_or_else(|| Error::NoAnswer(host.clone())))
        } else {
            Ok(addrs)
        }
    }

    fn single_exchange(
        &self,
        config: &ExchangeConfig,
        query: &Message,
        server: &str,
        log_name: &str,
    ) -> Result<(Message, Duration), Error> {
        let addr = normalize_server(server)?;
        let started = Instant::now();
        debug!(
            "exchange: {:?} query {} to {} ({})",
            config.transport,
            query
                .first_question()
                .map(|q| q.to_string())
                .unwrap_or_else(|| "<no question>".to_owned()),
            addr,
            log_name,
        );

        let reply = match config.transport {
            Transport::Udp => udp_exchange(config, query, addr)?,
            Transport::Tcp => tcp_exchange(query, addr)?,
        };

        if reply.id != query.id {
            return Err(Error::NoAnswer(
                query
                    .first_question()
                    .map(|q| q.qname.clone())
                    .unwrap_or_else(Name::root),
            ));
        }

        let rtt = started.elapsed();
        debug!(
            "exchange: reply from {} ({}): {} answers, rcode {}",
            addr,
            log_name,
            reply.answers.len(),
            reply.rcode,
        );
        Ok((reply, rtt))
    }

    fn full_exchange(
        &self,
        question: &Question,
        server: &str,
        log_name: &str,
    ) -> Result<(Message, Duration), Error> {
        let mut query = Message::query(rand::thread_rng().gen());
        query.rd = false; // Just to make it clear this is purposefully false
        query.questions.push(question.clone());
        if let Some(opt) = edns::build_opt(edns::DEFAULT_UDP_SIZE, &[], &[]) {
            query.additionals.push(opt);
        }

        let deadline = Instant::now() + FULL_EXCHANGE_TIMEOUT;
        let mut config = ExchangeConfig::default();
        let mut last_error = Error::NoAnswer(question.qname.clone());

        for _ in 0..QUERY_TRIES {
            if Instant::now() >= deadline {
                break;
            }
            config.transport = Transport::Udp;
            let (reply, rtt) = match self.single_exchange(&config, &query, server, log_name) {
                Ok(ok) => ok,
                Err(e) => {
                    last_error = e;
                    continue;
                }
            };

            // If truncated, try again with TCP.
            if reply.rcode == Rcode::NoError && reply.tc {
                config.transport = Transport::Tcp;
                match self.single_exchange(&config, &query, server, log_name) {
                    Ok(ok) => return Ok(ok),
                    Err(e) => {
                        last_error = e;
                        continue;
                    }
                }
            }

            return Ok((reply, rtt));
        }

        Err(last_error)
    }
}

////////////////////////////////////////////////////////////////////////
// TRANSPORT PLUMBING                                                 //
////////////////////////////////////////////////////////////////////////

fn udp_exchange(
    config: &ExchangeConfig,
    query: &Message,
    addr: SocketAddr,
) -> Result<Message, Error> {
    let bind_addr: SocketAddr = match addr {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(bind_addr).map_err(Error::from_io)?;
    socket
        .set_read_timeout(Some(SINGLE_EXCHANGE_TIMEOUT))
        .map_err(Error::from_io)?;
    socket.connect(addr).map_err(Error::from_io)?;
    socket.send(&query.to_wire(0)).map_err(Error::from_io)?;

    let mut buf = vec![0u8; config.udp_size.max(512) as usize];
    let n = socket.recv(&mut buf).map_err(Error::from_io)?;
    Message::from_wire(&buf[..n]).map_err(Error::Malformed)
}

fn tcp_exchange(query: &Message, addr: SocketAddr) -> Result<Message, Error> {
    let mut stream =
        TcpStream::connect_timeout(&addr, SINGLE_EXCHANGE_TIMEOUT).map_err(Error::from_io)?;
    stream
        .set_read_timeout(Some(SINGLE_EXCHANGE_TIMEOUT))
        .map_err(Error::from_io)?;
    stream
        .set_write_timeout(Some(SINGLE_EXCHANGE_TIMEOUT))
        .map_err(Error::from_io)?;

    let wire = query.to_wire(0);
    let mut framed = Vec::with_capacity(2 + wire.len());
    framed.extend_from_slice(&(wire.len() as u16).to_be_bytes());
    framed.extend_from_slice(&wire);
    stream.write_all(&framed).map_err(Error::from_io)?;

    let mut length = [0u8; 2];
    stream.read_exact(&mut length).map_err(Error::from_io)?;
    let mut body = vec![0u8; u16::from_be_bytes(length) as usize];
    stream.read_exact(&mut body).map_err(Error::from_io)?;
    Message::from_wire(&body).map_err(Error::Malformed)
}

/// Normalizes a server string to a socket address. A bare IP address
/// (including an unbracketed IPv6 literal) gets the `domain` port;
/// otherwise `host:port` and `[v6]:port` forms are accepted, with host
/// names resolved by the operating system.
pub fn normalize_server(server: &str) -> Result<SocketAddr, Error> {
    if let Ok(ip) = server.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DNS_PORT));
    }
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let with_port = if server.contains(':') {
        server.to_owned()
    } else {
        format!("{}:{}", server, DNS_PORT)
    };
    with_port
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| Error::BadServer(server.to_owned()))
}

/// Extracts the `nameserver` entries from a resolv.conf-format file.
fn read_resolv_conf(path: &str) -> Vec<SocketAddr> {
    let mut nameservers = Vec::new();
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => return nameservers,
    };
    for line in contents.lines() {
        let line = line.split(|c| c == '#' || c == ';').next().unwrap_or("");
        let mut fields = line.split_whitespace();
        if fields.next() == Some("nameserver") {
            if let Some(Ok(ip)) = fields.next().map(|f| f.parse::<IpAddr>()) {
                nameservers.push(SocketAddr::new(ip, DNS_PORT));
            }
        }
    }
    nameservers
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_server_accepts_common_forms() {
        assert_eq!(
            normalize_server("192.0.2.1").unwrap(),
            "192.0.2.1:53".parse().unwrap()
        );
        assert_eq!(
            normalize_server("192.0.2.1:5353").unwrap(),
            "192.0.2.1:5353".parse().unwrap()
        );
        assert_eq!(
            normalize_server("2001:db8::1").unwrap(),
            "[2001:db8::1]:53".parse().unwrap()
        );
        assert_eq!(
            normalize_server("[2001:db8::1]:5353").unwrap(),
            "[2001:db8::1]:5353".parse().unwrap()
        );
        assert!(normalize_server("").is_err());
    }
}
