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

//! The query-serving engine.
//!
//! The [`Server`] structure implements the message-processing logic,
//! abstracted from any underlying network I/O: the listener pool (see
//! [`listen`]) receives datagrams and streams and submits each message
//! through [`Server::handle_message`], which returns the response to
//! send, if any.
//!
//! Everything a request needs is captured up front: a snapshot of the
//! mutable state (PTR suffix, active probe, authority table) and a
//! pinned database instance, so concurrent discovery or reloads never
//! change what one request observes mid-flight.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

pub mod listen;
mod query;

use log::info;

use crate::authority::AuthorityTable;
use crate::db::DbHandle;
use crate::delegation::Probe;
use crate::edns::{self, Cookies, CookieSecrets, Opt};
use crate::message::{Message, Opcode, Rcode, HEADER_SIZE};
use crate::name::Name;
use crate::resolver::Resolver;
use crate::rr::Ttl;
use crate::stats::ServerStats;

use query::{Outcome, Request};

////////////////////////////////////////////////////////////////////////
// SERVER CONFIGURATION AND STATE                                     //
////////////////////////////////////////////////////////////////////////

/// The serving options, fixed at start-up (except for query logging,
/// which SIGUSR2 toggles at runtime).
pub struct Options {
    /// Fabricate answers for in-bailiwick names with no database entry.
    pub synthesize: bool,

    /// Answer the five CHAOS TXT probes.
    pub chaos: bool,

    /// NSID payload to return to requesters that ask; empty disables.
    pub nsid: Vec<u8>,

    /// TTL for synthesized records, and the floor for zero TTLs found
    /// in the database.
    pub default_ttl: Ttl,

    /// Cap on answer records per response; zero means unlimited.
    pub max_answers: usize,

    /// Upstream server to forward out-of-bailiwick queries to,
    /// verbatim.
    pub passthru: Option<String>,

    /// Emit one log line per query.
    pub log_queries: Arc<AtomicBool>,
}

/// The state that discovery and reload rewrite while queries are in
/// flight. Queries take a cheap copy-out under a shared lock; writers
/// swap in fresh values under the exclusive lock.
#[derive(Clone)]
pub struct Mutables {
    /// The suffix appended to synthesized PTR targets (the forward
    /// domain), once known.
    pub ptr_suffix: Option<Name>,

    /// The probe currently awaiting an answer, if discovery is running.
    pub probe: Option<Arc<Probe>>,

    /// The zones of authority, sorted most specific first.
    pub authorities: Arc<AuthorityTable>,
}

impl Default for Mutables {
    fn default() -> Self {
        Self {
            ptr_suffix: None,
            probe: None,
            authorities: Arc::new(AuthorityTable::new()),
        }
    }
}

/// Indicates the transport a message was received over.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// Network-related information about a received message.
#[derive(Clone, Copy, Debug)]
pub struct ReceivedInfo {
    pub source: IpAddr,
    pub transport: Transport,
}

/// What the caller of [`Server::handle_message`] should send back.
pub enum Response {
    /// A single response, serialized and ready to send.
    Single(Vec<u8>),

    /// No response is to be sent.
    None,
}

/// The authoritative server engine.
pub struct Server {
    options: Options,
    resolver: Arc<dyn Resolver>,
    db: Arc<DbHandle>,
    cookie_secrets: CookieSecrets,
    mutables: RwLock<Mutables>,
    stats: Mutex<ServerStats>,
}

impl Server {
    /// Creates a `Server`. All listeners created for it share the
    /// cookie secrets it was given.
    pub fn new(
        options: Options,
        resolver: Arc<dyn Resolver>,
        db: Arc<DbHandle>,
        cookie_secrets: CookieSecrets,
    ) -> Self {
        Self {
            options,
            resolver,
            db,
            cookie_secrets,
            mutables: RwLock::new(Mutables::default()),
            stats: Mutex::new(ServerStats::default()),
        }
    }

    /// Swaps in new mutable state. This is the only way the mutables
    /// are ever written.
    pub fn set_mutables(
        &self,
        ptr_suffix: Option<Name>,
        probe: Option<Arc<Probe>>,
        authorities: Arc<AuthorityTable>,
    ) {
        let mut mutables = self.mutables.write().unwrap();
        *mutables = Mutables {
            ptr_suffix,
            probe,
            authorities,
        };
    }

    /// Takes a copy of the current mutable state.
    pub fn mutables(&self) -> Mutables {
        self.mutables.read().unwrap().clone()
    }

    /// Merges a request's stats delta into the shared totals.
    fn add_stats(&self, delta: &ServerStats) {
        self.stats.lock().unwrap().add(delta);
    }

    /// Returns the accumulated stats, optionally resetting them.
    pub fn snapshot_stats(&self, reset: bool) -> ServerStats {
        let mut stats = self.stats.lock().unwrap();
        let snapshot = *stats;
        if reset {
            *stats = ServerStats::default();
        }
        snapshot
    }

    /// Records a transport-level write failure against the totals.
    pub fn note_write_error(&self) {
        self.stats.lock().unwrap().gen.write_errors += 1;
    }

    ////////////////////////////////////////////////////////////////////
    // MESSAGE ENTRY POINT                                            //
    ////////////////////////////////////////////////////////////////////

    /// Handles one received DNS message, returning the response to
    /// send (if any).
    pub fn handle_message(&self, wire: &[u8], info: ReceivedInfo) -> Response {
        // The accept filter works on the raw header, before any
        // parsing: responses are silently ignored; unexpected opcodes
        // and implausible section counts are rejected cheaply. Unlike a
        // generic filter, QDCOUNT = 0 is allowed through so that
        // cookie-only queries (RFC 7873 § 5.4) reach the pipeline.
        if wire.len() < HEADER_SIZE {
            return Response::None;
        }
        if wire[2] & 0x80 != 0 {
            // QR: this is a response.
            self.stats.lock().unwrap().gen.accept_errors += 1;
            return Response::None;
        }
        let opcode = Opcode::try_from((wire[2] & 0x78) >> 3).expect("four bits");
        if opcode != Opcode::QUERY && opcode != Opcode::NOTIFY {
            self.stats.lock().unwrap().gen.accept_errors += 1;
            return reject(wire, opcode, Rcode::NotImp);
        }
        let ancount = u16::from_be_bytes([wire[6], wire[7]]);
        let nscount = u16::from_be_bytes([wire[8], wire[9]]);
        let arcount = u16::from_be_bytes([wire[10], wire[11]]);
        if ancount > 1 || nscount > 1 || arcount > 2 {
            self.stats.lock().unwrap().gen.accept_errors += 1;
            return reject(wire, opcode, Rcode::FormErr);
        }

        let query = match Message::from_wire(wire) {
            Ok(query) => query,
            Err(_) => {
                self.stats.lock().unwrap().gen.format_errors += 1;
                return reject(wire, opcode, Rcode::FormErr);
            }
        };

        // Assemble the request: parse the OPT and cookie material, pick
        // the response size limit, and snapshot the mutable state and
        // database.
        let opt = query.opt_rr().and_then(Opt::from_rr);
        let cookies = opt
            .as_ref()
            .map(Cookies::from_opt)
            .unwrap_or_default();
        let nsid_out = match &opt {
            Some(opt) if !self.options.nsid.is_empty() && opt.find(edns::OPTION_NSID).is_some() => {
                self.options.nsid.clone()
            }
            _ => Vec::new(),
        };
        let max_size = match info.transport {
            Transport::Tcp => 0,
            Transport::Udp => {
                // Default to 1232, honoring a smaller-but-reasonable
                // requester value.
                let mut max_size = edns::DEFAULT_UDP_SIZE;
                if let Some(opt) = &opt {
                    if opt.udp_size > 512 && opt.udp_size <= edns::DEFAULT_UDP_SIZE {
                        max_size = opt.udp_size;
                    }
                }
                max_size
            }
        };

        let mut request = Request {
            response: Message::response_to(&query),
            question: query.questions.first().cloned(),
            query: &query,
            src: info.source,
            transport: info.transport,
            opt,
            cookies,
            cookie_out: Vec::new(),
            nsid_out,
            max_size,
            db: self.db.current(),
            mutables: self.mutables(),
            auth: None,
            notes: Vec::new(),
            stats: ServerStats::default(),
            log_qname: None,
        };

        let outcome = self.serve_query(&mut request);
        let response = match outcome {
            Outcome::Respond => {
                let rcode = request.response.rcode;
                let wire = self.finalize(&mut request);
                self.log_query(&request, rcode);
                Response::Single(wire)
            }
            Outcome::Verbatim(reply) => {
                let limit = request.max_size as usize;
                self.log_query(&request, reply.rcode);
                Response::Single(reply.to_wire(limit))
            }
            Outcome::Drop => {
                self.log_query(&request, Rcode::ServFail);
                Response::None
            }
        };
        self.add_stats(&request.stats);
        response
    }

    /// Disposes of a completed request: attaches the response OPT (if
    /// there is anything to say), marks the answer authoritative, and
    /// serializes within the transport's size limit.
    fn finalize(&self, request: &mut Request) -> Vec<u8> {
        if let Some(opt) = edns::build_opt(request.max_size, &request.nsid_out, &request.cookie_out)
        {
            request.response.additionals.push(opt);
        }
        request.response.aa = true;
        request.response.to_wire(request.max_size as usize)
    }

    /// Emits the per-query log line, when enabled.
    fn log_query(&self, request: &Request, rcode: Rcode) {
        if !self.options.log_queries.load(Ordering::Relaxed) {
            return;
        }
        let question = request
            .question
            .as_ref()
            .map(|q| q.to_string())
            .unwrap_or_else(|| "<none>".to_owned());
        info!(
            "query: {:?}/{} {} rcode={} an={} notes=[{}]",
            request.transport,
            request.src,
            request.log_qname.as_deref().unwrap_or(&question),
            rcode,
            request.response.answers.len(),
            request.notes.join(","),
        );
    }

    /// The 32-bit wall-clock seconds used by cookie validation.
    fn unix_now() -> u32 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

/// Builds a minimal rejection: the header is echoed with QR set and the
/// given RCODE; no sections are copied.
fn reject(wire: &[u8], opcode: Opcode, rcode: Rcode) -> Response {
    let mut response = Message::query(u16::from_be_bytes([wire[0], wire[1]]));
    response.qr = true;
    response.opcode = opcode;
    response.rcode = rcode;
    Response::Single(response.to_wire(512))
}
