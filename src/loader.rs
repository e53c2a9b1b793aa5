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

//! Loading of PTR-deduce zones.
//!
//! A "PTR-deduce" zone is an ordinary forward or reverse zone, fetched
//! from a `file://`, `http(s)://`, or `axfr://` URL, whose address
//! records are turned into the PTRs this server answers with in
//! preference to synthesis. Loads are all-or-nothing: a fresh database
//! is built from every configured URL, and only if every load succeeds
//! is it published; otherwise the previous database stays in service.
//!
//! A single watcher thread owns the zone list after start-up and
//! reloads on file modification, on SOA refresh expiry, or on demand
//! (SIGHUP).

use std::fmt;
use std::fs;
use std::io::{Read, Write};
use std::net::{IpAddr, TcpStream};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use log::{debug, info, warn};
use rand::Rng;
use url::Url;

use crate::arpa;
use crate::authority::AuthorityTable;
use crate::class::Class;
use crate::db::{Database, DbHandle};
use crate::message::{Message, Question};
use crate::name::Name;
use crate::rr::{Rdata, Rr, Soa, Ttl, Type};
use crate::resolver::Resolver;
use crate::zone_file;

/// How often the watcher polls for reload conditions.
pub const RELOAD_INTERVAL: Duration = Duration::from_secs(600);

/// Socket timeout for HTTP and AXFR fetches.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

////////////////////////////////////////////////////////////////////////
// PTR ZONES                                                          //
////////////////////////////////////////////////////////////////////////

/// How a zone's content is fetched.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scheme {
    File,
    Http,
    Axfr,
}

/// One configured PTR-deduce zone and its load/reload bookkeeping.
#[derive(Debug)]
pub struct PtrZone {
    url: String,
    scheme: Scheme,
    host: String,
    port: Option<u16>,
    path: String,
    /// For AXFR, the zone to transfer (from the URL path).
    domain: Option<Name>,
    tls: bool,

    /// The first SOA seen during the last load; its refresh interval
    /// schedules network re-fetches.
    soa: Option<Soa>,
    /// Modification time of a file source at its last load.
    dtm: Option<SystemTime>,
    load_time: Option<Instant>,

    records: usize,
    added: usize,
    oob: usize,
}

impl PtrZone {
    /// Parses and validates a PTR-deduce URL. Only the `file`,
    /// `http(s)`, and `axfr` schemes are accepted.
    pub fn from_url(raw: &str) -> Result<Self, Error> {
        // "file:///./x" is the sentinel for a relative path; there is
        // otherwise no way to express one in a file URL. It has to be
        // caught before URL parsing, which would normalize the "."
        // segment away.
        if let Some(relative) = raw.strip_prefix("file:///./") {
            if relative.is_empty() {
                return Err(Error::BadUrl(raw.to_owned(), "a file URL must contain a path"));
            }
            return Ok(Self {
                url: raw.to_owned(),
                scheme: Scheme::File,
                host: String::new(),
                port: None,
                path: format!("./{}", relative),
                domain: None,
                tls: false,
                soa: None,
                dtm: None,
                load_time: None,
                records: 0,
                added: 0,
                oob: 0,
            });
        }

        let url = Url::parse(raw).map_err(Error::Url)?;
        let host = url.host_str().unwrap_or("").to_owned();
        let path = url.path().to_owned();

        let (scheme, tls) = match url.scheme() {
            "file" => {
                if path.is_empty() {
                    return Err(Error::BadUrl(raw.to_owned(), "a file URL must contain a path"));
                }
                if !host.is_empty() || url.port().is_some() {
                    return Err(Error::BadUrl(
                        raw.to_owned(),
                        "a file URL cannot contain a host or port",
                    ));
                }
                (Scheme::File, false)
            }
            scheme @ ("http" | "https") => {
                if host.is_empty() {
                    return Err(Error::BadUrl(raw.to_owned(), "an http URL must contain a host"));
                }
                if path.len() <= 1 {
                    return Err(Error::BadUrl(
                        raw.to_owned(),
                        "an http URL path must contain a zone",
                    ));
                }
                (Scheme::Http, scheme == "https")
            }
            "axfr" => {
                if host.is_empty() {
                    return Err(Error::BadUrl(
                        raw.to_owned(),
                        "an axfr URL host must contain a name server",
                    ));
                }
                let zone = path.trim_start_matches('/');
                if zone.is_empty() {
                    return Err(Error::BadUrl(
                        raw.to_owned(),
                        "an axfr URL path must contain a zone name",
                    ));
                }
                let domain: Name = zone
                    .parse()
                    .map_err(|_| Error::BadUrl(raw.to_owned(), "axfr zone is not a valid name"))?;
                return Ok(Self {
                    url: raw.to_owned(),
                    scheme: Scheme::Axfr,
                    host,
                    port: url.port(),
                    path,
                    domain: Some(domain),
                    tls: false,
                    soa: None,
                    dtm: None,
                    load_time: None,
                    records: 0,
                    added: 0,
                    oob: 0,
                });
            }
            // We could let unknown schemes through and see what comes
            // of them, but that risks passing one that deserved extra
            // checks, so disallow anything unrecognized.
            other => return Err(Error::BadScheme(other.to_owned())),
        };

        Ok(Self {
            url: raw.to_owned(),
            scheme,
            host,
            port: url.port(),
            path,
            domain: None,
            tls,
            soa: None,
            dtm: None,
            load_time: None,
            records: 0,
            added: 0,
            oob: 0,
        })
    }

    /// The URL this zone was configured with.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Loads this zone into `db`.
    fn load(&mut self, db: &mut Database, context: &LoadContext) -> Result<(), Error> {
        self.soa = None;
        self.records = 0;
        self.added = 0;
        self.oob = 0;
        self.load_time = Some(Instant::now());

        match self.scheme {
            Scheme::File => self.load_from_file(db, context),
            Scheme::Http => self.load_from_http(db, context),
            Scheme::Axfr => self.load_from_axfr(db, context),
        }
    }

    fn load_from_file(&mut self, db: &mut Database, context: &LoadContext) -> Result<(), Error> {
        let text = fs::read_to_string(&self.path).map_err(|e| Error::Io(self.url.clone(), e))?;
        self.dtm = fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();
        self.parse_into(db, context, &text, true)
    }

    fn load_from_http(&mut self, db: &mut Database, context: &LoadContext) -> Result<(), Error> {
        let text = http_get(&self.host, self.port, &self.path, self.tls, &self.url)?;
        self.dtm = Some(SystemTime::now());
        self.parse_into(db, context, &text, false)
    }

    fn parse_into(
        &mut self,
        db: &mut Database,
        context: &LoadContext,
        text: &str,
        include_allowed: bool,
    ) -> Result<(), Error> {
        let mut records = Vec::new();
        zone_file::parse(
            text,
            &self.path,
            None,
            context.default_ttl,
            include_allowed,
            &mut |rr| records.push(rr),
        )
        .map_err(|e| Error::Parse(self.url.clone(), e))?;
        for rr in &records {
            self.add_rr(db, context, rr);
        }
        Ok(())
    }

    fn load_from_axfr(&mut self, db: &mut Database, context: &LoadContext) -> Result<(), Error> {
        let domain = self.domain.clone().expect("axfr zones carry a domain");
        let records = axfr_fetch(&self.host, self.port, &domain, &self.url)?;
        self.dtm = Some(SystemTime::now());
        for rr in &records {
            self.add_rr(db, context, rr);
        }
        Ok(())
    }

    /// Routes one parsed record into the candidate database.
    fn add_rr(&mut self, db: &mut Database, context: &LoadContext, rr: &Rr) {
        self.records += 1;
        match &rr.rdata {
            Rdata::Soa(soa) => {
                // Only the zone's own SOA (the first record) schedules
                // refresh.
                if self.records == 1 {
                    self.soa = Some(soa.clone());
                }
            }
            Rdata::A(_) | Rdata::Aaaa(_) | Rdata::Ptr(_) => self.deduce_and_add(db, context, rr),
            Rdata::Cname(target) => self.resolve_and_add_cname(db, context, rr, target),
            _ => (),
        }
    }

    /// Deduces the PTR for an address or PTR record and adds it, if it
    /// lands inside one of our zones of authority.
    fn deduce_and_add(&mut self, db: &mut Database, context: &LoadContext, rr: &Rr) {
        let ptr = match deduce_ptr(rr) {
            Some(ptr) => ptr,
            None => return,
        };
        if context.authorities.find_in_domain(&ptr.owner).is_none() {
            self.oob += 1;
            return;
        }
        if db.add_rr(&ptr) {
            self.added += 1;
        }
    }

    /// Resolves a CNAME's target and treats each resolved address as if
    /// the owner name had been an A/AAAA. A dud CNAME is not our
    /// problem; it is simply skipped.
    fn resolve_and_add_cname(
        &mut self,
        db: &mut Database,
        context: &LoadContext,
        rr: &Rr,
        target: &Name,
    ) {
        let addrs = match context.resolver.lookup_ip(target) {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!("CNAME target {} did not resolve: {}", target, e);
                return;
            }
        };
        for ip in addrs {
            let address_rr = Rr::address(rr.owner.clone(), rr.ttl, ip);
            self.deduce_and_add(db, context, &address_rr);
        }
    }

    /// Returns why this zone wants a reload right now, if it does.
    fn reload_trigger(&self) -> Option<&str> {
        match self.scheme {
            Scheme::File => {
                let modified = fs::metadata(&self.path).and_then(|m| m.modified()).ok()?;
                match self.dtm {
                    Some(dtm) if modified > dtm => Some(self.url.as_str()),
                    _ => None,
                }
            }
            Scheme::Http | Scheme::Axfr => {
                let refresh = Duration::from_secs(
                    self.soa.as_ref().map(|soa| soa.refresh).unwrap_or(0) as u64,
                );
                match self.load_time {
                    Some(loaded) if loaded.elapsed() > refresh => Some(self.url.as_str()),
                    _ => None,
                }
            }
        }
    }
}

/// Deduces the PTR form of an address record, or validates that an
/// existing PTR sits under a reverse suffix it can be inverted from.
fn deduce_ptr(rr: &Rr) -> Option<Rr> {
    match &rr.rdata {
        Rdata::A(addr) => Some(Rr::ptr(
            arpa::ip_to_reverse_qname(IpAddr::V4(*addr)),
            rr.ttl,
            rr.owner.clone(),
        )),
        Rdata::Aaaa(addr) => Some(Rr::ptr(
            arpa::ip_to_reverse_qname(IpAddr::V6(*addr)),
            rr.ttl,
            rr.owner.clone(),
        )),
        Rdata::Ptr(_) => {
            // Keep it only if the owner is a well-formed, untruncated
            // reverse name.
            let inversion = if let Some(prefix) = rr.owner.strip_suffix(arpa::v4_suffix()) {
                arpa::invert_v4(prefix).ok()
            } else if let Some(prefix) = rr.owner.strip_suffix(arpa::v6_suffix()) {
                arpa::invert_v6(prefix).ok()
            } else {
                None
            };
            match inversion {
                Some(inversion) if !inversion.truncated => Some(rr.clone()),
                _ => None,
            }
        }
        _ => None,
    }
}

////////////////////////////////////////////////////////////////////////
// LOADING                                                            //
////////////////////////////////////////////////////////////////////////

/// Everything a load needs besides the zones themselves.
pub struct LoadContext {
    pub resolver: Arc<dyn Resolver>,
    pub db: Arc<DbHandle>,
    pub authorities: Arc<AuthorityTable>,
    pub default_ttl: Ttl,
    pub chaos: Option<ChaosText>,
}

/// The texts served for the five CHAOS TXT probes.
#[derive(Clone, Debug)]
pub struct ChaosText {
    /// `version.bind.`
    pub program: String,
    /// `version.server.`
    pub version: String,
    /// `authors.bind.`
    pub authors: String,
    /// `hostname.bind.` and `id.server.`
    pub nsid: String,
}

/// Builds a fresh database from every zone and publishes it. If any
/// zone fails to load, the fresh database is discarded and the current
/// one stays in service. Returns whether the load succeeded.
pub fn load_all(zones: &mut [PtrZone], context: &LoadContext, trigger: &str) -> bool {
    let mut new_db = Database::new();
    let mut errors = 0;

    for zone in zones.iter_mut() {
        if let Err(e) = zone.load(&mut new_db, context) {
            errors += 1;
            warn!("PTR zone load of {} failed: {}", zone.url, e);
            continue;
        }
        info!(
            "Loaded: {} records={} deduced PTRs={} OOB={} serial={} refresh={}",
            zone.url,
            zone.records,
            zone.added,
            zone.oob,
            zone.soa.as_ref().map(|soa| soa.serial).unwrap_or(0),
            zone.soa.as_ref().map(|soa| soa.refresh).unwrap_or(0),
        );
    }

    if errors > 0 {
        warn!("load_all: {} zone(s) failed - load abandoned", errors);
        return false;
    }

    ingest_authorities(&mut new_db, context);
    if let Some(chaos) = &context.chaos {
        ingest_chaos(&mut new_db, chaos, context.default_ttl);
    }

    info!(
        "load_all: total records {}. Trigger: {}",
        new_db.count(),
        trigger
    );
    context.db.replace(new_db);
    true
}

/// Adds each authority's apex SOA (so a non-matching qtype at the apex
/// draws NoError rather than NXDomain) and every in-bailiwick address
/// record (so glue names are forward-resolvable).
fn ingest_authorities(db: &mut Database, context: &LoadContext) {
    for auth in context.authorities.iter() {
        db.add_rr(&auth.soa);
        for rr in auth.a.iter().chain(auth.aaaa.iter()) {
            if context.authorities.find_in_domain(&rr.owner).is_some() {
                db.add_rr(rr);
            }
        }
    }
}

/// Adds the five CHAOS TXT rows. They are ordinary database entries in
/// class CH, so the query pipeline needs no special casing beyond its
/// class check.
fn ingest_chaos(db: &mut Database, chaos: &ChaosText, ttl: Ttl) {
    let rows: [(&str, &str); 5] = [
        ("version.bind.", &chaos.program),
        ("version.server.", &chaos.version),
        ("authors.bind.", &chaos.authors),
        ("hostname.bind.", &chaos.nsid),
        ("id.server.", &chaos.nsid),
    ];
    for (owner, text) in rows {
        let owner: Name = owner.parse().expect("fixed CHAOS names are valid");
        db.add_rr(&Rr::txt(owner, Class::CH, ttl, text));
    }
}

////////////////////////////////////////////////////////////////////////
// THE RELOAD WATCHER                                                 //
////////////////////////////////////////////////////////////////////////

/// A control message for the watcher.
pub enum WatchSignal {
    /// Reload everything now (SIGHUP).
    Force,
    /// Stop watching.
    Shutdown,
}

/// Periodically checks whether any zone needs reloading, and reloads
/// everything when one does. Because cross-platform file-change
/// notification is not worth its complexity here, the watcher simply
/// polls at a low rate. The caller hands over ownership of the zone
/// list; this thread is the only writer of databases after start-up.
pub fn watch_for_reloads(
    mut zones: Vec<PtrZone>,
    context: LoadContext,
    signals: Receiver<WatchSignal>,
    interval: Duration,
) {
    loop {
        match signals.recv_timeout(interval) {
            Ok(WatchSignal::Force) => {
                load_all(&mut zones, &context, "force reload");
            }
            Ok(WatchSignal::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {
                let trigger = zones
                    .iter()
                    .find_map(|zone| zone.reload_trigger().map(str::to_owned));
                if let Some(trigger) = trigger {
                    debug!("{} triggers reload", trigger);
                    load_all(&mut zones, &context, &trigger);
                }
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// FETCHING                                                           //
////////////////////////////////////////////////////////////////////////

/// Fetches a zone over HTTP or HTTPS with a minimal HTTP/1.0 GET; the
/// 1.0 form keeps the reply unchunked and delimited by connection
/// close.
fn http_get(
    host: &str,
    port: Option<u16>,
    path: &str,
    tls: bool,
    url: &str,
) -> Result<String, Error> {
    let port = port.unwrap_or(if tls { 443 } else { 80 });
    let stream = TcpStream::connect((host, port)).map_err(|e| Error::Io(url.to_owned(), e))?;
    stream
        .set_read_timeout(Some(FETCH_TIMEOUT))
        .map_err(|e| Error::Io(url.to_owned(), e))?;
    stream
        .set_write_timeout(Some(FETCH_TIMEOUT))
        .map_err(|e| Error::Io(url.to_owned(), e))?;

    let request = format!(
        "GET {} HTTP/1.0\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, host
    );
    let mut response = Vec::new();
    if tls {
        let connector = native_tls::TlsConnector::new()
            .map_err(|e| Error::Tls(url.to_owned(), e.to_string()))?;
        let mut stream = connector
            .connect(host, stream)
            .map_err(|e| Error::Tls(url.to_owned(), e.to_string()))?;
        stream
            .write_all(request.as_bytes())
            .map_err(|e| Error::Io(url.to_owned(), e))?;
        stream
            .read_to_end(&mut response)
            .map_err(|e| Error::Io(url.to_owned(), e))?;
    } else {
        let mut stream = stream;
        stream
            .write_all(request.as_bytes())
            .map_err(|e| Error::Io(url.to_owned(), e))?;
        stream
            .read_to_end(&mut response)
            .map_err(|e| Error::Io(url.to_owned(), e))?;
    }

    let response =
        String::from_utf8(response).map_err(|_| Error::Http(url.to_owned(), "non-UTF-8 body".to_owned()))?;
    let (head, body) = response
        .split_once("\r\n\r\n")
        .ok_or_else(|| Error::Http(url.to_owned(), "malformed response".to_owned()))?;
    let status_line = head.lines().next().unwrap_or("");
    let status = status_line.split_whitespace().nth(1).unwrap_or("");
    if status != "200" {
        return Err(Error::Http(url.to_owned(), status_line.to_owned()));
    }
    Ok(body.to_owned())
}

/// Transfers `domain` from the name server at `host`, returning the
/// zone's records without the trailing repeat of the SOA.
fn axfr_fetch(host: &str, port: Option<u16>, domain: &Name, url: &str) -> Result<Vec<Rr>, Error> {
    let port = port.unwrap_or(53);
    let mut stream =
        TcpStream::connect((host, port)).map_err(|e| Error::Io(url.to_owned(), e))?;
    stream
        .set_read_timeout(Some(FETCH_TIMEOUT))
        .map_err(|e| Error::Io(url.to_owned(), e))?;
    stream
        .set_write_timeout(Some(FETCH_TIMEOUT))
        .map_err(|e| Error::Io(url.to_owned(), e))?;

    let mut query = Message::query(rand::thread_rng().gen());
    query.questions.push(Question {
        qname: domain.clone(),
        qtype: Type::AXFR,
        qclass: Class::IN,
    });
    let wire = query.to_wire(0);
    let mut framed = Vec::with_capacity(2 + wire.len());
    framed.extend_from_slice(&(wire.len() as u16).to_be_bytes());
    framed.extend_from_slice(&wire);
    stream
        .write_all(&framed)
        .map_err(|e| Error::Io(url.to_owned(), e))?;

    // A transfer is one or more messages whose answers, concatenated,
    // start and end with the zone's SOA.
    let mut records = Vec::new();
    let mut soa_seen = false;
    loop {
        let mut length = [0u8; 2];
        stream
            .read_exact(&mut length)
            .map_err(|e| Error::Io(url.to_owned(), e))?;
        let mut body = vec![0u8; u16::from_be_bytes(length) as usize];
        stream
            .read_exact(&mut body)
            .map_err(|e| Error::Io(url.to_owned(), e))?;
        let message = Message::from_wire(&body)
            .map_err(|e| Error::Axfr(url.to_owned(), e.to_string()))?;
        if message.rcode != crate::message::Rcode::NoError {
            return Err(Error::Axfr(
                url.to_owned(),
                format!("transfer refused with {}", message.rcode),
            ));
        }

        for rr in message.answers {
            if rr.rr_type() == Type::SOA {
                if soa_seen {
                    return Ok(records); // The trailing SOA ends the transfer
                }
                soa_seen = true;
                records.push(rr);
            } else {
                records.push(rr);
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error encountered while configuring or loading a zone. Load-time
/// errors are local to a single URL; the surrounding reload is
/// abandoned as a whole.
#[derive(Debug)]
pub enum Error {
    Url(url::ParseError),
    BadScheme(String),
    BadUrl(String, &'static str),
    Io(String, std::io::Error),
    Http(String, String),
    Tls(String, String),
    Axfr(String, String),
    Parse(String, zone_file::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Url(e) => write!(f, "invalid URL: {}", e),
            Self::BadScheme(scheme) => write!(f, "{} is not a supported scheme", scheme),
            Self::BadUrl(url, what) => write!(f, "{}: {}", url, what),
            Self::Io(url, e) => write!(f, "{}: {}", url, e),
            Self::Http(url, status) => write!(f, "{}: HTTP failure: {}", url, status),
            Self::Tls(url, e) => write!(f, "{}: TLS failure: {}", url, e),
            Self::Axfr(url, e) => write!(f, "{}: transfer failed: {}", url, e),
            Self::Parse(url, e) => write!(f, "{}: {}", url, e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Url(e) => Some(e),
            Self::Io(_, e) => Some(e),
            Self::Parse(_, e) => Some(e),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::Authority;
    use crate::cidr::Cidr;
    use crate::message::Question;
    use crate::resolver::{Error as ResolverError, ExchangeConfig};
    use std::time::Duration as StdDuration;

    struct NoResolver;

    impl Resolver for NoResolver {
        fn lookup_ns(&self, name: &Name) -> Result<Vec<Name>, ResolverError> {
            Err(ResolverError::NoAnswer(name.clone()))
        }

        fn lookup_ip(&self, host: &Name) -> Result<Vec<IpAddr>, ResolverError> {
            if host.as_str() == "alias-target.example.net." {
                Ok(vec!["192.0.2.77".parse().unwrap()])
            } else {
                Err(ResolverError::NoAnswer(host.clone()))
            }
        }

        fn single_exchange(
            &self,
            _: &ExchangeConfig,
            _: &Message,
            _: &str,
            _: &str,
        ) -> Result<(Message, StdDuration), ResolverError> {
            Err(ResolverError::NoAnswer(Name::root()))
        }

        fn full_exchange(
            &self,
            question: &Question,
            _: &str,
            _: &str,
        ) -> Result<(Message, StdDuration), ResolverError> {
            Err(ResolverError::NoAnswer(question.qname.clone()))
        }
    }

    fn context() -> LoadContext {
        let mut authorities = AuthorityTable::new();
        let forward: Name = "example.net.".parse().unwrap();
        authorities.append(Authority::forward(
            forward.clone(),
            forward.to_string(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            &forward,
            1357997531,
            Ttl::from(600),
        ));
        authorities.append(Authority::reverse(
            "192.0.2.0/24".parse::<Cidr>().unwrap(),
            "192.0.2.0/24".to_owned(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            &forward,
            1357997531,
            Ttl::from(600),
        ));
        authorities.sort();
        LoadContext {
            resolver: Arc::new(NoResolver),
            db: Arc::new(DbHandle::new()),
            authorities: Arc::new(authorities),
            default_ttl: Ttl::from(600),
            chaos: Some(ChaosText {
                program: "backptr".to_owned(),
                version: "backptr 0.2.1".to_owned(),
                authors: "https://example.net/backptr".to_owned(),
                nsid: "ns1".to_owned(),
            }),
        }
    }

    #[test]
    fn url_parsing_accepts_the_three_schemes() {
        assert_eq!(
            PtrZone::from_url("file:///etc/zones/example.net.zone")
                .unwrap()
                .scheme,
            Scheme::File
        );
        assert_eq!(
            PtrZone::from_url("http://example.net/zone").unwrap().scheme,
            Scheme::Http
        );
        let axfr = PtrZone::from_url("axfr://ns1.example.net/example.net").unwrap();
        assert_eq!(axfr.scheme, Scheme::Axfr);
        assert_eq!(axfr.domain.as_ref().unwrap().as_str(), "example.net.");
        assert_eq!(axfr.port, None); // The domain service by default
    }

    #[test]
    fn url_parsing_rejects_bad_input() {
        assert!(matches!(
            PtrZone::from_url("ftp://example.net/zone"),
            Err(Error::BadScheme(_))
        ));
        assert!(matches!(
            PtrZone::from_url("http://example.net"),
            Err(Error::BadUrl(..))
        ));
        assert!(matches!(
            PtrZone::from_url("axfr://ns1.example.net/"),
            Err(Error::BadUrl(..))
        ));
    }

    #[test]
    fn file_url_relative_sentinel() {
        let zone = PtrZone::from_url("file:///./testdata/example.zone").unwrap();
        assert_eq!(zone.path, "./testdata/example.zone");
    }

    #[test]
    fn zone_text_is_deduced_into_ptrs() {
        let mut zone = PtrZone::from_url("file:///unused").unwrap();
        let context = context();
        let mut db = Database::new();
        let text = "$ORIGIN example.net.\n\
                    @ IN SOA ns1 hostmaster 1 7200 3600 86400 60\n\
                    host1 IN A 192.0.2.1\n\
                    host2 IN AAAA 2001:db8::2\n\
                    alias IN CNAME alias-target\n\
                    77.2.0.192.in-addr.arpa. IN PTR named.example.net.\n";
        zone.parse_into(&mut db, &context, text, false).unwrap();

        // host1's PTR is in the 192.0.2.0/24 authority.
        let (rrset, _) = db.lookup_rr(
            Class::IN,
            Type::PTR,
            &"1.2.0.192.in-addr.arpa.".parse().unwrap(),
        );
        assert_eq!(rrset.len(), 1);
        assert_eq!(
            rrset[0].rdata,
            Rdata::Ptr("host1.example.net.".parse().unwrap())
        );

        // host2's PTR is out of bailiwick (no ip6 authority) and was
        // dropped.
        let (rrset, nx) = db.lookup_rr(
            Class::IN,
            Type::PTR,
            &arpa::ip_to_reverse_qname("2001:db8::2".parse().unwrap()),
        );
        assert!(rrset.is_empty() && nx);
        assert_eq!(zone.oob, 1);

        // The CNAME resolved to 192.0.2.77, joining the existing PTR
        // for that address as an RRset of two.
        let (rrset, _) = db.lookup_rr(
            Class::IN,
            Type::PTR,
            &"77.2.0.192.in-addr.arpa.".parse().unwrap(),
        );
        assert_eq!(rrset.len(), 2);

        // The SOA was captured for refresh scheduling.
        assert_eq!(zone.soa.as_ref().unwrap().refresh, 7200);
    }

    #[test]
    fn load_all_publishes_authority_and_chaos_rows() {
        let context = context();
        assert!(load_all(&mut [], &context, "initial load"));
        let db = context.db.current();

        // The apex SOA answers NoError at the apex.
        let (rrset, _) = db.lookup_rr(Class::IN, Type::SOA, &"example.net.".parse().unwrap());
        assert_eq!(rrset.len(), 1);

        // The CHAOS rows are present in class CH.
        let (rrset, _) = db.lookup_rr(Class::CH, Type::TXT, &"version.bind.".parse().unwrap());
        assert_eq!(rrset.len(), 1);
        let (rrset, _) = db.lookup_rr(Class::CH, Type::TXT, &"id.server.".parse().unwrap());
        assert_eq!(rrset.len(), 1);
    }

    #[test]
    fn failed_zone_retains_previous_database() {
        let context = context();
        assert!(load_all(&mut [], &context, "initial load"));
        let before = context.db.current().count();

        let mut zones = vec![PtrZone::from_url("file:///no/such/file.zone").unwrap()];
        assert!(!load_all(&mut zones, &context, "test"));
        assert_eq!(context.db.current().count(), before);
    }

    #[test]
    fn truncated_reverse_ptr_is_not_deduced() {
        let rr = Rr::ptr(
            "2.0.192.in-addr.arpa.".parse().unwrap(),
            Ttl::from(60),
            "short.example.net.".parse().unwrap(),
        );
        assert!(deduce_ptr(&rr).is_none());
    }
}
