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

//! The per-query state machine.
//!
//! Every request runs the same fixed sequence: cookie handling, strict
//! validation, probe matching, CHAOS, authority resolution, the class
//! filter, apex specials, the database, and finally synthesis. Any step
//! may finish the request; what falls through the bottom is disposed of
//! as NoError-empty or NXDOMAIN with the zone's SOA in the authority
//! section.

use std::net::IpAddr;
use std::sync::Arc;

use log::{debug, info, warn};

use super::{Mutables, Server, Transport};
use crate::arpa;
use crate::authority::Authority;
use crate::class::Class;
use crate::db::Database;
use crate::edns::{self, Cookies, Opt};
use crate::message::{Message, Opcode, Question, Rcode};
use crate::rr::{Rr, Type};
use crate::stats::ServerStats;
use crate::util::to_hex;

////////////////////////////////////////////////////////////////////////
// REQUESTS                                                           //
////////////////////////////////////////////////////////////////////////

/// Everything belonging to one in-flight query. A request lives for
/// exactly one query and is owned by a single task.
pub(super) struct Request<'a> {
    pub query: &'a Message,
    pub response: Message,
    pub src: IpAddr,
    pub transport: Transport,

    pub question: Option<Question>,
    pub opt: Option<Opt>,
    pub cookies: Cookies,
    pub cookie_out: Vec<u8>,
    pub nsid_out: Vec<u8>,

    /// Response size cap for UDP; zero for TCP (no length-based
    /// truncation).
    pub max_size: u16,

    /// The database instance pinned for this request.
    pub db: Arc<Database>,

    /// The snapshot of the mutable server state.
    pub mutables: Mutables,

    /// The authority resolved for the query, once known.
    pub auth: Option<Arc<Authority>>,

    /// Short diagnostic notes for the per-query log line.
    pub notes: Vec<String>,

    /// This request's private stats delta.
    pub stats: ServerStats,

    /// A compact replacement for the qname in log output (the inverted
    /// address, where one exists).
    pub log_qname: Option<String>,
}

impl Request<'_> {
    pub(super) fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

/// How [`Server::serve_query`] finished.
pub(super) enum Outcome {
    /// `response` is complete; finalize and send it.
    Respond,

    /// A passthru reply to relay as-is, with no OPT or AA tampering.
    Verbatim(Message),

    /// Send nothing.
    Drop,
}

////////////////////////////////////////////////////////////////////////
// THE PIPELINE                                                       //
////////////////////////////////////////////////////////////////////////

impl Server {
    pub(super) fn serve_query(&self, req: &mut Request) -> Outcome {
        req.stats.gen.queries += 1;

        // Cookie handling. Whether cookies are valid or not, the
        // exchange itself mostly lays groundwork: we mint and return
        // server cookies and note mismatches, but no query is refused
        // for lacking one.
        if req.cookies.present {
            req.stats.gen.cookies += 1;
            if !req.cookies.well_formed {
                // The OPT itself is malformed.
                req.note("Malformed cookie");
                req.stats.gen.format_errors += 1;
                req.response.rcode = Rcode::FormErr;
                return Outcome::Respond;
            }
            let outcome = edns::validate_or_mint(
                self.cookie_secrets,
                &req.cookies.client,
                &req.cookies.server,
                req.src,
                Self::unix_now(),
            );
            if !outcome.valid && !req.cookies.server.is_empty() {
                req.note("Server cookie mismatch");
                req.stats.gen.wrong_cookies += 1;
            }
            req.cookie_out = outcome.out.to_vec();
            debug!(
                "cookies: qo={} C=({}) {} S=({}) {} out={}",
                req.query.questions.is_empty(),
                req.cookies.client.len(),
                to_hex(&req.cookies.client),
                req.cookies.server.len(),
                to_hex(&req.cookies.server),
                to_hex(&req.cookie_out),
            );

            // A client cookie with no server cookie and no question is
            // a cookie-only query (RFC 7873 § 5.4): answer NoError with
            // our minted cookie.
            if !req.cookies.client.is_empty()
                && req.cookies.server.is_empty()
                && req.query.questions.is_empty()
            {
                req.note("Cookie-only query");
                req.stats.gen.cookie_only += 1;
                return Outcome::Respond;
            }
        }

        // After the weird cookie-only request, only "normal" queries
        // are acceptable.
        if req.query.questions.len() != 1
            || !req.query.answers.is_empty()
            || !req.query.authorities.is_empty()
            || req.query.opcode != Opcode::QUERY
        {
            req.note("Malformed query");
            req.stats.gen.format_errors += 1;
            req.response.rcode = Rcode::FormErr;
            return Outcome::Respond;
        }
        let question = req.question.clone().expect("validated: exactly one question");
        let qname = question.qname.clone();

        // Probes can arrive multiple times and are answered positively
        // each time; whether a probe is oneshot is the sender's
        // business. A non-matching query continues down the pipeline:
        // a partially established instance may need to answer forward
        // queries while the reverse delegation is still being worked
        // out, which is expected when the forward and reverse are
        // served by the same instance.
        if let Some(probe) = req.mutables.probe.clone() {
            if probe.question_matches(&question) {
                info!("Valid probe received from {}", req.src);
                req.note("Probe match");
                req.stats.gen.probes += 1;
                req.response.answers.push(probe.answer().clone());
                return Outcome::Respond;
            }
            req.note("Non-probe query during probe");
        }

        // CHAOS helps check reachability through firewalls and port
        // forwarding. The probe texts are ordinary CH rows in the
        // database; with no CH SOA anywhere, a miss can only be
        // REFUSED.
        if self.options.chaos && question.qclass == Class::CH {
            let (rrset, _) = req.db.lookup_rr(Class::CH, question.qtype, &qname);
            if rrset.is_empty() {
                return self.refused(req);
            }
            req.stats.gen.chaos += 1;
            req.response.answers = rrset;
            return Outcome::Respond;
        }

        // Resolve the zone of authority. Anything outside every zone
        // is somebody else's problem: passthru if configured, REFUSED
        // otherwise.
        req.auth = req.mutables.authorities.find_in_domain(&qname).cloned();
        let auth = match req.auth.clone() {
            Some(auth) => auth,
            None => {
                if let Some(upstream) = self.options.passthru.clone() {
                    return self.passthru(req, &upstream);
                }
                req.note("out of bailiwick");
                req.stats.gen.no_authority += 1;
                return self.refused(req);
            }
        };

        // Zones of authority are only ever in class IN.
        if question.qclass != Class::IN {
            req.note(format!("Wrong class {}", question.qclass));
            req.stats.gen.wrong_class += 1;
            return self.refused(req);
        }

        // Apex-special queries.
        if qname == auth.domain {
            match question.qtype {
                Type::ANY => {
                    req.response.answers.push(auth.soa.clone());
                    req.stats.gen.apex_any += 1;
                    return Outcome::Respond;
                }
                Type::SOA => {
                    req.response.answers.push(auth.soa.clone());
                    req.response.authorities.extend(auth.ns.iter().cloned());
                    req.response
                        .additionals
                        .extend(auth.a.iter().chain(auth.aaaa.iter()).cloned());
                    req.stats.gen.apex_soa += 1;
                    return Outcome::Respond;
                }
                Type::NS => {
                    req.response.answers.extend(auth.ns.iter().cloned());
                    req.response
                        .additionals
                        .extend(auth.a.iter().chain(auth.aaaa.iter()).cloned());
                    req.stats.gen.apex_ns += 1;
                    return Outcome::Respond;
                }
                _ => (),
            }
        }

        // The database: deduced PTRs, authority glue, and apex SOAs.
        let (mut rrset, nx_domain) = req.db.lookup_rr(question.qclass, question.qtype, &qname);
        if !rrset.is_empty() {
            if self.options.max_answers > 0 && rrset.len() > self.options.max_answers {
                rrset.truncate(self.options.max_answers);
            }
            for rr in &mut rrset {
                if rr.ttl.is_zero() {
                    rr.ttl = self.options.default_ttl;
                }
            }
            req.stats.gen.db_hits += 1;
            if question.qtype == Type::PTR {
                let category = if qname.eq_or_subdomain_of(arpa::v4_suffix()) {
                    &mut req.stats.v4_ptr
                } else {
                    &mut req.stats.v6_ptr
                };
                category.queries += 1;
                category.good += 1;
                category.answers += rrset.len() as u64;
            }
            req.response.answers = rrset;
            return Outcome::Respond;
        }
        let mut pending = if nx_domain {
            Rcode::NxDomain
        } else {
            Rcode::NoError
        };

        // Synthesis, for strict children of the apex only.
        if self.options.synthesize && qname != auth.domain {
            if auth.forward {
                match self.synthesize_forward(req, &question, &auth) {
                    SynthResult::Answered => return Outcome::Respond,
                    SynthResult::Exists => pending = Rcode::NoError,
                    SynthResult::NotSynthesizable => (),
                    SynthResult::Formerr => unreachable!("forward synthesis cannot FormErr"),
                }
            } else {
                match self.synthesize_reverse(req, &question, &auth) {
                    SynthResult::Answered => return Outcome::Respond,
                    SynthResult::Exists => pending = Rcode::NoError,
                    SynthResult::NotSynthesizable => pending = Rcode::NxDomain,
                    SynthResult::Formerr => {
                        req.stats.gen.format_errors += 1;
                        req.response.rcode = Rcode::FormErr;
                        return Outcome::Respond;
                    }
                }
            }
        } else if !self.options.synthesize && !auth.forward && question.qtype == Type::PTR {
            req.note("No Synth");
            if qname.eq_or_subdomain_of(arpa::v4_suffix()) {
                req.stats.v4_ptr.no_synth += 1;
            } else {
                req.stats.v6_ptr.no_synth += 1;
            }
        }

        // In our authority, but nothing we recognize. Dispose of the
        // pending state with the SOA in the authority section, so
        // resolvers can cache the negative answer (RFC 2308).
        req.response.rcode = pending;
        req.response.authorities.push(auth.soa.clone());
        if pending == Rcode::NxDomain {
            req.stats.gen.nx_domain += 1;
        }
        Outcome::Respond
    }

    /// Forward synthesis: the qname should look like `192-0-2-1.<apex>`
    /// or `2001-db8--27.<apex>`. Unlike IPv6, the IPv4 text form has no
    /// compression of zero runs, which keeps classification simple:
    /// `192.0.0.1` maps from `192-0-0-1`, never `192--1`.
    fn synthesize_forward(
        &self,
        req: &mut Request,
        question: &Question,
        auth: &Authority,
    ) -> SynthResult {
        match question.qtype {
            Type::A => req.stats.v4_forward.queries += 1,
            Type::AAAA => req.stats.v6_forward.queries += 1,
            _ => (),
        }

        let hostname = question
            .qname
            .strip_suffix(&auth.domain)
            .expect("authority matched by suffix");
        // mDNS software tends to generate oddball in-bailiwick queries
        // like lb._dns-sd._udp.<apex>; anything with an interior dot is
        // not a synthetic name.
        if hostname.is_empty() || hostname.contains('.') {
            self.count_forward_malformed(req, question.qtype);
            return SynthResult::NotSynthesizable;
        }
        let ip = match arpa::hostname_to_ip(hostname) {
            Ok(ip) => ip,
            Err(_) => {
                self.count_forward_malformed(req, question.qtype);
                return SynthResult::NotSynthesizable;
            }
        };

        // Only addresses we actually serve the reverse for get a
        // forward answer.
        if req.mutables.authorities.find_ip_in_domain(ip).is_none() {
            req.note("synthetic address out of range");
            self.count_forward_malformed(req, question.qtype);
            return SynthResult::NotSynthesizable;
        }

        let family_matches = matches!(
            (question.qtype, ip),
            (Type::A, IpAddr::V4(_)) | (Type::AAAA, IpAddr::V6(_))
        );
        if !family_matches {
            // The name exists; the requested type just has no data.
            return SynthResult::Exists;
        }

        req.log_qname = Some(ip.to_string());
        req.note("Synth");
        let category = match ip {
            IpAddr::V4(_) => &mut req.stats.v4_forward,
            IpAddr::V6(_) => &mut req.stats.v6_forward,
        };
        category.good += 1;
        category.answers += 1;
        req.response.answers.push(Rr::address(
            question.qname.clone(),
            self.options.default_ttl,
            ip,
        ));
        SynthResult::Answered
    }

    fn count_forward_malformed(&self, req: &mut Request, qtype: Type) {
        match qtype {
            Type::A => req.stats.v4_forward.malformed += 1,
            Type::AAAA => req.stats.v6_forward.malformed += 1,
            _ => (),
        }
    }

    /// Reverse synthesis: invert the qname back into an address and
    /// fabricate the PTR.
    fn synthesize_reverse(
        &self,
        req: &mut Request,
        question: &Question,
        auth: &Authority,
    ) -> SynthResult {
        let qname = &question.qname;
        let (inversion, category) =
            if let Some(prefix) = qname.strip_suffix(arpa::v4_suffix()) {
                req.stats.v4_ptr.queries += 1;
                (arpa::invert_v4(prefix), &mut req.stats.v4_ptr)
            } else if let Some(prefix) = qname.strip_suffix(arpa::v6_suffix()) {
                req.stats.v6_ptr.queries += 1;
                (arpa::invert_v6(prefix), &mut req.stats.v6_ptr)
            } else {
                // A reverse authority always has one of the two
                // suffixes, so matching one without them should be
                // impossible. Refuse to guess.
                warn!(
                    "reverse authority {} matched qname {} with no reverse suffix",
                    auth.domain, qname
                );
                req.note("bad reverse suffix");
                return SynthResult::Formerr;
            };

        let inversion = match inversion {
            Ok(inversion) => inversion,
            Err(_) => {
                // Not malformed in the general sense, just in ours.
                category.malformed += 1;
                return SynthResult::NotSynthesizable;
            }
        };

        // A qname-minimizing resolver probing a partial name gets
        // NoError-empty: the node exists on the way down to real data.
        if inversion.truncated {
            return SynthResult::Exists;
        }
        if question.qtype != Type::PTR {
            return SynthResult::Exists;
        }

        let suffix = match req.mutables.ptr_suffix.clone() {
            Some(suffix) => suffix,
            None => {
                req.note("No PTR suffix");
                return SynthResult::NotSynthesizable;
            }
        };

        req.log_qname = Some(inversion.ip.to_string());
        req.note("Synth");
        let rr = arpa::synthesize_ptr(qname, &suffix, inversion.ip, self.options.default_ttl);
        let category = match inversion.ip {
            IpAddr::V4(_) => &mut req.stats.v4_ptr,
            IpAddr::V6(_) => &mut req.stats.v6_ptr,
        };
        category.good += 1;
        category.answers += 1;
        req.response.answers.push(rr);
        SynthResult::Answered
    }

    fn refused(&self, req: &mut Request) -> Outcome {
        req.stats.gen.refused += 1;
        req.response.rcode = Rcode::Refused;
        Outcome::Respond
    }

    /// Proxies the query through to the passthru server and relays the
    /// reply, if any, back to the querying client. No retries are made,
    /// nor any transition to TCP on truncation.
    fn passthru(&self, req: &mut Request, upstream: &str) -> Outcome {
        req.note("passthru");
        req.stats.gen.passthru_out += 1;
        match self.resolver.single_exchange(
            &Default::default(),
            req.query,
            upstream,
            "passthru",
        ) {
            Ok((reply, _)) => {
                req.stats.gen.passthru_in += 1;
                Outcome::Verbatim(reply)
            }
            Err(e) => {
                req.note(format!("passthru failed: {}", e));
                Outcome::Drop
            }
        }
    }
}

/// How a synthesis attempt ended.
enum SynthResult {
    /// An answer was appended to the response.
    Answered,

    /// The name exists but has no data of the requested type.
    Exists,

    /// The name does not encode an address we serve.
    NotSynthesizable,

    /// The unreachable missing-suffix path.
    Formerr,
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::super::{Options, ReceivedInfo, Response, Server};
    use super::*;
    use crate::authority::AuthorityTable;
    use crate::cidr::Cidr;
    use crate::db::{Database, DbHandle};
    use crate::edns::CookieSecrets;
    use crate::message::Question;
    use crate::name::Name;
    use crate::resolver::{Error as ResolverError, ExchangeConfig, Resolver};
    use crate::rr::{Rdata, Ttl};
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const SERIAL: u32 = 1357997531;
    const PEER: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(203, 0, 113, 9));

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    /// A resolver that replies to every exchange with one canned
    /// message (for passthru tests) and fails everything else.
    #[derive(Default)]
    struct CannedResolver {
        reply: Mutex<Option<Message>>,
    }

    impl Resolver for CannedResolver {
        fn lookup_ns(&self, n: &Name) -> Result<Vec<Name>, ResolverError> {
            Err(ResolverError::NoAnswer(n.clone()))
        }

        fn lookup_ip(&self, host: &Name) -> Result<Vec<IpAddr>, ResolverError> {
            Err(ResolverError::NoAnswer(host.clone()))
        }

        fn single_exchange(
            &self,
            _: &ExchangeConfig,
            query: &Message,
            _: &str,
            _: &str,
        ) -> Result<(Message, Duration), ResolverError> {
            match self.reply.lock().unwrap().clone() {
                Some(mut reply) => {
                    reply.id = query.id;
                    Ok((reply, Duration::from_millis(1)))
                }
                None => Err(ResolverError::NoAnswer(Name::root())),
            }
        }

        fn full_exchange(
            &self,
            question: &Question,
            _: &str,
            _: &str,
        ) -> Result<(Message, Duration), ResolverError> {
            Err(ResolverError::NoAnswer(question.qname.clone()))
        }
    }

    struct Setup {
        server: Server,
    }

    fn options() -> Options {
        Options {
            synthesize: true,
            chaos: true,
            nsid: Vec::new(),
            default_ttl: Ttl::from(600),
            max_answers: 0,
            passthru: None,
            log_queries: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Builds a server with the scenario authorities: forward
    /// `example.net.` (with the NS set and glue of scenario S1),
    /// reverse `fd2d:ffff::/32`, and reverse `192.0.2.0/24`.
    fn setup_with(options: Options, db: Database) -> Setup {
        setup_full(options, db, Arc::new(CannedResolver::default()))
    }

    fn setup_full(options: Options, db: Database, resolver: Arc<dyn Resolver>) -> Setup {
        let forward = name("example.net.");
        let ns = vec![
            Rr::ns(forward.clone(), Ttl::from(600), name("ns1.example.org.")),
            Rr::ns(
                forward.clone(),
                Ttl::from(600),
                name("ns2.backptr.example.net."),
            ),
        ];
        let glue_a = vec![Rr::a(
            name("ns2.backptr.example.net."),
            Ttl::from(600),
            "192.168.0.1".parse().unwrap(),
        )];
        let glue_aaaa = vec![Rr::aaaa(
            name("ns2.backptr.example.net."),
            Ttl::from(600),
            "2001:db8:7::1".parse().unwrap(),
        )];

        let mut authorities = AuthorityTable::new();
        authorities.append(Authority::forward(
            forward.clone(),
            forward.to_string(),
            ns.clone(),
            glue_a,
            glue_aaaa,
            &forward,
            SERIAL,
            Ttl::from(600),
        ));
        authorities.append(Authority::reverse(
            "fd2d:ffff::/32".parse::<Cidr>().unwrap(),
            "fd2d:ffff::/32".to_owned(),
            ns.clone(),
            Vec::new(),
            Vec::new(),
            &forward,
            SERIAL,
            Ttl::from(600),
        ));
        authorities.append(Authority::reverse(
            "192.0.2.0/24".parse::<Cidr>().unwrap(),
            "192.0.2.0/24".to_owned(),
            ns,
            Vec::new(),
            Vec::new(),
            &forward,
            SERIAL,
            Ttl::from(600),
        ));
        authorities.sort();

        let handle = Arc::new(DbHandle::new());
        handle.replace(db);
        let server = Server::new(
            options,
            resolver,
            handle,
            CookieSecrets::from_parts(0x1111, 0x2222),
        );
        server.set_mutables(Some(forward), None, Arc::new(authorities));
        Setup { server }
    }

    fn udp_query(qname: &str, qtype: Type, qclass: Class) -> Message {
        let mut query = Message::query(0x4242);
        query.questions.push(Question {
            qname: name(qname),
            qtype,
            qclass,
        });
        query
    }

    fn ask(setup: &Setup, query: &Message) -> Message {
        let wire = query.to_wire(0);
        match setup.server.handle_message(
            &wire,
            ReceivedInfo {
                source: PEER,
                transport: Transport::Udp,
            },
        ) {
            Response::Single(wire) => Message::from_wire(&wire).expect("well-formed response"),
            Response::None => panic!("expected a response"),
        }
    }

    #[test]
    fn apex_soa_answer_has_the_synthesized_shape() {
        // Scenario: a SOA query at the forward apex yields exactly the
        // fixed-shape SOA, the NS set in authority, and the glue in
        // additional.
        let setup = setup_with(options(), Database::new());
        let response = ask(&setup, &udp_query("example.net.", Type::SOA, Class::IN));

        assert_eq!(response.rcode, Rcode::NoError);
        assert!(response.aa);
        assert_eq!(response.answers.len(), 1);
        assert_eq!(
            response.answers[0].to_string(),
            "example.net. 600 IN SOA ns1.example.org. hostmaster.example.net. \
             1357997531 110040 110080 28 9030"
        );
        assert_eq!(response.authorities.len(), 2);
        assert!(response.additionals.len() >= 1);
    }

    #[test]
    fn apex_ns_and_any_answers() {
        let setup = setup_with(options(), Database::new());

        let response = ask(&setup, &udp_query("example.net.", Type::NS, Class::IN));
        assert_eq!(response.answers.len(), 2);
        assert!(response
            .answers
            .iter()
            .all(|rr| rr.rr_type() == Type::NS));

        let response = ask(&setup, &udp_query("example.net.", Type::ANY, Class::IN));
        assert_eq!(response.answers.len(), 1);
        assert_eq!(response.answers[0].rr_type(), Type::SOA);
    }

    #[test]
    fn reverse_synthesis_answers_a_ptr() {
        // Scenario: PTR for fd2d:ffff::1 under the /32 authority.
        let setup = setup_with(options(), Database::new());
        let qname = "1.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.f.f.f.f.d.2.d.f.ip6.arpa.";
        let response = ask(&setup, &udp_query(qname, Type::PTR, Class::IN));

        assert_eq!(response.rcode, Rcode::NoError);
        assert_eq!(response.answers.len(), 1);
        assert_eq!(
            response.answers[0].rdata,
            Rdata::Ptr(name("fd2d-ffff--1.example.net."))
        );
        assert_eq!(response.answers[0].ttl, Ttl::from(600));
    }

    #[test]
    fn truncated_qname_minimization_probe_gets_noerror_empty() {
        // Scenario: 22 of 32 nibbles present. The resolver is walking
        // down; answer NoError with the SOA in authority.
        let setup = setup_with(options(), Database::new());
        let qname = "0.0.0.0.0.0.0.0.0.0.0.0.0.0.f.f.f.f.d.2.d.f.ip6.arpa.";
        let response = ask(&setup, &udp_query(qname, Type::PTR, Class::IN));

        assert_eq!(response.rcode, Rcode::NoError);
        assert!(response.answers.is_empty());
        assert_eq!(response.authorities.len(), 1);
        assert_eq!(response.authorities[0].rr_type(), Type::SOA);
    }

    #[test]
    fn out_of_bailiwick_reverse_query_is_refused() {
        // Scenario: one nibble off the served prefix (fd2d:fffe...),
        // no passthru configured.
        let setup = setup_with(options(), Database::new());
        let qname = "1.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.e.f.f.f.d.2.d.f.ip6.arpa.";
        let response = ask(&setup, &udp_query(qname, Type::PTR, Class::IN));
        assert_eq!(response.rcode, Rcode::Refused);
    }

    #[test]
    fn forward_synthesis_answers_an_a() {
        // Scenario: A for 192-0-2-254.example.net. with the matching
        // reverse authority present.
        let setup = setup_with(options(), Database::new());
        let response = ask(
            &setup,
            &udp_query("192-0-2-254.example.net.", Type::A, Class::IN),
        );
        assert_eq!(response.rcode, Rcode::NoError);
        assert_eq!(response.answers.len(), 1);
        assert_eq!(response.answers[0].rdata, Rdata::A("192.0.2.254".parse().unwrap()));
    }

    #[test]
    fn forward_synthesis_rejects_dots_in_the_hostname() {
        // 192.0.2.misc.example.net. is in bailiwick but carries dots
        // before the apex; it must draw NXDOMAIN, not an answer.
        let setup = setup_with(options(), Database::new());
        let response = ask(
            &setup,
            &udp_query("192.0.2.misc.example.net.", Type::A, Class::IN),
        );
        assert_eq!(response.rcode, Rcode::NxDomain);
        assert_eq!(response.authorities.len(), 1);
        assert_eq!(response.authorities[0].rr_type(), Type::SOA);
    }

    #[test]
    fn forward_synthesis_requires_a_served_reverse() {
        // 10.0.0.1 encodes fine but no reverse authority covers it.
        let setup = setup_with(options(), Database::new());
        let response = ask(
            &setup,
            &udp_query("10-0-0-1.example.net.", Type::A, Class::IN),
        );
        assert_eq!(response.rcode, Rcode::NxDomain);
    }

    #[test]
    fn forward_synthesis_with_wrong_family_is_noerror_empty() {
        // The synthetic name exists, but an AAAA for a v4-shaped name
        // has no data.
        let setup = setup_with(options(), Database::new());
        let response = ask(
            &setup,
            &udp_query("192-0-2-254.example.net.", Type::AAAA, Class::IN),
        );
        assert_eq!(response.rcode, Rcode::NoError);
        assert!(response.answers.is_empty());
        assert_eq!(response.authorities.len(), 1);
    }

    #[test]
    fn cookie_only_query_returns_the_minted_cookie() {
        // Scenario: QDCOUNT 0, OPT with an 8-byte client cookie.
        let setup = setup_with(options(), Database::new());
        let client = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];
        let mut query = Message::query(0x4242);
        let mut opt_data = Vec::new();
        opt_data.extend_from_slice(&edns::OPTION_COOKIE.to_be_bytes());
        opt_data.extend_from_slice(&8u16.to_be_bytes());
        opt_data.extend_from_slice(&client);
        query.additionals.push(Rr {
            owner: Name::root(),
            class: Class::from(1232),
            ttl: Ttl::ZERO,
            rdata: Rdata::Opt(opt_data.into_boxed_slice()),
        });

        let response = ask(&setup, &query);
        assert_eq!(response.rcode, Rcode::NoError);
        assert!(response.answers.is_empty());

        let opt = Opt::from_rr(response.opt_rr().expect("response OPT")).unwrap();
        let cookie = opt.find(edns::OPTION_COOKIE).expect("cookie option");
        assert_eq!(cookie.len(), 24);
        assert_eq!(&cookie[..8], &client);
    }

    #[test]
    fn malformed_cookie_draws_formerr() {
        // A server cookie of 4 bytes is outside 8..=32.
        let setup = setup_with(options(), Database::new());
        let mut query = udp_query("example.net.", Type::SOA, Class::IN);
        let mut opt_data = Vec::new();
        opt_data.extend_from_slice(&edns::OPTION_COOKIE.to_be_bytes());
        opt_data.extend_from_slice(&12u16.to_be_bytes());
        opt_data.extend_from_slice(&[0u8; 12]);
        query.additionals.push(Rr {
            owner: Name::root(),
            class: Class::from(1232),
            ttl: Ttl::ZERO,
            rdata: Rdata::Opt(opt_data.into_boxed_slice()),
        });

        let response = ask(&setup, &query);
        assert_eq!(response.rcode, Rcode::FormErr);
    }

    #[test]
    fn nsid_is_returned_when_requested() {
        let mut opts = options();
        opts.nsid = b"backptr-test".to_vec();
        let setup = setup_with(opts, Database::new());

        let mut query = udp_query("example.net.", Type::SOA, Class::IN);
        let mut opt_data = Vec::new();
        opt_data.extend_from_slice(&edns::OPTION_NSID.to_be_bytes());
        opt_data.extend_from_slice(&0u16.to_be_bytes());
        query.additionals.push(Rr {
            owner: Name::root(),
            class: Class::from(1232),
            ttl: Ttl::ZERO,
            rdata: Rdata::Opt(opt_data.into_boxed_slice()),
        });

        let response = ask(&setup, &query);
        let opt = Opt::from_rr(response.opt_rr().expect("response OPT")).unwrap();
        assert_eq!(opt.find(edns::OPTION_NSID), Some(&b"backptr-test"[..]));
    }

    #[test]
    fn chaos_rows_answer_and_misses_are_refused() {
        let mut db = Database::new();
        db.add_rr(&Rr::txt(
            name("version.bind."),
            Class::CH,
            Ttl::from(600),
            "backptr",
        ));
        let setup = setup_with(options(), db);

        let response = ask(&setup, &udp_query("version.bind.", Type::TXT, Class::CH));
        assert_eq!(response.rcode, Rcode::NoError);
        assert_eq!(response.answers.len(), 1);

        let response = ask(&setup, &udp_query("nonsense.bind.", Type::TXT, Class::CH));
        assert_eq!(response.rcode, Rcode::Refused);
    }

    #[test]
    fn non_in_class_is_refused() {
        let setup = setup_with(options(), Database::new());
        let response = ask(&setup, &udp_query("example.net.", Type::SOA, Class::HS));
        assert_eq!(response.rcode, Rcode::Refused);
    }

    #[test]
    fn database_ptrs_beat_synthesis() {
        let mut db = Database::new();
        db.add_rr(&Rr::ptr(
            name("254.2.0.192.in-addr.arpa."),
            Ttl::ZERO,
            name("real.example.net."),
        ));
        let setup = setup_with(options(), db);

        let response = ask(
            &setup,
            &udp_query("254.2.0.192.in-addr.arpa.", Type::PTR, Class::IN),
        );
        assert_eq!(response.answers.len(), 1);
        assert_eq!(
            response.answers[0].rdata,
            Rdata::Ptr(name("real.example.net."))
        );
        // The zero TTL was lifted to the configured default.
        assert_eq!(response.answers[0].ttl, Ttl::from(600));
    }

    #[test]
    fn max_answers_caps_the_response() {
        let mut db = Database::new();
        for i in 0..10u8 {
            db.add_rr(&Rr::ptr(
                name("254.2.0.192.in-addr.arpa."),
                Ttl::from(60),
                name(&format!("host{}.example.net.", i)),
            ));
        }
        let mut opts = options();
        opts.max_answers = 3;
        let setup = setup_with(opts, db);

        let response = ask(
            &setup,
            &udp_query("254.2.0.192.in-addr.arpa.", Type::PTR, Class::IN),
        );
        assert_eq!(response.answers.len(), 3);
    }

    #[test]
    fn synthesis_disabled_yields_nxdomain() {
        let mut opts = options();
        opts.synthesize = false;
        let setup = setup_with(opts, Database::new());
        let response = ask(
            &setup,
            &udp_query("254.2.0.192.in-addr.arpa.", Type::PTR, Class::IN),
        );
        assert_eq!(response.rcode, Rcode::NxDomain);
    }

    #[test]
    fn probe_question_is_answered_during_discovery() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let setup = setup_with(options(), Database::new());
        let probe = Arc::new(crate::delegation::Probe::forward(
            &name("example.net."),
            &mut StdRng::seed_from_u64(3),
        ));
        let mutables = setup.server.mutables();
        setup.server.set_mutables(
            mutables.ptr_suffix,
            Some(probe.clone()),
            mutables.authorities,
        );

        let query = udp_query(
            probe.question().qname.as_str(),
            probe.question().qtype,
            probe.question().qclass,
        );
        let response = ask(&setup, &query);
        assert_eq!(response.answers.len(), 1);
        assert!(probe.answer_matches(&response.answers[0]));
    }

    #[test]
    fn out_of_bailiwick_goes_to_passthru_when_configured() {
        let resolver = Arc::new(CannedResolver::default());
        let mut canned = Message::query(0);
        canned.qr = true;
        canned.rcode = Rcode::NoError;
        canned.answers.push(Rr::a(
            name("elsewhere.example.org."),
            Ttl::from(60),
            "198.51.100.7".parse().unwrap(),
        ));
        *resolver.reply.lock().unwrap() = Some(canned);

        let mut opts = options();
        opts.passthru = Some("192.0.2.99".to_owned());
        let setup = setup_full(opts, Database::new(), resolver);

        let query = udp_query("elsewhere.example.org.", Type::A, Class::IN);
        let response = ask(&setup, &query);
        assert_eq!(response.id, query.id);
        assert_eq!(response.answers.len(), 1);
        // Relayed verbatim: not marked authoritative by us.
        assert!(!response.aa);
    }

    #[test]
    fn responses_are_silently_ignored() {
        let setup = setup_with(options(), Database::new());
        let mut query = udp_query("example.net.", Type::SOA, Class::IN);
        query.qr = true;
        let wire = query.to_wire(0);
        match setup.server.handle_message(
            &wire,
            ReceivedInfo {
                source: PEER,
                transport: Transport::Udp,
            },
        ) {
            Response::None => (),
            Response::Single(_) => panic!("a response to a response"),
        }
    }

    #[test]
    fn unexpected_opcode_is_notimp() {
        let setup = setup_with(options(), Database::new());
        let mut query = udp_query("example.net.", Type::SOA, Class::IN);
        query.opcode = Opcode::STATUS;
        let response = ask(&setup, &query);
        assert_eq!(response.rcode, Rcode::NotImp);
    }

    #[test]
    fn notify_passes_accept_but_fails_validation() {
        let setup = setup_with(options(), Database::new());
        let mut query = udp_query("example.net.", Type::SOA, Class::IN);
        query.opcode = Opcode::NOTIFY;
        let response = ask(&setup, &query);
        assert_eq!(response.rcode, Rcode::FormErr);
    }

    #[test]
    fn tcp_responses_are_not_size_limited() {
        let mut db = Database::new();
        for i in 0..120u8 {
            db.add_rr(&Rr::ptr(
                name("254.2.0.192.in-addr.arpa."),
                Ttl::from(60),
                name(&format!("host{}.some-quite-long-label.example.net.", i)),
            ));
        }
        let setup = setup_with(options(), db);
        let query = udp_query("254.2.0.192.in-addr.arpa.", Type::PTR, Class::IN);

        // Over UDP the response truncates and sets TC.
        let udp_response = ask(&setup, &query);
        assert!(udp_response.tc);

        // Over TCP everything fits.
        let wire = query.to_wire(0);
        let tcp_response = match setup.server.handle_message(
            &wire,
            ReceivedInfo {
                source: PEER,
                transport: Transport::Tcp,
            },
        ) {
            Response::Single(wire) => Message::from_wire(&wire).unwrap(),
            Response::None => panic!("expected a response"),
        };
        assert!(!tcp_response.tc);
        assert_eq!(tcp_response.answers.len(), 120);
    }
}
