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

//! The [`Finder`]: locating a delegation and probing its name servers.

use std::collections::HashSet;
use std::net::IpAddr;

use log::{debug, info, warn};

use super::{Error, Probe};
use crate::class::Class;
use crate::message::{Message, Question, Rcode};
use crate::name::Name;
use crate::resolver::Resolver;
use crate::rr::{Rdata, Rr, Ttl, Type};

/// A sentinel TTL on records built from resolver lookups, which carry
/// no TTL of their own.
const LOOKUP_TTL: u32 = 59;

////////////////////////////////////////////////////////////////////////
// DELEGATIONS                                                        //
////////////////////////////////////////////////////////////////////////

/// The delegation material gathered for one domain: its NS set and the
/// addresses known for the NS names.
#[derive(Clone, Debug)]
pub struct Delegation {
    pub domain: Name,
    pub ns: Vec<Rr>,
    pub a: Vec<Rr>,
    pub aaaa: Vec<Rr>,
}

impl Delegation {
    /// Builds the delegation from a parent's referral response. The
    /// NS records live in the authority section and the glue in the
    /// additional section. The domain is taken from the first NS
    /// record's owner name, which may differ from the domain that was
    /// asked about, if the parent is buggy; the caller must check.
    fn from_referral(response: &Message) -> Self {
        let mut delegation = Self {
            domain: response
                .authorities
                .first()
                .map(|rr| rr.owner.clone())
                .unwrap_or_else(Name::root),
            ns: response.authorities.clone(),
            a: Vec::new(),
            aaaa: Vec::new(),
        };
        for rr in &response.additionals {
            match rr.rdata {
                Rdata::A(_) => delegation.a.push(rr.clone()),
                Rdata::Aaaa(_) => delegation.aaaa.push(rr.clone()),
                _ => (),
            }
        }
        delegation
    }

    /// Resolves addresses for NS names that have none yet. This is
    /// typically out-of-bailiwick names, though it can also happen for
    /// in-domain names which turn out to be CNAMEs; rather than try to
    /// discriminate, every outstanding name goes through the resolver.
    fn resolve_missing_ns_addresses(&mut self, resolver: &dyn Resolver) {
        let resolved: HashSet<&Name> = self
            .a
            .iter()
            .chain(self.aaaa.iter())
            .map(|rr| &rr.owner)
            .collect();

        let mut new_a = Vec::new();
        let mut new_aaaa = Vec::new();
        for rr in &self.ns {
            let nsdname = match &rr.rdata {
                Rdata::Ns(nsdname) => nsdname,
                _ => continue,
            };
            if resolved.contains(nsdname) {
                continue;
            }
            match resolver.lookup_ip(nsdname) {
                Ok(addrs) => {
                    for ip in addrs {
                        let rr = Rr::address(nsdname.clone(), Ttl::from(LOOKUP_TTL), ip);
                        match ip {
                            IpAddr::V4(_) => new_a.push(rr),
                            IpAddr::V6(_) => new_aaaa.push(rr),
                        }
                    }
                }
                Err(e) => {
                    info!(
                        "Cannot resolve NS address of {} for {}: {}",
                        nsdname, self.domain, e
                    );
                }
            }
        }
        self.a.extend(new_a);
        self.aaaa.extend(new_aaaa);
    }

    /// Returns whether none of the name servers has any address (it is
    /// also considered completely lame if there are no name servers to
    /// begin with). A partially lame delegation still functions, but a
    /// completely lame one cannot be probed at all.
    pub fn is_completely_lame(&self) -> bool {
        let ns_names: HashSet<&Name> = self
            .ns
            .iter()
            .filter_map(|rr| match &rr.rdata {
                Rdata::Ns(nsdname) => Some(nsdname),
                _ => None,
            })
            .collect();
        !self
            .a
            .iter()
            .chain(self.aaaa.iter())
            .any(|rr| ns_names.contains(&rr.owner))
    }
}

/// The outcome of [`Finder::find_and_probe`].
#[derive(Debug)]
pub struct FindResults {
    /// The parent zone above the cut. Always present on success.
    pub parent: Delegation,

    /// The target's delegation, if the parent provided one.
    pub target: Option<Delegation>,

    /// Whether a target name server answered the probe correctly.
    pub probe_success: bool,

    /// The name server that answered the probe.
    pub respondent: Option<Name>,
}

impl FindResults {
    fn parent_only(parent: Delegation) -> Self {
        Self {
            parent,
            target: None,
            probe_success: false,
            respondent: None,
        }
    }

    fn with_target(parent: Delegation, target: Delegation) -> Self {
        Self {
            parent,
            target: Some(target),
            probe_success: false,
            respondent: None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// THE FINDER                                                         //
////////////////////////////////////////////////////////////////////////

/// Finds and verifies the parent and target delegation material for a
/// probe's target.
pub struct Finder<'a> {
    resolver: &'a dyn Resolver,
}

impl<'a> Finder<'a> {
    /// Creates a `Finder` using the given resolver.
    pub fn new(resolver: &'a dyn Resolver) -> Self {
        Self { resolver }
    }

    /// Attempts to find and verify the delegation for the probe's
    /// target. There are three steps: find the parents, query them for
    /// the target's delegation, and probe the target's name servers to
    /// self-identify.
    ///
    /// An `Err` return means the walk found no delegation point at all.
    /// Lesser failures (no target in the delegation, a completely lame
    /// target, or no probe response) are reported through the fields
    /// of [`FindResults`], since the parent material may still be of
    /// use to the caller.
    pub fn find_and_probe(&self, probe: &Probe) -> Result<FindResults, Error> {
        info!("FindAndProbe: {}", probe.target());
        debug!("probe answer: {}", probe.answer());

        let mut results = self.find_authorities(probe)?;

        let target = match &results.target {
            Some(target) => target,
            None => {
                info!(
                    "Find: {}: parent {}: no delegation",
                    probe.target(),
                    results.parent.domain
                );
                return Ok(results);
            }
        };

        // We obviously can't probe if there are no addresses to try.
        if target.is_completely_lame() {
            info!(
                "Find: {}: parent {}: target is 100% lame",
                probe.target(),
                results.parent.domain
            );
            return Ok(results);
        }

        // Send the probe to each name-server address in turn until one
        // good response arrives. Start with the IPv6 addresses and fall
        // back to any legacy IPv4 ones. Ignore all other errors: we
        // have no clue how our sibling name servers may respond.
        info!(
            "Find: {}: probing target name servers (AAAA={}, A={})",
            probe.target(),
            target.aaaa.len(),
            target.a.len()
        );
        let all_addrs: Vec<Rr> = target.aaaa.iter().chain(target.a.iter()).cloned().collect();
        for rr in &all_addrs {
            match self.exchange_probe(probe, rr) {
                Some(answer) if probe.answer_matches(&answer) => {
                    info!("Find: good probe response by {}", rr.owner);
                    results.probe_success = true;
                    results.respondent = Some(rr.owner.clone());
                    return Ok(results);
                }
                Some(answer) => {
                    info!("Find: wrong probe response by {} of {}", rr.owner, answer);
                }
                None => {
                    info!("Find: no probe response by {}", rr.owner);
                }
            }
        }

        Ok(results)
    }

    /// Collects delegation details for the target domain and,
    /// indirectly, most of the delegation details of the parent.
    ///
    /// The parent's name servers are found by the zone-cut walk and
    /// then queried directly for the target's NS records. The parent
    /// delegation always comes back on success; the target delegation
    /// comes back only once a parent name server supplies a valid
    /// referral for exactly the expected domain, with at least one NS
    /// address resolved.
    fn find_authorities(&self, probe: &Probe) -> Result<FindResults, Error> {
        let (parent_domain, ns_names) = self.find_zone_cut(probe)?;

        let mut parent = Delegation {
            domain: parent_domain.clone(),
            ns: ns_names
                .iter()
                .map(|host| {
                    Rr::ns(parent_domain.clone(), Ttl::from(LOOKUP_TTL), host.clone())
                })
                .collect(),
            a: Vec::new(),
            aaaa: Vec::new(),
        };

        info!(
            "findAuthorities: resolving delegation of {} at {}",
            probe.target(),
            parent_domain
        );
        let question = Question {
            qname: probe.target().clone(),
            qtype: Type::NS,
            qclass: Class::IN,
        };

        for ns in &ns_names {
            let addrs = match self.resolver.lookup_ip(ns) {
                Ok(addrs) => addrs,
                Err(e) => {
                    info!("Could not resolve parent {}: {}", ns, e);
                    continue;
                }
            };
            for ip in addrs {
                let glue = Rr::address(ns.clone(), Ttl::from(LOOKUP_TTL), ip);
                match ip {
                    IpAddr::V4(_) => parent.a.push(glue),
                    IpAddr::V6(_) => parent.aaaa.push(glue),
                }

                let response = match self.resolver.full_exchange(
                    &question,
                    &ip.to_string(),
                    ns.as_str(),
                ) {
                    Ok((response, _)) => response,
                    Err(e) => {
                        debug!(
                            "Resolver error from parent {}/{} for {}/NS: {}",
                            ns, ip, question.qname, e
                        );
                        continue;
                    }
                };

                // NXDomain stops us cold.
                if response.rcode == Rcode::NxDomain {
                    info!(
                        "NXDomain from parent {}/{} for {}/NS",
                        ns, ip, question.qname
                    );
                    return Ok(FindResults::parent_only(parent));
                }
                if response.rcode != Rcode::NoError {
                    debug!(
                        "Odd {} from parent {}/{} for {}/NS",
                        response.rcode, ns, ip, question.qname
                    );
                    continue;
                }
                if !valid_referral(&response) {
                    debug!(
                        "Invalid delegation from parent {}/{} for {}/NS",
                        ns, ip, question.qname
                    );
                    continue;
                }

                // It's possible that a buggy parent responded with a
                // delegation to another domain it manages. Highly
                // unlikely, but we don't want the wrong domain name to
                // propagate through the server, so catch it here.
                let mut candidate = Delegation::from_referral(&response);
                if candidate.domain != *probe.target() {
                    warn!(
                        "Alert: wrong delegation {} from parent {}/{} for {}/NS",
                        candidate.domain, ns, ip, question.qname
                    );
                    continue;
                }

                candidate.resolve_missing_ns_addresses(self.resolver);
                return Ok(FindResults::with_target(parent, candidate));
            }
        }

        Ok(FindResults::parent_only(parent))
    }

    /// Walks up the DNS from the parents of the target toward the root
    /// looking for the zone cut.
    ///
    /// The reason for walking rather than relying on a single query is
    /// that delegation does not have to occur at every label, so all we
    /// know for sure is that the cut, if it exists at all, occurs
    /// "somewhere up there". Such gaps are uncommon in the forward
    /// direction but routine in the reverse. The probe bounds the walk
    /// so the search never bothers the root servers.
    fn find_zone_cut(&self, probe: &Probe) -> Result<(Name, Vec<Name>), Error> {
        for (level, parent) in probe.cuts().enumerate() {
            info!("findZoneCut: {} parent NS lookup {}", level, parent);
            match self.resolver.lookup_ns(parent) {
                Ok(ns_set) => {
                    info!(
                        "findZoneCut: {} parent NS lookup ok ({}): {}",
                        level,
                        ns_set.len(),
                        ns_set
                            .iter()
                            .map(Name::to_string)
                            .collect::<Vec<_>>()
                            .join(","),
                    );
                    return Ok((parent.clone(), ns_set));
                }
                Err(_) => continue,
            }
        }

        Err(Error::NoDelegationFound {
            target: probe.target().clone(),
            topmost: probe.topmost().cloned().unwrap_or_else(Name::root),
        })
    }

    /// Sends the probe question to the address in `rr` and returns the
    /// first answer, if any.
    fn exchange_probe(&self, probe: &Probe, rr: &Rr) -> Option<Rr> {
        let ip = rr.ip()?;
        let (response, _) = self
            .resolver
            .full_exchange(probe.question(), &ip.to_string(), rr.owner.as_str())
            .ok()?;
        response.answers.first().cloned()
    }
}

/// Returns whether the message is a standards-conforming referral:
/// success, zero answer records, at least one authority record, and
/// every authority record an IN NS.
fn valid_referral(response: &Message) -> bool {
    response.rcode == Rcode::NoError
        && response.answers.is_empty()
        && !response.authorities.is_empty()
        && response
            .authorities
            .iter()
            .all(|rr| rr.rr_type() == Type::NS && rr.class == Class::IN)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{Error as ResolverError, ExchangeConfig};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// A scripted resolver: canned NS sets, addresses, and
    /// full-exchange responses keyed by server address and qtype.
    #[derive(Default)]
    struct Scripted {
        ns: HashMap<Name, Vec<Name>>,
        ip: HashMap<Name, Vec<IpAddr>>,
        exchanges: Mutex<HashMap<(String, Type), Message>>,
    }

    impl Scripted {
        fn script_exchange(&self, server: &str, qtype: Type, response: Message) {
            self.exchanges
                .lock()
                .unwrap()
                .insert((server.to_owned(), qtype), response);
        }
    }

    impl Resolver for Scripted {
        fn lookup_ns(&self, name: &Name) -> Result<Vec<Name>, ResolverError> {
            self.ns
                .get(name)
                .cloned()
                .ok_or_else(|| ResolverError::NoAnswer(name.clone()))
        }

        fn lookup_ip(&self, host: &Name) -> Result<Vec<IpAddr>, ResolverError> {
            self.ip
                .get(host)
                .cloned()
                .ok_or_else(|| ResolverError::NoAnswer(host.clone()))
        }

        fn single_exchange(
            &self,
            _: &ExchangeConfig,
            query: &Message,
            server: &str,
            log_name: &str,
        ) -> Result<(Message, Duration), ResolverError> {
            let question = query.first_question().expect("scripted query").clone();
            self.full_exchange(&question, server, log_name)
        }

        fn full_exchange(
            &self,
            question: &Question,
            server: &str,
            _: &str,
        ) -> Result<(Message, Duration), ResolverError> {
            self.exchanges
                .lock()
                .unwrap()
                .get(&(server.to_owned(), question.qtype))
                .cloned()
                .map(|m| (m, Duration::from_millis(1)))
                .ok_or_else(|| ResolverError::NoAnswer(question.qname.clone()))
        }
    }

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    fn referral(domain: &str, ns_host: &str, glue: IpAddr) -> Message {
        let mut m = Message::query(1);
        m.qr = true;
        m.authorities
            .push(Rr::ns(name(domain), Ttl::from(3600), name(ns_host)));
        m.additionals
            .push(Rr::address(name(ns_host), Ttl::from(3600), glue));
        m
    }

    fn forward_probe() -> Probe {
        Probe::forward(&name("example.net."), &mut StdRng::seed_from_u64(7))
    }

    /// Sets up the happy path: parent "net." knows the delegation and
    /// the target's name server answers the probe.
    fn scripted_happy_path(probe: &Probe) -> Scripted {
        let mut scripted = Scripted::default();
        scripted
            .ns
            .insert(name("net."), vec![name("a.gtld-servers.net.")]);
        scripted.ip.insert(
            name("a.gtld-servers.net."),
            vec!["192.5.6.30".parse().unwrap()],
        );
        scripted.script_exchange(
            "192.5.6.30",
            Type::NS,
            referral("example.net.", "ns1.example.net.", "192.0.2.53".parse().unwrap()),
        );

        let mut probe_reply = Message::query(2);
        probe_reply.qr = true;
        probe_reply.answers.push(probe.answer().clone());
        scripted.script_exchange("192.0.2.53", probe.question().qtype, probe_reply);
        scripted
    }

    #[test]
    fn find_and_probe_happy_path() {
        let probe = forward_probe();
        let scripted = scripted_happy_path(&probe);

        let results = Finder::new(&scripted).find_and_probe(&probe).unwrap();
        assert_eq!(results.parent.domain, name("net."));
        let target = results.target.expect("target found");
        assert_eq!(target.domain, name("example.net."));
        assert!(results.probe_success);
        assert_eq!(results.respondent, Some(name("ns1.example.net.")));
    }

    #[test]
    fn walk_skips_levels_without_ns() {
        // The cut for a.b.example.net. is only visible at net.
        let probe = Probe::forward(&name("a.b.example.net."), &mut StdRng::seed_from_u64(7));
        let mut scripted = Scripted::default();
        scripted
            .ns
            .insert(name("net."), vec![name("a.gtld-servers.net.")]);
        scripted.ip.insert(
            name("a.gtld-servers.net."),
            vec!["192.5.6.30".parse().unwrap()],
        );
        scripted.script_exchange(
            "192.5.6.30",
            Type::NS,
            referral(
                "a.b.example.net.",
                "ns1.example.net.",
                "192.0.2.53".parse().unwrap(),
            ),
        );

        let results = Finder::new(&scripted).find_and_probe(&probe).unwrap();
        assert_eq!(results.parent.domain, name("net."));
        assert!(results.target.is_some());
        // The scripted target server never answers the probe.
        assert!(!results.probe_success);
    }

    #[test]
    fn no_delegation_anywhere_is_an_error() {
        let probe = forward_probe();
        let scripted = Scripted::default();
        let err = Finder::new(&scripted).find_and_probe(&probe).unwrap_err();
        assert_eq!(
            err.to_string(),
            "No Delegation found for example.net. up to net."
        );
    }

    #[test]
    fn nxdomain_from_parent_yields_parent_only() {
        let probe = forward_probe();
        let scripted = scripted_happy_path(&probe);
        let mut nx = Message::query(1);
        nx.qr = true;
        nx.rcode = Rcode::NxDomain;
        scripted.script_exchange("192.5.6.30", Type::NS, nx);

        let results = Finder::new(&scripted).find_and_probe(&probe).unwrap();
        assert_eq!(results.parent.domain, name("net."));
        assert!(results.target.is_none());
        assert!(!results.probe_success);
    }

    #[test]
    fn wrong_delegation_is_rejected() {
        let probe = forward_probe();
        let scripted = scripted_happy_path(&probe);
        // The parent answers with a referral for a different domain.
        scripted.script_exchange(
            "192.5.6.30",
            Type::NS,
            referral("other.net.", "ns1.other.net.", "192.0.2.99".parse().unwrap()),
        );

        let results = Finder::new(&scripted).find_and_probe(&probe).unwrap();
        assert!(results.target.is_none());
    }

    #[test]
    fn lame_target_is_not_probed() {
        let probe = forward_probe();
        let scripted = scripted_happy_path(&probe);
        // Referral with no glue, and the NS name does not resolve.
        let mut lame = Message::query(1);
        lame.qr = true;
        lame.authorities.push(Rr::ns(
            name("example.net."),
            Ttl::from(3600),
            name("ns1.example.net."),
        ));
        scripted.script_exchange("192.5.6.30", Type::NS, lame);

        let results = Finder::new(&scripted).find_and_probe(&probe).unwrap();
        let target = results.target.expect("target present");
        assert!(target.is_completely_lame());
        assert!(!results.probe_success);
    }

    #[test]
    fn wrong_probe_answer_is_not_success() {
        let probe = forward_probe();
        let scripted = scripted_happy_path(&probe);
        let mut wrong = Message::query(2);
        wrong.qr = true;
        wrong.answers.push(Rr::aaaa(
            probe.question().qname.clone(),
            Ttl::from(3),
            "2001:db8::bad".parse().unwrap(),
        ));
        scripted.script_exchange("192.0.2.53", probe.question().qtype, wrong);

        let results = Finder::new(&scripted).find_and_probe(&probe).unwrap();
        assert!(results.target.is_some());
        assert!(!results.probe_success);
    }
}
