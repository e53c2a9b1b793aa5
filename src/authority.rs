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

//! Zones of authority and the table that resolves queries to them.

use std::net::IpAddr;
use std::sync::Arc;

use crate::cidr::Cidr;
use crate::class::Class;
use crate::name::Name;
use crate::rr::{Rdata, Rr, Soa, Ttl};

////////////////////////////////////////////////////////////////////////
// AUTHORITIES                                                        //
////////////////////////////////////////////////////////////////////////

/// One zone this server is authoritative for.
///
/// An `Authority` is assembled during discovery (or from local
/// configuration), never mutated afterwards, and replaced wholesale on
/// reload; the table hands them out as [`Arc`]s so query tasks can pin
/// one without copying it.
#[derive(Clone, Debug)]
pub struct Authority {
    /// The zone apex.
    pub domain: Name,

    /// Whether this is the forward zone (as opposed to a reverse zone).
    pub forward: bool,

    /// For reverse zones, the prefix the zone serves.
    pub cidr: Option<Cidr>,

    /// A printable identifier for where this authority came from
    /// (the configured domain or CIDR text).
    pub source: String,

    /// The synthesized apex SOA.
    pub soa: Rr,

    /// The apex NS set, with any glue addresses for the NS names.
    pub ns: Vec<Rr>,
    pub a: Vec<Rr>,
    pub aaaa: Vec<Rr>,
}

/// The fixed SOA timers. None of these really have much meaning for a
/// server whose data is synthesized, but they have to be populated with
/// something.
const SOA_REFRESH: u32 = 110040;
const SOA_RETRY: u32 = 110080;
const SOA_EXPIRE: u32 = 28;
const SOA_MINIMUM: u32 = 9030;

impl Authority {
    /// Assembles a forward authority.
    pub fn forward(
        domain: Name,
        source: String,
        ns: Vec<Rr>,
        a: Vec<Rr>,
        aaaa: Vec<Rr>,
        mbox_domain: &Name,
        serial: u32,
        ttl: Ttl,
    ) -> Self {
        let soa = synthesize_soa(&domain, &ns, mbox_domain, serial, ttl);
        Self {
            domain,
            forward: true,
            cidr: None,
            source,
            soa,
            ns,
            a,
            aaaa,
        }
    }

    /// Assembles a reverse authority for `cidr`; the apex is derived
    /// from the prefix.
    pub fn reverse(
        cidr: Cidr,
        source: String,
        ns: Vec<Rr>,
        a: Vec<Rr>,
        aaaa: Vec<Rr>,
        mbox_domain: &Name,
        serial: u32,
        ttl: Ttl,
    ) -> Self {
        let domain = cidr.reverse_apex();
        let soa = synthesize_soa(&domain, &ns, mbox_domain, serial, ttl);
        Self {
            domain,
            forward: false,
            cidr: Some(cidr),
            source,
            soa,
            ns,
            a,
            aaaa,
        }
    }
}

/// Synthesizes the fixed-shape apex SOA: MNAME is the first NS target
/// (or the apex itself when there are none, as for local zones), RNAME
/// is `hostmaster.` under the given domain, and the serial is the
/// server's start time.
fn synthesize_soa(domain: &Name, ns: &[Rr], mbox_domain: &Name, serial: u32, ttl: Ttl) -> Rr {
    let mname = ns
        .iter()
        .find_map(|rr| match &rr.rdata {
            Rdata::Ns(nsdname) => Some(nsdname.clone()),
            _ => None,
        })
        .unwrap_or_else(|| domain.clone());
    let rname: Name = format!("hostmaster.{}", mbox_domain)
        .parse()
        .expect("hostmaster under a valid name is a valid name");
    Rr {
        owner: domain.clone(),
        class: Class::IN,
        ttl,
        rdata: Rdata::Soa(Soa {
            mname,
            rname,
            serial,
            refresh: SOA_REFRESH,
            retry: SOA_RETRY,
            expire: SOA_EXPIRE,
            minimum: SOA_MINIMUM,
        }),
    }
}

////////////////////////////////////////////////////////////////////////
// THE AUTHORITY TABLE                                                //
////////////////////////////////////////////////////////////////////////

/// The ordered set of zones of authority, used to decide whether a
/// query is in bailiwick and of which zone.
///
/// After population, [`sort`] must be called so that [`find_in_domain`]
/// returns the most specific zone. The search itself is serial: it's a
/// suffix match rather than an exact match, and in practice there are
/// rarely more than a handful of authorities, so a serial scan beats a
/// fancy tree.
///
/// [`sort`]: AuthorityTable::sort
/// [`find_in_domain`]: AuthorityTable::find_in_domain
#[derive(Clone, Debug, Default)]
pub struct AuthorityTable {
    entries: Vec<Arc<Authority>>,
}

impl AuthorityTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an authority, unless one with the same apex is already
    /// present. Returns whether it was appended.
    pub fn append(&mut self, auth: Authority) -> bool {
        debug_assert!(auth.forward || auth.cidr.is_some());
        if self.entries.iter().any(|a| a.domain == auth.domain) {
            return false;
        }
        self.entries.push(Arc::new(auth));
        true
    }

    /// Arranges the entries in most-specific-first order.
    ///
    /// Label count is the primary key, with more labels coming first.
    /// Equal label counts cannot overlap, so their relative order does
    /// not matter for correctness; the reversed apex text is used as a
    /// secondary key to keep the order stable and visually convenient.
    pub fn sort(&mut self) {
        self.entries.sort_by(|a, b| {
            b.domain
                .len()
                .cmp(&a.domain.len())
                .then_with(|| b.domain.as_str().cmp(a.domain.as_str()))
        });
    }

    /// Returns the most specific authority whose apex is a suffix of
    /// `qname`, assuming [`sort`](AuthorityTable::sort) has been
    /// called.
    pub fn find_in_domain(&self, qname: &Name) -> Option<&Arc<Authority>> {
        self.entries
            .iter()
            .find(|auth| qname.eq_or_subdomain_of(&auth.domain))
    }

    /// Returns the reverse authority whose prefix contains `ip`, if
    /// any.
    pub fn find_ip_in_domain(&self, ip: IpAddr) -> Option<&Arc<Authority>> {
        self.entries
            .iter()
            .find(|auth| matches!(auth.cidr, Some(cidr) if cidr.contains(ip)))
    }

    /// Returns the number of authorities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the authorities in table order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Authority>> {
        self.entries.iter()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn forward_auth(domain: &str) -> Authority {
        let domain: Name = domain.parse().unwrap();
        Authority::forward(
            domain.clone(),
            domain.to_string(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            &domain,
            1357997531,
            Ttl::from(600),
        )
    }

    fn reverse_auth(cidr: &str) -> Authority {
        let cidr: Cidr = cidr.parse().unwrap();
        Authority::reverse(
            cidr,
            cidr.to_string(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            &"example.net.".parse().unwrap(),
            1357997531,
            Ttl::from(600),
        )
    }

    #[test]
    fn soa_has_the_fixed_shape() {
        let ns = vec![Rr::ns(
            "example.net.".parse().unwrap(),
            Ttl::from(600),
            "ns1.example.org.".parse().unwrap(),
        )];
        let auth = Authority::forward(
            "example.net.".parse().unwrap(),
            "example.net.".to_owned(),
            ns,
            Vec::new(),
            Vec::new(),
            &"example.net.".parse().unwrap(),
            1357997531,
            Ttl::from(600),
        );
        assert_eq!(
            auth.soa.to_string(),
            "example.net. 600 IN SOA ns1.example.org. hostmaster.example.net. \
             1357997531 110040 110080 28 9030"
        );
    }

    #[test]
    fn soa_mname_falls_back_to_the_apex() {
        let auth = forward_auth("example.net.");
        match &auth.soa.rdata {
            Rdata::Soa(soa) => assert_eq!(soa.mname, auth.domain),
            _ => panic!("not an SOA"),
        }
    }

    #[test]
    fn append_rejects_duplicates() {
        let mut table = AuthorityTable::new();
        assert!(table.append(forward_auth("example.net.")));
        assert!(!table.append(forward_auth("example.net.")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn sort_orders_most_specific_first() {
        let mut table = AuthorityTable::new();
        table.append(forward_auth("example.net."));
        table.append(reverse_auth("192.0.2.0/24"));
        table.append(reverse_auth("10.0.0.0/8"));
        table.sort();

        let domains: Vec<String> = table.iter().map(|a| a.domain.to_string()).collect();
        assert_eq!(
            domains,
            vec![
                "2.0.192.in-addr.arpa.".to_owned(),
                "10.in-addr.arpa.".to_owned(),
                "example.net.".to_owned(),
            ]
        );

        // Pairwise check of the ordering invariant.
        let entries: Vec<_> = table.iter().collect();
        for window in entries.windows(2) {
            let (a, b) = (&window[0], &window[1]);
            assert!(
                a.domain.len() > b.domain.len()
                    || (a.domain.len() == b.domain.len()
                        && a.domain.as_str() > b.domain.as_str())
            );
        }
    }

    #[test]
    fn find_in_domain_returns_longest_suffix_match() {
        let mut table = AuthorityTable::new();
        table.append(forward_auth("example.net."));
        table.append(reverse_auth("10.0.0.0/8"));
        table.sort();

        let qname: Name = "1.2.0.10.in-addr.arpa.".parse().unwrap();
        assert_eq!(
            table.find_in_domain(&qname).unwrap().domain.as_str(),
            "10.in-addr.arpa."
        );
        assert!(table
            .find_in_domain(&"example.org.".parse().unwrap())
            .is_none());
    }

    #[test]
    fn find_ip_in_domain_matches_reverse_zones_only() {
        let mut table = AuthorityTable::new();
        table.append(forward_auth("example.net."));
        table.append(reverse_auth("192.0.2.0/24"));
        table.sort();

        assert!(table
            .find_ip_in_domain("192.0.2.254".parse().unwrap())
            .is_some());
        assert!(table
            .find_ip_in_domain("198.51.100.1".parse().unwrap())
            .is_none());
    }
}
