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

//! Data structures and routines for handling DNS resource records.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

mod rdata;
mod rr_type;
mod ttl;
pub use rdata::{Rdata, Soa};
pub use rr_type::Type;
pub use ttl::Ttl;

use crate::class::Class;
use crate::name::Name;

////////////////////////////////////////////////////////////////////////
// RESOURCE RECORDS                                                   //
////////////////////////////////////////////////////////////////////////

/// A single DNS resource record.
///
/// The record's type is implied by its [`Rdata`] variant (see
/// [`Rr::rr_type`]); it is not stored separately, so a record can never
/// disagree with its own data about what type it is.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rr {
    pub owner: Name,
    pub class: Class,
    pub ttl: Ttl,
    pub rdata: Rdata,
}

impl Rr {
    /// Returns the RR type implied by the record's data.
    pub fn rr_type(&self) -> Type {
        self.rdata.rr_type()
    }

    /// Returns whether two records are effectively identical, that is,
    /// identical except possibly for their TTLs. Since [`Name`]s are
    /// canonicalized at construction, owner and embedded-name
    /// comparison is case-insensitive as required.
    pub fn eq_modulo_ttl(&self, other: &Rr) -> bool {
        self.owner == other.owner && self.class == other.class && self.rdata == other.rdata
    }

    /// Constructs an address record of the family matching `ip`.
    pub fn address(owner: Name, ttl: Ttl, ip: IpAddr) -> Self {
        let rdata = match ip {
            IpAddr::V4(v4) => Rdata::A(v4),
            IpAddr::V6(v6) => Rdata::Aaaa(v6),
        };
        Self {
            owner,
            class: Class::IN,
            ttl,
            rdata,
        }
    }

    /// Constructs an A record.
    pub fn a(owner: Name, ttl: Ttl, addr: Ipv4Addr) -> Self {
        Self {
            owner,
            class: Class::IN,
            ttl,
            rdata: Rdata::A(addr),
        }
    }

    /// Constructs an AAAA record.
    pub fn aaaa(owner: Name, ttl: Ttl, addr: Ipv6Addr) -> Self {
        Self {
            owner,
            class: Class::IN,
            ttl,
            rdata: Rdata::Aaaa(addr),
        }
    }

    /// Constructs an NS record.
    pub fn ns(owner: Name, ttl: Ttl, nsdname: Name) -> Self {
        Self {
            owner,
            class: Class::IN,
            ttl,
            rdata: Rdata::Ns(nsdname),
        }
    }

    /// Constructs a PTR record.
    pub fn ptr(owner: Name, ttl: Ttl, ptrdname: Name) -> Self {
        Self {
            owner,
            class: Class::IN,
            ttl,
            rdata: Rdata::Ptr(ptrdname),
        }
    }

    /// Constructs a single-string TXT record in class `class`.
    pub fn txt(owner: Name, class: Class, ttl: Ttl, text: &str) -> Self {
        let strings = text
            .as_bytes()
            .chunks(255)
            .map(|chunk| chunk.to_vec().into_boxed_slice())
            .collect();
        Self {
            owner,
            class,
            ttl,
            rdata: Rdata::Txt(strings),
        }
    }

    /// Returns the address carried by an A or AAAA record, if this is
    /// one.
    pub fn ip(&self) -> Option<IpAddr> {
        match self.rdata {
            Rdata::A(v4) => Some(IpAddr::V4(v4)),
            Rdata::Aaaa(v6) => Some(IpAddr::V6(v6)),
            _ => None,
        }
    }
}

impl fmt::Display for Rr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.owner,
            self.ttl,
            self.class,
            self.rr_type(),
            self.rdata,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_modulo_ttl_ignores_ttl() {
        let a = Rr::a("host.example.test.".parse().unwrap(), Ttl::from(60), [192, 0, 2, 1].into());
        let mut b = a.clone();
        b.ttl = Ttl::from(3600);
        assert!(a.eq_modulo_ttl(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn eq_modulo_ttl_compares_rdata() {
        let a = Rr::a("host.example.test.".parse().unwrap(), Ttl::from(60), [192, 0, 2, 1].into());
        let b = Rr::a("host.example.test.".parse().unwrap(), Ttl::from(60), [192, 0, 2, 2].into());
        assert!(!a.eq_modulo_ttl(&b));
    }

    #[test]
    fn display_works() {
        let rr = Rr::ptr(
            "1.2.0.192.in-addr.arpa.".parse().unwrap(),
            Ttl::from(3600),
            "host.example.test.".parse().unwrap(),
        );
        assert_eq!(
            rr.to_string(),
            "1.2.0.192.in-addr.arpa. 3600 IN PTR host.example.test."
        );
    }

    #[test]
    fn txt_splits_long_strings() {
        let text = "x".repeat(300);
        let rr = Rr::txt("t.example.test.".parse().unwrap(), Class::IN, Ttl::from(60), &text);
        match &rr.rdata {
            Rdata::Txt(strings) => {
                assert_eq!(strings.len(), 2);
                assert_eq!(strings[0].len(), 255);
                assert_eq!(strings[1].len(), 45);
            }
            _ => panic!("not a TXT"),
        }
    }
}
