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

//! Implementation of the [`Rdata`] tagged variant for RR data.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use super::Type;
use crate::name::Name;
use crate::util::to_hex;

////////////////////////////////////////////////////////////////////////
// RDATA                                                              //
////////////////////////////////////////////////////////////////////////

/// The data of a resource record.
///
/// The set of structured variants is closed: it covers exactly the
/// types this server originates, parses from zone data, or inspects in
/// upstream responses. Every other type travels as [`Other`] with its
/// raw RDATA octets, which is enough to carry it through the loader
/// (which ignores it) or a passthru response (which copies it
/// verbatim, per [RFC 3597 § 3]).
///
/// [`Other`]: Rdata::Other
/// [RFC 3597 § 3]: https://datatracker.ietf.org/doc/html/rfc3597#section-3
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Rdata {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ns(Name),
    Cname(Name),
    Ptr(Name),
    Soa(Soa),
    Txt(Vec<Box<[u8]>>),
    Opt(Box<[u8]>),
    Other(Type, Box<[u8]>),
}

/// The fields of an SOA record's data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Soa {
    pub mname: Name,
    pub rname: Name,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

impl Rdata {
    /// Returns the RR type of this data.
    pub fn rr_type(&self) -> Type {
        match self {
            Self::A(_) => Type::A,
            Self::Aaaa(_) => Type::AAAA,
            Self::Ns(_) => Type::NS,
            Self::Cname(_) => Type::CNAME,
            Self::Ptr(_) => Type::PTR,
            Self::Soa(_) => Type::SOA,
            Self::Txt(_) => Type::TXT,
            Self::Opt(_) => Type::OPT,
            Self::Other(rr_type, _) => *rr_type,
        }
    }
}

impl fmt::Display for Rdata {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::A(addr) => write!(f, "{}", addr),
            Self::Aaaa(addr) => write!(f, "{}", addr),
            Self::Ns(name) | Self::Cname(name) | Self::Ptr(name) => write!(f, "{}", name),
            Self::Soa(soa) => write!(
                f,
                "{} {} {} {} {} {} {}",
                soa.mname, soa.rname, soa.serial, soa.refresh, soa.retry, soa.expire, soa.minimum,
            ),
            Self::Txt(strings) => {
                for (i, string) in strings.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "\"{}\"", String::from_utf8_lossy(string))?;
                }
                Ok(())
            }
            // RFC 3597 § 5 generic encoding.
            Self::Opt(octets) => write!(f, "\\# {} {}", octets.len(), to_hex(octets)),
            Self::Other(_, octets) => write!(f, "\\# {} {}", octets.len(), to_hex(octets)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rr_type_matches_variant() {
        assert_eq!(Rdata::A([192, 0, 2, 1].into()).rr_type(), Type::A);
        assert_eq!(
            Rdata::Ptr("host.example.test.".parse().unwrap()).rr_type(),
            Type::PTR
        );
        assert_eq!(
            Rdata::Other(Type::from(999), Box::from(&b"x"[..])).rr_type(),
            Type::from(999)
        );
    }

    #[test]
    fn soa_displays_in_master_file_order() {
        let soa = Rdata::Soa(Soa {
            mname: "ns1.example.org.".parse().unwrap(),
            rname: "hostmaster.example.net.".parse().unwrap(),
            serial: 1357997531,
            refresh: 110040,
            retry: 110080,
            expire: 28,
            minimum: 9030,
        });
        assert_eq!(
            soa.to_string(),
            "ns1.example.org. hostmaster.example.net. 1357997531 110040 110080 28 9030"
        );
    }

    #[test]
    fn unknown_rdata_displays_generically() {
        let rdata = Rdata::Other(Type::from(999), Box::from(&[0xde, 0xad][..]));
        assert_eq!(rdata.to_string(), "\\# 2 dead");
    }
}
