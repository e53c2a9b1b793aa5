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

//! Conversions between IP addresses and the reverse-mapping namespace.
//!
//! This module maps addresses into `in-addr.arpa.`/`ip6.arpa.` names
//! and back, and fabricates the synthetic PTR and address records that
//! make forward-confirmed reverse DNS work without zone data. A reverse
//! qname does not *have* to encode an IP address (rogue queries can
//! put anything in there), so the inversion routines validate strictly
//! and report failure rather than guessing.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::OnceLock;

use crate::name::Name;
use crate::rr::{Rr, Ttl};
use crate::util::ascii_hex_digit_to_nibble;

/// Returns the `in-addr.arpa.` suffix name.
pub fn v4_suffix() -> &'static Name {
    static SUFFIX: OnceLock<Name> = OnceLock::new();
    SUFFIX.get_or_init(|| "in-addr.arpa.".parse().unwrap())
}

/// Returns the `ip6.arpa.` suffix name.
pub fn v6_suffix() -> &'static Name {
    static SUFFIX: OnceLock<Name> = OnceLock::new();
    SUFFIX.get_or_init(|| "ip6.arpa.".parse().unwrap())
}

////////////////////////////////////////////////////////////////////////
// ADDRESS TO REVERSE NAME                                            //
////////////////////////////////////////////////////////////////////////

/// Converts an IP address into the fully qualified name that a reverse
/// lookup for it queries: `d.c.b.a.in-addr.arpa.` for IPv4, or the 32
/// nibbles of the expanded address, low nibble first, under `ip6.arpa.`
/// for IPv6.
pub fn ip_to_reverse_qname(ip: IpAddr) -> Name {
    let text = match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.{}.in-addr.arpa.", o[3], o[2], o[1], o[0])
        }
        IpAddr::V6(v6) => {
            let mut text = String::with_capacity(72);
            for octet in v6.octets().iter().rev() {
                text.push_str(&format!("{:x}.{:x}.", octet & 0xf, octet >> 4));
            }
            text.push_str("ip6.arpa.");
            text
        }
    };
    text.parse().expect("generated reverse qname is valid")
}

////////////////////////////////////////////////////////////////////////
// REVERSE NAME TO ADDRESS                                            //
////////////////////////////////////////////////////////////////////////

/// The result of inverting a reverse-qname prefix back into an address.
///
/// `truncated` is set when the prefix carries fewer than the full
/// complement of labels, which is what a qname-minimizing resolver
/// sends while walking down to the full name. The labels that are
/// present align with the most significant end of the address; the
/// missing low-order bits are zero.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Inversion {
    pub ip: IpAddr,
    pub truncated: bool,
}

/// Inverts the prefix of an `in-addr.arpa.` qname (suffix already
/// stripped, no trailing dot) back into an IPv4 address.
///
/// As a reminder, `dig -x 1.2.3.4` queries `4.3.2.1.in-addr.arpa.`, so
/// the *last* label of the prefix is the *first* octet of the address.
/// Each label must be 1–3 decimal digits, value 0–255, with no leading
/// zero other than a literal `0`.
pub fn invert_v4(prefix: &str) -> Result<Inversion, Error> {
    let labels: Vec<&str> = if prefix.is_empty() {
        Vec::new()
    } else {
        prefix.split('.').collect()
    };
    if labels.len() > 4 {
        return Err(Error::TooManyLabels);
    }

    let mut octets = [0u8; 4];
    for (i, label) in labels.iter().rev().enumerate() {
        octets[i] = convert_decimal_octet(label).ok_or(Error::BadOctet)?;
    }
    Ok(Inversion {
        ip: IpAddr::V4(Ipv4Addr::from(octets)),
        truncated: labels.len() < 4,
    })
}

/// Inverts the prefix of an `ip6.arpa.` qname (suffix already stripped,
/// no trailing dot) back into an IPv6 address. Labels must each be a
/// single hexadecimal digit; uppercase is accepted.
pub fn invert_v6(prefix: &str) -> Result<Inversion, Error> {
    let labels: Vec<&str> = if prefix.is_empty() {
        Vec::new()
    } else {
        prefix.split('.').collect()
    };
    if labels.len() > 32 {
        return Err(Error::TooManyLabels);
    }

    let mut octets = [0u8; 16];
    for (i, label) in labels.iter().rev().enumerate() {
        let bytes = label.as_bytes();
        if bytes.len() != 1 {
            return Err(Error::BadNibble);
        }
        let nibble = ascii_hex_digit_to_nibble(bytes[0]).ok_or(Error::BadNibble)?;
        if i % 2 == 0 {
            octets[i / 2] = nibble << 4;
        } else {
            octets[i / 2] |= nibble;
        }
    }
    Ok(Inversion {
        ip: IpAddr::V6(Ipv6Addr::from(octets)),
        truncated: labels.len() < 32,
    })
}

/// Converts an IPv4 decimal octet label to its value. But it's tough:
/// no leading zeroes, range 0–255, no non-digit characters.
fn convert_decimal_octet(label: &str) -> Option<u8> {
    if label.is_empty() || label.len() > 3 {
        return None;
    }
    let bytes = label.as_bytes();
    if bytes[0] == b'0' && bytes.len() > 1 {
        return None;
    }
    let mut value: u16 = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }
        value = value * 10 + (byte - b'0') as u16;
    }
    if value > 255 {
        None
    } else {
        Some(value as u8)
    }
}

////////////////////////////////////////////////////////////////////////
// SYNTHESIS                                                          //
////////////////////////////////////////////////////////////////////////

/// Fabricates the PTR record answering a reverse query for `ip`.
///
/// According to RFC 1035 the PTR data has to hold a `<domain-name>`,
/// which is constrained to "let-dig-hyp", so the `.` and `:` of the
/// address's text form become `-`. No compression of the IPv6 form is
/// applied beyond what the canonical text form already provides.
pub fn synthesize_ptr(qname: &Name, suffix: &Name, ip: IpAddr, ttl: Ttl) -> Rr {
    let host = ip.to_string().replace([':', '.'], "-");
    let target: Name = format!("{}.{}", host, suffix)
        .parse()
        .expect("synthetic hostname is a valid name");
    Rr::ptr(qname.clone(), ttl, target)
}

/// Recovers the address encoded in a synthetic hostname (the qname with
/// the forward-zone suffix already stripped).
///
/// A hostname is classified as IPv4 iff it splits on `-` into exactly
/// four non-empty parts; anything else is treated as an IPv6 candidate.
/// Unlike IPv6, IPv4 has no compression of runs of zero octets, so
/// `192.0.0.1` maps from `192-0-0-1` and never `192--1`.
pub fn hostname_to_ip(hostname: &str) -> Result<IpAddr, Error> {
    let parts: Vec<&str> = hostname.split('-').collect();
    if parts.len() == 4 && parts.iter().all(|p| !p.is_empty()) {
        Ipv4Addr::from_str(&hostname.replace('-', "."))
            .map(IpAddr::V4)
            .or(Err(Error::BadHostname))
    } else {
        Ipv6Addr::from_str(&hostname.replace('-', ":"))
            .map(IpAddr::V6)
            .or(Err(Error::BadHostname))
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error encountered while inverting a reverse qname or synthetic
/// hostname.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    TooManyLabels,
    BadOctet,
    BadNibble,
    BadHostname,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::TooManyLabels => f.write_str("too many labels for an address"),
            Self::BadOctet => f.write_str("label is not a valid decimal octet"),
            Self::BadNibble => f.write_str("label is not a single hexadecimal digit"),
            Self::BadHostname => f.write_str("hostname does not encode an address"),
        }
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
