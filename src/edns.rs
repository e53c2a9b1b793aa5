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

//! EDNS(0) OPT handling and DNS cookies.
//!
//! This module parses and produces the OPT pseudo-RR ([RFC 6891]),
//! recognizing the NSID ([RFC 5001]) and COOKIE ([RFC 7873]) options.
//! Server cookies use the version 1 interoperable layout of [RFC 9018]
//! with SipHash-2-4.
//!
//! [RFC 5001]: https://datatracker.ietf.org/doc/html/rfc5001
//! [RFC 6891]: https://datatracker.ietf.org/doc/html/rfc6891
//! [RFC 7873]: https://datatracker.ietf.org/doc/html/rfc7873
//! [RFC 9018]: https://datatracker.ietf.org/doc/html/rfc9018

use std::hash::Hasher;
use std::net::IpAddr;

use arrayvec::ArrayVec;
use rand::rngs::OsRng;
use rand::RngCore;
use siphasher::sip::SipHasher24;

use crate::name::Name;
use crate::rr::{Rdata, Rr, Ttl};

/// The option code of the NSID option (RFC 5001).
pub const OPTION_NSID: u16 = 3;

/// The option code of the COOKIE option (RFC 7873).
pub const OPTION_COOKIE: u16 = 10;

/// The UDP payload size this server advertises, per current guidance to
/// stay under the smallest common MTU minus headers.
pub const DEFAULT_UDP_SIZE: u16 = 1232;

/// A client cookie is always exactly this long.
pub const CLIENT_COOKIE_LEN: usize = 8;

/// If present, a server cookie must be within this range.
pub const SERVER_COOKIE_MIN: usize = 8;
pub const SERVER_COOKIE_MAX: usize = 32;

/// A version 1 server cookie is exactly 128 bits.
pub const SERVER_COOKIE_V1_LEN: usize = 16;

/// A full version 1 cookie option: client cookie plus server cookie.
pub const COOKIE_V1_LEN: usize = CLIENT_COOKIE_LEN + SERVER_COOKIE_V1_LEN;

////////////////////////////////////////////////////////////////////////
// OPT PARSING AND GENERATION                                         //
////////////////////////////////////////////////////////////////////////

/// The decoded form of an OPT pseudo-RR.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Opt {
    pub udp_size: u16,
    pub version: u8,
    pub options: Vec<(u16, Box<[u8]>)>,
}

impl Opt {
    /// Decodes an OPT record. Returns `None` if `rr` is not an OPT or
    /// its option list is malformed.
    pub fn from_rr(rr: &Rr) -> Option<Self> {
        let raw = match &rr.rdata {
            Rdata::Opt(raw) => raw,
            _ => return None,
        };
        let mut options = Vec::new();
        let mut cursor = 0;
        while cursor < raw.len() {
            if cursor + 4 > raw.len() {
                return None;
            }
            let code = u16::from_be_bytes([raw[cursor], raw[cursor + 1]]);
            let len = u16::from_be_bytes([raw[cursor + 2], raw[cursor + 3]]) as usize;
            if cursor + 4 + len > raw.len() {
                return None;
            }
            options.push((code, raw[cursor + 4..cursor + 4 + len].to_vec().into_boxed_slice()));
            cursor += 4 + len;
        }
        Some(Self {
            udp_size: rr.class.into(),
            version: (u32::from(rr.ttl) >> 16) as u8,
            options,
        })
    }

    /// Returns the data of the first option with the given code.
    pub fn find(&self, code: u16) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, data)| data.as_ref())
    }
}

/// Builds the response OPT record. Sub-options are inserted in the
/// fixed order NSID, COOKIE. Returns `None` when there is nothing to
/// say, in which case no OPT is appended to the response.
pub fn build_opt(max_size: u16, nsid_out: &[u8], cookie_out: &[u8]) -> Option<Rr> {
    if max_size == 0 && nsid_out.is_empty() && cookie_out.is_empty() {
        return None;
    }

    let mut raw = Vec::new();
    if !nsid_out.is_empty() {
        raw.extend_from_slice(&OPTION_NSID.to_be_bytes());
        raw.extend_from_slice(&(nsid_out.len() as u16).to_be_bytes());
        raw.extend_from_slice(nsid_out);
    }
    if !cookie_out.is_empty() {
        raw.extend_from_slice(&OPTION_COOKIE.to_be_bytes());
        raw.extend_from_slice(&(cookie_out.len() as u16).to_be_bytes());
        raw.extend_from_slice(cookie_out);
    }

    let advertised = if max_size > 0 {
        max_size
    } else {
        DEFAULT_UDP_SIZE
    };
    Some(Rr {
        owner: Name::root(),
        class: advertised.into(),
        ttl: Ttl::ZERO,
        rdata: Rdata::Opt(raw.into_boxed_slice()),
    })
}

////////////////////////////////////////////////////////////////////////
// COOKIE EXTRACTION                                                  //
////////////////////////////////////////////////////////////////////////

/// The cookie material found in a query's OPT record.
///
/// Whatever material is present is retained even when malformed, as it
/// may be of use for logging.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Cookies {
    pub present: bool,
    pub well_formed: bool,
    pub client: Vec<u8>,
    pub server: Vec<u8>,
}

impl Cookies {
    /// Extracts cookie material from a parsed OPT.
    pub fn from_opt(opt: &Opt) -> Self {
        let mut cookies = Self::default();
        let data = match opt.find(OPTION_COOKIE) {
            Some(data) => data,
            None => return cookies,
        };
        cookies.present = true;

        if data.is_empty() {
            // If the sub-option is present, so should the client cookie
            // be.
            return cookies;
        }
        if data.len() < CLIENT_COOKIE_LEN {
            cookies.client = data.to_vec(); // Logging material only
            return cookies;
        }

        cookies.client = data[..CLIENT_COOKIE_LEN].to_vec();
        cookies.server = data[CLIENT_COOKIE_LEN..].to_vec();
        cookies.well_formed = cookies.server.is_empty()
            || (SERVER_COOKIE_MIN..=SERVER_COOKIE_MAX).contains(&cookies.server.len());
        cookies
    }
}

////////////////////////////////////////////////////////////////////////
// SERVER COOKIES (RFC 9018 VERSION 1)                                //
////////////////////////////////////////////////////////////////////////

/// The pair of 64-bit SipHash-2-4 secrets used to mint server cookies.
///
/// Strictly, the secret should be configurable so that anycast server
/// instances can all mint the same cookie, but that deployment is
/// unlikely for this server, so a cryptographically strong random value
/// sampled once at process start is used instead.
#[derive(Clone, Copy)]
pub struct CookieSecrets {
    k0: u64,
    k1: u64,
}

impl CookieSecrets {
    /// Samples fresh secrets from the operating system's CSPRNG.
    pub fn generate() -> Self {
        Self {
            k0: OsRng.next_u64(),
            k1: OsRng.next_u64(),
        }
    }

    /// Constructs secrets from fixed parts, for tests.
    pub fn from_parts(k0: u64, k1: u64) -> Self {
        Self { k0, k1 }
    }
}

/// How long (in seconds) a cookie timestamp may lag `now` and still
/// validate.
const TS_MAX_AGE: u32 = 3600;

/// How far (in seconds) a cookie timestamp may lead `now` and still
/// validate (allowing for clock skew among anycast instances).
const TS_MAX_LEAD: u32 = 300;

/// Once a presented timestamp lags `now` by more than this, a fresh
/// cookie is issued alongside a successful validation.
const TS_REISSUE_AGE: u32 = 150;

/// The outcome of [`validate_or_mint`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CookieOutcome {
    /// Whether the presented server cookie matched what we would have
    /// minted for its timestamp.
    pub valid: bool,

    /// The full cookie (client + version 1 server cookie) to return to
    /// the client.
    pub out: [u8; COOKIE_V1_LEN],
}

/// Validates the presented server cookie, if any, and mints the cookie
/// to send back.
///
/// The presented cookie is trusted only if it is a well-formed version
/// 1 cookie whose timestamp lies within the RFC 1982 serial-number
/// window `[now - 3600, now + 300]`. A valid cookie older than
/// `now - 150` is answered with a freshly-stamped cookie; otherwise the
/// response echoes the presented timestamp, so that a client talking to
/// several anycast instances is not churned between timestamps.
///
/// Regardless of validity, `out` is always populated.
pub fn validate_or_mint(
    secrets: CookieSecrets,
    client_cookie: &[u8],
    server_cookie: &[u8],
    peer: IpAddr,
    now: u32,
) -> CookieOutcome {
    debug_assert_eq!(client_cookie.len(), CLIENT_COOKIE_LEN);

    if server_cookie.len() == SERVER_COOKIE_V1_LEN
        && server_cookie[0] == 1
        && server_cookie[1] == 0
        && server_cookie[2] == 0
        && server_cookie[3] == 0
    {
        let ts = u32::from_be_bytes(server_cookie[4..8].try_into().unwrap());
        let age = now.wrapping_sub(ts);
        let lead = ts.wrapping_sub(now);
        if age <= TS_MAX_AGE || lead <= TS_MAX_LEAD {
            let expected = mint(secrets, client_cookie, peer, ts);
            let valid = expected[CLIENT_COOKIE_LEN..] == *server_cookie;
            let out = if age <= TS_MAX_AGE && age > TS_REISSUE_AGE {
                mint(secrets, client_cookie, peer, now)
            } else {
                expected
            };
            return CookieOutcome { valid, out };
        }
    }

    CookieOutcome {
        valid: false,
        out: mint(secrets, client_cookie, peer, now),
    }
}

/// Mints a full version 1 cookie for the given client cookie, client
/// address, and timestamp.
///
/// The server cookie is laid out as version (1 octet), reserved
/// (3 octets), timestamp (4 octets, big-endian), and hash (8 octets).
/// The hash input is the client cookie, version, reserved, and
/// timestamp fields followed by the client IP (RFC 9018 § 4):
/// exactly 20 octets for IPv4 or 32 for IPv6.
pub fn mint(
    secrets: CookieSecrets,
    client_cookie: &[u8],
    peer: IpAddr,
    ts: u32,
) -> [u8; COOKIE_V1_LEN] {
    let mut input = ArrayVec::<u8, 32>::new();
    input.try_extend_from_slice(&client_cookie[..CLIENT_COOKIE_LEN]).unwrap();
    input.try_extend_from_slice(&[1, 0, 0, 0]).unwrap();
    input.try_extend_from_slice(&ts.to_be_bytes()).unwrap();
    match peer {
        IpAddr::V4(v4) => input.try_extend_from_slice(&v4.octets()).unwrap(),
        IpAddr::V6(v6) => input.try_extend_from_slice(&v6.octets()).unwrap(),
    }

    let mut hasher = SipHasher24::new_with_keys(secrets.k0, secrets.k1);
    hasher.write(&input);
    let sum = hasher.finish();

    let mut cookie = [0u8; COOKIE_V1_LEN];
    cookie[..CLIENT_COOKIE_LEN].copy_from_slice(&client_cookie[..CLIENT_COOKIE_LEN]);
    cookie[8] = 1;
    cookie[12..16].copy_from_slice(&ts.to_be_bytes());
    cookie[16..24].copy_from_slice(&sum.to_be_bytes());
    cookie
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT: &[u8] = &[0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];
    const PEER: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(192, 0, 2, 7));
    const NOW: u32 = 1357997531;

    fn secrets() -> CookieSecrets {
        CookieSecrets::from_parts(0x0123456789abcdef, 0xfedcba9876543210)
    }

    #[test]
    fn minting_is_deterministic() {
        let a = mint(secrets(), CLIENT, PEER, NOW);
        let b = mint(secrets(), CLIENT, PEER, NOW);
        assert_eq!(a, b);
        assert_eq!(&a[..8], CLIENT);
        assert_eq!(a[8], 1);
        assert_eq!(&a[9..12], &[0, 0, 0]);
        assert_eq!(a[12..16], NOW.to_be_bytes());
    }

    #[test]
    fn minting_varies_with_inputs() {
        let base = mint(secrets(), CLIENT, PEER, NOW);
        let other_ts = mint(secrets(), CLIENT, PEER, NOW + 1);
        let other_peer = mint(secrets(), CLIENT, "2001:db8::1".parse().unwrap(), NOW);
        let other_secrets = mint(CookieSecrets::from_parts(1, 2), CLIENT, PEER, NOW);
        assert_ne!(base[16..], other_ts[16..]);
        assert_ne!(base[16..], other_peer[16..]);
        assert_ne!(base[16..], other_secrets[16..]);
    }

    #[test]
    fn fresh_cookie_validates() {
        let minted = mint(secrets(), CLIENT, PEER, NOW);
        let outcome = validate_or_mint(secrets(), CLIENT, &minted[8..], PEER, NOW);
        assert!(outcome.valid);
        assert_eq!(outcome.out, minted);
    }

    #[test]
    fn cookie_within_window_validates() {
        let minted = mint(secrets(), CLIENT, PEER, NOW - 100);
        let outcome = validate_or_mint(secrets(), CLIENT, &minted[8..], PEER, NOW);
        assert!(outcome.valid);
        // Not yet old enough to reissue.
        assert_eq!(outcome.out[12..16], (NOW - 100).to_be_bytes());
    }

    #[test]
    fn old_cookie_validates_but_is_reissued() {
        let minted = mint(secrets(), CLIENT, PEER, NOW - 200);
        let outcome = validate_or_mint(secrets(), CLIENT, &minted[8..], PEER, NOW);
        assert!(outcome.valid);
        assert_eq!(outcome.out[12..16], NOW.to_be_bytes());
    }

    #[test]
    fn cookie_outside_window_does_not_validate() {
        let stale = mint(secrets(), CLIENT, PEER, NOW - 3601);
        let future = mint(secrets(), CLIENT, PEER, NOW + 301);
        for cookie in [stale, future] {
            let outcome = validate_or_mint(secrets(), CLIENT, &cookie[8..], PEER, NOW);
            assert!(!outcome.valid);
            assert_eq!(outcome.out[12..16], NOW.to_be_bytes());
        }
    }

    #[test]
    fn wrong_peer_does_not_validate() {
        let minted = mint(secrets(), CLIENT, PEER, NOW);
        let outcome = validate_or_mint(
            secrets(),
            CLIENT,
            &minted[8..],
            "192.0.2.8".parse().unwrap(),
            NOW,
        );
        assert!(!outcome.valid);
    }

    #[test]
    fn cookies_extraction_well_formedness() {
        let case = |data: &[u8]| {
            let opt = Opt {
                udp_size: 1232,
                version: 0,
                options: vec![(OPTION_COOKIE, data.to_vec().into_boxed_slice())],
            };
            Cookies::from_opt(&opt)
        };

        let client_only = case(CLIENT);
        assert!(client_only.present && client_only.well_formed);
        assert!(client_only.server.is_empty());

        let full = case(&mint(secrets(), CLIENT, PEER, NOW));
        assert!(full.present && full.well_formed);
        assert_eq!(full.server.len(), SERVER_COOKIE_V1_LEN);

        let short = case(&CLIENT[..4]);
        assert!(short.present && !short.well_formed);

        let bad_server = case(&[CLIENT, &[0u8; 4]].concat());
        assert!(bad_server.present && !bad_server.well_formed);

        let huge_server = case(&[CLIENT, &[0u8; 33]].concat());
        assert!(huge_server.present && !huge_server.well_formed);
    }

    #[test]
    fn opt_round_trip() {
        let rr = build_opt(1232, b"backptr-1", &mint(secrets(), CLIENT, PEER, NOW)).unwrap();
        let opt = Opt::from_rr(&rr).unwrap();
        assert_eq!(opt.udp_size, 1232);
        assert_eq!(opt.version, 0);
        assert_eq!(opt.find(OPTION_NSID), Some(&b"backptr-1"[..]));
        assert_eq!(opt.find(OPTION_COOKIE).unwrap().len(), COOKIE_V1_LEN);
    }

    #[test]
    fn empty_opt_is_suppressed() {
        assert!(build_opt(0, &[], &[]).is_none());
    }
}
