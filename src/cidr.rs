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

//! Implementation of the [`Cidr`] prefix type for reverse zones.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::arpa;
use crate::name::Name;

////////////////////////////////////////////////////////////////////////
// CIDR PREFIXES                                                      //
////////////////////////////////////////////////////////////////////////

/// An address prefix describing the coverage of one reverse zone.
///
/// Reverse delegation happens on label boundaries, so the prefix length
/// is restricted to what the `in-addr.arpa.`/`ip6.arpa.` namespaces can
/// express: one of 8, 16, or 24 for IPv4, and a multiple of 4 between
/// 16 and 124 for IPv6. (An IPv4 /32 or IPv6 /128 would be a single
/// address, not a zone.) The address is masked down to the prefix at
/// construction, so `192.0.2.99/24` and `192.0.2.0/24` are the same
/// `Cidr`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Cidr {
    addr: IpAddr,
    prefix_len: u8,
}

impl Cidr {
    /// Creates a `Cidr`, enforcing the prefix-length rules above.
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self, Error> {
        match addr {
            IpAddr::V4(_) => {
                if !matches!(prefix_len, 8 | 16 | 24) {
                    return Err(Error::BadV4PrefixLen(prefix_len));
                }
            }
            IpAddr::V6(_) => {
                if prefix_len % 4 != 0 || !(16..=124).contains(&prefix_len) {
                    return Err(Error::BadV6PrefixLen(prefix_len));
                }
            }
        }
        Ok(Self {
            addr: mask(addr, prefix_len),
            prefix_len,
        })
    }

    /// Returns the (masked) base address.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Returns the prefix length.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Returns whether `ip` lies inside this prefix. An address of the
    /// other family never matches.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => {
                mask(ip, self.prefix_len) == self.addr
            }
            _ => false,
        }
    }

    /// Returns the apex of the reverse zone serving this prefix: the
    /// reverse name of the base address with the labels covering the
    /// host part removed.
    pub fn reverse_apex(&self) -> Name {
        let full = arpa::ip_to_reverse_qname(self.addr);
        let skip = match self.addr {
            IpAddr::V4(_) => 4 - self.prefix_len as usize / 8,
            IpAddr::V6(_) => 32 - self.prefix_len as usize / 4,
        };
        full.superdomain(skip)
            .expect("prefix-length rules leave at least one address label")
    }

    /// Returns whether the base address is from the RFC 1918 (IPv4) or
    /// RFC 4193 (IPv6 unique local) private ranges, the expected use
    /// for locally served reverse zones.
    pub fn is_private(&self) -> bool {
        match self.addr {
            IpAddr::V4(v4) => v4.is_private(),
            IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00,
        }
    }
}

/// Masks `ip` down to its first `prefix_len` bits.
fn mask(ip: IpAddr, prefix_len: u8) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => {
            let value = u32::from(v4);
            let masked = if prefix_len == 0 {
                0
            } else {
                value & (u32::MAX << (32 - prefix_len as u32))
            };
            IpAddr::V4(masked.into())
        }
        IpAddr::V6(v6) => {
            let value = u128::from(v6);
            let masked = if prefix_len == 0 {
                0
            } else {
                value & (u128::MAX << (128 - prefix_len as u32))
            };
            IpAddr::V6(masked.into())
        }
    }
}

impl FromStr for Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s.split_once('/').ok_or(Error::MissingPrefixLen)?;
        let addr: IpAddr = addr.parse().map_err(|_| Error::BadAddress)?;
        let prefix_len: u8 = len.parse().map_err(|_| Error::BadPrefixLen)?;
        Self::new(addr, prefix_len)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error encountered while constructing a [`Cidr`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    MissingPrefixLen,
    BadAddress,
    BadPrefixLen,
    BadV4PrefixLen(u8),
    BadV6PrefixLen(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MissingPrefixLen => f.write_str("missing /prefix-length"),
            Self::BadAddress => f.write_str("invalid IP address"),
            Self::BadPrefixLen => f.write_str("prefix length is not an integer"),
            Self::BadV4PrefixLen(len) => {
                write!(f, "IPv4 prefix length {} is not one of 8, 16, or 24", len)
            }
            Self::BadV6PrefixLen(len) => write!(
                f,
                "IPv6 prefix length {} is not a multiple of 4 in 16..=124",
                len
            ),
        }
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
