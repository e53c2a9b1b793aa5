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

//! Decoding of on-the-wire DNS messages.

use std::fmt;

use super::constants::*;
use super::{Message, Opcode, Question, Rcode};
use crate::class::Class;
use crate::name::{self, Name, NameBuilder};
use crate::rr::{Rdata, Rr, Soa, Ttl, Type};

////////////////////////////////////////////////////////////////////////
// MESSAGE DECODING                                                   //
////////////////////////////////////////////////////////////////////////

/// Decodes a full DNS message. Trailing octets beyond the counted
/// sections are rejected as [`Error::TrailingOctets`].
pub fn read_message(octets: &[u8]) -> Result<Message, Error> {
    if octets.len() < HEADER_SIZE {
        return Err(Error::HeaderTooShort);
    }

    let mut message = Message::query(read_u16(octets, ID_START)?);
    message.qr = octets[QR_BYTE] & QR_MASK != 0;
    message.opcode = Opcode::try_from((octets[OPCODE_BYTE] & OPCODE_MASK) >> OPCODE_SHIFT)
        .expect("a four-bit field is always a valid opcode");
    message.aa = octets[AA_BYTE] & AA_MASK != 0;
    message.tc = octets[TC_BYTE] & TC_MASK != 0;
    message.rd = octets[RD_BYTE] & RD_MASK != 0;
    message.ra = octets[RA_BYTE] & RA_MASK != 0;
    message.rcode = Rcode::try_from(octets[RCODE_BYTE] & RCODE_MASK)
        .expect("a four-bit field is always a valid RCODE");

    let qdcount = read_u16(octets, QDCOUNT_START)?;
    let ancount = read_u16(octets, ANCOUNT_START)?;
    let nscount = read_u16(octets, NSCOUNT_START)?;
    let arcount = read_u16(octets, ARCOUNT_START)?;

    let mut cursor = HEADER_SIZE;
    for _ in 0..qdcount {
        let (question, len) = read_question(octets, cursor)?;
        message.questions.push(question);
        cursor += len;
    }
    for _ in 0..ancount {
        let (rr, len) = read_rr(octets, cursor)?;
        message.answers.push(rr);
        cursor += len;
    }
    for _ in 0..nscount {
        let (rr, len) = read_rr(octets, cursor)?;
        message.authorities.push(rr);
        cursor += len;
    }
    for _ in 0..arcount {
        let (rr, len) = read_rr(octets, cursor)?;
        message.additionals.push(rr);
        cursor += len;
    }

    if cursor != octets.len() {
        Err(Error::TrailingOctets)
    } else {
        Ok(message)
    }
}

/// Reads a question at `start`. Returns the question and the number of
/// contiguous octets consumed.
pub fn read_question(octets: &[u8], start: usize) -> Result<(Question, usize), Error> {
    let (qname, qname_len) = read_name(octets, start)?;
    let qtype = read_u16(octets, start + qname_len)?.into();
    let qclass = read_u16(octets, start + qname_len + 2)?.into();
    Ok((
        Question {
            qname,
            qtype,
            qclass,
        },
        qname_len + 4,
    ))
}

/// Reads a resource record at `start`. Returns the record and the
/// number of contiguous octets consumed.
pub fn read_rr(octets: &[u8], start: usize) -> Result<(Rr, usize), Error> {
    let (owner, owner_len) = read_name(octets, start)?;
    let rr_type: Type = read_u16(octets, start + owner_len)?.into();
    let class: Class = read_u16(octets, start + owner_len + 2)?.into();
    let ttl: Ttl = read_u32(octets, start + owner_len + 4)?.into();
    let rdlength = read_u16(octets, start + owner_len + 8)? as usize;
    let rdata_start = start + owner_len + 10;
    if octets.len() < rdata_start + rdlength {
        return Err(Error::UnexpectedEom);
    }
    let rdata = read_rdata(octets, rdata_start, rdlength, rr_type)?;
    Ok((
        Rr {
            owner,
            class,
            ttl,
            rdata,
        },
        owner_len + 10 + rdlength,
    ))
}

/// Decodes the RDATA of a record of type `rr_type` occupying
/// `octets[start..start + rdlength]`. Embedded names of the well-known
/// types may be compressed ([RFC 3597 § 4] permits decompressing them
/// but no others).
///
/// [RFC 3597 § 4]: https://datatracker.ietf.org/doc/html/rfc3597#section-4
fn read_rdata(octets: &[u8], start: usize, rdlength: usize, rr_type: Type) -> Result<Rdata, Error> {
    let raw = &octets[start..start + rdlength];
    match rr_type {
        Type::A => {
            let array: [u8; 4] = raw.try_into().or(Err(Error::InvalidRdata))?;
            Ok(Rdata::A(array.into()))
        }
        Type::AAAA => {
            let array: [u8; 16] = raw.try_into().or(Err(Error::InvalidRdata))?;
            Ok(Rdata::Aaaa(array.into()))
        }
        Type::NS | Type::CNAME | Type::PTR => {
            let (name, len) = read_name(octets, start)?;
            if len != rdlength {
                return Err(Error::InvalidRdata);
            }
            Ok(match rr_type {
                Type::NS => Rdata::Ns(name),
                Type::CNAME => Rdata::Cname(name),
                _ => Rdata::Ptr(name),
            })
        }
        Type::SOA => {
            let (mname, mname_len) = read_name(octets, start)?;
            let (rname, rname_len) = read_name(octets, start + mname_len)?;
            let fixed = start + mname_len + rname_len;
            if fixed + 20 != start + rdlength {
                return Err(Error::InvalidRdata);
            }
            Ok(Rdata::Soa(Soa {
                mname,
                rname,
                serial: read_u32(octets, fixed)?,
                refresh: read_u32(octets, fixed + 4)?,
                retry: read_u32(octets, fixed + 8)?,
                expire: read_u32(octets, fixed + 12)?,
                minimum: read_u32(octets, fixed + 16)?,
            }))
        }
        Type::TXT => {
            let mut strings = Vec::new();
            let mut cursor = 0;
            while cursor < raw.len() {
                let len = raw[cursor] as usize;
                if cursor + 1 + len > raw.len() {
                    return Err(Error::InvalidRdata);
                }
                strings.push(raw[cursor + 1..cursor + 1 + len].to_vec().into_boxed_slice());
                cursor += 1 + len;
            }
            if strings.is_empty() {
                return Err(Error::InvalidRdata);
            }
            Ok(Rdata::Txt(strings))
        }
        Type::OPT => Ok(Rdata::Opt(raw.to_vec().into_boxed_slice())),
        _ => Ok(Rdata::Other(rr_type, raw.to_vec().into_boxed_slice())),
    }
}

////////////////////////////////////////////////////////////////////////
// NAME DECODING                                                      //
////////////////////////////////////////////////////////////////////////

/// The number of compression pointers we are willing to follow in a
/// single name before declaring a loop.
const MAX_POINTERS: usize = 127;

/// Reads a (possibly compressed) name starting at `start`. Pointers may
/// only point backward. Returns the name and the number of *contiguous*
/// octets consumed at `start` (i.e. the amount to skip to reach the
/// next message field; a leading pointer consumes two octets).
pub fn read_name(octets: &[u8], start: usize) -> Result<(Name, usize), Error> {
    let mut builder = NameBuilder::new();
    let mut cursor = start;
    let mut contiguous = None;
    let mut pointers = 0;

    loop {
        let length_octet = *octets.get(cursor).ok_or(Error::UnexpectedEom)?;
        match length_octet {
            0 => {
                let consumed = contiguous.unwrap_or_else(|| cursor + 1 - start);
                return Ok((builder.finish(), consumed));
            }
            len @ 1..=63 => {
                let label_start = cursor + 1;
                let label_end = label_start + len as usize;
                if octets.len() < label_end {
                    return Err(Error::UnexpectedEom);
                }
                builder
                    .push_label(&octets[label_start..label_end])
                    .map_err(Error::InvalidName)?;
                cursor = label_end;
            }
            0xc0..=0xff => {
                let second = *octets.get(cursor + 1).ok_or(Error::UnexpectedEom)?;
                let target = ((length_octet as usize & 0x3f) << 8) | second as usize;
                if target >= cursor {
                    return Err(Error::ForwardPointer);
                }
                pointers += 1;
                if pointers > MAX_POINTERS {
                    return Err(Error::PointerLoop);
                }
                contiguous.get_or_insert_with(|| cursor + 2 - start);
                cursor = target;
            }
            _ => return Err(Error::InvalidLabelType),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// HELPERS FOR READING MULTI-BYTE INTEGERS                            //
////////////////////////////////////////////////////////////////////////

fn read_u16(octets: &[u8], start: usize) -> Result<u16, Error> {
    octets
        .get(start..start + 2)
        .map(|s| u16::from_be_bytes(s.try_into().unwrap()))
        .ok_or(Error::UnexpectedEom)
}

fn read_u32(octets: &[u8], start: usize) -> Result<u32, Error> {
    octets
        .get(start..start + 4)
        .map(|s| u32::from_be_bytes(s.try_into().unwrap()))
        .ok_or(Error::UnexpectedEom)
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error encountered while decoding a DNS message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    HeaderTooShort,
    UnexpectedEom,
    TrailingOctets,
    InvalidLabelType,
    ForwardPointer,
    PointerLoop,
    InvalidName(name::Error),
    InvalidRdata,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::HeaderTooShort => f.write_str("message too short for a DNS header"),
            Self::UnexpectedEom => f.write_str("unexpected end of message"),
            Self::TrailingOctets => f.write_str("trailing octets after counted sections"),
            Self::InvalidLabelType => f.write_str("unknown label type"),
            Self::ForwardPointer => f.write_str("compression pointer does not point backward"),
            Self::PointerLoop => f.write_str("too many compression pointers"),
            Self::InvalidName(e) => write!(f, "invalid name: {}", e),
            Self::InvalidRdata => f.write_str("malformed RDATA"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidName(e) => Some(e),
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

    #[test]
    fn read_name_handles_uncompressed_names() {
        let octets = b"\x07example\x04test\x00";
        let (name, len) = read_name(octets, 0).unwrap();
        assert_eq!(name, "example.test.".parse().unwrap());
        assert_eq!(len, octets.len());
    }

    #[test]
    fn read_name_follows_pointers() {
        // "example.test." at offset 0; "www" + pointer to 0 at offset 14.
        let mut octets = b"\x07example\x04test\x00".to_vec();
        octets.extend_from_slice(b"\x03www\xc0\x00");
        let (name, len) = read_name(&octets, 14).unwrap();
        assert_eq!(name, "www.example.test.".parse().unwrap());
        assert_eq!(len, 6);
    }

    #[test]
    fn read_name_rejects_forward_pointers() {
        let octets = b"\xc0\x04\x00\x00\x07example\x00";
        assert_eq!(read_name(octets, 0), Err(Error::ForwardPointer));
    }

    #[test]
    fn read_name_lowercases() {
        let octets = b"\x07EXAMPLE\x04Test\x00";
        let (name, _) = read_name(octets, 0).unwrap();
        assert_eq!(name.as_str(), "example.test.");
    }

    #[test]
    fn read_message_decodes_a_query() {
        let mut octets = Vec::new();
        octets.extend_from_slice(&0x1234u16.to_be_bytes()); // ID
        octets.extend_from_slice(&[0x01, 0x00]); // RD set
        octets.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0]); // counts
        octets.extend_from_slice(b"\x04host\x04test\x00");
        octets.extend_from_slice(&u16::from(Type::A).to_be_bytes());
        octets.extend_from_slice(&u16::from(Class::IN).to_be_bytes());

        let message = read_message(&octets).unwrap();
        assert_eq!(message.id, 0x1234);
        assert!(!message.qr);
        assert!(message.rd);
        assert_eq!(message.questions.len(), 1);
        let question = message.first_question().unwrap();
        assert_eq!(question.qname, "host.test.".parse().unwrap());
        assert_eq!(question.qtype, Type::A);
        assert_eq!(question.qclass, Class::IN);
    }

    #[test]
    fn read_message_rejects_trailing_octets() {
        let mut octets = vec![0u8; HEADER_SIZE];
        octets.push(0xff);
        assert_eq!(read_message(&octets), Err(Error::TrailingOctets));
    }

    #[test]
    fn read_rr_decodes_a_record() {
        let mut octets = Vec::new();
        octets.extend_from_slice(b"\x04host\x04test\x00");
        octets.extend_from_slice(&u16::from(Type::A).to_be_bytes());
        octets.extend_from_slice(&u16::from(Class::IN).to_be_bytes());
        octets.extend_from_slice(&3600u32.to_be_bytes());
        octets.extend_from_slice(&4u16.to_be_bytes());
        octets.extend_from_slice(&[192, 0, 2, 1]);

        let (rr, len) = read_rr(&octets, 0).unwrap();
        assert_eq!(len, octets.len());
        assert_eq!(rr.owner, "host.test.".parse().unwrap());
        assert_eq!(rr.ttl, Ttl::from(3600));
        assert_eq!(rr.rdata, Rdata::A([192, 0, 2, 1].into()));
    }

    #[test]
    fn read_rdata_rejects_bad_address_length() {
        let mut octets = Vec::new();
        octets.extend_from_slice(b"\x04host\x04test\x00");
        octets.extend_from_slice(&u16::from(Type::A).to_be_bytes());
        octets.extend_from_slice(&u16::from(Class::IN).to_be_bytes());
        octets.extend_from_slice(&3600u32.to_be_bytes());
        octets.extend_from_slice(&3u16.to_be_bytes());
        octets.extend_from_slice(&[192, 0, 2]);
        assert_eq!(read_rr(&octets, 0), Err(Error::InvalidRdata));
    }
}
