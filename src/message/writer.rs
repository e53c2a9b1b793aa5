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

//! Encoding of on-the-wire DNS messages.

use std::collections::HashMap;

use super::constants::*;
use super::Message;
use crate::name::{self, Name};
use crate::rr::{Rdata, Rr, Type};

////////////////////////////////////////////////////////////////////////
// MESSAGE ENCODING                                                   //
////////////////////////////////////////////////////////////////////////

/// Encodes `message`, producing at most `limit` octets (zero selects
/// the TCP maximum of 65,535).
///
/// Owner names are compressed per [RFC 1035 § 4.1.4]; names embedded in
/// RDATA are written uncompressed. Space for any OPT record in the
/// additional section is reserved up front, so EDNS information
/// survives truncation. If an answer or authority record must be
/// dropped to honor `limit`, the remainder of its section and all
/// following records are dropped and TC is set; additional records
/// that do not fit are dropped silently, as they are not required data.
///
/// [RFC 1035 § 4.1.4]: https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.4
pub fn write_message(message: &Message, limit: usize) -> Vec<u8> {
    let limit = if limit == 0 {
        MAX_TCP_MESSAGE
    } else {
        limit.clamp(HEADER_SIZE, MAX_TCP_MESSAGE)
    };

    let mut writer = Writer {
        octets: vec![0; HEADER_SIZE],
        offsets: HashMap::new(),
        limit,
    };

    // Pseudo-RRs must survive truncation of the data sections.
    let reserved: usize = message
        .additionals
        .iter()
        .filter(|rr| rr.rr_type() == Type::OPT)
        .map(Writer::rr_size_upper_bound)
        .sum();

    let mut qdcount = 0u16;
    for question in &message.questions {
        if writer.write_question(question, reserved).is_err() {
            break;
        }
        qdcount += 1;
    }

    let mut truncated = false;
    let mut ancount = 0u16;
    for rr in &message.answers {
        if writer.write_rr(rr, reserved).is_err() {
            truncated = true;
            break;
        }
        ancount += 1;
    }

    let mut nscount = 0u16;
    if !truncated {
        for rr in &message.authorities {
            if writer.write_rr(rr, reserved).is_err() {
                truncated = true;
                break;
            }
            nscount += 1;
        }
    }

    let mut arcount = 0u16;
    if !truncated {
        for rr in &message.additionals {
            if writer.write_rr(rr, 0).is_err() {
                break;
            }
            arcount += 1;
        }
    } else {
        // Keep only the pseudo-RRs whose space we reserved.
        for rr in message.additionals.iter().filter(|rr| rr.rr_type() == Type::OPT) {
            if writer.write_rr(rr, 0).is_err() {
                break;
            }
            arcount += 1;
        }
    }

    let octets = &mut writer.octets;
    octets[ID_START..ID_START + 2].copy_from_slice(&message.id.to_be_bytes());
    if message.qr {
        octets[QR_BYTE] |= QR_MASK;
    }
    octets[OPCODE_BYTE] |= (u8::from(message.opcode) << OPCODE_SHIFT) & OPCODE_MASK;
    if message.aa {
        octets[AA_BYTE] |= AA_MASK;
    }
    if message.tc || truncated {
        octets[TC_BYTE] |= TC_MASK;
    }
    if message.rd {
        octets[RD_BYTE] |= RD_MASK;
    }
    if message.ra {
        octets[RA_BYTE] |= RA_MASK;
    }
    octets[RCODE_BYTE] |= u8::from(message.rcode) & RCODE_MASK;
    octets[QDCOUNT_START..QDCOUNT_START + 2].copy_from_slice(&qdcount.to_be_bytes());
    octets[ANCOUNT_START..ANCOUNT_START + 2].copy_from_slice(&ancount.to_be_bytes());
    octets[NSCOUNT_START..NSCOUNT_START + 2].copy_from_slice(&nscount.to_be_bytes());
    octets[ARCOUNT_START..ARCOUNT_START + 2].copy_from_slice(&arcount.to_be_bytes());

    writer.octets
}

////////////////////////////////////////////////////////////////////////
// WRITER INTERNALS                                                   //
////////////////////////////////////////////////////////////////////////

/// Signals that a record did not fit within the size limit.
struct Overflow;

struct Writer {
    octets: Vec<u8>,
    offsets: HashMap<String, u16>,
    limit: usize,
}

impl Writer {
    /// An upper bound on the encoded size of `rr`, assuming no
    /// compression.
    fn rr_size_upper_bound(rr: &Rr) -> usize {
        rr.owner.wire_len() + 10 + Self::rdata_size_upper_bound(&rr.rdata)
    }

    fn rdata_size_upper_bound(rdata: &Rdata) -> usize {
        match rdata {
            Rdata::A(_) => 4,
            Rdata::Aaaa(_) => 16,
            Rdata::Ns(name) | Rdata::Cname(name) | Rdata::Ptr(name) => name.wire_len(),
            Rdata::Soa(soa) => soa.mname.wire_len() + soa.rname.wire_len() + 20,
            Rdata::Txt(strings) => strings.iter().map(|s| 1 + s.len()).sum(),
            Rdata::Opt(raw) | Rdata::Other(_, raw) => raw.len(),
        }
    }

    fn write_question(
        &mut self,
        question: &super::Question,
        reserved: usize,
    ) -> Result<(), Overflow> {
        let mark = self.octets.len();
        self.write_name(&question.qname, true);
        self.octets
            .extend_from_slice(&u16::from(question.qtype).to_be_bytes());
        self.octets
            .extend_from_slice(&u16::from(question.qclass).to_be_bytes());
        self.commit(mark, reserved)
    }

    fn write_rr(&mut self, rr: &Rr, reserved: usize) -> Result<(), Overflow> {
        let mark = self.octets.len();
        self.write_name(&rr.owner, true);
        self.octets
            .extend_from_slice(&u16::from(rr.rr_type()).to_be_bytes());
        self.octets
            .extend_from_slice(&u16::from(rr.class).to_be_bytes());
        self.octets
            .extend_from_slice(&u32::from(rr.ttl).to_be_bytes());
        let rdlength_at = self.octets.len();
        self.octets.extend_from_slice(&[0, 0]);
        self.write_rdata(&rr.rdata);
        let rdlength = (self.octets.len() - rdlength_at - 2) as u16;
        self.octets[rdlength_at..rdlength_at + 2].copy_from_slice(&rdlength.to_be_bytes());
        self.commit(mark, reserved)
    }

    fn write_rdata(&mut self, rdata: &Rdata) {
        match rdata {
            Rdata::A(addr) => self.octets.extend_from_slice(&addr.octets()),
            Rdata::Aaaa(addr) => self.octets.extend_from_slice(&addr.octets()),
            Rdata::Ns(name) | Rdata::Cname(name) | Rdata::Ptr(name) => {
                self.write_name(name, false)
            }
            Rdata::Soa(soa) => {
                self.write_name(&soa.mname, false);
                self.write_name(&soa.rname, false);
                self.octets.extend_from_slice(&soa.serial.to_be_bytes());
                self.octets.extend_from_slice(&soa.refresh.to_be_bytes());
                self.octets.extend_from_slice(&soa.retry.to_be_bytes());
                self.octets.extend_from_slice(&soa.expire.to_be_bytes());
                self.octets.extend_from_slice(&soa.minimum.to_be_bytes());
            }
            Rdata::Txt(strings) => {
                for string in strings {
                    self.octets.push(string.len() as u8);
                    self.octets.extend_from_slice(string);
                }
            }
            Rdata::Opt(raw) | Rdata::Other(_, raw) => self.octets.extend_from_slice(raw),
        }
    }

    /// Writes `name`, using and (when `compress` is set) extending the
    /// compression dictionary.
    fn write_name(&mut self, name: &Name, compress: bool) {
        let text = name.as_str();
        let mut position = 0;
        for label in name.labels() {
            if compress {
                if let Some(&offset) = self.offsets.get(&text[position..]) {
                    let pointer = 0xc000u16 | offset;
                    self.octets.extend_from_slice(&pointer.to_be_bytes());
                    return;
                }
                if self.octets.len() <= POINTER_MAX {
                    self.offsets
                        .insert(text[position..].to_owned(), self.octets.len() as u16);
                }
            }
            let raw = name::unescape(label);
            self.octets.push(raw.len() as u8);
            self.octets.extend_from_slice(&raw);
            position += label.len() + 1;
        }
        self.octets.push(0);
    }

    /// Checks the size limit after writing an element at `mark`. On
    /// overflow, the element is removed again, along with any
    /// compression dictionary entries pointing into it.
    fn commit(&mut self, mark: usize, reserved: usize) -> Result<(), Overflow> {
        if self.octets.len() + reserved > self.limit {
            self.octets.truncate(mark);
            self.offsets.retain(|_, &mut offset| (offset as usize) < mark);
            Err(Overflow)
        } else {
            Ok(())
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::super::reader;
    use super::*;
    use crate::class::Class;
    use crate::message::{Opcode, Question, Rcode};
    use crate::rr::Ttl;

    fn a_question(qname: &str) -> Question {
        Question {
            qname: qname.parse().unwrap(),
            qtype: Type::A,
            qclass: Class::IN,
        }
    }

    fn a_message() -> Message {
        let mut message = Message::query(0x0102);
        message.qr = true;
        message.aa = true;
        message.rcode = Rcode::NoError;
        message.questions.push(a_question("host.example.test."));
        message.answers.push(Rr::a(
            "host.example.test.".parse().unwrap(),
            Ttl::from(60),
            [192, 0, 2, 1].into(),
        ));
        message
    }

    #[test]
    fn round_trip_preserves_the_message() {
        let message = a_message();
        let octets = write_message(&message, 0);
        let decoded = reader::read_message(&octets).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn owner_names_are_compressed() {
        let message = a_message();
        let octets = write_message(&message, 0);
        // The answer's owner equals the qname, so it must be written as
        // a single pointer to offset 12.
        let qname_len = "host.example.test.".parse::<crate::name::Name>().unwrap().wire_len();
        let answer_owner_at = HEADER_SIZE + qname_len + 4;
        assert_eq!(octets[answer_owner_at], 0xc0);
        assert_eq!(octets[answer_owner_at + 1], HEADER_SIZE as u8);
    }

    #[test]
    fn header_bits_are_encoded() {
        let mut message = a_message();
        message.opcode = Opcode::NOTIFY;
        message.rd = true;
        message.rcode = Rcode::Refused;
        let octets = write_message(&message, 0);
        let decoded = reader::read_message(&octets).unwrap();
        assert_eq!(decoded.opcode, Opcode::NOTIFY);
        assert!(decoded.rd);
        assert!(decoded.aa);
        assert_eq!(decoded.rcode, Rcode::Refused);
    }

    #[test]
    fn truncation_drops_answers_and_sets_tc() {
        let mut message = a_message();
        for i in 0..100 {
            message.answers.push(Rr::a(
                "host.example.test.".parse().unwrap(),
                Ttl::from(60),
                [192, 0, 2, i].into(),
            ));
        }
        let octets = write_message(&message, 512);
        assert!(octets.len() <= 512);
        let decoded = reader::read_message(&octets).unwrap();
        assert!(decoded.tc);
        assert!(decoded.answers.len() < 101);
        assert!(!decoded.answers.is_empty());
    }

    #[test]
    fn truncation_preserves_the_opt_record() {
        let mut message = a_message();
        for i in 0..100 {
            message.answers.push(Rr::a(
                "host.example.test.".parse().unwrap(),
                Ttl::from(60),
                [192, 0, 2, i].into(),
            ));
        }
        message.additionals.push(Rr {
            owner: crate::name::Name::root(),
            class: Class::from(1232),
            ttl: Ttl::ZERO,
            rdata: Rdata::Opt(Box::from(&[][..])),
        });
        let octets = write_message(&message, 512);
        assert!(octets.len() <= 512);
        let decoded = reader::read_message(&octets).unwrap();
        assert!(decoded.tc);
        assert_eq!(decoded.additionals.len(), 1);
        assert_eq!(decoded.additionals[0].rr_type(), Type::OPT);
    }

    #[test]
    fn zero_limit_means_tcp_maximum() {
        let mut message = a_message();
        for i in 0..200u16 {
            message.answers.push(Rr::a(
                "host.example.test.".parse().unwrap(),
                Ttl::from(60),
                [192, 0, (i >> 8) as u8, i as u8].into(),
            ));
        }
        let octets = write_message(&message, 0);
        let decoded = reader::read_message(&octets).unwrap();
        assert!(!decoded.tc);
        assert_eq!(decoded.answers.len(), 201);
    }
}
