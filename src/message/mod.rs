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

//! Implementation of reading and writing of DNS messages.

mod constants;
mod opcode;
mod question;
mod rcode;
pub mod reader;
pub mod writer;
pub use constants::HEADER_SIZE;
pub use opcode::{IntoOpcodeError, Opcode};
pub use question::Question;
pub use rcode::{IntoRcodeError, Rcode};

use crate::rr::{Rr, Type};

////////////////////////////////////////////////////////////////////////
// MESSAGES                                                           //
////////////////////////////////////////////////////////////////////////

/// An owned DNS message.
///
/// Messages are decoded from the wire with [`Message::from_wire`] and
/// encoded with [`Message::to_wire`]. Header counts are not stored;
/// they are implied by the section vectors and recomputed on encoding,
/// so a `Message` can never disagree with itself about how many records
/// it carries.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub id: u16,
    pub qr: bool,
    pub opcode: Opcode,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub rcode: Rcode,
    pub questions: Vec<Question>,
    pub answers: Vec<Rr>,
    pub authorities: Vec<Rr>,
    pub additionals: Vec<Rr>,
}

impl Message {
    /// Creates an empty query message with the given ID.
    pub fn query(id: u16) -> Self {
        Self {
            id,
            qr: false,
            opcode: Opcode::QUERY,
            aa: false,
            tc: false,
            rd: false,
            ra: false,
            rcode: Rcode::NoError,
            questions: Vec::new(),
            answers: Vec::new(),
            authorities: Vec::new(),
            additionals: Vec::new(),
        }
    }

    /// Creates a response to `query`: the ID, opcode, and question are
    /// copied, QR is set, and (for opcode QUERY only, per the ISC
    /// compliance tool) RD is echoed.
    pub fn response_to(query: &Message) -> Self {
        let mut response = Self::query(query.id);
        response.qr = true;
        response.opcode = query.opcode;
        if query.opcode == Opcode::QUERY {
            response.rd = query.rd;
        }
        response.questions = query.questions.clone();
        response
    }

    /// Returns the first question, if any.
    pub fn first_question(&self) -> Option<&Question> {
        self.questions.first()
    }

    /// Returns the additional-section OPT record, if any.
    pub fn opt_rr(&self) -> Option<&Rr> {
        self.additionals.iter().find(|rr| rr.rr_type() == Type::OPT)
    }

    /// Decodes a message from its wire form.
    pub fn from_wire(octets: &[u8]) -> Result<Self, reader::Error> {
        reader::read_message(octets)
    }

    /// Encodes the message. `limit` caps the encoded size; zero means
    /// the TCP maximum of 65,535 octets. If answer or authority records
    /// have to be dropped to fit, TC is set in the encoded header.
    pub fn to_wire(&self, limit: usize) -> Vec<u8> {
        writer::write_message(self, limit)
    }
}
