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

//! Implementation of the self-identification [`Probe`].

use std::net::{IpAddr, Ipv6Addr};

use rand::Rng;

use crate::arpa;
use crate::cidr::Cidr;
use crate::class::Class;
use crate::message::Question;
use crate::name::Name;
use crate::rr::{Rr, Ttl, Type};

/// The TTL on probe answers. Kept short in case a cache tries to
/// intervene.
const PROBE_TTL: u32 = 3;

////////////////////////////////////////////////////////////////////////
// PROBES                                                             //
////////////////////////////////////////////////////////////////////////

/// A one-off challenge that only the intended server instance can
/// answer.
///
/// The question and answer are semi-random to mitigate the risk of
/// over-helpful middleware intercepting DNS traffic and caching or
/// mangling it. Hopefully unlikely in our circumstances, but it doesn't
/// hurt to be too careful. For the probe to succeed, the target domain
/// must be a real domain on the global DNS which is delegated back to
/// this program instance.
///
/// Once created, a `Probe` is never modified, so it can be freely
/// shared between threads.
#[derive(Clone, Debug)]
pub struct Probe {
    target: Name,
    question: Question,
    answer: Rr,

    /// The candidate parents for the zone-cut walk, nearest first,
    /// already cut off at the walk's floor.
    cuts: Vec<Name>,
}

impl Probe {
    /// Creates a probe for a forward zone: a conservative, semi-random
    /// AAAA question with a documentation-prefix answer. The cut walk
    /// for a forward target stops at the TLD.
    pub fn forward(target: &Name, rng: &mut impl Rng) -> Self {
        let qname: Name = format!("{}.{}", random_alphas(rng, 5), target)
            .parse()
            .expect("random label under a valid name is a valid name");
        let question = Question {
            qname: qname.clone(),
            qtype: Type::AAAA,
            qclass: Class::IN,
        };
        let addr: Ipv6Addr = format!(
            "2001:db8::{}:{}:{}",
            random_hex(rng, 4),
            random_hex(rng, 4),
            random_hex(rng, 4),
        )
        .parse()
        .expect("random nibbles form a valid address");
        let answer = Rr::aaaa(qname, Ttl::from(PROBE_TTL), addr);

        Self {
            target: target.clone(),
            question,
            answer,
            cuts: walk_candidates(target, 1),
        }
    }

    /// Creates a probe for the reverse zone serving `cidr`: a PTR
    /// question for a random in-prefix host whose answer points at a
    /// random host under `ptr_domain` (normally the forward domain).
    ///
    /// The walk floor is a /8 parent for IPv4 and a /20 parent for
    /// IPv6. The random host avoids `.0` and `.255` in the IPv4 case
    /// and the nibbles `0` and `f` in the IPv6 case, for no strong
    /// reason.
    pub fn reverse(ptr_domain: &Name, cidr: &Cidr, rng: &mut impl Rng) -> Self {
        let target = cidr.reverse_apex();

        // Generate the query name by randomizing the low-order labels
        // of the prefix's base address.
        let full = arpa::ip_to_reverse_qname(cidr.addr());
        let mut labels: Vec<String> = full.labels().map(str::to_owned).collect();
        let min_labels = match cidr.addr() {
            IpAddr::V4(_) => {
                labels[0] = format!("{}", rng.gen_range(1..=254));
                3 // a /8 parent
            }
            IpAddr::V6(_) => {
                for label in labels.iter_mut().take(3) {
                    *label = format!("{:x}", rng.gen_range(1..=14));
                }
                7 // a /20 parent
            }
        };
        let qname: Name = (labels.join(".") + ".")
            .parse()
            .expect("relabeled reverse name is a valid name");

        let question = Question {
            qname: qname.clone(),
            qtype: Type::PTR,
            qclass: Class::IN,
        };
        let target_host: Name = format!("{}.{}", random_alphas(rng, 5), ptr_domain)
            .parse()
            .expect("random label under a valid name is a valid name");
        let answer = Rr::ptr(qname, Ttl::from(PROBE_TTL), target_host);

        Self {
            cuts: walk_candidates(&target, min_labels),
            target,
            question,
            answer,
        }
    }

    /// The apex of the zone whose delegation is being confirmed.
    pub fn target(&self) -> &Name {
        &self.target
    }

    /// The question the probe sends.
    pub fn question(&self) -> &Question {
        &self.question
    }

    /// The answer only this instance knows.
    pub fn answer(&self) -> &Rr {
        &self.answer
    }

    /// Returns whether `question` is the probe's question: same class,
    /// type, and canonical name. This is what the serving side asks to
    /// decide whether to send the probe answer.
    pub fn question_matches(&self, question: &Question) -> bool {
        question.qclass == self.answer.class
            && question.qtype == self.answer.rr_type()
            && question.qname == self.answer.owner
    }

    /// Returns whether `rr` near-enough matches the probe answer.
    /// Answers may not be bit-identical, as they could have passed
    /// through a cache or other meddleware, so TTL differences are
    /// tolerated.
    pub fn answer_matches(&self, rr: &Rr) -> bool {
        rr.eq_modulo_ttl(&self.answer)
    }

    /// Iterates over the candidate parents of the target, starting one
    /// label above it and walking toward the root until the floor for
    /// this kind of probe.
    pub fn cuts(&self) -> impl Iterator<Item = &Name> {
        self.cuts.iter()
    }

    /// The topmost parent the walk will consult.
    pub fn topmost(&self) -> Option<&Name> {
        self.cuts.last()
    }
}

/// Builds the candidate-parent list: every superdomain of `target`
/// (starting one label up) that still has at least `min_labels` labels.
fn walk_candidates(target: &Name, min_labels: usize) -> Vec<Name> {
    let mut cuts = Vec::new();
    let mut skip = 1;
    while let Some(parent) = target.superdomain(skip) {
        if parent.len() < min_labels {
            break;
        }
        cuts.push(parent);
        skip += 1;
    }
    cuts
}

/// Creates a string of `n` random uppercase letters. (The query name
/// they land in is canonicalized to lowercase; uniqueness is all that
/// matters here.)
fn random_alphas(rng: &mut impl Rng, n: usize) -> String {
    const ALPHAS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    (0..n)
        .map(|_| ALPHAS[rng.gen_range(0..ALPHAS.len())] as char)
        .collect()
}

/// Creates a string of `n` random hexadecimal digits.
fn random_hex(rng: &mut impl Rng, n: usize) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    (0..n)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
