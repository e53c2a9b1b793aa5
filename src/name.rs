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

//! Implementation of the [`Name`] type for domain names.

use std::fmt;
use std::str::FromStr;

/// The maximum length of the uncompressed on-the-wire representation of
/// a domain name.
const MAX_WIRE_LEN: usize = 255;

/// The maximum length of a label in a domain name (not including the
/// octet that provides the length).
const MAX_LABEL_LEN: usize = 63;

////////////////////////////////////////////////////////////////////////
// NAME STRUCTURE                                                     //
////////////////////////////////////////////////////////////////////////

/// A domain name, held in its canonical text form.
///
/// A `Name` is always fully qualified and lowercased: the stored text
/// ends with the root label (a trailing `.`), and all ASCII letters are
/// folded to lowercase at construction time. Canonicalizing once, up
/// front, means that equality, hashing, and suffix matching elsewhere
/// in the crate are simple string operations.
///
/// Label octets that are not printable ASCII, as well as literal dots
/// and backslashes within a label, are stored in the escaped form of
/// [RFC 4343 § 2.1] (`\X` and `\DDD`), so the stored text never
/// contains a `.` that is not a label separator. The [`FromStr`]
/// implementation accepts the same escapes.
///
/// [RFC 4343 § 2.1]: https://datatracker.ietf.org/doc/html/rfc4343#section-2.1
#[derive(Clone, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Name {
    text: Box<str>,
}

impl Name {
    /// Returns the `Name` representing the DNS root, `.`.
    pub fn root() -> Self {
        Self { text: ".".into() }
    }

    /// Returns whether the `Name` is the DNS root.
    pub fn is_root(&self) -> bool {
        &*self.text == "."
    }

    /// Returns the canonical text form, including the trailing dot.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns the number of labels, not counting the root.
    pub fn len(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.text.split('.').count() - 1
        }
    }

    /// Returns whether the name has no labels other than the root.
    pub fn is_empty(&self) -> bool {
        self.is_root()
    }

    /// Returns an iterator over the (escaped) text of each label,
    /// starting with the leftmost. The root label is not included.
    pub fn labels(&self) -> impl DoubleEndedIterator<Item = &str> {
        let stripped = if self.is_root() {
            ""
        } else {
            self.text.strip_suffix('.').unwrap_or(&self.text)
        };
        stripped.split('.').filter(|l| !l.is_empty())
    }

    /// Returns whether this `Name` is equal to `parent` or a subdomain
    /// of it. Every name is in bailiwick of the root.
    pub fn eq_or_subdomain_of(&self, parent: &Name) -> bool {
        if parent.is_root() || self == parent {
            return true;
        }
        self.text.len() > parent.text.len()
            && self.text.ends_with(&*parent.text)
            && self.text.as_bytes()[self.text.len() - parent.text.len() - 1] == b'.'
    }

    /// Returns the (escaped) text of the labels in front of `parent`,
    /// without a trailing dot, or `None` if this name is not equal to
    /// or a subdomain of `parent`. When the names are equal, the
    /// returned prefix is empty.
    pub fn strip_suffix(&self, parent: &Name) -> Option<&str> {
        if !self.eq_or_subdomain_of(parent) {
            None
        } else if self == parent {
            Some("")
        } else if parent.is_root() {
            Some(self.text.strip_suffix('.').unwrap_or(&self.text))
        } else {
            Some(&self.text[..self.text.len() - parent.text.len() - 1])
        }
    }

    /// Returns the superdomain obtained by skipping the first `skip`
    /// labels, or `None` if there aren't that many labels.
    pub fn superdomain(&self, skip: usize) -> Option<Name> {
        if skip == 0 {
            return Some(self.clone());
        }
        let mut remaining = self.len();
        let mut text: &str = &self.text;
        for _ in 0..skip {
            if remaining == 0 {
                return None;
            }
            let dot = text.find('.').unwrap();
            text = &text[dot + 1..];
            remaining -= 1;
        }
        if text.is_empty() {
            Some(Name::root())
        } else {
            Some(Name { text: text.into() })
        }
    }

    /// Returns the length of the uncompressed on-the-wire
    /// representation of the `Name`.
    pub fn wire_len(&self) -> usize {
        self.labels().map(|l| 1 + unescape(l).len()).sum::<usize>() + 1
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self.text)
    }
}

////////////////////////////////////////////////////////////////////////
// NAME BUILDER                                                       //
////////////////////////////////////////////////////////////////////////

/// Incremental construction of a [`Name`] from raw label octets.
///
/// This is the construction path used when decoding names from the
/// wire: each label's octets are pushed in order, and [`finish`]
/// produces the canonical `Name`. Length limits are enforced as labels
/// are pushed.
///
/// [`finish`]: NameBuilder::finish
pub struct NameBuilder {
    text: String,
    wire_len: usize,
}

impl NameBuilder {
    /// Creates an empty `NameBuilder`.
    pub fn new() -> Self {
        Self {
            text: String::new(),
            wire_len: 1,
        }
    }

    /// Appends one label's octets.
    pub fn push_label(&mut self, octets: &[u8]) -> Result<(), Error> {
        if octets.is_empty() {
            return Err(Error::NullNonTerminal);
        } else if octets.len() > MAX_LABEL_LEN {
            return Err(Error::LabelTooLong);
        } else if self.wire_len + 1 + octets.len() > MAX_WIRE_LEN {
            return Err(Error::NameTooLong);
        }
        self.wire_len += 1 + octets.len();
        for &octet in octets {
            escape_into(octet, &mut self.text);
        }
        self.text.push('.');
        Ok(())
    }

    /// Returns the number of labels pushed so far.
    pub fn len(&self) -> usize {
        self.text.split('.').count() - 1
    }

    /// Returns whether no labels have been pushed.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Completes construction, yielding the root if no labels were
    /// pushed.
    pub fn finish(self) -> Name {
        if self.text.is_empty() {
            Name::root()
        } else {
            Name {
                text: self.text.into_boxed_str(),
            }
        }
    }
}

impl Default for NameBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends the text form of a label octet to `out`, lowercasing ASCII
/// letters. Anything unprintable is escaped as `\DDD`; so are `.` and
/// `\` themselves, which keeps the invariant that every literal `.` in
/// the stored text is a label separator.
fn escape_into(octet: u8, out: &mut String) {
    if octet != b'.' && octet != b'\\' && (0x21..=0x7e).contains(&octet) {
        out.push(octet.to_ascii_lowercase() as char);
    } else {
        out.push('\\');
        out.push_str(&format!("{:03}", octet));
    }
}

/// Recovers the raw octets of a label from its escaped text form. The
/// text must be canonical (as produced by this module); this is
/// guaranteed for labels obtained from [`Name::labels`].
pub(crate) fn unescape(label: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(label.len());
    let bytes = label.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if bytes.len() > i + 1 && bytes[i + 1].is_ascii_digit() {
                let value = (bytes[i + 1] - b'0') as u16 * 100
                    + (bytes[i + 2] - b'0') as u16 * 10
                    + (bytes[i + 3] - b'0') as u16;
                out.push(value as u8);
                i += 4;
            } else {
                out.push(bytes[i + 1]);
                i += 2;
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    out
}

////////////////////////////////////////////////////////////////////////
// PARSING OF NAMES FROM RUST STRINGS                                 //
////////////////////////////////////////////////////////////////////////

/// Converts a Rust [`str`] into a [`Name`]. The string must be strictly
/// ASCII; a missing trailing dot is supplied. Escape sequences as
/// defined by [RFC 4343 § 2.1] are supported.
///
/// [RFC 4343 § 2.1]: https://datatracker.ietf.org/doc/html/rfc4343#section-2.1
impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::StrEmpty);
        } else if s == "." {
            return Ok(Name::root());
        }

        let mut builder = NameBuilder::new();
        let mut label = Vec::new();
        let mut remaining = s.as_bytes();

        // To check that the string is ASCII, it suffices to check each
        // octet as we go: multi-byte characters start with a non-ASCII
        // octet.
        while let Some(&octet) = remaining.first() {
            if octet == b'\\' {
                let (value, consumed) = parse_escape(&remaining[1..])?;
                label.push(value);
                remaining = &remaining[consumed + 1..];
            } else if octet == b'.' {
                builder.push_label(&label)?;
                label.clear();
                remaining = &remaining[1..];
            } else if !octet.is_ascii() {
                return Err(Error::StrNotAscii);
            } else {
                label.push(octet);
                remaining = &remaining[1..];
            }
        }
        if !label.is_empty() {
            builder.push_label(&label)?;
        }
        if builder.is_empty() {
            Err(Error::StrEmpty)
        } else {
            Ok(builder.finish())
        }
    }
}

/// Parses an escape sequence. `remaining` starts with the octet
/// immediately *after* the introducing backslash.
fn parse_escape(remaining: &[u8]) -> Result<(u8, usize), Error> {
    if remaining.is_empty() {
        Err(Error::InvalidEscape)
    } else if remaining[0].is_ascii_digit() {
        if remaining.len() < 3 || !remaining[1].is_ascii_digit() || !remaining[2].is_ascii_digit() {
            Err(Error::InvalidEscape)
        } else {
            let value = (remaining[0] - b'0') as usize * 100
                + (remaining[1] - b'0') as usize * 10
                + (remaining[2] - b'0') as usize;
            if value > 255 {
                Err(Error::InvalidEscape)
            } else {
                Ok((value as u8, 3))
            }
        }
    } else {
        Ok((remaining[0], 1))
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error encountered while constructing a [`Name`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    StrEmpty,
    StrNotAscii,
    InvalidEscape,
    LabelTooLong,
    NameTooLong,
    NullNonTerminal,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::StrEmpty => f.write_str("string is empty"),
            Self::StrNotAscii => f.write_str("string is not ASCII"),
            Self::InvalidEscape => f.write_str("invalid escape sequence"),
            Self::LabelTooLong => f.write_str("label exceeds 63 octets"),
            Self::NameTooLong => f.write_str("name exceeds 255 octets"),
            Self::NullNonTerminal => f.write_str("null label in non-terminal position"),
        }
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_root() {
        assert!(Name::root().is_root());
        assert_eq!(Name::root().len(), 0);
        assert_eq!(Name::root().to_string(), ".");
        assert_eq!(Name::root().wire_len(), 1);
    }

    #[test]
    fn fromstr_canonicalizes() {
        let name: Name = "Example.TEST".parse().unwrap();
        assert_eq!(name.as_str(), "example.test.");
        assert_eq!(name.len(), 2);
    }

    #[test]
    fn fromstr_accepts_trailing_dot() {
        let a: Name = "example.test.".parse().unwrap();
        let b: Name = "example.test".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fromstr_rejects_empty() {
        assert_eq!("".parse::<Name>(), Err(Error::StrEmpty));
    }

    #[test]
    fn fromstr_rejects_non_ascii() {
        assert_eq!("✈.aero.".parse::<Name>(), Err(Error::StrNotAscii));
    }

    #[test]
    fn fromstr_rejects_null_non_terminal() {
        assert_eq!("a.b..c.".parse::<Name>(), Err(Error::NullNonTerminal));
    }

    #[test]
    fn fromstr_rejects_long_label() {
        let label = "x".repeat(64);
        assert_eq!(
            format!("{}.test.", label).parse::<Name>(),
            Err(Error::LabelTooLong)
        );
    }

    #[test]
    fn fromstr_rejects_long_name() {
        let name = "x.".repeat(128);
        assert_eq!(name.parse::<Name>(), Err(Error::NameTooLong));
    }

    #[test]
    fn fromstr_escaping_works() {
        let escaped: Name = "\\000.\\\\\\..".parse().unwrap();
        // Dots and backslashes within labels are stored in \DDD form,
        // so every literal dot in the text is a label separator.
        assert_eq!(escaped.as_str(), "\\000.\\092\\046.");
        assert_eq!(escaped.len(), 2);
        let labels: Vec<&str> = escaped.labels().collect();
        assert_eq!(unescape(labels[0]), vec![0u8]);
        assert_eq!(unescape(labels[1]), vec![b'\\', b'.']);
    }

    #[test]
    fn fromstr_rejects_invalid_escapes() {
        assert_eq!("\\00".parse::<Name>(), Err(Error::InvalidEscape));
        assert_eq!("\\00x.".parse::<Name>(), Err(Error::InvalidEscape));
        assert_eq!("\\256.".parse::<Name>(), Err(Error::InvalidEscape));
    }

    #[test]
    fn labels_iterator_works() {
        let name: Name = "a.b.example.test.".parse().unwrap();
        let labels: Vec<&str> = name.labels().collect();
        assert_eq!(labels, vec!["a", "b", "example", "test"]);
        assert_eq!(name.labels().count(), 4);
        assert_eq!(Name::root().labels().count(), 0);
    }

    #[test]
    fn eq_or_subdomain_of_works() {
        let subdomain: Name = "subdomain.example.test.".parse().unwrap();
        let domain: Name = "example.test.".parse().unwrap();
        let tld: Name = "test.".parse().unwrap();
        let root = Name::root();
        assert!(subdomain.eq_or_subdomain_of(&subdomain));
        assert!(subdomain.eq_or_subdomain_of(&domain));
        assert!(subdomain.eq_or_subdomain_of(&tld));
        assert!(subdomain.eq_or_subdomain_of(&root));
        assert!(!domain.eq_or_subdomain_of(&subdomain));
        assert!(domain.eq_or_subdomain_of(&tld));
        assert!(!tld.eq_or_subdomain_of(&domain));

        // A name whose text merely ends with the parent's text is not a
        // subdomain unless the match falls on a label boundary.
        let lookalike: Name = "xexample.test.".parse().unwrap();
        assert!(!lookalike.eq_or_subdomain_of(&domain));
    }

    #[test]
    fn strip_suffix_works() {
        let name: Name = "a.b.example.test.".parse().unwrap();
        let domain: Name = "example.test.".parse().unwrap();
        let other: Name = "example.org.".parse().unwrap();
        assert_eq!(name.strip_suffix(&domain), Some("a.b"));
        assert_eq!(domain.strip_suffix(&domain), Some(""));
        assert_eq!(name.strip_suffix(&Name::root()), Some("a.b.example.test"));
        assert_eq!(name.strip_suffix(&other), None);
    }

    #[test]
    fn superdomain_works() {
        let name: Name = "a.b.example.test.".parse().unwrap();
        assert_eq!(name.superdomain(0), Some(name.clone()));
        assert_eq!(name.superdomain(2), Some("example.test.".parse().unwrap()));
        assert_eq!(name.superdomain(4), Some(Name::root()));
        assert_eq!(name.superdomain(5), None);
    }

    #[test]
    fn wire_len_works() {
        let name: Name = "a.bb.ccc.".parse().unwrap();
        assert_eq!(name.wire_len(), 2 + 3 + 4 + 1);
    }
}
