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

//! A parser for RFC 1035 master-file syntax.
//!
//! This reads the subset of the format the zone loader needs: the
//! `$ORIGIN`, `$TTL`, and `$INCLUDE` directives, multi-line records
//! grouped by parentheses, quoted character strings, comments, owner
//! inheritance, and the record types the loader acts on. Records of
//! other types parse far enough to be skipped; their presence is not an
//! error.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::class::Class;
use crate::name::Name;
use crate::rr::{Rdata, Rr, Soa, Ttl, Type};

////////////////////////////////////////////////////////////////////////
// PARSER ENTRY POINTS                                                //
////////////////////////////////////////////////////////////////////////

/// Parses master-file `text`, invoking `emit` for each record.
///
/// `source` names the input in error messages. `origin` seeds `@` and
/// relative names until a `$ORIGIN` directive changes it.
/// `include_allowed` enables `$INCLUDE` (it should be disabled for
/// zone text fetched from the network, where the included path would be
/// interpreted on the local file system).
pub fn parse<F>(
    text: &str,
    source: &str,
    origin: Option<Name>,
    default_ttl: Ttl,
    include_allowed: bool,
    emit: &mut F,
) -> Result<(), Error>
where
    F: FnMut(Rr),
{
    let mut state = State {
        origin,
        last_owner: None,
        default_ttl,
        include_allowed,
        include_depth: 0,
    };
    parse_with_state(text, source, &mut state, emit)
}

/// Running parser state, carried across `$INCLUDE` boundaries.
struct State {
    origin: Option<Name>,
    last_owner: Option<Name>,
    default_ttl: Ttl,
    include_allowed: bool,
    include_depth: usize,
}

/// How deep `$INCLUDE` chains may nest.
const MAX_INCLUDE_DEPTH: usize = 8;

fn parse_with_state<F>(
    text: &str,
    source: &str,
    state: &mut State,
    emit: &mut F,
) -> Result<(), Error>
where
    F: FnMut(Rr),
{
    let mut lines = text.lines().enumerate();
    while let Some((number, line)) = lines.next() {
        let position = Position {
            source: source.to_owned(),
            line: number + 1,
        };

        // Gather a logical line: parentheses group physical lines.
        let mut logical = String::new();
        let starts_with_space = line.starts_with([' ', '\t']);
        let mut depth = append_stripped(line, &mut logical, 0, &position)?;
        while depth > 0 {
            match lines.next() {
                Some((_, next)) => {
                    logical.push(' ');
                    depth = append_stripped(next, &mut logical, depth, &position)?;
                }
                None => return Err(Error::new(position, ErrorKind::UnclosedParenthesis)),
            }
        }

        let tokens = tokenize(&logical, &position)?;
        if tokens.is_empty() {
            continue;
        }

        match tokens[0].text.as_str() {
            "$ORIGIN" => {
                let name = tokens.get(1).ok_or_else(|| {
                    Error::new(position.clone(), ErrorKind::MissingDirectiveArgument("$ORIGIN"))
                })?;
                state.origin = Some(parse_name(&name.text, state, &position)?);
            }
            "$TTL" => {
                let value = tokens.get(1).ok_or_else(|| {
                    Error::new(position.clone(), ErrorKind::MissingDirectiveArgument("$TTL"))
                })?;
                state.default_ttl = parse_ttl(&value.text)
                    .ok_or_else(|| Error::new(position.clone(), ErrorKind::BadTtl))?;
            }
            "$INCLUDE" => {
                parse_include(&tokens, source, state, emit, &position)?;
            }
            directive if directive.starts_with('$') => {
                return Err(Error::new(position, ErrorKind::UnknownDirective));
            }
            _ => parse_record(&tokens, starts_with_space, state, emit, &position)?,
        }
    }
    Ok(())
}

fn parse_include<F>(
    tokens: &[Token],
    source: &str,
    state: &mut State,
    emit: &mut F,
    position: &Position,
) -> Result<(), Error>
where
    F: FnMut(Rr),
{
    if !state.include_allowed {
        return Err(Error::new(position.clone(), ErrorKind::IncludeForbidden));
    }
    if state.include_depth >= MAX_INCLUDE_DEPTH {
        return Err(Error::new(position.clone(), ErrorKind::IncludeTooDeep));
    }
    let path_token = tokens.get(1).ok_or_else(|| {
        Error::new(position.clone(), ErrorKind::MissingDirectiveArgument("$INCLUDE"))
    })?;

    // A relative include path is interpreted relative to the including
    // file.
    let mut path = PathBuf::from(&path_token.text);
    if path.is_relative() {
        if let Some(parent) = Path::new(source).parent() {
            path = parent.join(path);
        }
    }

    let included = fs::read_to_string(&path)
        .map_err(|e| Error::new(position.clone(), ErrorKind::IncludeIo(e.to_string())))?;

    // An explicit origin argument applies to the included file only;
    // the included file never affects our own origin or last owner.
    let saved_origin = state.origin.clone();
    let saved_owner = state.last_owner.take();
    if let Some(origin) = tokens.get(2) {
        state.origin = Some(parse_name(&origin.text, state, position)?);
    }
    state.include_depth += 1;
    let result = parse_with_state(&included, &path.to_string_lossy(), state, emit);
    state.include_depth -= 1;
    state.origin = saved_origin;
    state.last_owner = saved_owner;
    result
}

////////////////////////////////////////////////////////////////////////
// RECORD PARSING                                                     //
////////////////////////////////////////////////////////////////////////

fn parse_record<F>(
    tokens: &[Token],
    starts_with_space: bool,
    state: &mut State,
    emit: &mut F,
    position: &Position,
) -> Result<(), Error>
where
    F: FnMut(Rr),
{
    let mut index = 0;

    // The owner is present exactly when the entry does not start with
    // whitespace; otherwise the previous owner carries over.
    let owner = if starts_with_space {
        state
            .last_owner
            .clone()
            .ok_or_else(|| Error::new(position.clone(), ErrorKind::NoPreviousOwner))?
    } else {
        let owner = parse_name(&tokens[0].text, state, position)?;
        index += 1;
        owner
    };
    state.last_owner = Some(owner.clone());

    // TTL and class may appear in either order between the owner and
    // the type.
    let mut ttl = None;
    let mut class = None;
    let rr_type = loop {
        let token = tokens
            .get(index)
            .ok_or_else(|| Error::new(position.clone(), ErrorKind::MissingType))?;
        index += 1;
        if ttl.is_none() && token.text.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            ttl = parse_ttl(&token.text);
            if ttl.is_none() {
                return Err(Error::new(position.clone(), ErrorKind::BadTtl));
            }
            continue;
        }
        if class.is_none() {
            if let Ok(parsed) = Class::from_str(&token.text) {
                class = Some(parsed);
                continue;
            }
        }
        match Type::from_str(&token.text) {
            Ok(parsed) => break parsed,
            // A type mnemonic we don't model. The loader ignores such
            // records anyway, so skip the entry.
            Err(_) if token.text.bytes().all(|b| b.is_ascii_alphanumeric()) => return Ok(()),
            Err(_) => return Err(Error::new(position.clone(), ErrorKind::MissingType)),
        }
    };

    let ttl = ttl.unwrap_or(state.default_ttl);
    let class = class.unwrap_or(Class::IN);
    let rdata_tokens = &tokens[index..];

    let rdata = match rr_type {
        Type::A => Rdata::A(
            single_token(rdata_tokens, position)?
                .parse()
                .map_err(|_| Error::new(position.clone(), ErrorKind::BadRdata(Type::A)))?,
        ),
        Type::AAAA => Rdata::Aaaa(
            single_token(rdata_tokens, position)?
                .parse()
                .map_err(|_| Error::new(position.clone(), ErrorKind::BadRdata(Type::AAAA)))?,
        ),
        Type::NS => Rdata::Ns(parse_name(single_token(rdata_tokens, position)?, state, position)?),
        Type::CNAME => {
            Rdata::Cname(parse_name(single_token(rdata_tokens, position)?, state, position)?)
        }
        Type::PTR => {
            Rdata::Ptr(parse_name(single_token(rdata_tokens, position)?, state, position)?)
        }
        Type::SOA => parse_soa(rdata_tokens, state, position)?,
        Type::TXT => {
            if rdata_tokens.is_empty() {
                return Err(Error::new(position.clone(), ErrorKind::BadRdata(Type::TXT)));
            }
            Rdata::Txt(
                rdata_tokens
                    .iter()
                    .map(|t| t.text.as_bytes().to_vec().into_boxed_slice())
                    .collect(),
            )
        }
        // Recognized via TYPEnnn syntax but not modeled; skip.
        _ => return Ok(()),
    };

    emit(Rr {
        owner,
        class,
        ttl,
        rdata,
    });
    Ok(())
}

fn parse_soa(tokens: &[Token], state: &State, position: &Position) -> Result<Rdata, Error> {
    if tokens.len() != 7 {
        return Err(Error::new(position.clone(), ErrorKind::BadRdata(Type::SOA)));
    }
    let mname = parse_name(&tokens[0].text, state, position)?;
    let rname = parse_name(&tokens[1].text, state, position)?;
    let mut timers = [0u32; 5];
    for (i, token) in tokens[2..].iter().enumerate() {
        // Serials regularly exceed i32::MAX, so plain numbers must not
        // pass through the TTL clamp; unit-suffixed forms are accepted
        // for the timer fields.
        timers[i] = token
            .text
            .parse::<u32>()
            .ok()
            .or_else(|| parse_ttl(&token.text).map(u32::from))
            .ok_or_else(|| Error::new(position.clone(), ErrorKind::BadRdata(Type::SOA)))?;
    }
    Ok(Rdata::Soa(Soa {
        mname,
        rname,
        serial: timers[0],
        refresh: timers[1],
        retry: timers[2],
        expire: timers[3],
        minimum: timers[4],
    }))
}

fn single_token<'a>(tokens: &'a [Token], position: &Position) -> Result<&'a str, Error> {
    if tokens.len() == 1 {
        Ok(&tokens[0].text)
    } else {
        Err(Error::new(position.clone(), ErrorKind::BadRdataTokenCount))
    }
}

/// Resolves a name token against the current origin. `@` denotes the
/// origin itself, and a name without a trailing dot is relative to it.
fn parse_name(token: &str, state: &State, position: &Position) -> Result<Name, Error> {
    if token == "@" {
        return state
            .origin
            .clone()
            .ok_or_else(|| Error::new(position.clone(), ErrorKind::NoOrigin));
    }
    if token.ends_with('.') {
        return token
            .parse()
            .map_err(|e| Error::new(position.clone(), ErrorKind::BadName(e)));
    }
    let origin = state
        .origin
        .as_ref()
        .ok_or_else(|| Error::new(position.clone(), ErrorKind::NoOrigin))?;
    format!("{}.{}", token, origin)
        .parse()
        .map_err(|e| Error::new(position.clone(), ErrorKind::BadName(e)))
}

/// Parses a TTL value: plain seconds, or a sequence of `<n><unit>`
/// terms with the units s, m, h, d, and w.
pub fn parse_ttl(text: &str) -> Option<Ttl> {
    if text.is_empty() {
        return None;
    }
    if text.bytes().all(|b| b.is_ascii_digit()) {
        return text.parse::<u32>().ok().map(Ttl::from);
    }

    let mut total: u64 = 0;
    let mut value: Option<u64> = None;
    for c in text.chars() {
        if let Some(digit) = c.to_digit(10) {
            value = Some(value.unwrap_or(0) * 10 + digit as u64);
        } else {
            let multiplier = match c.to_ascii_lowercase() {
                's' => 1,
                'm' => 60,
                'h' => 3600,
                'd' => 86400,
                'w' => 604800,
                _ => return None,
            };
            total = total.checked_add(value.take()? * multiplier)?;
        }
    }
    if value.is_some() || total > i32::MAX as u64 {
        None // A trailing number with no unit, or out of range
    } else {
        Some(Ttl::from(total as u32))
    }
}

////////////////////////////////////////////////////////////////////////
// TOKENIZATION                                                       //
////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
struct Token {
    text: String,
}

/// Strips comments from a physical line and appends it to the logical
/// line, tracking parenthesis depth. Quotes protect `;`, `(`, and `)`.
fn append_stripped(
    line: &str,
    logical: &mut String,
    mut depth: usize,
    position: &Position,
) -> Result<usize, Error> {
    let mut in_quotes = false;
    let mut escaped = false;
    for c in line.chars() {
        if escaped {
            logical.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                logical.push(c);
                escaped = true;
            }
            '"' => {
                logical.push(c);
                in_quotes = !in_quotes;
            }
            ';' if !in_quotes => break,
            '(' if !in_quotes => {
                depth += 1;
                logical.push(' ');
            }
            ')' if !in_quotes => {
                if depth == 0 {
                    return Err(Error::new(position.clone(), ErrorKind::UnbalancedParenthesis));
                }
                depth -= 1;
                logical.push(' ');
            }
            _ => logical.push(c),
        }
    }
    if in_quotes {
        Err(Error::new(position.clone(), ErrorKind::UnclosedQuote))
    } else {
        Ok(depth)
    }
}

/// Splits a comment-free logical line into tokens, honoring quoted
/// strings (whose quotes are removed) and backslash escapes within
/// them.
fn tokenize(logical: &str, position: &Position) -> Result<Vec<Token>, Error> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quotes = false;
    let mut escaped = false;

    for c in logical.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => {
                in_quotes = !in_quotes;
                in_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_token {
                    tokens.push(Token {
                        text: std::mem::take(&mut current),
                    });
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_quotes {
        return Err(Error::new(position.clone(), ErrorKind::UnclosedQuote));
    }
    if in_token {
        tokens.push(Token { text: current });
    }
    Ok(tokens)
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Where in the input an error occurred.
#[derive(Clone, Debug)]
pub struct Position {
    pub source: String,
    pub line: usize,
}

/// An error encountered while parsing master-file text.
#[derive(Debug)]
pub struct Error {
    pub position: Position,
    pub kind: ErrorKind,
}

impl Error {
    fn new(position: Position, kind: ErrorKind) -> Self {
        Self { position, kind }
    }
}

#[derive(Debug)]
pub enum ErrorKind {
    UnclosedParenthesis,
    UnbalancedParenthesis,
    UnclosedQuote,
    UnknownDirective,
    MissingDirectiveArgument(&'static str),
    IncludeForbidden,
    IncludeTooDeep,
    IncludeIo(String),
    NoPreviousOwner,
    NoOrigin,
    MissingType,
    BadTtl,
    BadName(crate::name::Error),
    BadRdata(Type),
    BadRdataTokenCount,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}: ", self.position.source, self.position.line)?;
        match &self.kind {
            ErrorKind::UnclosedParenthesis => f.write_str("unclosed parenthesis"),
            ErrorKind::UnbalancedParenthesis => f.write_str("unbalanced parenthesis"),
            ErrorKind::UnclosedQuote => f.write_str("unclosed quote"),
            ErrorKind::UnknownDirective => f.write_str("unknown directive"),
            ErrorKind::MissingDirectiveArgument(d) => write!(f, "{} requires an argument", d),
            ErrorKind::IncludeForbidden => f.write_str("$INCLUDE is not allowed for this source"),
            ErrorKind::IncludeTooDeep => f.write_str("$INCLUDE nesting too deep"),
            ErrorKind::IncludeIo(e) => write!(f, "cannot read $INCLUDE file: {}", e),
            ErrorKind::NoPreviousOwner => f.write_str("entry has no owner and none carries over"),
            ErrorKind::NoOrigin => f.write_str("relative name used with no origin in effect"),
            ErrorKind::MissingType => f.write_str("no RR type found"),
            ErrorKind::BadTtl => f.write_str("invalid TTL"),
            ErrorKind::BadName(e) => write!(f, "invalid name: {}", e),
            ErrorKind::BadRdata(t) => write!(f, "invalid {} record data", t),
            ErrorKind::BadRdataTokenCount => f.write_str("wrong number of record data fields"),
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

    fn parse_all(text: &str) -> Result<Vec<Rr>, Error> {
        let mut records = Vec::new();
        parse(text, "test", None, Ttl::from(3600), false, &mut |rr| {
            records.push(rr)
        })?;
        Ok(records)
    }

    #[test]
    fn parses_a_simple_zone() {
        let records = parse_all(
            "$ORIGIN example.net.\n\
             $TTL 300\n\
             @  IN SOA ns1 hostmaster 1 7200 3600 86400 60\n\
             ns1   IN A    192.0.2.53\n\
                   IN AAAA 2001:db8::53\n\
             www 600 IN CNAME ns1\n",
        )
        .unwrap();

        assert_eq!(records.len(), 4);
        assert_eq!(records[0].rr_type(), Type::SOA);
        assert_eq!(records[0].owner.as_str(), "example.net.");
        assert_eq!(
            records[1].to_string(),
            "ns1.example.net. 300 IN A 192.0.2.53"
        );
        // Owner carries over to the AAAA.
        assert_eq!(records[2].owner.as_str(), "ns1.example.net.");
        assert_eq!(records[3].ttl, Ttl::from(600));
        assert_eq!(
            records[3].rdata,
            Rdata::Cname("ns1.example.net.".parse().unwrap())
        );
    }

    #[test]
    fn parses_parenthesized_soa() {
        let records = parse_all(
            "example.net. IN SOA ns1.example.net. hostmaster.example.net. (\n\
                 2024010101 ; serial\n\
                 7200       ; refresh\n\
                 3600 86400 60 )\n",
        )
        .unwrap();
        match &records[0].rdata {
            Rdata::Soa(soa) => {
                assert_eq!(soa.serial, 2024010101);
                assert_eq!(soa.refresh, 7200);
                assert_eq!(soa.minimum, 60);
            }
            _ => panic!("not an SOA"),
        }
    }

    #[test]
    fn parses_quoted_txt_strings() {
        let records =
            parse_all("t.example.net. IN TXT \"hello; world\" \"second (string)\"\n").unwrap();
        match &records[0].rdata {
            Rdata::Txt(strings) => {
                assert_eq!(&*strings[0], b"hello; world");
                assert_eq!(&*strings[1], b"second (string)");
            }
            _ => panic!("not a TXT"),
        }
    }

    #[test]
    fn skips_unmodeled_types() {
        let records = parse_all(
            "$ORIGIN example.net.\n\
             @    IN MX 10 mail\n\
             mail IN A 192.0.2.25\n",
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rr_type(), Type::A);
    }

    #[test]
    fn ttl_forms() {
        assert_eq!(parse_ttl("300"), Some(Ttl::from(300)));
        assert_eq!(parse_ttl("1h30m"), Some(Ttl::from(5400)));
        assert_eq!(parse_ttl("2D"), Some(Ttl::from(172800)));
        assert_eq!(parse_ttl("1w"), Some(Ttl::from(604800)));
        assert_eq!(parse_ttl(""), None);
        assert_eq!(parse_ttl("12x"), None);
        assert_eq!(parse_ttl("1h30"), None);
    }

    #[test]
    fn include_is_rejected_when_disallowed() {
        let err = parse_all("$INCLUDE other.zone\n").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::IncludeForbidden));
    }

    #[test]
    fn relative_name_without_origin_is_an_error() {
        let err = parse_all("www IN A 192.0.2.1\n").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NoOrigin));
    }

    #[test]
    fn unclosed_parenthesis_is_an_error() {
        let err = parse_all("@ IN SOA a. b. ( 1 2 3 4\n").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnclosedParenthesis));
    }

    #[test]
    fn reverse_zone_with_ptrs() {
        let records = parse_all(
            "$ORIGIN 2.0.192.in-addr.arpa.\n\
             1 IN PTR host1.example.net.\n\
             2 IN PTR host2.example.net.\n",
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].owner.as_str(), "1.2.0.192.in-addr.arpa.");
        assert_eq!(
            records[1].rdata,
            Rdata::Ptr("host2.example.net.".parse().unwrap())
        );
    }
}
