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

//! Semantic validation of the command line into the running
//! configuration.
//!
//! Everything that could plausibly be a typo is checked here, before
//! any socket is bound; a failure is fatal with a diagnostic.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::warn;

use backptr::cidr::Cidr;
use backptr::loader::PtrZone;
use backptr::name::Name;
use backptr::rr::Ttl;
use backptr::zone_file;

use crate::args::Args;

/// The validated configuration.
pub struct Config {
    /// The canonical forward domain.
    pub forward: Name,

    /// Whether the forward zone is local (serves without discovery).
    pub forward_is_local: bool,

    pub delegated_reverses: Vec<Cidr>,
    pub local_reverses: Vec<Cidr>,

    pub listen: Vec<SocketAddr>,
    pub ptr_zones: Vec<PtrZone>,

    pub passthru: Option<String>,
    pub synthesize: bool,
    pub chaos: bool,
    pub nsid: String,
    pub ttl: Ttl,
    pub max_answers: usize,
    pub report_interval: Option<Duration>,

    pub user: Option<String>,
    pub group: Option<String>,
    pub chroot: Option<String>,

    pub log_queries: bool,
}

/// Checks everything that could likely be a usage error, mostly in the
/// order the options are declared.
pub fn validate(args: Args) -> Result<Config> {
    let (forward, forward_is_local) = match (&args.forward, &args.local_forward) {
        (Some(forward), None) => (parse_domain(forward, "--forward")?, false),
        (None, Some(forward)) => (parse_domain(forward, "--local-forward")?, true),
        (None, None) => bail!("must supply one of --forward or --local-forward"),
        (Some(_), Some(_)) => bail!("cannot have both --forward and --local-forward"),
    };

    if args.reverse.is_empty() && args.local_reverse.is_empty() {
        bail!("must supply at least one of --reverse or --local-reverse");
    }
    let delegated_reverses = parse_cidrs(&args.reverse, "--reverse")?;
    let local_reverses = parse_cidrs(&args.local_reverse, "--local-reverse")?;
    for cidr in &delegated_reverses {
        if cidr.is_private() {
            warn!(
                "--reverse {} is private address space; discovery on the public DNS \
                 is unlikely to succeed",
                cidr
            );
        }
    }
    for cidr in &local_reverses {
        if !cidr.is_private() {
            warn!("--local-reverse {} may be a globally routable prefix", cidr);
        }
    }

    let listen = if args.listen.is_empty() {
        vec![parse_listen(":domain")?]
    } else {
        args.listen
            .iter()
            .map(|addr| parse_listen(addr))
            .collect::<Result<_>>()?
    };

    let ptr_zones = args
        .ptr_deduce
        .iter()
        .map(|url| PtrZone::from_url(url).map_err(|e| anyhow!("--PTR-deduce {}", e)))
        .collect::<Result<_>>()?;

    let ttl = parse_duration_option(&args.ttl, "--TTL")?;
    if u32::from(ttl) < 1 {
        bail!("--TTL must be at least 1 second");
    }

    let report = parse_duration_option(&args.report, "--report")?;
    let report_interval = match u32::from(report) {
        0 => None,
        secs => Some(Duration::from_secs(secs as u64)),
    };

    Ok(Config {
        forward,
        forward_is_local,
        delegated_reverses,
        local_reverses,
        listen,
        ptr_zones,
        passthru: args.passthru,
        synthesize: args.synthesize,
        chaos: args.chaos,
        nsid: args.nsid,
        ttl,
        max_answers: args.max_answers,
        report_interval,
        user: args.user,
        group: args.group,
        chroot: args.chroot,
        log_queries: args.log_queries,
    })
}

fn parse_domain(text: &str, option: &str) -> Result<Name> {
    let name: Name = text
        .parse()
        .map_err(|e| anyhow!("invalid domain name: {} {}: {}", option, text, e))?;
    if name.len() < 2 {
        bail!("{} {} needs at least two labels", option, text);
    }
    Ok(name)
}

fn parse_cidrs(texts: &[String], option: &str) -> Result<Vec<Cidr>> {
    texts
        .iter()
        .map(|text| {
            text.parse::<Cidr>()
                .map_err(|e| anyhow!("{} {}: {}", option, text, e))
        })
        .collect()
}

/// Parses a listen address: `host:port`, `:port`, or `:service`. The
/// port defaults to the `domain` service; a missing host means the
/// wildcard address.
fn parse_listen(text: &str) -> Result<SocketAddr> {
    if let Ok(addr) = text.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let (host, service) = text
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("--listen {}: expected host:port, :port, or :service", text))?;
    let port = parse_service(service).with_context(|| format!("--listen {}", text))?;
    let ip: IpAddr = if host.is_empty() {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    } else {
        host.parse()
            .map_err(|_| anyhow!("--listen {}: invalid address '{}'", text, host))?
    };
    Ok(SocketAddr::new(ip, port))
}

fn parse_service(service: &str) -> Result<u16> {
    match service {
        "domain" => Ok(53),
        _ => service
            .parse::<u16>()
            .map_err(|_| anyhow!("unknown service '{}'", service)),
    }
}

/// Parses a duration option in TTL syntax (`300`, `1h`, `90m`, ...).
fn parse_duration_option(text: &str, option: &str) -> Result<Ttl> {
    zone_file::parse_ttl(text).ok_or_else(|| anyhow!("{} {}: invalid duration", option, text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(argv: &[&str]) -> Args {
        let mut full = vec!["backptrd"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    #[test]
    fn minimal_configuration_validates() {
        let config = validate(args(&[
            "--local-forward",
            "example.internal",
            "--local-reverse",
            "10.0.0.0/8",
        ]))
        .unwrap();
        assert_eq!(config.forward.as_str(), "example.internal.");
        assert!(config.forward_is_local);
        assert_eq!(config.listen, vec!["[::]:53".parse().unwrap()]);
        assert_eq!(config.ttl, Ttl::from(3600));
        assert!(config.synthesize && config.chaos);
    }

    #[test]
    fn forward_or_local_forward_is_required() {
        assert!(validate(args(&["--local-reverse", "10.0.0.0/8"])).is_err());
    }

    #[test]
    fn some_reverse_is_required() {
        assert!(validate(args(&["--local-forward", "example.internal"])).is_err());
    }

    #[test]
    fn bad_prefix_lengths_are_rejected() {
        assert!(validate(args(&[
            "--local-forward",
            "example.internal",
            "--local-reverse",
            "10.0.0.0/12",
        ]))
        .is_err());
    }

    #[test]
    fn listen_forms() {
        assert_eq!(
            parse_listen("127.0.0.1:5353").unwrap(),
            "127.0.0.1:5353".parse().unwrap()
        );
        assert_eq!(parse_listen(":domain").unwrap(), "[::]:53".parse().unwrap());
        assert_eq!(parse_listen(":5353").unwrap(), "[::]:5353".parse().unwrap());
        assert!(parse_listen("nonsense").is_err());
    }

    #[test]
    fn short_ttl_is_rejected() {
        assert!(validate(args(&[
            "--local-forward",
            "example.internal",
            "--local-reverse",
            "10.0.0.0/8",
            "--TTL",
            "0",
        ]))
        .is_err());
    }

    #[test]
    fn bad_ptr_deduce_scheme_is_rejected() {
        assert!(validate(args(&[
            "--local-forward",
            "example.internal",
            "--local-reverse",
            "10.0.0.0/8",
            "--PTR-deduce",
            "gopher://example.net/zone",
        ]))
        .is_err());
    }
}
