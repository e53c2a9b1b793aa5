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

//! Implements command-line argument parsing.

use clap::{ArgAction, Parser};

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// An authoritative DNS server that synthesizes reverse and forward
/// answers for delegated address space.
#[derive(Debug, Parser)]
#[command(author, version, long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nhttps://github.com/matttpt/backptr",
    "\nInspiration: https://datatracker.ietf.org/doc/html/rfc8501#section-2.5",
))]
pub struct Args {
    /// Forward zone to discover via the delegation protocol
    #[arg(long, value_name = "DOMAIN")]
    pub forward: Option<String>,

    /// Forward zone to serve without discovery (no parent probe)
    #[arg(long = "local-forward", conflicts_with = "forward", value_name = "DOMAIN")]
    pub local_forward: Option<String>,

    /// Reverse zone to discover; must be a globally routable prefix
    /// (repeatable)
    #[arg(long = "reverse", value_name = "CIDR")]
    pub reverse: Vec<String>,

    /// Reverse zone to serve without discovery, for RFC 1918/4193
    /// space (repeatable)
    #[arg(long = "local-reverse", value_name = "CIDR")]
    pub local_reverse: Vec<String>,

    /// Bind address: host:port, :port, or :service (repeatable;
    /// default ":domain")
    #[arg(long = "listen", value_name = "ADDR")]
    pub listen: Vec<String>,

    /// Zone URL (file://, http(s)://, or axfr://) to load and deduce
    /// PTRs from (repeatable)
    #[arg(long = "PTR-deduce", value_name = "URL")]
    pub ptr_deduce: Vec<String>,

    /// Upstream server to forward out-of-bailiwick queries to, verbatim
    #[arg(long, value_name = "SERVER")]
    pub passthru: Option<String>,

    /// Fabricate PTR and address answers for in-bailiwick names absent
    /// from the database
    #[arg(long, value_name = "BOOL", action = ArgAction::Set, default_value_t = true)]
    pub synthesize: bool,

    /// Answer the CHAOS TXT probes (version.bind. and friends)
    #[arg(long = "CHAOS", value_name = "BOOL", action = ArgAction::Set, default_value_t = true)]
    pub chaos: bool,

    /// NSID payload returned to requesters that ask for it
    #[arg(long, value_name = "STRING", default_value = "")]
    pub nsid: String,

    /// TTL for synthesized records (at least 1s)
    #[arg(long = "TTL", value_name = "DURATION", default_value = "1h")]
    pub ttl: String,

    /// Cap on answer records per response; 0 means unlimited
    #[arg(long = "max-answers", value_name = "COUNT", default_value_t = 0)]
    pub max_answers: usize,

    /// Interval between periodic stats reports; 0 disables them
    #[arg(long, value_name = "DURATION", default_value = "1h")]
    pub report: String,

    /// Run as this user once the sockets are bound
    #[arg(long, value_name = "USER")]
    pub user: Option<String>,

    /// Run as this group once the sockets are bound
    #[arg(long, value_name = "GROUP")]
    pub group: Option<String>,

    /// Chroot to this directory once the sockets are bound
    #[arg(long, value_name = "DIR")]
    pub chroot: Option<String>,

    /// Log major events (start-up, reloads, periodic stats)
    #[arg(long = "log-major", value_name = "BOOL", action = ArgAction::Set, default_value_t = true)]
    pub log_major: bool,

    /// Log the details behind major events
    #[arg(long = "log-minor", action = ArgAction::SetTrue)]
    pub log_minor: bool,

    /// Log developer detail
    #[arg(long = "log-debug", action = ArgAction::SetTrue)]
    pub log_debug: bool,

    /// Log one line per query (also toggled at runtime by SIGUSR2)
    #[arg(long = "log-queries", action = ArgAction::SetTrue)]
    pub log_queries: bool,
}
