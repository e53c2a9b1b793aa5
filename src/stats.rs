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

//! Query statistics.
//!
//! Each request accumulates into a private [`ServerStats`] delta, which
//! is merged into the shared totals under a brief lock at request end;
//! the periodic report and SIGUSR1 snapshot (and optionally reset) the
//! totals.

use std::fmt;

/// Counters for one category of query (v4/v6 PTR, v4/v6 forward).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct QueryStats {
    pub queries: u64,
    pub good: u64,
    pub answers: u64,
    pub malformed: u64,
    pub no_synth: u64,
}

impl QueryStats {
    pub fn add(&mut self, from: &QueryStats) {
        self.queries += from.queries;
        self.good += from.good;
        self.answers += from.answers;
        self.malformed += from.malformed;
        self.no_synth += from.no_synth;
    }
}

impl fmt::Display for QueryStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "q={} good={} ans={} malformed={} nosynth={}",
            self.queries, self.good, self.answers, self.malformed, self.no_synth,
        )
    }
}

/// Counters that apply across all queries.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GeneralStats {
    pub queries: u64,
    pub accept_errors: u64,
    pub format_errors: u64,
    pub refused: u64,
    pub nx_domain: u64,
    pub no_authority: u64,
    pub wrong_class: u64,
    pub chaos: u64,
    pub cookies: u64,
    pub wrong_cookies: u64,
    pub cookie_only: u64,
    pub probes: u64,
    pub passthru_out: u64,
    pub passthru_in: u64,
    pub apex_soa: u64,
    pub apex_ns: u64,
    pub apex_any: u64,
    pub db_hits: u64,
    pub write_errors: u64,
}

impl GeneralStats {
    pub fn add(&mut self, from: &GeneralStats) {
        self.queries += from.queries;
        self.accept_errors += from.accept_errors;
        self.format_errors += from.format_errors;
        self.refused += from.refused;
        self.nx_domain += from.nx_domain;
        self.no_authority += from.no_authority;
        self.wrong_class += from.wrong_class;
        self.chaos += from.chaos;
        self.cookies += from.cookies;
        self.wrong_cookies += from.wrong_cookies;
        self.cookie_only += from.cookie_only;
        self.probes += from.probes;
        self.passthru_out += from.passthru_out;
        self.passthru_in += from.passthru_in;
        self.apex_soa += from.apex_soa;
        self.apex_ns += from.apex_ns;
        self.apex_any += from.apex_any;
        self.db_hits += from.db_hits;
        self.write_errors += from.write_errors;
    }
}

impl fmt::Display for GeneralStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "q={} accerr={} formerr={} refused={} nx={} noauth={} class={} \
             chaos={} cookie={}/{} conly={} probe={} passthru={}/{} \
             apex={}/{}/{} db={} werr={}",
            self.queries,
            self.accept_errors,
            self.format_errors,
            self.refused,
            self.nx_domain,
            self.no_authority,
            self.wrong_class,
            self.chaos,
            self.cookies,
            self.wrong_cookies,
            self.cookie_only,
            self.probes,
            self.passthru_out,
            self.passthru_in,
            self.apex_any,
            self.apex_soa,
            self.apex_ns,
            self.db_hits,
            self.write_errors,
        )
    }
}

/// The full statistics bundle: general counters plus the per-category
/// breakdowns.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ServerStats {
    pub gen: GeneralStats,
    pub v4_ptr: QueryStats,
    pub v6_ptr: QueryStats,
    pub v4_forward: QueryStats,
    pub v6_forward: QueryStats,
}

impl ServerStats {
    pub fn add(&mut self, from: &ServerStats) {
        self.gen.add(&from.gen);
        self.v4_ptr.add(&from.v4_ptr);
        self.v6_ptr.add(&from.v6_ptr);
        self.v4_forward.add(&from.v4_forward);
        self.v6_forward.add(&from.v6_forward);
    }
}
