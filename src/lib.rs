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

//! The backptr authoritative DNS server library.
//!
//! backptr answers reverse (PTR) and matching forward (A/AAAA) queries
//! for delegated address space without requiring conventional zone
//! files. Given a forward domain and one or more reverse CIDRs, it
//! discovers at start-up that those zones are delegated to it (via the
//! [`delegation`] module), optionally loads PTRs deduced from external
//! zones (via the [`loader`] module), and synthesizes deterministic
//! PTR/address pairs for everything else (via the [`arpa`] module).
//!
//! The [`server`] module contains the query-serving engine; the
//! `backptrd` binary wires everything together.

pub mod arpa;
pub mod authority;
pub mod cidr;
pub mod class;
pub mod db;
pub mod delegation;
pub mod edns;
pub mod loader;
pub mod message;
pub mod name;
pub mod resolver;
pub mod rr;
pub mod server;
pub mod stats;
pub mod zone_file;

mod util;
