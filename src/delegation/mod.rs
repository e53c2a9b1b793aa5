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

//! Delegation discovery: zone-cut walking and self-identifying probes.
//!
//! At start-up the server must confirm that the configured forward
//! domain and reverse prefixes are actually delegated to *this*
//! instance on the public DNS. The [`Probe`] type generates a
//! unique-ish question/answer pair that only the intended instance can
//! answer, and the [`Finder`] walks the DNS tree to locate the
//! delegation and then fires the probe at the delegated name servers.

mod find;
mod probe;
pub use find::{Delegation, Finder, FindResults};
pub use probe::Probe;

use std::fmt;

use crate::name::Name;

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error encountered during delegation discovery. All of these are
/// fatal at boot.
#[derive(Debug)]
pub enum Error {
    /// No zone cut was found between the target's parent and the
    /// topmost candidate the walk is willing to consult.
    NoDelegationFound { target: Name, topmost: Name },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoDelegationFound { target, topmost } => {
                write!(f, "No Delegation found for {} up to {}", target, topmost)
            }
        }
    }
}

impl std::error::Error for Error {}
