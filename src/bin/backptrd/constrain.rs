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

//! Process constraint: chroot and setgid/setuid, applied after the
//! sockets are bound.

use anyhow::{anyhow, Context, Result};
use log::info;
use nix::unistd::{self, Gid, Group, Uid, User};

/// Applies the configured constraints, most-privileged step first:
/// chroot requires root, and setgid must precede setuid (once the user
/// is dropped, the group cannot be changed).
pub fn drop_privileges(
    user: Option<&str>,
    group: Option<&str>,
    chroot: Option<&str>,
) -> Result<()> {
    if user.is_none() && group.is_none() && chroot.is_none() {
        return Ok(());
    }

    if let Some(dir) = chroot {
        unistd::chroot(dir).with_context(|| format!("chroot to {} failed", dir))?;
        unistd::chdir("/").context("chdir after chroot failed")?;
    }

    if let Some(name) = group {
        let group = lookup_group(name)?;
        unistd::setgid(group).with_context(|| format!("setgid to {} failed", name))?;
    }

    if let Some(name) = user {
        let user = lookup_user(name)?;
        unistd::setuid(user).with_context(|| format!("setuid to {} failed", name))?;
    }

    info!(
        "Process constraint: uid={} gid={} chroot={}",
        unistd::getuid(),
        unistd::getgid(),
        chroot.unwrap_or("none"),
    );
    Ok(())
}

/// Resolves a group by name, or by numeric GID if the name lookup
/// finds nothing.
fn lookup_group(name: &str) -> Result<Gid> {
    if let Some(group) = Group::from_name(name).with_context(|| format!("group lookup {}", name))? {
        return Ok(group.gid);
    }
    name.parse::<u32>()
        .map(Gid::from_raw)
        .map_err(|_| anyhow!("unknown group '{}'", name))
}

/// Resolves a user by name, or by numeric UID if the name lookup finds
/// nothing.
fn lookup_user(name: &str) -> Result<Uid> {
    if let Some(user) = User::from_name(name).with_context(|| format!("user lookup {}", name))? {
        return Ok(user.uid);
    }
    name.parse::<u32>()
        .map(Uid::from_raw)
        .map_err(|_| anyhow!("unknown user '{}'", name))
}
