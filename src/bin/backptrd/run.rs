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

//! The orchestrator: boot sequence, discovery, and the run loop.
//!
//! The order of operations at boot matters. Listeners must be serving
//! before discovery starts, because the self-identifying probes arrive
//! on them; privileges are dropped only after every socket is bound;
//! and the initial zone load runs after the authorities are fixed so
//! the in-bailiwick filter has something to check against.

use std::fmt::Write as _;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{anyhow, bail, Context, Result};
use env_logger::Env;
use log::{error, info};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::iterator::Signals;

use backptr::authority::{Authority, AuthorityTable};
use backptr::cidr::Cidr;
use backptr::db::DbHandle;
use backptr::delegation::{Finder, Probe};
use backptr::edns::CookieSecrets;
use backptr::loader::{self, ChaosText, LoadContext, WatchSignal};
use backptr::name::Name;
use backptr::resolver::{Resolver, SystemResolver};
use backptr::rr::Rr;
use backptr::server::{listen::ListenerPool, Options, Server};
use backptr::stats::ServerStats;

use crate::args::Args;
use crate::config::{self, Config};
use crate::constrain;

const PROGRAM: &str = "backptr";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const RELEASE_DATE: &str = "2024-03-09";
const PROJECT_URL: &str = "https://github.com/matttpt/backptr";

/// Runs the server.
pub fn run(args: Args) {
    let default_level = if args.log_debug {
        "trace"
    } else if args.log_minor {
        "debug"
    } else if args.log_major {
        "info"
    } else {
        "warn"
    };
    env_logger::init_from_env(Env::new().default_filter_or(default_level));

    if let Err(e) = try_running(args) {
        let mut message = String::from("Failed to run:");
        for (i, cause) in e.chain().enumerate() {
            write!(message, "\n[{}] {}", i + 1, cause).unwrap();
        }
        message.push_str("\nExiting with failure.");
        error!("{}", message);
        process::exit(1);
    }
    info!("Exiting with success.");
}

fn try_running(args: Args) -> Result<()> {
    info!("{} daemon v{} starting.", PROGRAM, VERSION);
    let mut config = config::validate(args).context("invalid configuration")?;
    let mut zones = std::mem::take(&mut config.ptr_zones);
    let config = config;
    let start_time = Instant::now();

    // The SOA serial for every synthesized zone is the start time,
    // captured once.
    let serial = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);

    let resolver: Arc<dyn Resolver> = Arc::new(SystemResolver::new());
    let db = Arc::new(DbHandle::new());
    let log_queries = Arc::new(AtomicBool::new(config.log_queries));
    let server = Arc::new(Server::new(
        Options {
            synthesize: config.synthesize,
            chaos: config.chaos,
            nsid: config.nsid.as_bytes().to_vec(),
            default_ttl: config.ttl,
            max_answers: config.max_answers,
            passthru: config.passthru.clone(),
            log_queries: log_queries.clone(),
        },
        resolver.clone(),
        db.clone(),
        CookieSecrets::generate(),
    ));

    // Listeners must be up before discovery: the probes come back to
    // us.
    let pool = ListenerPool::start(server.clone(), &config.listen)
        .context("failed to start listeners")?;

    let authorities = match discover_and_assemble(&config, &server, resolver.as_ref(), serial) {
        Ok(authorities) => Arc::new(authorities),
        Err(e) => {
            pool.shutdown();
            return Err(e);
        }
    };
    for auth in authorities.iter() {
        info!("Zone authority: {} ({})", auth.domain, auth.source);
    }
    server.set_mutables(Some(config.forward.clone()), None, authorities.clone());

    constrain::drop_privileges(
        config.user.as_deref(),
        config.group.as_deref(),
        config.chroot.as_deref(),
    )
    .context("failed to drop privileges")?;

    // Initial zone load. Even with no PTR-deduce URLs this publishes
    // the apex SOAs, the authority glue, and the CHAOS rows.
    let load_context = LoadContext {
        resolver,
        db,
        authorities,
        default_ttl: config.ttl,
        chaos: config.chaos.then(|| ChaosText {
            program: PROGRAM.to_owned(),
            version: format!("{} {}", VERSION, RELEASE_DATE),
            authors: PROJECT_URL.to_owned(),
            nsid: config.nsid.clone(),
        }),
    };
    loader::load_all(&mut zones, &load_context, "initial load");

    // Hand the zones to the watcher; it is the sole database writer
    // from here on.
    let (watch_tx, watch_rx) = mpsc::channel();
    let watcher = thread::Builder::new()
        .name("reload watcher".to_owned())
        .spawn(move || {
            loader::watch_for_reloads(zones, load_context, watch_rx, loader::RELOAD_INTERVAL)
        })
        .context("failed to start the reload watcher")?;

    println!("{} {} Ready", PROGRAM, VERSION);
    run_loop(&config, &server, &log_queries, &watch_tx, start_time)?;

    // Shut down: stop the watcher and wait for the listeners to drain.
    let _ = watch_tx.send(WatchSignal::Shutdown);
    pool.shutdown();
    let _ = watcher.join();
    info!("All listeners stopped.");
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// DISCOVERY                                                          //
////////////////////////////////////////////////////////////////////////

/// Discovers (or locally materializes) the forward zone, then each
/// reverse zone, and returns the sorted authority table.
fn discover_and_assemble(
    config: &Config,
    server: &Arc<Server>,
    resolver: &dyn Resolver,
    serial: u32,
) -> Result<AuthorityTable> {
    let mut table = AuthorityTable::new();
    let finder = Finder::new(resolver);

    // Forward first: reverse discovery refers to the forward domain
    // and is likely to query it through resolvers while probing.
    let forward_auth = if config.forward_is_local {
        Authority::forward(
            config.forward.clone(),
            "--local-forward".to_owned(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            &config.forward,
            serial,
            config.ttl,
        )
    } else {
        let probe = Arc::new(Probe::forward(&config.forward, &mut rand::thread_rng()));
        server.set_mutables(
            Some(config.forward.clone()),
            Some(probe.clone()),
            Arc::new(AuthorityTable::new()),
        );
        info!("Forward: find {} with {}", config.forward, probe.question());
        let results = finder
            .find_and_probe(&probe)
            .map_err(|e| anyhow!("Forward: {}", e))?;
        let target = results.target.ok_or_else(|| {
            anyhow!(
                "Forward: parent {} has no delegation for {}",
                results.parent.domain,
                config.forward
            )
        })?;
        if !results.probe_success {
            bail!("Forward: probe failed to self-identify {}", target.domain);
        }
        Authority::forward(
            target.domain,
            config.forward.to_string(),
            target.ns,
            target.a,
            target.aaaa,
            &results.parent.domain,
            serial,
            config.ttl,
        )
    };
    let forward_ns = forward_auth.ns.clone();
    table.append(forward_auth.clone());

    // Discovered reverses. While one reverse is being probed, the
    // server answers with only the forward authority visible, so
    // earlier discoveries cannot perturb later ones.
    for cidr in &config.delegated_reverses {
        let mut fwd_only = AuthorityTable::new();
        fwd_only.append(forward_auth.clone());
        let probe = Arc::new(Probe::reverse(
            &config.forward,
            cidr,
            &mut rand::thread_rng(),
        ));
        server.set_mutables(
            Some(config.forward.clone()),
            Some(probe.clone()),
            Arc::new(fwd_only),
        );
        info!("Reverse: find {} with {}", cidr, probe.question());
        let results = finder
            .find_and_probe(&probe)
            .map_err(|e| anyhow!("Reverse: {}", e))?;
        let target = results.target.ok_or_else(|| {
            anyhow!(
                "Reverse: parent {} has no delegation for {}",
                results.parent.domain,
                cidr
            )
        })?;
        if !results.probe_success {
            bail!("Reverse: probe failed to self-identify {}", target.domain);
        }
        let auth = Authority::reverse(
            *cidr,
            cidr.to_string(),
            target.ns,
            target.a,
            target.aaaa,
            &config.forward,
            serial,
            config.ttl,
        );
        if !table.append(auth) {
            bail!("--reverse {} is duplicated", cidr);
        }
    }

    // Local reverses copy the forward zone's NS names, which may or
    // may not be present and may or may not be right...
    for cidr in &config.local_reverses {
        let auth = local_reverse_authority(cidr, &forward_ns, &config.forward, serial, config.ttl);
        if !table.append(auth) {
            bail!("--local-reverse {} is duplicated", cidr);
        }
    }

    table.sort();
    Ok(table)
}

/// Synthesizes a reverse authority with no delegation behind it, for
/// RFC 1918/4193 space.
fn local_reverse_authority(
    cidr: &Cidr,
    forward_ns: &[Rr],
    forward: &Name,
    serial: u32,
    ttl: backptr::rr::Ttl,
) -> Authority {
    let apex = cidr.reverse_apex();
    let ns = forward_ns
        .iter()
        .map(|rr| {
            let mut rr = rr.clone();
            rr.owner = apex.clone();
            rr
        })
        .collect();
    Authority::reverse(
        *cidr,
        "--local-reverse".to_owned(),
        ns,
        Vec::new(),
        Vec::new(),
        forward,
        serial,
        ttl,
    )
}

////////////////////////////////////////////////////////////////////////
// THE RUN LOOP                                                       //
////////////////////////////////////////////////////////////////////////

enum Event {
    Signal(i32),
    ReportTick,
}

/// Waits on signals and the periodic report ticker until a termination
/// signal arrives.
fn run_loop(
    config: &Config,
    server: &Arc<Server>,
    log_queries: &Arc<AtomicBool>,
    watch_tx: &Sender<WatchSignal>,
    start_time: Instant,
) -> Result<()> {
    let (event_tx, event_rx) = mpsc::channel();

    // A second termination signal while shutting down exits
    // immediately.
    let already_terminating = Arc::new(AtomicBool::new(false));
    for sig in [SIGTERM, SIGINT] {
        signal_hook::flag::register_conditional_shutdown(sig, 1, already_terminating.clone())
            .context("failed to set up signal handling")?;
        signal_hook::flag::register(sig, already_terminating.clone())?;
    }

    let mut signals = Signals::new([SIGTERM, SIGINT, SIGHUP, SIGUSR1, SIGUSR2])
        .context("failed to set up signal handling")?;
    {
        let event_tx = event_tx.clone();
        thread::Builder::new()
            .name("signals".to_owned())
            .spawn(move || {
                for signal in signals.forever() {
                    if event_tx.send(Event::Signal(signal)).is_err() {
                        return;
                    }
                }
            })
            .context("failed to start the signal thread")?;
    }

    if let Some(interval) = config.report_interval {
        thread::Builder::new()
            .name("report ticker".to_owned())
            .spawn(move || loop {
                thread::sleep(interval);
                if event_tx.send(Event::ReportTick).is_err() {
                    return;
                }
            })
            .context("failed to start the report ticker")?;
    }

    for event in event_rx {
        match event {
            Event::ReportTick => stats_report(server, start_time, true),
            Event::Signal(signal) => match signal {
                SIGTERM | SIGINT => {
                    info!("Signal {} initiates shutdown", signal);
                    return Ok(());
                }
                SIGHUP => {
                    info!("SIGHUP: --PTR-deduce reload initiated");
                    let _ = watch_tx.send(WatchSignal::Force);
                }
                SIGUSR1 => stats_report(server, start_time, false),
                SIGUSR2 => {
                    let now = !log_queries.load(Ordering::Relaxed);
                    log_queries.store(now, Ordering::Relaxed);
                    info!("--log-queries={}", now);
                }
                _ => info!("Signal {} reserved for future use", signal),
            },
        }
    }
    Ok(())
}

/// Writes the summary stats to the log. The version rides along with
/// the uptime so stats parsers know exactly what shape to expect.
fn stats_report(server: &Arc<Server>, start_time: Instant, reset: bool) {
    let totals: ServerStats = server.snapshot_stats(reset);
    let uptime = Duration::from_secs(start_time.elapsed().as_secs());
    info!("Stats: uptime {:?} {} {}", uptime, PROGRAM, VERSION);
    info!("Stats: total {}", totals.gen);
    info!("Stats: v4 PTR {}", totals.v4_ptr);
    info!("Stats: v6 PTR {}", totals.v6_ptr);
    info!("Stats: v4 forward {}", totals.v4_forward);
    info!("Stats: v6 forward {}", totals.v6_forward);
}
