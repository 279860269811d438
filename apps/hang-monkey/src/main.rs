// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Instant;

use ::clap::Parser;
use gtreset::gtreset_core::{EngineId, EngineMask, Platform};
use gtreset::gtreset_hw::SimHardware;
use gtreset::{
    Client, Context, Device, ResetEvent, ResetOutcome, ResetPolicy, ResetReport, ResetStats,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod clap;

use crate::clap::{CliOptions, HangType};

type Error = Box<dyn std::error::Error>;

#[derive(Serialize)]
struct HangSummary {
    report: ResetReport,
    events: Vec<ResetEvent>,
    stats: ResetStats,
}

#[derive(Serialize, Default)]
struct FuzzSummary {
    passes: usize,
    engine_resets: usize,
    full_resets: usize,
    deferred: usize,
    nothing: usize,
    wedged: usize,
    rejected_submissions: usize,
    elapsed_ms: u128,
    stats: Option<ResetStats>,
}

impl FuzzSummary {
    fn record(&mut self, outcome: ResetOutcome) {
        self.passes += 1;
        match outcome {
            ResetOutcome::EngineReset => self.engine_resets += 1,
            ResetOutcome::FullReset => self.full_resets += 1,
            ResetOutcome::Deferred => self.deferred += 1,
            ResetOutcome::Nothing => self.nothing += 1,
            ResetOutcome::Wedged => self.wedged += 1,
        }
    }

    fn merge(&mut self, other: FuzzSummary) {
        self.passes += other.passes;
        self.engine_resets += other.engine_resets;
        self.full_resets += other.full_resets;
        self.deferred += other.deferred;
        self.nothing += other.nothing;
        self.wedged += other.wedged;
        self.rejected_submissions += other.rejected_submissions;
    }
}

#[derive(Serialize)]
struct WedgeSummary {
    submit_while_wedged: String,
    events: Vec<ResetEvent>,
    stats: ResetStats,
}

fn create_device(
    platform: Platform,
    policy: ResetPolicy,
) -> (Arc<SimHardware>, Arc<Device>, Receiver<ResetEvent>) {
    let hw = Arc::new(SimHardware::new(platform));
    let device = Device::new(platform, hw.clone(), policy);
    let events = device.notifications().channel();
    (hw, device, events)
}

fn print_json(value: &impl Serialize) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn hang(
    platform: Platform,
    policy: ResetPolicy,
    engines: Vec<EngineId>,
    capture: bool,
    drop_acks: u32,
    not_ready: Vec<EngineId>,
) -> Result<(), Error> {
    let (hw, device, events) = create_device(platform, policy);
    let context = Context::new(&Client::new("hang-monkey"), "victim");

    let mask: EngineMask = engines.into_iter().collect();
    for engine in mask.iter() {
        let rq = device.submit(engine, &context)?;
        tracing::info!("{engine}: stuck on seqno {:?}", rq.seqno());
    }

    hw.inject_ack_timeouts(drop_acks);
    for engine in not_ready {
        hw.inject_not_ready(engine, 1);
    }

    let report = device.handle_error(mask, capture, "hang-monkey")?;
    device.flush_restart();

    print_json(&HangSummary {
        report,
        events: events.try_iter().collect(),
        stats: device.stats(),
    })
}

fn hammer(device: Arc<Device>, seed: u64, iterations: usize) -> FuzzSummary {
    let mut rng = StdRng::seed_from_u64(seed);
    let context = Context::new(&Client::new(format!("monkey{seed}")), "fuzz");
    let present: Vec<EngineId> = device.engine_mask().iter().collect();

    let mut summary = FuzzSummary::default();
    for _ in 0..iterations {
        let engine = present[rng.gen_range(0..present.len())];
        if device.submit(engine, &context).is_err() {
            summary.rejected_submissions += 1;
        }

        let mask: EngineMask = present
            .iter()
            .copied()
            .filter(|_| rng.gen_bool(0.3))
            .collect();
        match device.handle_error(mask, false, "hang-monkey fuzz") {
            Ok(report) => summary.record(report.outcome),
            Err(err) => tracing::warn!("recovery pass failed: {err}"),
        }

        if device.is_wedged() {
            if let Err(err) = device.clear_wedged() {
                tracing::warn!("failed to unwedge: {err}");
            }
        }
    }
    summary
}

fn fuzz(
    platform: Platform,
    policy: ResetPolicy,
    threads: u64,
    iterations: usize,
    seed: u64,
) -> Result<(), Error> {
    let (_hw, device, _events) = create_device(platform, policy);

    let start = Instant::now();
    let workers: Vec<_> = (0..threads)
        .map(|thread| {
            let device = device.clone();
            std::thread::spawn(move || hammer(device, seed.wrapping_add(thread), iterations))
        })
        .collect();

    let mut summary = FuzzSummary::default();
    for worker in workers {
        match worker.join() {
            Ok(result) => summary.merge(result),
            Err(_) => return Err("fuzz worker panicked".into()),
        }
    }
    device.flush_restart();

    summary.elapsed_ms = start.elapsed().as_millis();
    summary.stats = Some(device.stats());
    print_json(&summary)
}

fn wedge(platform: Platform, policy: ResetPolicy) -> Result<(), Error> {
    let (_hw, device, events) = create_device(platform, policy);
    let context = Context::new(&Client::new("hang-monkey"), "victim");

    let pending: Vec<_> = device
        .engine_mask()
        .iter()
        .map(|engine| device.submit(engine, &context))
        .collect::<Result<Vec<_>, _>>()?;

    device.set_wedged();
    let submit_while_wedged = match device.submit(EngineId::Rcs0, &context) {
        Ok(_) => "accepted".to_string(),
        Err(err) => err.to_string(),
    };
    for rq in pending {
        tracing::info!("{}: fence {:?}", rq.engine(), rq.error());
    }

    device.clear_wedged()?;
    device.submit(EngineId::Rcs0, &context)?;

    print_json(&WedgeSummary {
        submit_while_wedged,
        events: events.try_iter().collect(),
        stats: device.stats(),
    })
}

fn run(options: CliOptions) -> Result<(), Error> {
    let policy = match options.policy {
        Some(path) => ResetPolicy::load(path)?,
        None => ResetPolicy::default(),
    };

    match options.ty {
        HangType::Hang {
            engines,
            capture,
            drop_acks,
            not_ready,
        } => hang(
            options.platform,
            policy,
            engines,
            capture,
            drop_acks,
            not_ready,
        ),
        HangType::Fuzz {
            threads,
            iterations,
            seed,
        } => fuzz(options.platform, policy, threads, iterations, seed),
        HangType::Wedge => wedge(options.platform, policy),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let options = CliOptions::parse();
    if let Err(err) = run(options) {
        eprintln!("hang-monkey: {err}");
        std::process::exit(1);
    }
}
