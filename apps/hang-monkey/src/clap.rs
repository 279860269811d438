// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gtreset::gtreset_core::{EngineId, Platform};

#[derive(Subcommand, Debug, Clone)]
pub enum HangType {
    /// Hang the given engines and run one recovery pass.
    Hang {
        #[arg(short, long, required = true, num_args = 1..)]
        engines: Vec<EngineId>,
        /// Capture error state before resetting.
        #[arg(long)]
        capture: bool,
        /// Number of whole device reset requests the hardware ignores.
        #[arg(long, default_value_t = 0)]
        drop_acks: u32,
        /// Engines whose reset handshake never reports ready.
        #[arg(long, num_args = 1..)]
        not_ready: Vec<EngineId>,
    },
    /// Race recovery passes from several threads.
    Fuzz {
        #[arg(short, long, default_value_t = 4)]
        threads: u64,
        #[arg(short, long, default_value_t = 100)]
        iterations: usize,
        #[arg(short, long, default_value_t = 0)]
        seed: u64,
    },
    /// Wedge the device, then bring it back.
    Wedge,
}

#[derive(Parser, Debug)]
#[command(version, about = "Inject GPU hangs into a simulated device and recover from them")]
pub struct CliOptions {
    #[arg(short, long, default_value_t = Platform::Skylake)]
    pub platform: Platform,

    /// Reset policy, yaml or json.
    #[arg(long)]
    pub policy: Option<PathBuf>,

    #[command(subcommand)]
    pub ty: HangType,
}
