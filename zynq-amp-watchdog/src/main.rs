//! `zynq-amp-watchdog`: attaches to the Zynq-7000 AMP slave Cortex-A9 core,
//! keeps a crash watchdog cycling (attach → resume → poll → dump → reset),
//! and services `monitor`-style operator commands typed on stdin.
//!
//! The host transport this binary would eventually sit behind (the
//! `gdbserver` packet layer, stdio redirection to the target) is out of
//! scope (spec.md §1); this binary drives the engine directly and takes
//! monitor commands as plain lines of text so it is useful standalone.

mod config;
mod logging;
mod monitor;
mod watchdog;

use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use clap::Parser;
use tracing::{error, info};

use zynq_amp_debug::ZynqAmpReset;

use crate::logging::LevelFilter;
use crate::monitor::{AssertSrst, MonitorContext, MonitorShell};
use crate::watchdog::{CrashWatchdog, ERROR_BACKOFF, POLL_INTERVAL};

#[derive(Debug, Clone, Parser)]
#[command(name = "zynq-amp-watchdog", about = "Zynq-7000 AMP slave core crash watchdog")]
pub(crate) struct Cli {
    /// Directory core dumps are written into.
    #[arg(long)]
    pub core_dump_dir: Option<PathBuf>,

    /// How long to wait for the slave core to halt before giving up, in ms.
    #[arg(long)]
    pub halt_timeout_ms: Option<u64>,

    /// Log verbosity; overrides `RUST_LOG` and the config file if given.
    #[arg(long, value_enum)]
    pub log_level: Option<LevelFilter>,

    /// Also write logs as newline-delimited JSON to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load(&cli)?;

    let _log_guard = logging::setup_logging(config.log_level, config.log_file.as_deref())?;

    info!(
        debug_base = format_args!("{:#x}", config.engine.debug_base),
        slcr_base = format_args!("{:#x}", config.engine.slcr_base),
        "starting zynq-amp-watchdog"
    );

    let mut watchdog = CrashWatchdog::new(config.engine.clone(), Box::new(ZynqAmpReset));
    let shell = MonitorShell::new();

    let mut assert_srst = AssertSrst::default();
    let mut halt_timeout_ms = config.engine.halt_timeout_ms;

    let commands = spawn_stdin_reader();

    loop {
        match watchdog.tick() {
            Ok(tick) => {
                if matches!(tick, watchdog::WatchdogTick::CrashHandled(_)) {
                    info!("watchdog cycle complete, resuming poll");
                }
            }
            Err(e) => {
                error!(error = %e, "watchdog tick failed, backing off");
                thread::sleep(ERROR_BACKOFF);
            }
        }

        if let Ok(line) = commands.try_recv() {
            let core_dump_dir = watchdog.config().core_dump_dir.clone();
            let memory_regions = watchdog.config().memory_regions.clone();
            let mut ctx = MonitorContext {
                core_dump_dir,
                memory_regions,
                halt_timeout_ms,
                assert_srst,
                engine: watchdog.engine_mut(),
            };
            let output = shell.dispatch(&mut ctx, &line);
            halt_timeout_ms = ctx.halt_timeout_ms;
            assert_srst = ctx.assert_srst;
            if !output.is_empty() {
                println!("{output}");
            }
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Spawn the one OS thread this binary uses: a blocking stdin line reader
/// that forwards complete lines over a channel. It never touches the
/// engine — the main loop remains the engine's sole owner and caller,
/// matching spec.md §5's single-controlling-task model; this thread exists
/// only to keep `tick()`'s polling cadence from blocking on operator input.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        use std::io::BufRead;
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
    rx
}
