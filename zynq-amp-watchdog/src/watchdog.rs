//! The crash watchdog cycle: attach → resume → poll → (on crash) dump core
//! → reset → resume, forever. Grounded directly on `crash_watchdog_poll` in
//! the original firmware's `crash_watchdog.c`: a single non-reentrant poll
//! function called from the host main loop, which lazily attaches on its
//! first tick and otherwise just asks the engine whether it is still
//! running.

use std::time::Duration;

use tracing::{error, info, warn};

use zynq_amp_debug::coredump::DEFAULT_CRASH_SIGNAL;
use zynq_amp_debug::{open_engine, Engine, EngineConfig, EngineError, HaltReason, SlaveResetSequence};

/// One poll tick's outcome, for callers (mainly tests) that want to assert
/// on what the watchdog just did without parsing log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogTick {
    /// No target was attached yet; attach was attempted.
    Attached,
    /// The target is running normally.
    Running,
    /// The target had crashed; core was dumped and the target was reset
    /// and resumed.
    CrashHandled(HaltReason),
}

/// Owns the (possibly absent) attached [`Engine`] and the reset strategy
/// used to bring the slave core back up after a crash dump. Exactly one
/// `CrashWatchdog` exists per process, called from the host main loop —
/// this mirrors the original's single static `crash_watchdog_target`,
/// recast as an explicit owned value instead of process-wide global state
/// (spec.md Design Notes: "Global state").
pub struct CrashWatchdog {
    config: EngineConfig,
    reset: Box<dyn SlaveResetSequence>,
    target: Option<Engine>,
}

impl CrashWatchdog {
    pub fn new(config: EngineConfig, reset: Box<dyn SlaveResetSequence>) -> Self {
        Self {
            config,
            reset,
            target: None,
        }
    }

    /// Borrow the attached engine, if any — used by the monitor shell's
    /// `gcore` command, which operates on whatever the watchdog currently
    /// has attached rather than maintaining its own target handle.
    pub fn engine_mut(&mut self) -> Option<&mut Engine> {
        self.target.as_mut()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run exactly one poll tick. Non-reentrant: callers must not call this
    /// again before it returns, matching the single-controlling-task
    /// concurrency model (spec.md §5).
    pub fn tick(&mut self) -> Result<WatchdogTick, EngineError> {
        if self.target.is_none() {
            let mut engine = open_engine(&self.config)?;
            engine.attach()?;
            engine.resume(false)?;
            info!("crash watchdog connected");
            self.target = Some(engine);
            return Ok(WatchdogTick::Attached);
        }

        let engine = self.target.as_mut().expect("checked above");
        let poll = engine.halt_poll();

        let outcome = match poll {
            Ok(outcome) => outcome,
            Err(EngineError::Mmio(e)) => {
                error!(error = %e, "bus error polling halt state, detaching target");
                self.target = None;
                return Err(EngineError::Mmio(e));
            }
            Err(e) => return Err(e),
        };

        match outcome {
            zynq_amp_debug::PollOutcome::Running => Ok(WatchdogTick::Running),
            zynq_amp_debug::PollOutcome::Halted { reason, .. } => {
                warn!(?reason, "firmware crash detected, dumping core");
                let engine = self.target.as_mut().expect("checked above");

                let path = engine.dump_core(
                    &self.config.memory_regions,
                    &self.config.core_dump_dir,
                    DEFAULT_CRASH_SIGNAL,
                )?;
                info!(path = %path.display(), "core dumped");

                engine.reset(self.reset.as_ref())?;
                engine.resume(false)?;
                info!("slave core reset and resumed");

                Ok(WatchdogTick::CrashHandled(reason))
            }
        }
    }
}

/// How long the main loop sleeps between poll ticks when nothing
/// interesting is happening — deliberately much coarser than the
/// sub-millisecond polling inside a single `halt_poll`/`halt_request`
/// wait, since this loop just needs to notice a crash promptly, not
/// synchronize with the core cycle-for-cycle.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long the main loop backs off after a failed poll tick (e.g. a bus
/// error or a halt timeout) before retrying, so a persistently wedged bus
/// doesn't turn into a busy-spin.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(2);

#[cfg(test)]
mod tests {
    use super::*;
    use zynq_amp_debug::NullResetSequence;

    #[test]
    fn fresh_watchdog_has_no_target() {
        let watchdog = CrashWatchdog::new(EngineConfig::default(), Box::new(NullResetSequence));
        assert!(watchdog.target.is_none());
    }
}
