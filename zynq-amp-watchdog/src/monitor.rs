//! The `monitor` command shell: prefix-matched dispatch against a small
//! built-in command table, carrying over the general-purpose commands from
//! the original firmware's `command.c` (`help`, `assert_srst`,
//! `halt_timeout`, `gcore`). The wire/packet layer (`gdb_outf`, packet
//! framing, `morse`/`version`/`targets`/SWO/power commands tied to a host
//! debug probe this engine doesn't have) is out of scope; commands return
//! their output as a plain string for whatever transport adapter ends up
//! calling them.

use zynq_amp_debug::coredump::DEFAULT_CRASH_SIGNAL;
use zynq_amp_debug::{Engine, EngineError};

/// `assert_srst` mode: how long to hold the slave core in reset. Carried
/// over as monitor-shell state even though this engine's reset sequence
/// doesn't yet branch on it (see DESIGN.md) — an operator can still query
/// and set it, matching the original command's behavior of always being
/// queryable and settable regardless of whether anything currently reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssertSrst {
    #[default]
    Never,
    UntilScan,
    UntilAttach,
}

impl AssertSrst {
    fn label(self) -> &'static str {
        match self {
            AssertSrst::Never => "never",
            AssertSrst::UntilScan => "until scan",
            AssertSrst::UntilAttach => "until attach",
        }
    }
}

/// State shared by every monitor command invocation: the currently attached
/// engine (if any), and the handful of global settings the original
/// firmware's command table let an operator tweak.
pub struct MonitorContext<'a> {
    pub engine: Option<&'a mut Engine>,
    pub core_dump_dir: String,
    pub memory_regions: Vec<zynq_amp_debug::MemoryRegion>,
    pub halt_timeout_ms: u64,
    pub assert_srst: AssertSrst,
}

pub trait MonitorCommand {
    fn name(&self) -> &str;
    fn help(&self) -> &str;
    fn run(&self, ctx: &mut MonitorContext<'_>, args: &[&str]) -> Result<String, EngineError>;
}

struct HelpCommand {
    descriptors: Vec<(String, String)>,
}

impl MonitorCommand for HelpCommand {
    fn name(&self) -> &str {
        "help"
    }

    fn help(&self) -> &str {
        "Display help for monitor commands"
    }

    fn run(&self, _ctx: &mut MonitorContext<'_>, _args: &[&str]) -> Result<String, EngineError> {
        let mut lines = vec!["General commands:".to_string()];
        lines.push(format!("\t{} -- {}", self.name(), self.help()));
        for (name, help) in &self.descriptors {
            lines.push(format!("\t{name} -- {help}"));
        }
        Ok(lines.join("\n"))
    }
}

struct AssertSrstCommand;

impl MonitorCommand for AssertSrstCommand {
    fn name(&self) -> &str {
        "assert_srst"
    }

    fn help(&self) -> &str {
        "Assert SRST until:(never(default)| scan | attach)"
    }

    fn run(&self, ctx: &mut MonitorContext<'_>, args: &[&str]) -> Result<String, EngineError> {
        if let Some(&mode) = args.get(1) {
            ctx.assert_srst = match mode {
                "attach" => AssertSrst::UntilAttach,
                "scan" => AssertSrst::UntilScan,
                _ => AssertSrst::Never,
            };
        }
        Ok(format!("Assert SRST {}", ctx.assert_srst.label()))
    }
}

struct HaltTimeoutCommand;

impl MonitorCommand for HaltTimeoutCommand {
    fn name(&self) -> &str {
        "halt_timeout"
    }

    fn help(&self) -> &str {
        "Timeout (ms) to wait until the slave core is halted: (Default 2000)"
    }

    fn run(&self, ctx: &mut MonitorContext<'_>, args: &[&str]) -> Result<String, EngineError> {
        if let Some(&ms) = args.get(1) {
            let ms: u64 = ms
                .parse()
                .map_err(|_| EngineError::Other(anyhow::anyhow!("invalid halt_timeout value {ms:?}")))?;
            ctx.halt_timeout_ms = ms;
            if let Some(engine) = ctx.engine.as_deref_mut() {
                engine.set_halt_timeout(std::time::Duration::from_millis(ms));
            }
        }
        Ok(format!(
            "Slave core timeout to wait for halt: {}",
            ctx.halt_timeout_ms
        ))
    }
}

struct GcoreCommand;

impl MonitorCommand for GcoreCommand {
    fn name(&self) -> &str {
        "gcore"
    }

    fn help(&self) -> &str {
        "Generate a core dump"
    }

    fn run(&self, ctx: &mut MonitorContext<'_>, _args: &[&str]) -> Result<String, EngineError> {
        let engine = ctx.engine.as_deref_mut().ok_or(EngineError::NotHalted)?;
        let path = engine.dump_core(&ctx.memory_regions, &ctx.core_dump_dir, DEFAULT_CRASH_SIGNAL)?;
        Ok(format!("Dumped core to {}", path.display()))
    }
}

/// Holds the command registry and dispatches input lines against it,
/// matching `command_process`'s `strncmp(argv[0], c->cmd, strlen(argv[0]))`
/// prefix rule: the first registered command whose name starts with the
/// given token wins, so `mon hal 1000` matches `halt_timeout`.
pub struct MonitorShell {
    commands: Vec<Box<dyn MonitorCommand>>,
}

impl MonitorShell {
    pub fn new() -> Self {
        let commands: Vec<Box<dyn MonitorCommand>> = vec![
            Box::new(AssertSrstCommand),
            Box::new(HaltTimeoutCommand),
            Box::new(GcoreCommand),
        ];
        let descriptors = commands
            .iter()
            .map(|c| (c.name().to_string(), c.help().to_string()))
            .collect();

        let mut commands = commands;
        commands.insert(0, Box::new(HelpCommand { descriptors }));

        Self { commands }
    }

    /// Tokenize `line`, find the first command whose name the first token
    /// prefixes, and run it. An empty line or a line matching nothing is
    /// forwarded nowhere (there is no target-specific command table here)
    /// and reports "unrecognized command", mirroring `command_process`
    /// falling through to `target_command` only when a target is attached.
    pub fn dispatch(&self, ctx: &mut MonitorContext<'_>, line: &str) -> String {
        let args: Vec<&str> = line.split_whitespace().collect();
        let Some(&first) = args.first() else {
            return "unrecognized command".to_string();
        };

        for cmd in &self.commands {
            if cmd.name().starts_with(first) {
                return match cmd.run(ctx, &args) {
                    Ok(out) => out,
                    Err(_) if cmd.name() == "gcore" => String::new(),
                    Err(e) => format!("error: {e}"),
                };
            }
        }

        format!("unrecognized command: {first}")
    }
}

impl Default for MonitorShell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> MonitorContext<'static> {
        MonitorContext {
            engine: None,
            core_dump_dir: "/tmp/cores".to_string(),
            memory_regions: Vec::new(),
            halt_timeout_ms: 2000,
            assert_srst: AssertSrst::default(),
        }
    }

    #[test]
    fn prefix_match_picks_first_registered_command() {
        let shell = MonitorShell::new();
        let mut ctx = ctx();
        let out = shell.dispatch(&mut ctx, "hal 500");
        assert_eq!(out, "Slave core timeout to wait for halt: 500");
        assert_eq!(ctx.halt_timeout_ms, 500);
    }

    #[test]
    fn help_lists_every_registered_command() {
        let shell = MonitorShell::new();
        let mut ctx = ctx();
        let out = shell.dispatch(&mut ctx, "help");
        assert!(out.contains("assert_srst"));
        assert!(out.contains("halt_timeout"));
        assert!(out.contains("gcore"));
    }

    #[test]
    fn gcore_with_no_target_fails_silently() {
        let shell = MonitorShell::new();
        let mut ctx = ctx();
        let out = shell.dispatch(&mut ctx, "gcore");
        assert_eq!(out, "");
    }

    #[test]
    fn assert_srst_defaults_to_never_and_is_settable() {
        let shell = MonitorShell::new();
        let mut ctx = ctx();
        assert_eq!(shell.dispatch(&mut ctx, "assert_srst"), "Assert SRST never");
        assert_eq!(
            shell.dispatch(&mut ctx, "assert_srst attach"),
            "Assert SRST until attach"
        );
    }

    #[test]
    fn empty_line_is_unrecognized() {
        let shell = MonitorShell::new();
        let mut ctx = ctx();
        assert_eq!(shell.dispatch(&mut ctx, "   "), "unrecognized command");
    }
}
