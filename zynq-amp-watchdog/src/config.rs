//! Configuration layering for the watchdog binary: built-in defaults, an
//! optional `/etc/zynq-amp-watchdog.toml`, `ZYNQ_AMP_`-prefixed environment
//! variables, and finally CLI flags — the same default -> file -> env ->
//! flags order the teacher CLI's `Figment` setup uses, scaled down to this
//! engine's much smaller configuration surface.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;

use zynq_amp_debug::EngineConfig;

use crate::logging::LevelFilter;
use crate::Cli;

/// Default location of the system-wide config file; only consulted if it
/// exists, so a bare install with no config file still runs on defaults.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/zynq-amp-watchdog.toml";
/// Prefix for environment-variable overrides, e.g. `ZYNQ_AMP_HALT_TIMEOUT_MS`.
pub const ENV_PREFIX: &str = "ZYNQ_AMP_";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WatchdogConfig {
    #[serde(flatten)]
    pub engine: EngineConfig,
    pub log_level: LevelFilter,
    pub log_file: Option<PathBuf>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            log_level: LevelFilter::Info,
            log_file: None,
        }
    }
}

/// Build the layered configuration, then apply any CLI overrides from
/// `cli` (flags always win over file/env/defaults).
pub fn load(cli: &Cli) -> anyhow::Result<WatchdogConfig> {
    load_from(cli, Path::new(DEFAULT_CONFIG_PATH))
}

fn load_from(cli: &Cli, config_path: &Path) -> anyhow::Result<WatchdogConfig> {
    let mut figment = Figment::from(Serialized::defaults(WatchdogConfig::default()));

    if config_path.exists() {
        figment = figment.merge(Toml::file(config_path));
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX));

    let mut config: WatchdogConfig = figment.extract()?;

    if let Some(dir) = &cli.core_dump_dir {
        config.engine.core_dump_dir = dir.display().to_string();
    }
    if let Some(ms) = cli.halt_timeout_ms {
        config.engine.halt_timeout_ms = ms;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if cli.log_file.is_some() {
        config.log_file = cli.log_file.clone();
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_defaults() {
        let cli = Cli {
            core_dump_dir: Some(PathBuf::from("/var/cores")),
            halt_timeout_ms: Some(500),
            log_level: Some(LevelFilter::Debug),
            log_file: None,
        };

        let config = load_from(&cli, Path::new("/nonexistent/zynq-amp-watchdog.toml")).unwrap();

        assert_eq!(config.engine.core_dump_dir, "/var/cores");
        assert_eq!(config.engine.halt_timeout_ms, 500);
        assert_eq!(config.log_level, LevelFilter::Debug);
    }

    #[test]
    fn defaults_hold_when_no_overrides_given() {
        let cli = Cli {
            core_dump_dir: None,
            halt_timeout_ms: None,
            log_level: None,
            log_file: None,
        };

        let config = load_from(&cli, Path::new("/nonexistent/zynq-amp-watchdog.toml")).unwrap();

        assert_eq!(config.engine.core_dump_dir, EngineConfig::default().core_dump_dir);
        assert_eq!(config.engine.halt_timeout_ms, EngineConfig::default().halt_timeout_ms);
    }
}
