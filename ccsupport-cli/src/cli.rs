//! Argument parsing and the YAML configuration file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use ccsupport::{
    ChaincodeDefinition, ChaincodeSupport, FsPackageProvider, ProcessRuntime, StaticLifecycle,
    SupportConfig,
};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::commands;

#[derive(Parser, Debug)]
#[command(name = "ccsupport", version, about = "Chaincode runtime broker")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalFlags {
    /// Path to the YAML configuration file
    #[arg(long, global = true, env = "CCSUPPORT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter, overrides the configured level
    #[arg(long, global = true, env = "CCSUPPORT_LOG_LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Accept connections from user-started chaincodes (development mode)
    Serve(commands::serve::ServeArgs),
    /// Launch one chaincode, optionally invoke it, then stop it
    Launch(commands::launch::LaunchArgs),
    /// Validate the configuration and print it with defaults filled in
    CheckConfig,
}

// ============================================================================
// CONFIG FILE
// ============================================================================

/// Contents of the `--config` file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CliConfig {
    /// Address chaincodes dial back to.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Directory holding code packages, named by `package_id` or `<name>.<version>`.
    #[serde(default = "default_package_dir")]
    pub package_dir: PathBuf,

    #[serde(default)]
    pub support: SupportConfig,

    /// Chaincodes that may be launched.
    #[serde(default)]
    pub definitions: Vec<ChaincodeDefinition>,
}

fn default_listen() -> String {
    "0.0.0.0:7052".to_string()
}

fn default_package_dir() -> PathBuf {
    PathBuf::from("packages")
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            package_dir: default_package_dir(),
            support: SupportConfig::default(),
            definitions: Vec::new(),
        }
    }
}

impl CliConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: CliConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }
}

impl GlobalFlags {
    /// Load the config file (or defaults) and apply flag overrides.
    pub fn load_config(&self) -> anyhow::Result<CliConfig> {
        let mut config = match &self.config {
            Some(path) => CliConfig::load(path)?,
            None => CliConfig::default(),
        };
        if let Some(level) = &self.log_level {
            config.support.logging.level = level.clone();
        }
        config.support.validate()?;
        Ok(config)
    }

    /// Broker running process chaincodes, with definitions and packages from
    /// `config`.
    pub fn create_support(&self, config: &CliConfig) -> anyhow::Result<ChaincodeSupport> {
        let runtime = ProcessRuntime::new(&config.support);
        let lifecycle = StaticLifecycle::new(config.definitions.iter().cloned());
        let packages = FsPackageProvider::new(&config.package_dir);

        let support = ChaincodeSupport::new(
            config.support.clone(),
            Arc::new(runtime),
            Arc::new(lifecycle),
            Arc::new(packages),
        )?;
        Ok(support)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccsupport::ContainerType;

    #[test]
    fn parses_partial_config() {
        let config: CliConfig = serde_yaml::from_str(
            r#"
listen: 127.0.0.1:9999
support:
  execute_timeout_ms: 5000
definitions:
  - name: mycc
    version: v2
    container_type: process
"#,
        )
        .unwrap();

        assert_eq!(config.listen, "127.0.0.1:9999");
        assert_eq!(config.package_dir, PathBuf::from("packages"));
        assert_eq!(config.support.execute_timeout_ms, 5000);
        assert_eq!(config.support.startup_timeout_ms, 300_000);
        assert_eq!(config.definitions.len(), 1);
        assert_eq!(config.definitions[0].container_type, ContainerType::Process);
    }

    #[test]
    fn log_level_flag_overrides_config() {
        let flags = GlobalFlags {
            config: None,
            log_level: Some("debug".into()),
        };
        let config = flags.load_config().unwrap();
        assert_eq!(config.support.logging.level, "debug");
    }

    #[test]
    fn cli_parses_launch_with_invoke_args() {
        let cli = Cli::try_parse_from([
            "ccsupport", "launch", "mycc", "v1", "--channel", "ch9", "--", "echo", "hi",
        ])
        .unwrap();

        match cli.command {
            Commands::Launch(args) => {
                assert_eq!(args.name, "mycc");
                assert_eq!(args.version, "v1");
                assert_eq!(args.channel, "ch9");
                assert_eq!(args.invoke, vec!["echo", "hi"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
