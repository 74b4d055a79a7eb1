use anyhow::Context;
use ccsupport::init_logging;
use clap::Args;
use tokio::net::TcpListener;

use crate::cli::CliConfig;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to accept chaincode connections on (overrides the config file)
    #[arg(long)]
    pub listen: Option<String>,
}

/// `serve` never launches anything, so every chaincode it sees was started
/// by the user and registers without a launch in flight.
fn serve_config(mut config: CliConfig, args: ServeArgs) -> CliConfig {
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    config.support.user_runs_cc = true;
    config
}

pub async fn execute(args: ServeArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let config = serve_config(global.load_config()?, args);
    let _log_guard = init_logging(&config.support.logging)?;

    let support = global.create_support(&config)?;
    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to listen on {}", config.listen))?;

    tracing::info!(
        listen = %config.listen,
        definitions = config.definitions.len(),
        package_dir = %config.package_dir.display(),
        "Chaincode broker started, accepting user-started chaincodes"
    );

    support
        .acceptor()
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    for key in support.registry().ready_keys() {
        if let Some(definition) = config
            .definitions
            .iter()
            .find(|d| d.name == key.name() && d.version == key.version())
        {
            if let Err(e) = support.stop(&definition.container_info()).await {
                tracing::warn!(chaincode = %key, error = %e, "Failed to stop chaincode");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_accepts_user_started_chaincodes() {
        let config = serve_config(CliConfig::default(), ServeArgs { listen: None });
        assert!(config.support.user_runs_cc);
        assert_eq!(config.listen, CliConfig::default().listen);
    }

    #[test]
    fn listen_flag_overrides_config() {
        let args = ServeArgs {
            listen: Some("127.0.0.1:7999".into()),
        };
        assert_eq!(serve_config(CliConfig::default(), args).listen, "127.0.0.1:7999");
    }
}
