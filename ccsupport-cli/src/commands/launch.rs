use anyhow::Context;
use ccsupport::{
    ChaincodeContext, ChaincodeInput, ChaincodeKey, ChaincodeSupport, TransactionParams,
    init_logging,
};
use clap::Args;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[derive(Args, Debug)]
pub struct LaunchArgs {
    /// Chaincode name
    pub name: String,

    /// Chaincode version
    pub version: String,

    /// Channel to launch on
    #[arg(long, default_value = "mychannel")]
    pub channel: String,

    /// Transaction ID used for the invoke
    #[arg(long)]
    pub txid: Option<String>,

    /// Arguments for a TRANSACTION sent once the chaincode is ready
    #[arg(last = true)]
    pub invoke: Vec<String>,
}

pub async fn execute(args: LaunchArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let config = global.load_config()?;
    let _log_guard = init_logging(&config.support.logging)?;
    let support = global.create_support(&config)?;

    let definition = config
        .definitions
        .iter()
        .find(|d| d.name == args.name)
        .with_context(|| format!("chaincode '{}' is not defined in the config", args.name))?;
    let info = definition.container_info();

    // launched chaincodes dial back to us
    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to listen on {}", config.listen))?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let acceptor = support.acceptor();
    let server = tokio::spawn(async move {
        acceptor
            .serve(listener, async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let outcome = launch_and_invoke(&support, &args).await;

    if let Err(e) = support.stop(&info).await {
        eprintln!("Error stopping chaincode '{}': {}", info.key(), e);
    }
    let _ = shutdown_tx.send(());
    if let Err(e) = server.await? {
        tracing::warn!(error = %e, "Connection acceptor failed");
    }
    outcome
}

async fn launch_and_invoke(support: &ChaincodeSupport, args: &LaunchArgs) -> anyhow::Result<()> {
    let key = ChaincodeKey::new(&args.name, &args.version);
    support
        .launch(&args.channel, &args.name, &args.version, None)
        .await?;
    println!("{}\t{}", key, support.status(&key));

    if args.invoke.is_empty() {
        return Ok(());
    }

    let txid = args
        .txid
        .clone()
        .unwrap_or_else(|| format!("ccsupport-{}", std::process::id()));
    let params = TransactionParams::new(txid, &args.channel);
    let context = ChaincodeContext::new(&args.name, &args.version);
    let input = ChaincodeInput::from_args(args.invoke.iter().cloned());

    let result = support.invoke(&params, &context, input).await?;
    println!(
        "{}\t{}",
        result.response.status,
        String::from_utf8_lossy(&result.response.payload)
    );
    if let Some(event) = result.event {
        println!("event\t{}", event.event_name);
    }
    Ok(())
}
