use anyhow::bail;
use oxiread::{OximeterClient, POLL_INTERVAL, SUPPORTED_MODELS};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(address) = args.next() else {
        bail!("usage: oxiread <address> [model]\nsupported models: {SUPPORTED_MODELS:?}");
    };
    let model = args.next().unwrap_or_else(|| "JKS50F".to_string());

    let client = OximeterClient::new(&address, &model).await?;

    let mut interval = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let measurement = client.tick().await;
                println!("{measurement:?}");
            }
            _ = tokio::signal::ctrl_c() => {
                client.shutdown().await;
                return Ok(());
            }
        }
    }
}
