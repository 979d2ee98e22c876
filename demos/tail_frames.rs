use std::error::Error;
use std::sync::Arc;

use lora_gateway_sdk::dispatch::{Action, ErrorDispatcher};
use lora_gateway_sdk::session::StaticSession;
use lora_gateway_sdk::stream::client::FrameLogClient;
use lora_gateway_sdk::stream::endpoint::PageLocation;
use secrecy::SecretString;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let origin = "https://REPLACE_WITH_APP_HOST";
    let token = "REPLACE_WITH_JWT".to_string();
    let gateway_id = "REPLACE_WITH_GATEWAY_MAC";

    let errors = ErrorDispatcher::default();
    let mut error_rx = errors.subscribe();
    tokio::spawn(async move {
        loop {
            match error_rx.recv().await {
                Ok(Action::CreateError { error }) => {
                    eprintln!("gateway error {}: {}", error.code, error.error);
                }
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("skipped {skipped} gateway errors");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let client = FrameLogClient::new(
        PageLocation::parse(origin)?,
        Arc::new(StaticSession::new(SecretString::new(token))),
        Arc::new(errors),
    );
    println!("tailing {}", client.endpoint_for(gateway_id));

    let mut subscription = client.open_with(
        gateway_id,
        || println!("connected"),
        || println!("disconnected, reconnecting"),
        |frame| println!("{frame}"),
    )?;

    tokio::signal::ctrl_c().await?;
    subscription.close();
    Ok(())
}
