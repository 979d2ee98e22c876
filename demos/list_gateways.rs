use std::error::Error;
use std::sync::Arc;

use lora_gateway_sdk::gateway_api::GatewayApiClient;
use lora_gateway_sdk::session::StaticSession;
use lora_gateway_sdk::stream::endpoint::PageLocation;
use secrecy::SecretString;
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

    let location = PageLocation::parse(origin)?;
    let client = GatewayApiClient::new(
        &location,
        Arc::new(StaticSession::new(SecretString::new(token))),
    )?;

    let page = client.list(10, 0).await?;
    println!("{} gateways", page.total_count);
    for gateway in &page.result {
        let mac = gateway["mac"].as_str().unwrap_or("?");
        let name = gateway["name"].as_str().unwrap_or("");
        println!("{mac}  {name}");
    }
    Ok(())
}
