// List devices, then print pushed device events until the stream ends.
//
//   WIFIPLUG_API_KEY=... WIFIPLUG_API_SECRET=... RUST_LOG=wifiplug_api=debug \
//       cargo run --example event_stream -- "device:*.*"

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use wifiplug_api::events::{EventClientConfig, EventSelector};
use wifiplug_api::{ApiClient, ApiKeys, ClientEvent, EventClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let key = std::env::var("WIFIPLUG_API_KEY")?;
    let secret = std::env::var("WIFIPLUG_API_SECRET")?;
    let selector: EventSelector = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "device:*.*".into())
        .parse()?;
    let cancel = CancellationToken::new();

    let api = ApiClient::new(key.clone(), secret.clone())?;
    for device in api.list_devices(&cancel).await? {
        println!(
            "{}  {:<24} online={}",
            device.uuid,
            device.name.as_deref().unwrap_or("-"),
            device.is_online
        );
    }

    let events = EventClient::new(ApiKeys::new(key, secret), EventClientConfig::default());
    let mut rx = events.subscribe_events();
    events.subscribe(&selector, &cancel).await?;

    loop {
        match rx.recv().await {
            Ok(ClientEvent::Connected) => println!("-- connected"),
            Ok(ClientEvent::Disconnected) => println!("-- disconnected"),
            Ok(ClientEvent::Received(event)) => {
                println!("{} {}:{} {}", event.name, event.resource_type, event.resource, event.data);
            }
            Err(RecvError::Lagged(n)) => println!("-- skipped {n} events"),
            Err(RecvError::Closed) => break,
        }
    }

    events.close().await;
    Ok(())
}
