//! Two clients fight over one resource through the TCP front end.
//!
//! Run with `cargo run -p cereal --example contention`.

use cereal::prelude::*;
use cereal::telemetry::TelemetryConfig;
use cereal::wire::{Client, Gateway, KeyedDigest, Listener, Response, TokioTransport};
use std::sync::Arc;
use std::time::Duration;

const KEY: &str = "demo-key";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    TelemetryConfig::builder()
        .service_name("cereal-contention")
        .log_level("info,cereal_lease=debug")
        .build()
        .init()?;

    let cereal = Arc::new(Cereal::new(
        CerealConfig::builder()
            .system("demo")
            .detect_deadlocks(true)
            .build(),
    )?);
    let server: Arc<dyn LockServer> = cereal.clone();
    let listener =
        Listener::bind("127.0.0.1:0", server, Gateway::new(KeyedDigest::new(KEY))).await?;
    let addr = listener.local_addr()?;
    tokio::spawn(listener.serve());

    let mut alice = Client::new(TokioTransport::connect(addr).await?, KeyedDigest::new(KEY), 1);
    let mut bob = Client::new(TokioTransport::connect(addr).await?, KeyedDigest::new(KEY), 2);

    let Response::Granted(grain) = alice
        .lock("alice", "ledger", Duration::from_secs(2), Timeout::Forever)
        .await?
    else {
        return Err("alice was not granted the ledger".into());
    };
    println!("alice holds {grain}");

    // Bob gives up after the default wait.
    let first_try = bob
        .lock("bob", "ledger", Duration::from_secs(2), Timeout::Default)
        .await?;
    println!("bob's first try: {first_try:?}");

    // Bob waits; alice lets go after a moment.
    let waiting = tokio::spawn(async move {
        let response = bob
            .lock("bob", "ledger", Duration::from_secs(2), Timeout::Forever)
            .await;
        (bob, response)
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("alice releases: {:?}", alice.release(&grain).await?);

    let (mut bob, response) = waiting.await?;
    if let Response::Granted(grain) = response? {
        println!("bob holds {grain}");
        println!("bob releases: {:?}", bob.release(&grain).await?);
    }

    println!(
        "{} resource(s) tracked, {} reclaimed",
        cereal.resource_count(),
        cereal.optimize()?
    );
    cereal::telemetry::shutdown_tracing();
    Ok(())
}
