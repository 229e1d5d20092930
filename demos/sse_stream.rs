//! Opens an SSE stream and prints every event until the process is
//! interrupted.

use std::collections::BTreeMap;

use endpoint_client::catalog::{EndpointCatalog, MethodDescriptor};
use endpoint_client::{Client, Operation};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let endpoints = EndpointCatalog::builder()
        .endpoint("/events", Operation::Sse, MethodDescriptor::new())
        .build();

    let client = Client::builder("https://api.example.com").endpoints(endpoints).build();

    let handle = client
        .sse(
            "/events",
            BTreeMap::new(),
            vec![],
            |event| match event {
                Ok(event) => println!("{}: {}", event.event_type, event.data),
                Err(err) => eprintln!("sse error: {err}"),
            },
            Default::default(),
        )
        .await?;

    tokio::signal::ctrl_c().await?;
    handle.close();
    Ok(())
}
