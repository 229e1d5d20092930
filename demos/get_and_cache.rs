//! Builds a catalog with a single cached `GET` endpoint and issues the
//! same request twice, showing the second call hit the TTL cache.

use std::collections::BTreeMap;
use std::time::Duration;

use endpoint_client::catalog::{EndpointCatalog, MethodDescriptor};
use endpoint_client::client::RequestOptions;
use endpoint_client::{Client, Operation};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let endpoints = EndpointCatalog::builder()
        .endpoint("/users/{id}", Operation::Get, MethodDescriptor::new())
        .build();

    let client = Client::builder("https://api.example.com")
        .endpoints(endpoints)
        .cache_ttl(Duration::from_secs(30))
        .build();

    let mut path_params = BTreeMap::new();
    path_params.insert("id".to_string(), "42".to_string());

    let opts = RequestOptions::new().with_cache(true);

    let first = client.get("/users/{id}", path_params.clone(), vec![], opts.clone()).await?;
    println!("first response: {first:?}");

    let second = client.get("/users/{id}", path_params, vec![], opts).await?;
    println!("second response (served from cache): {second:?}");

    Ok(())
}
