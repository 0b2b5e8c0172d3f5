//! Repository and preference operations
//!
//! Every function takes the [`PdsClient`] as its first parameter so the client
//! itself stays a thin dispatch layer.

use bytes::Bytes;
use reqwest::header;
use serde_json::json;
use tracing::{info, instrument};

use crate::services::client::errors::ClientResult;
use crate::services::client::PdsClient;

/// Export the repository as a CAR file (com.atproto.sync.getRepo)
#[instrument(skip(client), fields(pds = %client.service_url), err)]
pub async fn export_repository_impl(client: &PdsClient, did: &str) -> ClientResult<Bytes> {
    info!("Exporting repository for DID: {}", did);

    let url = client.xrpc_url("com.atproto.sync.getRepo");
    let request = client
        .http_client
        .get(&url)
        .query(&[("did", did)])
        .header("Authorization", client.bearer()?)
        .header(header::ACCEPT_ENCODING, "gzip, deflate");

    let response = client.send_checked("getRepo", request).await?;
    // Decompression is handled by reqwest
    let car = response.bytes().await?;

    info!("Repository exported successfully, size: {} bytes", car.len());
    Ok(car)
}

/// Import a CAR file into the bound account (com.atproto.repo.importRepo)
#[instrument(skip(client, car), fields(pds = %client.service_url, car_size = car.len()), err)]
pub async fn import_repository_impl(client: &PdsClient, car: Bytes) -> ClientResult<()> {
    let url = client.xrpc_url("com.atproto.repo.importRepo");
    // Raw CAR body, the server rejects compressed uploads
    let request = client
        .http_client
        .post(&url)
        .header("Authorization", client.bearer()?)
        .header(header::CONTENT_TYPE, "application/vnd.ipld.car")
        .body(car);

    client.send_checked("importRepo", request).await?;
    info!("Repository imported successfully");
    Ok(())
}

/// app.bsky.actor.getPreferences
#[instrument(skip(client), fields(pds = %client.service_url), err)]
pub async fn export_preferences_impl(client: &PdsClient) -> ClientResult<serde_json::Value> {
    let url = client.xrpc_url("app.bsky.actor.getPreferences");
    let request = client
        .http_client
        .get(&url)
        .header("Authorization", client.bearer()?);

    let response = client.send_checked("getPreferences", request).await?;
    Ok(response.json().await?)
}

/// app.bsky.actor.putPreferences, writing the exported document verbatim
#[instrument(skip(client, preferences), fields(pds = %client.service_url), err)]
pub async fn import_preferences_impl(
    client: &PdsClient,
    preferences: serde_json::Value,
) -> ClientResult<()> {
    let body = json!({
        "preferences": preferences.get("preferences").cloned().unwrap_or_else(|| json!([])),
    });

    let url = client.xrpc_url("app.bsky.actor.putPreferences");
    let request = client
        .http_client
        .post(&url)
        .header("Authorization", client.bearer()?)
        .json(&body);

    client.send_checked("putPreferences", request).await?;
    info!("Preferences imported successfully");
    Ok(())
}
