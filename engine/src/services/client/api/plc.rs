//! Identity (PLC) operations and account activation

use serde_json::json;
use tracing::{info, instrument};

use crate::services::client::errors::{ClientError, ClientResult};
use crate::services::client::types::{IdentityCredentials, SignedOperation};
use crate::services::client::PdsClient;

/// com.atproto.identity.requestPlcOperationSignature. Emails a one-time token.
#[instrument(skip(client), fields(pds = %client.service_url), err)]
pub async fn request_plc_token_impl(client: &PdsClient) -> ClientResult<()> {
    let url = client.xrpc_url("com.atproto.identity.requestPlcOperationSignature");
    let request = client
        .http_client
        .post(&url)
        .header("Authorization", client.bearer()?);

    client
        .send_checked("requestPlcOperationSignature", request)
        .await?;
    info!("PLC operation signature requested, token sent by email");
    Ok(())
}

/// com.atproto.identity.getRecommendedDidCredentials
#[instrument(skip(client), fields(pds = %client.service_url), err)]
pub async fn get_plc_recommendation_impl(client: &PdsClient) -> ClientResult<IdentityCredentials> {
    let url = client.xrpc_url("com.atproto.identity.getRecommendedDidCredentials");
    let request = client
        .http_client
        .get(&url)
        .header("Authorization", client.bearer()?);

    let response = client
        .send_checked("getRecommendedDidCredentials", request)
        .await?;
    Ok(response.json().await?)
}

/// com.atproto.identity.signPlcOperation
#[instrument(skip(client, token, credentials), fields(pds = %client.service_url), err)]
pub async fn sign_plc_operation_impl(
    client: &PdsClient,
    token: &str,
    credentials: &IdentityCredentials,
) -> ClientResult<SignedOperation> {
    let url = client.xrpc_url("com.atproto.identity.signPlcOperation");
    let request = client
        .http_client
        .post(&url)
        .header("Authorization", client.bearer()?)
        .json(&json!({
            "alsoKnownAs": credentials.also_known_as,
            "rotationKeys": credentials.rotation_keys,
            "services": credentials.services,
            "verificationMethods": credentials.verification_methods,
            "token": token,
        }));

    let response = client.send_checked("signPlcOperation", request).await?;
    let data: serde_json::Value = response.json().await?;

    match data.get("operation") {
        Some(operation) if !operation.is_null() => Ok(SignedOperation(operation.clone())),
        _ => Err(ClientError::InvalidResponse {
            expected: "signed operation".to_string(),
            got: "no operation in response".to_string(),
        }),
    }
}

/// com.atproto.identity.submitPlcOperation
#[instrument(skip(client, operation), fields(pds = %client.service_url), err)]
pub async fn submit_plc_operation_impl(
    client: &PdsClient,
    operation: &SignedOperation,
) -> ClientResult<()> {
    let url = client.xrpc_url("com.atproto.identity.submitPlcOperation");
    let request = client
        .http_client
        .post(&url)
        .header("Authorization", client.bearer()?)
        .json(&json!({ "operation": operation }));

    client.send_checked("submitPlcOperation", request).await?;
    info!("PLC operation submitted");
    Ok(())
}

/// com.atproto.server.activateAccount
#[instrument(skip(client), fields(pds = %client.service_url), err)]
pub async fn activate_account_impl(client: &PdsClient) -> ClientResult<()> {
    let url = client.xrpc_url("com.atproto.server.activateAccount");
    let request = client
        .http_client
        .post(&url)
        .header("Authorization", client.bearer()?);

    client.send_checked("activateAccount", request).await?;
    info!("Account activated");
    Ok(())
}

/// com.atproto.server.deactivateAccount
#[instrument(skip(client), fields(pds = %client.service_url), err)]
pub async fn deactivate_account_impl(client: &PdsClient) -> ClientResult<()> {
    let url = client.xrpc_url("com.atproto.server.deactivateAccount");
    let request = client
        .http_client
        .post(&url)
        .header("Authorization", client.bearer()?)
        .json(&json!({}));

    client.send_checked("deactivateAccount", request).await?;
    info!("Account deactivated");
    Ok(())
}
