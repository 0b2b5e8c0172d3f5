use serde_json::json;
use tracing::{info, instrument, warn};

use crate::services::client::errors::{ClientError, ClientResult};
use crate::services::client::session::JwtUtils;
use crate::services::client::types::*;
use crate::services::client::PdsClient;

/// Build session credentials from a createSession/createAccount/refreshSession body
fn session_from_json(
    data: &serde_json::Value,
    pds: &str,
    fallback_did: &str,
    fallback_handle: &str,
) -> ClientResult<ClientSessionCredentials> {
    let access_jwt = data["accessJwt"].as_str().unwrap_or_default().to_string();
    let refresh_jwt = data["refreshJwt"].as_str().unwrap_or_default().to_string();

    if access_jwt.is_empty() || refresh_jwt.is_empty() {
        return Err(ClientError::InvalidResponse {
            expected: "accessJwt and refreshJwt".to_string(),
            got: "missing session tokens".to_string(),
        });
    }

    Ok(ClientSessionCredentials {
        did: data["did"].as_str().unwrap_or(fallback_did).to_string(),
        handle: data["handle"].as_str().unwrap_or(fallback_handle).to_string(),
        pds: pds.to_string(),
        expires_at: JwtUtils::get_expiration(&access_jwt),
        access_jwt,
        refresh_jwt,
    })
}

/// com.atproto.server.createSession
#[instrument(skip(client, password), fields(pds = %client.service_url), err)]
pub async fn login_impl(
    client: &PdsClient,
    identifier: &str,
    password: &str,
) -> ClientResult<ClientSessionCredentials> {
    info!("Creating session for identifier: {}", identifier);

    let url = client.xrpc_url("com.atproto.server.createSession");
    let request = client.http_client.post(&url).json(&json!({
        "identifier": identifier,
        "password": password,
    }));

    let response = client.send_checked("createSession", request).await?;
    let data: serde_json::Value = response.json().await?;

    let is_active = data["active"].as_bool().unwrap_or(true);
    if !is_active {
        // Deactivated accounts can still log in; the target is deactivated until cut-over
        warn!(
            "Logged into inactive account {} (status: {})",
            identifier,
            data["status"].as_str().unwrap_or("unknown")
        );
    }

    let session = session_from_json(&data, &client.service_url, identifier, identifier)?;
    info!("Login successful for DID: {}", session.did);
    Ok(session)
}

/// com.atproto.server.refreshSession
#[instrument(skip(client), err)]
pub async fn refresh_session_impl(
    client: &PdsClient,
    session: &ClientSessionCredentials,
) -> ClientResult<ClientSessionCredentials> {
    let url = client.xrpc_url("com.atproto.server.refreshSession");
    let request = client
        .http_client
        .post(&url)
        .header("Authorization", format!("Bearer {}", session.refresh_jwt));

    let response = match client.send_checked("refreshSession", request).await {
        Ok(response) => response,
        Err(e) if e.is_transient() => return Err(e),
        Err(_) => return Err(ClientError::SessionExpired),
    };
    let data: serde_json::Value = response.json().await?;

    let mut refreshed = session_from_json(&data, &session.pds, &session.did, &session.handle)?;
    if refreshed.refresh_jwt.is_empty() {
        refreshed.refresh_jwt = session.refresh_jwt.clone();
    }

    info!("Session refreshed successfully for DID: {}", refreshed.did);
    Ok(refreshed)
}

/// com.atproto.server.createAccount with an existing DID
#[instrument(skip(client, request), fields(handle = %request.handle, did = %request.did), err)]
pub async fn create_account_impl(
    client: &PdsClient,
    request: &CreateAccountRequest,
) -> ClientResult<ClientSessionCredentials> {
    info!("Creating account at {}", client.service_url);

    let url = client.xrpc_url("com.atproto.server.createAccount");
    let mut builder = client.http_client.post(&url).json(request);

    if let Some(token) = &request.service_auth_token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }

    let response = client.send_checked("createAccount", builder).await?;
    let data: serde_json::Value = response.json().await?;
    let session = session_from_json(&data, &client.service_url, &request.did, &request.handle)?;

    info!("Account created successfully for DID: {}", session.did);
    Ok(session)
}

/// com.atproto.server.checkAccountStatus
#[instrument(skip(client), fields(pds = %client.service_url), err)]
pub async fn check_account_status_impl(client: &PdsClient) -> ClientResult<AccountStatusSnapshot> {
    let url = client.xrpc_url("com.atproto.server.checkAccountStatus");
    let request = client
        .http_client
        .get(&url)
        .header("Authorization", client.bearer()?);

    let response = client.send_checked("checkAccountStatus", request).await?;
    Ok(response.json().await?)
}

/// com.atproto.server.getServiceAuth
#[instrument(skip(client), err)]
pub async fn get_service_auth_impl(
    client: &PdsClient,
    audience: &str,
    method: &str,
    expires_at: Option<u64>,
) -> ClientResult<String> {
    info!(
        "Generating service auth token for audience: {} (method: {})",
        audience, method
    );

    let url = client.xrpc_url("com.atproto.server.getServiceAuth");
    let mut query = vec![
        ("aud", audience.to_string()),
        ("lxm", method.to_string()),
    ];
    if let Some(exp) = expires_at {
        query.push(("exp", exp.to_string()));
    }

    let request = client
        .http_client
        .get(&url)
        .query(&query)
        .header("Authorization", client.bearer()?);

    let response = client.send_checked("getServiceAuth", request).await?;
    let data: serde_json::Value = response.json().await?;

    match data["token"].as_str() {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(ClientError::InvalidResponse {
            expected: "service auth token".to_string(),
            got: "empty token".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_from_json_requires_tokens() {
        let data = json!({ "did": "did:plc:abc", "handle": "alice.test" });
        assert!(matches!(
            session_from_json(&data, "https://pds.test", "did:plc:abc", "alice.test"),
            Err(ClientError::InvalidResponse { .. })
        ));

        let data = json!({
            "did": "did:plc:abc",
            "accessJwt": "access",
            "refreshJwt": "refresh"
        });
        let session =
            session_from_json(&data, "https://pds.test", "did:plc:fallback", "alice.test").unwrap();
        assert_eq!(session.did, "did:plc:abc");
        assert_eq!(session.handle, "alice.test");
        assert_eq!(session.pds, "https://pds.test");
        assert_eq!(session.expires_at, None);
    }
}
