use bytes::Bytes;
use reqwest::header;
use tracing::{debug, instrument};

use crate::services::client::errors::{ClientError, ClientResult};
use crate::services::client::types::{BlobData, BlobPage};
use crate::services::client::PdsClient;

/// One page of com.atproto.sync.listBlobs
#[instrument(skip(client), fields(pds = %client.service_url), err)]
pub async fn list_blobs_impl(
    client: &PdsClient,
    did: &str,
    cursor: Option<&str>,
    limit: u32,
) -> ClientResult<BlobPage> {
    let url = client.xrpc_url("com.atproto.sync.listBlobs");
    let mut query = vec![("did", did.to_string()), ("limit", limit.to_string())];
    if let Some(cursor) = cursor {
        query.push(("cursor", cursor.to_string()));
    }

    let request = client
        .http_client
        .get(&url)
        .query(&query)
        .header("Authorization", client.bearer()?);

    let response = client.send_checked("listBlobs", request).await?;
    let page: BlobPage = response.json().await?;
    debug!(
        "Listed {} blobs (cursor: {:?})",
        page.cids.len(),
        page.next_cursor()
    );
    Ok(page)
}

/// com.atproto.sync.getBlob
///
/// A `Content-Length` over `max_bytes` is refused before the body is read.
#[instrument(skip(client), err)]
pub async fn get_blob_impl(
    client: &PdsClient,
    did: &str,
    cid: &str,
    max_bytes: u64,
) -> ClientResult<BlobData> {
    let url = client.xrpc_url("com.atproto.sync.getBlob");
    let request = client
        .http_client
        .get(&url)
        .query(&[("did", did), ("cid", cid)])
        .header("Authorization", client.bearer()?);

    let response = client.send_checked("getBlob", request).await?;
    if let Some(size) = response.content_length() {
        check_blob_size(size, max_bytes)?;
    }
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());
    let bytes = response.bytes().await?;
    check_blob_size(bytes.len() as u64, max_bytes)?;

    debug!("Downloaded blob {} ({} bytes)", cid, bytes.len());
    Ok(BlobData {
        bytes,
        content_type,
    })
}

fn check_blob_size(size: u64, limit: u64) -> ClientResult<()> {
    if size > limit {
        return Err(ClientError::TooLarge {
            operation: "getBlob".to_string(),
            size,
            limit,
        });
    }
    Ok(())
}

/// com.atproto.repo.uploadBlob
#[instrument(skip(client, data), fields(size = data.len()), err)]
pub async fn upload_blob_impl(
    client: &PdsClient,
    data: Bytes,
    content_type: &str,
) -> ClientResult<()> {
    let url = client.xrpc_url("com.atproto.repo.uploadBlob");
    let request = client
        .http_client
        .post(&url)
        .header("Authorization", client.bearer()?)
        .header(header::CONTENT_TYPE, content_type)
        .body(data);

    client.send_checked("uploadBlob", request).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_size_limit() {
        assert!(check_blob_size(100, 100).is_ok());
        match check_blob_size(101, 100) {
            Err(ClientError::TooLarge { size, limit, .. }) => {
                assert_eq!((size, limit), (101, 100));
            }
            other => panic!("expected TooLarge, got {:?}", other),
        }
    }
}
