use bytes::Bytes;
use reqwest::{Client, StatusCode};
use url::Url;

use crate::error::{BlobError, BlobResult};

/// A client for the blob store's plain HTTP GET/POST/PUT surface: streamed
/// download of source bytes by `storage_path`, and upload of a thumbnail
/// that is POSTed once and PUT on a 400 "already exists" response. Plain
/// bearer-token HTTP rather than a cloud-storage SDK, since nothing here
/// depends on a vendor-specific API surface.
#[derive(Clone)]
pub struct BlobStoreClient {
    client: Client,
    base_url: Url,
    token: String,
}

impl BlobStoreClient {
    pub fn new(base_url: Url, token: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            token,
        }
    }

    fn object_url(&self, bucket: &str, key: &str) -> BlobResult<Url> {
        let encoded = percent_encoding::utf8_percent_encode(
            key,
            percent_encoding::NON_ALPHANUMERIC,
        )
        .to_string();
        self.base_url
            .join(&format!("{bucket}/{encoded}"))
            .map_err(BlobError::from)
    }

    /// Streams an object from the `files` bucket fully into memory. The
    /// Fetcher writes each chunk straight to `{hash}.bin` as it arrives
    /// rather than buffering the whole response, but the client interface
    /// itself just exposes the byte stream.
    pub async fn get(&self, bucket: &str, storage_path: &str) -> BlobResult<Bytes> {
        let url = self.object_url(bucket, storage_path)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.bytes().await?)
    }

    /// Uploads an object, POSTing first; if the store reports the key
    /// already exists (400), retries as a PUT.
    pub async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> BlobResult<()> {
        let url = self.object_url(bucket, key)?;

        let response = self
            .client
            .post(url.clone())
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes.clone())
            .send()
            .await?;

        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if body.to_lowercase().contains("already exists") {
                let retry = self
                    .client
                    .put(url)
                    .bearer_auth(&self.token)
                    .header(reqwest::header::CONTENT_TYPE, content_type)
                    .body(bytes)
                    .send()
                    .await?;
                check_status(retry).await?;
                return Ok(());
            }
            return Err(BlobError::Status {
                status: StatusCode::BAD_REQUEST,
                body,
            });
        }

        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> BlobResult<reqwest::Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(BlobError::Status { status, body })
    }
}
