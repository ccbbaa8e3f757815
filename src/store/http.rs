// Storage REST client
// Speaks the hosted backend's object API:
//   POST   {base}/storage/v1/object/{bucket}/{path}        upload
//   DELETE {base}/storage/v1/object/{bucket}/{path}        remove
//   GET    {base}/storage/v1/object/public/{bucket}/{path} public read

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::sync::Arc;

use super::RemoteStore;
use crate::config::Config;
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct HttpStore {
    client: Client,
    base_url: String,
    bucket: String,
    api_key: String,
    access_token: Option<String>,
}

impl HttpStore {
    pub fn new(base_url: &str, bucket: &str, api_key: &str) -> Self {
        HttpStore {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            api_key: api_key.to_string(),
            access_token: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.backend_url(),
            &config.backend.bucket,
            &config.backend.anon_key,
        )
    }

    /// Uploads and deletes run as this user instead of the anon key.
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            self.bucket,
            path.trim_start_matches('/')
        )
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            path.trim_start_matches('/')
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self.access_token.as_deref().unwrap_or(&self.api_key);
        request.header("apikey", &self.api_key).bearer_auth(token)
    }
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn probe(&self, url: &str) -> Result<bool, StoreError> {
        let response = self.client.head(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url, status = status.as_u16(), "Probe found nothing");
        }
        Ok(status.is_success())
    }

    async fn load(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn upload(
        &self,
        bytes: Arc<[u8]>,
        path: &str,
        content_type: &str,
    ) -> Result<String, StoreError> {
        tracing::debug!(path, size = bytes.len(), "Uploading object");

        let request = self
            .client
            .post(self.object_url(path))
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes.to_vec());

        let response = self.authorize(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
            });
        }

        Ok(self.public_url(path))
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        let request = self.client.delete(self.object_url(path));
        let response = self.authorize(request).send().await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            // already gone
            StatusCode::NOT_FOUND => Ok(()),
            status => Err(StoreError::Status {
                status: status.as_u16(),
            }),
        }
    }
}
