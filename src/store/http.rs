use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{DocumentStore, path_segments};
use crate::errors::StoreError;

/// Client for a REST document database exposing `<base_url>/<path>.json`.
pub struct HttpStore {
    client: Client,
    base_url: String,
    auth: Option<String>,
}

#[derive(Deserialize)]
struct PushResponse {
    name: String,
}

impl HttpStore {
    pub fn new(base_url: &str, auth: Option<String>, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(StoreError::Request)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    /// `<base_url>/<path>.json`
    pub fn url_for(&self, path: &str) -> Result<String, StoreError> {
        let segments = path_segments(path)?;
        Ok(format!("{}/{}.json", self.base_url, segments.join("/")))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some(secret) => request.query(&[("auth", secret.as_str())]),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(StoreError::Request)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %body, "document store rejected request");
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl DocumentStore for HttpStore {
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let url = self.url_for(path)?;
        tracing::debug!(%path, "store read");
        let response = self.send(self.client.get(&url)).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(Some(value).filter(|v| !v.is_null()))
    }

    async fn push(&self, path: &str, value: &Value) -> Result<String, StoreError> {
        let url = self.url_for(path)?;
        tracing::debug!(%path, "store push");
        let response = self.send(self.client.post(&url).json(value)).await?;
        let pushed: PushResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(pushed.name)
    }

    async fn set(&self, path: &str, value: &Value) -> Result<(), StoreError> {
        let url = self.url_for(path)?;
        tracing::debug!(%path, "store set");
        self.send(self.client.put(&url).json(value)).await?;
        Ok(())
    }

    async fn update(&self, path: &str, patch: &Map<String, Value>) -> Result<(), StoreError> {
        for key in patch.keys() {
            path_segments(key)?;
        }
        let url = self.url_for(path)?;
        tracing::debug!(%path, fields = patch.len(), "store update");
        self.send(self.client.patch(&url).json(patch)).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let url = self.url_for(path)?;
        tracing::debug!(%path, "store delete");
        self.send(self.client.delete(&url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> HttpStore {
        HttpStore::new("https://oms.example.com/", None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_url_for_joins_base_and_path() {
        assert_eq!(
            store().url_for("orders/-Mabc").unwrap(),
            "https://oms.example.com/orders/-Mabc.json"
        );
        assert_eq!(
            store().url_for("/product_categories/").unwrap(),
            "https://oms.example.com/product_categories.json"
        );
    }

    #[test]
    fn test_url_for_rejects_traversal() {
        assert!(matches!(
            store().url_for("orders/../users"),
            Err(StoreError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_store_is_request_error() {
        let store =
            HttpStore::new("http://127.0.0.1:9", None, Duration::from_millis(500)).unwrap();
        let err = store.read("orders").await.unwrap_err();
        assert!(matches!(err, StoreError::Request(_)), "got {err:?}");
    }
}
