use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Value};

use crate::error::RpcError;

/// One JSON-RPC round trip. Implemented over HTTP for real endpoints and
/// in memory for tests.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError>;
}

pub struct HttpTransport {
    client: Client,
    url: Url,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let url = Url::from_str(url)?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url,
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response =
            self.client.post(self.url.clone()).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| RpcError::Malformed(e.to_string()))?;

        parse_response(payload)
    }
}

/// Splits a JSON-RPC envelope into its result or error object.
pub fn parse_response(mut payload: Value) -> Result<Value, RpcError> {
    if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        return Err(RpcError::JsonRpc { code, message });
    }

    payload
        .get_mut("result")
        .map(Value::take)
        .ok_or_else(|| RpcError::Malformed("missing result".to_owned()))
}
