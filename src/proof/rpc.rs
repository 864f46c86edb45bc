use crate::error::{Error, Result};
use serde_json::Value;

/// JSON-RPC over HTTP POST, optionally authenticated with a bearer key.
#[derive(Clone)]
pub struct RpcEndpoint {
    url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl std::fmt::Debug for RpcEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcEndpoint")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl RpcEndpoint {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            url: url.into(),
            api_key,
            http: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends one request and returns the whole response envelope.
    ///
    /// Some backends put fields such as `failureReason` next to `result`, so the envelope is
    /// handed back intact; use [`result_field`] to reach the payload.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let mut builder = self.http.post(&self.url).json(&req);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| Error::Transport(format!("POST {} failed: {e}", self.url)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Transport(format!("failed to read {method} response: {e}")))?;

        if !status.is_success() {
            return Err(Error::Transport(format!("{method}: HTTP {status}: {text}")));
        }

        let body: Value = serde_json::from_str(&text).map_err(|e| {
            Error::ResponseFormat(format!("{method}: response is not JSON: {e}"))
        })?;

        if let Some(err) = body.get("error") {
            return Err(Error::Transport(format!("{method}: RPC error: {err}")));
        }

        Ok(body)
    }
}

pub fn result_field(body: &Value) -> Result<&Value> {
    body.get("result")
        .ok_or_else(|| Error::ResponseFormat("missing result field".to_string()))
}

/// Non-negative integer field; numeric strings are accepted too.
pub fn u64_field(v: &Value, key: &str) -> Result<u64> {
    opt_u64_field(v, key)?
        .ok_or_else(|| Error::ResponseFormat(format!("missing or invalid field {key}: {v}")))
}

pub fn opt_u64_field(v: &Value, key: &str) -> Result<Option<u64>> {
    match v.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(x) => as_u64(x)
            .map(Some)
            .ok_or_else(|| Error::ResponseFormat(format!("field {key} is not an integer: {x}"))),
    }
}

pub fn as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn opt_str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(|x| x.as_str())
}
