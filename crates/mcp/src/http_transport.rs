//! Streamable HTTP transport for remote MCP servers.
//!
//! JSON-RPC requests go out as HTTP POSTs; servers may answer with plain JSON
//! or with a short `text/event-stream` body carrying the response.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use {
    reqwest::Client,
    tokio::sync::RwLock,
    tracing::{debug, warn},
};

use crate::{
    error::{Context, Error, Result},
    types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION},
};

const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
const MCP_SESSION_ID_HEADER: &str = "Mcp-Session-Id";
const STREAMABLE_ACCEPT_HEADER: &str = "application/json, text/event-stream";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct HttpTransport {
    client: Client,
    url: String,
    headers: HashMap<String, String>,
    next_id: AtomicU64,
    /// Session identifier handed out by the server, echoed on every request.
    session_id: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(url: &str, headers: HashMap<String, String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client for MCP transport")?;

        Ok(Self {
            client,
            url: url.to_string(),
            headers,
            next_id: AtomicU64::new(1),
            session_id: RwLock::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn build_post(&self) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", STREAMABLE_ACCEPT_HEADER)
            .header(MCP_PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION);

        for (name, value) in &self.headers {
            req = req.header(name, value);
        }
        if let Some(session_id) = self.session_id.read().await.clone() {
            req = req.header(MCP_SESSION_ID_HEADER, session_id);
        }
        req
    }

    async fn remember_session_id(&self, response: &reqwest::Response) {
        let Some(session_id) = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return;
        };

        let mut slot = self.session_id.write().await;
        if slot.as_deref() != Some(session_id) {
            debug!(url = %self.url, session_id, "updated MCP session id");
            *slot = Some(session_id.to_string());
        }
    }

    fn is_event_stream(resp: &reqwest::Response) -> bool {
        resp.headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|base| base.trim() == "text/event-stream")
    }

    /// Pull the first JSON-RPC response out of an event-stream body.
    fn parse_event_stream(body: &str, method: &str) -> Result<JsonRpcResponse> {
        let mut data = String::new();
        let flush = |data: &mut String| {
            let parsed = serde_json::from_str::<JsonRpcResponse>(data).ok();
            data.clear();
            parsed
        };

        for line in body.lines() {
            let line = line.trim_end();
            if let Some(rest) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.trim_start());
            } else if line.is_empty()
                && !data.is_empty()
                && let Some(resp) = flush(&mut data)
            {
                return Ok(resp);
            }
        }

        if !data.is_empty()
            && let Some(resp) = flush(&mut data)
        {
            return Ok(resp);
        }

        Err(Error::message(format!(
            "no JSON-RPC response in event stream for '{method}'"
        )))
    }

    /// Send a JSON-RPC request and wait for its response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);
        debug!(method, id, url = %self.url, "MCP client -> server");

        let http_resp = self
            .build_post()
            .await
            .json(&req)
            .send()
            .await
            .with_context(|| format!("POST to '{}' for '{method}' failed", self.url))?;
        self.remember_session_id(&http_resp).await;

        let status = http_resp.status();
        if !status.is_success() {
            let body = http_resp.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: status.as_u16(),
                method: method.to_string(),
                body,
            });
        }

        let resp: JsonRpcResponse = if Self::is_event_stream(&http_resp) {
            let body = http_resp
                .text()
                .await
                .with_context(|| format!("failed to read event stream for '{method}'"))?;
            Self::parse_event_stream(&body, method)?
        } else {
            http_resp
                .json()
                .await
                .with_context(|| format!("failed to parse JSON-RPC response for '{method}'"))?
        };

        if let Some(err) = resp.error {
            return Err(Error::Rpc {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            });
        }
        Ok(resp)
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let notif = JsonRpcNotification {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
        };
        debug!(method, url = %self.url, "MCP client -> server (notification)");

        let http_resp = self
            .build_post()
            .await
            .json(&notif)
            .send()
            .await
            .with_context(|| format!("POST to '{}' for '{method}' failed", self.url))?;
        self.remember_session_id(&http_resp).await;

        if !http_resp.status().is_success() {
            warn!(method, status = %http_resp.status(), "MCP notification returned non-success");
        }
        Ok(())
    }

    /// End the server-side session, if one was opened.
    pub async fn close(&self) {
        let Some(session_id) = self.session_id.write().await.take() else {
            return;
        };

        let mut req = self
            .client
            .delete(&self.url)
            .timeout(Duration::from_secs(5))
            .header(MCP_PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION)
            .header(MCP_SESSION_ID_HEADER, session_id);
        for (name, value) in &self.headers {
            req = req.header(name, value);
        }

        if let Err(e) = req.send().await {
            warn!(url = %self.url, error = %e, "failed to close MCP session");
        }
    }
}
