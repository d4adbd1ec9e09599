//! MCP client: runs the protocol handshake and tool calls against one server.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use {
    async_trait::async_trait,
    serde_json::Value,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Context, Error, Result},
    http_transport::HttpTransport,
    traits::McpClient,
    types::{
        ClientInfo, InitializeParams, InitializeResult, PROTOCOL_VERSION, ToolsCallParams,
        ToolsCallResult, ToolsListResult,
    },
};

/// An MCP client connected to a single server over streamable HTTP.
pub struct HttpMcpClient {
    server_name: String,
    transport: HttpTransport,
    server_info: InitializeResult,
    closed: AtomicBool,
}

impl HttpMcpClient {
    /// Open a session and perform the handshake (`initialize` + `initialized`).
    pub async fn connect(
        server_name: &str,
        url: &str,
        headers: HashMap<String, String>,
    ) -> Result<Self> {
        info!(server = %server_name, url = %url, "connecting to MCP server");
        let transport = HttpTransport::new(url, headers)?;

        let server_info = match Self::initialize(&transport).await {
            Ok(info) => info,
            Err(e) => {
                warn!(server = %server_name, error = %e, "MCP initialize handshake failed");
                transport.close().await;
                return Err(e);
            },
        };

        info!(
            server = %server_name,
            protocol = %server_info.protocol_version,
            remote_name = %server_info.server_info.name,
            "MCP server initialized"
        );

        Ok(Self {
            server_name: server_name.into(),
            transport,
            server_info,
            closed: AtomicBool::new(false),
        })
    }

    async fn initialize(transport: &HttpTransport) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: serde_json::json!({}),
            client_info: ClientInfo {
                name: "tabpilot".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };

        let resp = transport
            .request("initialize", Some(serde_json::to_value(&params)?))
            .await?;
        let result: InitializeResult =
            serde_json::from_value(resp.result.context("MCP initialize returned no result")?)?;

        transport.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    pub fn server_info(&self) -> &InitializeResult {
        &self.server_info
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed {
                server: self.server_name.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl McpClient for HttpMcpClient {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    async fn list_tools_page(&self, cursor: Option<&str>) -> Result<ToolsListResult> {
        self.ensure_open()?;

        let params = cursor.map(|c| serde_json::json!({ "cursor": c }));
        let resp = self.transport.request("tools/list", params).await?;
        let page: ToolsListResult =
            serde_json::from_value(resp.result.context("tools/list returned no result")?)?;

        debug!(
            server = %self.server_name,
            count = page.tools.len(),
            has_more = page.next_cursor.is_some(),
            "fetched MCP tools page"
        );
        Ok(page)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolsCallResult> {
        self.ensure_open()?;

        let params = ToolsCallParams {
            name: name.into(),
            arguments,
        };
        let resp = self
            .transport
            .request("tools/call", Some(serde_json::to_value(&params)?))
            .await?;

        Ok(serde_json::from_value(
            resp.result.context("tools/call returned no result")?,
        )?)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(server = %self.server_name, "closing MCP client");
        self.transport.close().await;
    }
}
