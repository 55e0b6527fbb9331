// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::Channel;
use crate::{ChannelResponse, PermissionRequest};

/// Environment variable holding a bearer token for webhook authentication.
const WEBHOOK_TOKEN_ENV: &str = "PERMISSION_WEBHOOK_TOKEN";

/// Channel that POSTs permission requests to an HTTP endpoint.
///
/// Designed for external approval systems (chat bots, approval workflows,
/// dashboards).  A 2xx response body must be a wire-format
/// [`ChannelResponse`]; any non-2xx status denies; a timed-out request
/// resolves per the request's `default_on_timeout`.
pub struct WebhookChannel {
    endpoint: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        let endpoint = endpoint.into();
        if endpoint.is_empty() {
            anyhow::bail!("webhook channel requires a non-empty endpoint");
        }
        Ok(Self {
            endpoint,
            auth_token: std::env::var(WEBHOOK_TOKEN_ENV).ok().filter(|t| !t.is_empty()),
            client: reqwest::Client::new(),
        })
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn request_permission(&self, request: &PermissionRequest) -> ChannelResponse {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .json(&request.to_wire())
            .timeout(Duration::from_secs(request.timeout_seconds));
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        match builder.send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<serde_json::Value>().await {
                    Ok(body) => ChannelResponse::from_wire(&body),
                    Err(e) => ChannelResponse::deny(
                        &request.request_id,
                        format!("Failed to parse webhook response: {e}"),
                    ),
                }
            }
            Ok(response) => ChannelResponse::deny(
                &request.request_id,
                format!("Webhook returned status {}", response.status().as_u16()),
            ),
            Err(e) if e.is_timeout() => {
                warn!(endpoint = %self.endpoint, "webhook approval timed out");
                request.timeout_response()
            }
            Err(e) => ChannelResponse::deny(
                &request.request_id,
                format!("Webhook request failed: {e}"),
            ),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::{ChannelDecision, RequestContext};

    fn request() -> PermissionRequest {
        PermissionRequest::create("shell", json!({"command": "ls"}), 5, RequestContext::default())
    }

    /// One-shot HTTP server returning a canned response.
    async fn serve_once(status: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // Drain the request head; the exact content is irrelevant here.
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let reply = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(reply.as_bytes()).await.unwrap();
        });
        format!("http://{addr}/approve")
    }

    #[test]
    fn empty_endpoint_is_construction_error() {
        assert!(WebhookChannel::new("").is_err());
    }

    #[tokio::test]
    async fn success_response_is_parsed() {
        let req = request();
        let body = json!({
            "request_id": req.request_id,
            "decision": "allow",
            "reason": "approved remotely",
        })
        .to_string();
        let endpoint = serve_once("200 OK", body).await;
        let channel = WebhookChannel::new(endpoint).unwrap();
        let resp = channel.request_permission(&req).await;
        assert_eq!(resp.decision, ChannelDecision::Allow);
        assert_eq!(resp.reason, "approved remotely");
    }

    #[tokio::test]
    async fn non_2xx_denies() {
        let endpoint = serve_once("503 Service Unavailable", String::new()).await;
        let channel = WebhookChannel::new(endpoint).unwrap();
        let resp = channel.request_permission(&request()).await;
        assert_eq!(resp.decision, ChannelDecision::Deny);
        assert!(resp.reason.contains("503"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_denies() {
        // Port 1 on localhost is practically never listening.
        let channel = WebhookChannel::new("http://127.0.0.1:1/approve").unwrap();
        let resp = channel.request_permission(&request()).await;
        assert_eq!(resp.decision, ChannelDecision::Deny);
        assert!(resp.reason.contains("failed"));
    }
}
