//! HTTP transport to the collector's record endpoint.

use pacerank_core::delivery::{Transport, TransportReply};
use pacerank_core::store::{Store, SETTING_AUTH_TOKEN};
use pacerank_core::{AgentError, Result};
use pacerank_protocol::CollectorReply;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use std::sync::Arc;
use std::time::Duration;

const RECORDS_PATH: &str = "/digest/v1/records";
const API_KEY_HEADER: &str = "X-API-KEY";

pub struct HttpTransport {
    client: Client,
    endpoint: String,
    store: Arc<Store>,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration, store: Arc<Store>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|err| AgentError::Transport(format!("Failed to build HTTP client: {}", err)))?;
        Ok(Self {
            client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), RECORDS_PATH),
            store,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

pub fn user_agent() -> String {
    format!(
        "PacerankAgent/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

impl Transport for HttpTransport {
    fn send(&self, payload: &[u8]) -> Result<TransportReply> {
        // Read per send so a login while the agent runs takes effect immediately.
        let token = self.store.setting(SETTING_AUTH_TOKEN)?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, user_agent())
            .body(payload.to_vec());
        if let Some(token) = token.filter(|token| !token.is_empty()) {
            request = request.header(API_KEY_HEADER, token);
        }

        let response = request
            .send()
            .map_err(|err| AgentError::Transport(err.to_string()))?;
        let http_status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|err| AgentError::Transport(format!("Failed to read reply: {}", err)))?;

        Ok(match serde_json::from_slice::<CollectorReply>(&body) {
            Ok(reply) => TransportReply {
                status: if reply.status == 0 { http_status } else { reply.status },
                correlation_id: reply.correlation_id,
                service: reply.service,
                body: reply.content,
                error: None,
            },
            Err(err) => TransportReply {
                status: http_status,
                error: Some(format!("unreadable collector reply: {}", err)),
                ..TransportReply::default()
            },
        })
    }
}
