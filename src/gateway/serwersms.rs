//! SerwerSMS HTTP client
//!
//! Sends messages through `POST {base}/messages/send_sms.json` with bearer
//! authentication. The gateway answers with one of several JSON shapes which
//! are classified into [`GatewayReply`] before being reduced to a result.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{GatewayFailure, SmsGateway, SmsReceipt};
use crate::config::GatewayConfig;

const SEND_SMS_PATH: &str = "messages/send_sms.json";

/// Production API host.
pub const DEFAULT_BASE_URL: &str = "https://api2.serwersms.pl";

/// Sender name used when none is configured.
pub const DEFAULT_SENDER_NAME: &str = "2waySMS";

/// SerwerSMS client bound to one API token and sender name.
#[derive(Debug, Clone)]
pub struct SerwerSmsClient {
    http_client: Client,
    endpoint: Url,
    api_token: String,
    sender_name: String,
}

impl SerwerSmsClient {
    /// Creates a client for the given API host.
    pub fn new(
        base_url: &str,
        api_token: impl Into<String>,
        sender_name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayFailure> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)
            .and_then(|url| url.join(SEND_SMS_PATH))
            .map_err(|err| GatewayFailure::new(format!("invalid gateway URL '{base_url}': {err}")))?;

        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| GatewayFailure::new(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            http_client,
            endpoint,
            api_token: api_token.into(),
            sender_name: sender_name.into(),
        })
    }

    /// Creates a client from application configuration.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayFailure> {
        let api_token = config
            .api_token
            .clone()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| GatewayFailure::new("SMS gateway API token is not configured"))?;

        Self::new(
            &config.base_url,
            api_token,
            config.sender_name.clone(),
            Duration::from_millis(config.timeout_ms),
        )
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[derive(Debug, Serialize)]
struct SendSmsRequest<'a> {
    phone: &'a str,
    text: &'a str,
    sender: &'a str,
}

#[async_trait]
impl SmsGateway for SerwerSmsClient {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn send_sms(&self, phone: &str, text: &str) -> Result<SmsReceipt, GatewayFailure> {
        let request = SendSmsRequest {
            phone,
            text,
            sender: &self.sender_name,
        };

        let response = self
            .http_client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                warn!(error = %err, "SMS gateway request failed");
                GatewayFailure::new(format!("SMS gateway request failed: {err}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "SMS gateway returned error status");
            return Err(GatewayFailure::new(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown Status")
            )));
        }

        let body = response.bytes().await.map_err(|err| {
            GatewayFailure::new(format!("failed to read SMS gateway response: {err}"))
        })?;

        let reply = GatewayReply::classify(&body)?;
        debug!(reply = ?reply, "SMS gateway replied");
        reply.into_result()
    }
}

/// Response shapes produced by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayReply {
    /// Top-level `error` object
    Rejected {
        code: i64,
        kind: Option<String>,
        message: String,
    },
    /// Accepted into the gateway's own queue; only counts are returned
    Queued { queued: u64, unsent: u64 },
    /// Sent immediately with full item detail
    Immediate(SmsReceipt),
    /// Item present but flagged with an error code
    ItemRejected { error_code: i64 },
    /// Anything else, including an empty `items` array
    Unrecognized,
}

#[derive(Debug, Deserialize)]
struct RawReply {
    success: Option<bool>,
    queued: Option<u64>,
    unsent: Option<u64>,
    items: Option<Vec<RawItem>>,
    error: Option<RawError>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct RawItem {
    id: String,
    phone: Option<String>,
    status: String,
    queued: Option<String>,
    parts: u32,
    text: Option<String>,
    error_code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawError {
    code: i64,
    #[serde(rename = "type")]
    kind: Option<String>,
    message: String,
}

impl GatewayReply {
    /// Classifies a response body. Fails only when the body is not a JSON
    /// object of the expected field types.
    pub fn classify(body: &[u8]) -> Result<Self, GatewayFailure> {
        let raw: RawReply = serde_json::from_slice(body)
            .map_err(|err| GatewayFailure::new(format!("Malformed SMS gateway response: {err}")))?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawReply) -> Self {
        if let Some(error) = raw.error {
            return GatewayReply::Rejected {
                code: error.code,
                kind: error.kind,
                message: error.message,
            };
        }

        if raw.success == Some(true)
            && let Some(queued) = raw.queued
            && queued > 0
        {
            return GatewayReply::Queued {
                queued,
                unsent: raw.unsent.unwrap_or(0),
            };
        }

        match raw.items.and_then(|items| items.into_iter().next()) {
            Some(item) => match item.error_code {
                Some(code) if code != 0 => GatewayReply::ItemRejected { error_code: code },
                _ => GatewayReply::Immediate(SmsReceipt {
                    message_id: item.id,
                    parts: item.parts,
                    status: item.status,
                }),
            },
            None => GatewayReply::Unrecognized,
        }
    }

    /// Reduces the reply to the uniform send result.
    pub fn into_result(self) -> Result<SmsReceipt, GatewayFailure> {
        match self {
            GatewayReply::Rejected { code, message, .. } => Err(GatewayFailure::new(format!(
                "SerwerSMS error {code}: {message}"
            ))),
            GatewayReply::Queued { .. } => Ok(SmsReceipt::queued()),
            GatewayReply::Immediate(receipt) => Ok(receipt),
            GatewayReply::ItemRejected { error_code } => Err(GatewayFailure::new(format!(
                "SerwerSMS error code: {error_code}"
            ))),
            GatewayReply::Unrecognized => Err(GatewayFailure::new("Unexpected response format")),
        }
    }
}
