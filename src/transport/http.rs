//! HTTP push transport

use super::{EnvelopeCodec, MessageSender, TransportError};
use crate::config::MshConfig;
use crate::pmode::SendingPMode;
use crate::protocol::As4Message;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct HttpSenderConfig {
    pub timeout: Duration,
}

impl Default for HttpSenderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
        }
    }
}

impl From<&MshConfig> for HttpSenderConfig {
    fn from(config: &MshConfig) -> Self {
        Self {
            timeout: config.http_timeout(),
        }
    }
}

/// Posts encoded envelopes to the Sending PMode push URL
pub struct HttpSender {
    client: Client,
    codec: Arc<dyn EnvelopeCodec>,
}

impl HttpSender {
    pub fn new(codec: Arc<dyn EnvelopeCodec>, config: HttpSenderConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self { client, codec })
    }

    fn push_url(pmode: &SendingPMode) -> Result<Url, TransportError> {
        let raw = pmode
            .push_configuration
            .as_ref()
            .map(|push| push.url.as_str())
            .ok_or_else(|| TransportError::NoPushUrl(pmode.id.clone()))?;
        Url::parse(raw).map_err(|e| TransportError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl MessageSender for HttpSender {
    async fn send(
        &self,
        message: &As4Message,
        pmode: &SendingPMode,
    ) -> Result<Option<As4Message>, TransportError> {
        let url = Self::push_url(pmode)?;
        let encoded = self.codec.encode(message)?;

        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, encoded.content_type)
            .body(encoded.body)
            .send()
            .await
            .map_err(|e| {
                TransportError::Http(format!(
                    "{e} (is_connect: {}, is_timeout: {})",
                    e.is_connect(),
                    e.is_timeout()
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                message_id = message.primary_message_id().unwrap_or_default(),
                url = %url,
                status = status.as_u16(),
                "Partner rejected message"
            );
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        debug!(
            message_id = message.primary_message_id().unwrap_or_default(),
            url = %url,
            status = status.as_u16(),
            response_bytes = body.len(),
            "Message pushed"
        );

        if body.is_empty() {
            return Ok(None);
        }
        self.codec.decode(&content_type, &body).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_follows_msh_section() {
        let mut config = MshConfig::test_config();
        assert_eq!(HttpSenderConfig::from(&config).timeout, Duration::from_secs(60));

        config.msh.http_timeout_secs = 5;
        assert_eq!(HttpSenderConfig::from(&config).timeout, Duration::from_secs(5));
    }
}
