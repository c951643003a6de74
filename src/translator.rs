use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use axum::async_trait;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::inference::task::translate::Translator;

/// Client for the public Google web translation endpoint.
pub struct GoogleTranslator {
    client: reqwest::Client,
    endpoint: Url,
}

impl GoogleTranslator {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("Invalid translation endpoint")?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Translator for GoogleTranslator {
    #[tracing::instrument(level = "info", skip(self))]
    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String> {
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[
                ("client", "gtx"),
                ("sl", source_language),
                ("tl", target_language),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            bail!("Translation service responded with {}: {}", status, body);
        }
        debug!("translation response: {}", body);

        let value: Value = serde_json::from_str(&body)?;
        parse_translation(&value)
    }
}

/// Joins the translated segments of a `[[["segment", "source", ...], ...], ...]` response.
fn parse_translation(value: &Value) -> Result<String> {
    let segments = value
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("Translation response contains no segments"))?;

    segments
        .iter()
        .map(|segment| {
            segment
                .get(0)
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("Malformed translation segment: {segment}"))
        })
        .collect()
}
