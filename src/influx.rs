//! InfluxDB v2 HTTP API client.
//!
//! Reads go to `POST /api/v2/query` as Flux and come back as annotated CSV;
//! writes go to `POST /api/v2/write` as nanosecond-precision line protocol.
//! The token is sent as `Authorization: Token <token>`, which also covers the
//! InfluxDB 1.8 compatibility endpoints (`username:password` tokens).
//!
//! A client owns its HTTP connection pool; dropping it releases every
//! connection.

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::series::RawObservation;
use crate::sink::{TimeSeriesSink, WriteError, WriteTarget};
use crate::source::{decode_annotated_csv, SeriesQuery, TimeSeriesSource};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct InfluxClient {
    client: Client,
    base_url: String,
    org: String,
    token: Option<String>,
}

impl InfluxClient {
    pub fn new(config: &StoreConfig, token: Option<String>) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(Error::Config("store.url is empty".into()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_owned(),
            org: config.org.clone(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        Url::parse_with_params(&format!("{}{}", self.base_url, path), params)
            .map_err(|e| Error::Config(format!("invalid store url '{}': {}", self.base_url, e)))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Token {}", token)),
            None => request,
        }
    }
}

#[async_trait]
impl TimeSeriesSource for InfluxClient {
    async fn fetch(&self, query: &SeriesQuery) -> Result<Vec<RawObservation>> {
        let url = self.endpoint("/api/v2/query", &[("org", self.org.as_str())])?;
        let flux = query.to_flux();
        debug!(%url, "querying telemetry");
        trace!(%flux);

        let response = self
            .authorized(self.client.post(url))
            .header(CONTENT_TYPE, "application/vnd.flux")
            .header(ACCEPT, "application/csv")
            .body(flux)
            .send()
            .await
            .map_err(|e| Error::Source(format!("query request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Source(format!("failed to read query response: {}", e)))?;
        if !status.is_success() {
            return Err(Error::Source(format!(
                "query rejected with {}: {}",
                status,
                body.trim()
            )));
        }

        let observations = decode_annotated_csv(&body)?;
        debug!(rows = observations.len(), "query returned");
        Ok(observations)
    }
}

#[async_trait]
impl TimeSeriesSink for InfluxClient {
    async fn write_batch(
        &self,
        target: &WriteTarget,
        body: &str,
    ) -> std::result::Result<(), WriteError> {
        let url = self
            .endpoint(
                "/api/v2/write",
                &[
                    ("org", target.org.as_str()),
                    ("bucket", target.bucket.as_str()),
                    ("precision", "ns"),
                ],
            )
            .map_err(|e| WriteError::Fatal(e.to_string()))?;

        let sent = self
            .authorized(self.client.post(url))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body.to_owned())
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err(WriteError::Transient {
                    reason: e.to_string(),
                    retry_after: None,
                })
            }
            Err(e) => return Err(WriteError::Fatal(e.to_string())),
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response.text().await.unwrap_or_default();
        let reason = format!("write rejected with {}: {}", status, text.trim());

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(WriteError::Transient {
                reason,
                retry_after,
            })
        } else {
            Err(WriteError::Fatal(reason))
        }
    }
}
