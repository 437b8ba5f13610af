//! Upstream HTTP clients
//!
//! [`JsonClient`] is the shared transport: JSON GETs against a base URL, with
//! not-found and non-success statuses mapped onto [`GatewayError`] so the
//! retry layer can classify them. [`HubApi`] and [`WarpcastApi`] put the
//! cache-aside resolver in front of it.

mod hub;
mod warpcast;

pub use hub::{HubApi, HubUser, SignerProvenance, FOLLOWING_MAX_PAGES, FOLLOWING_PAGE_SIZE};
pub use warpcast::{BannedUser, Channel, PrimaryAddress, WarpcastApi};

use crate::{metrics, GatewayError, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::{Duration, Instant};

/// Error body returned by hubs on failed requests
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    err_code: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

/// JSON-over-HTTP client for one upstream
#[derive(Debug, Clone)]
pub struct JsonClient {
    upstream: &'static str,
    base_url: String,
    client: reqwest::Client,
}

impl JsonClient {
    pub fn new(upstream: &'static str, base_url: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .user_agent(concat!("castgate/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            upstream,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `uri` (path plus query) and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, uri: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, uri);
        tracing::debug!(upstream = self.upstream, uri, "GET");

        let started = Instant::now();
        let response = self.client.get(&url).send().await.map_err(|e| {
            metrics::record_upstream_error(self.upstream, "transport");
            GatewayError::Http(e)
        })?;
        metrics::record_upstream_duration(self.upstream, started.elapsed().as_secs_f64());

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                metrics::record_upstream_error(self.upstream, "decode");
                GatewayError::Http(e)
            });
        }

        let body = response.text().await.unwrap_or_default();
        let error_body: Option<ErrorBody> = serde_json::from_str(&body).ok();
        let not_found = status == StatusCode::NOT_FOUND
            || error_body
                .as_ref()
                .and_then(|b| b.err_code.as_deref())
                .map(|code| code == "not_found")
                .unwrap_or(false);

        if not_found {
            return Err(GatewayError::NotFound(format!("{}{}", self.upstream, uri)));
        }

        metrics::record_upstream_error(self.upstream, "status");
        let message = error_body
            .and_then(|b| b.details)
            .unwrap_or_else(|| body.chars().take(200).collect());
        Err(GatewayError::Upstream {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let client = JsonClient::new("hub", "http://localhost:2281/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:2281");
    }

    #[test]
    fn test_error_body_parsing() {
        let body: ErrorBody = serde_json::from_str(
            r#"{"errCode":"not_found","presentable":false,"name":"HubError","code":3,"details":"no such cast"}"#,
        )
        .unwrap();
        assert_eq!(body.err_code.as_deref(), Some("not_found"));
        assert_eq!(body.details.as_deref(), Some("no such cast"));
    }
}
