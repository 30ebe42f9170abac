//! JSON-over-HTTP source adapter
//!
//! Endpoints, relative to the configured base URL:
//! - `GET {base}/entities/{external_id}` -> season rows
//! - `GET {base}/leagues/{league}/seasons/{season}` -> roster rows
//!
//! Both accept either a bare JSON array or an object wrapping it
//! (`{"seasons": [...]}` / `{"players": [...]}`).

use async_trait::async_trait;
use f501_common::config::SourceConfig;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{RosterRow, SeasonRow, SourceAdapter, SourceError};

#[derive(Deserialize)]
#[serde(untagged)]
enum DetailBody {
    Wrapped { seasons: Vec<SeasonRow> },
    Bare(Vec<SeasonRow>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RosterBody {
    Wrapped { players: Vec<RosterRow> },
    Bare(Vec<RosterRow>),
}

/// reqwest-backed [`SourceAdapter`]
pub struct HttpSourceAdapter {
    http_client: reqwest::Client,
    base_url: Url,
    timeout_secs: u64,
}

impl HttpSourceAdapter {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| SourceError::Network(format!("Invalid base URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SourceError::Network(format!(
                "Base URL cannot carry paths: {}",
                config.base_url
            )));
        }

        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
            timeout_secs: config.request_timeout_secs,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SourceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::Network("Base URL cannot carry paths".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &str) -> Result<T, SourceError> {
        tracing::debug!(url = %url, "Querying source");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;

        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(what.to_string()));
        }

        if matches!(
            status,
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
        ) {
            return Err(SourceError::Rejected(status.as_u16()));
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SourceError::Network(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate(&error_text, 200)
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.classify_transport(e))?;

        serde_json::from_slice(&body).map_err(|e| SourceError::ParseMismatch(e.to_string()))
    }

    fn classify_transport(&self, err: reqwest::Error) -> SourceError {
        if err.is_timeout() {
            SourceError::Timeout(self.timeout_secs)
        } else {
            SourceError::Network(err.to_string())
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[async_trait]
impl SourceAdapter for HttpSourceAdapter {
    async fn fetch_entity_detail(&self, external_id: &str) -> Result<Vec<SeasonRow>, SourceError> {
        let url = self.endpoint(&["entities", external_id])?;
        let body: DetailBody = self.get_json(url, external_id).await?;

        Ok(match body {
            DetailBody::Wrapped { seasons } => seasons,
            DetailBody::Bare(rows) => rows,
        })
    }

    async fn fetch_league_roster(
        &self,
        league: &str,
        season: &str,
    ) -> Result<Vec<RosterRow>, SourceError> {
        let url = self.endpoint(&["leagues", league, "seasons", season])?;
        let body: RosterBody = self
            .get_json(url, &format!("{} {}", league, season))
            .await?;

        Ok(match body {
            RosterBody::Wrapped { players } => players,
            RosterBody::Bare(rows) => rows,
        })
    }
}
