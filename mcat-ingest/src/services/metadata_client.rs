//! Remote metadata provider
//!
//! [`MetadataSource`] is the seam the pipeline calls through the retry
//! policy. [`TmdbClient`] implements it against a TMDB-compatible
//! `search/movie` endpoint with a token-bucket rate limiter in front of
//! every request.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

use super::filename_parser::TitleQuery;
use crate::models::MediaMetadata;
use crate::utils::{Classify, ErrorClass};

const USER_AGENT: &str = concat!("mcat/", env!("CARGO_PKG_VERSION"));

/// Provider call failures, classified for the retry loop
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Provider rejected credentials (HTTP {0})")]
    Unauthorized(u16),

    #[error("No provider match for {0}")]
    NotFound(String),

    #[error("Provider rate limit exceeded")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Provider server error {0}: {1}")]
    Server(u16, String),

    #[error("Provider request rejected {0}: {1}")]
    Rejected(u16, String),

    #[error("Network error: {message}")]
    Network { message: String, timeout: bool },

    #[error("Cannot decode provider response: {0}")]
    Decode(String),

    #[error("Provider client misconfigured: {0}")]
    Config(String),
}

impl Classify for FetchError {
    fn class(&self) -> ErrorClass {
        match self {
            FetchError::RateLimited { .. } => ErrorClass::RateLimited,
            FetchError::Server(..) | FetchError::Network { .. } => ErrorClass::Transient,
            FetchError::Unauthorized(_)
            | FetchError::NotFound(_)
            | FetchError::Rejected(..)
            | FetchError::Decode(_)
            | FetchError::Config(_) => ErrorClass::Permanent,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else if e.is_builder() {
            FetchError::Config(e.to_string())
        } else {
            FetchError::Network {
                message: e.to_string(),
                timeout: e.is_timeout(),
            }
        }
    }
}

/// Map a non-success HTTP status to a classified error
pub fn classify_status(status: StatusCode, retry_after_secs: Option<u64>, body: &str) -> FetchError {
    let code = status.as_u16();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::Unauthorized(code),
        StatusCode::NOT_FOUND => FetchError::NotFound(body.chars().take(200).collect()),
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { retry_after_secs },
        StatusCode::REQUEST_TIMEOUT => FetchError::Network {
            message: "HTTP 408".to_string(),
            timeout: true,
        },
        s if s.is_server_error() => FetchError::Server(code, body.chars().take(200).collect()),
        _ => FetchError::Rejected(code, body.chars().take(200).collect()),
    }
}

/// A provider of metadata for title queries
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    async fn lookup(&self, query: &TitleQuery) -> Result<MediaMetadata, FetchError>;
}

#[derive(Debug, Clone)]
pub struct TmdbConfig {
    pub base_url: String,
    pub api_key: String,
    pub requests_per_second: u32,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: u64,
    title: String,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    vote_average: Option<f32>,
    #[serde(default)]
    genre_ids: Vec<u32>,
}

impl SearchHit {
    fn into_metadata(self) -> MediaMetadata {
        let year = self
            .release_date
            .as_deref()
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse().ok());

        MediaMetadata {
            title: self.title,
            year,
            overview: self.overview.filter(|o| !o.trim().is_empty()),
            genres: self
                .genre_ids
                .iter()
                .filter_map(|id| genre_name(*id))
                .map(str::to_string)
                .collect(),
            runtime_minutes: None,
            rating: self.vote_average.filter(|r| *r > 0.0),
            provider_id: Some(self.id.to_string()),
        }
    }
}

/// TMDB's fixed movie genre list
fn genre_name(id: u32) -> Option<&'static str> {
    Some(match id {
        12 => "Adventure",
        14 => "Fantasy",
        16 => "Animation",
        18 => "Drama",
        27 => "Horror",
        28 => "Action",
        35 => "Comedy",
        36 => "History",
        37 => "Western",
        53 => "Thriller",
        80 => "Crime",
        99 => "Documentary",
        878 => "Science Fiction",
        9648 => "Mystery",
        10402 => "Music",
        10749 => "Romance",
        10751 => "Family",
        10752 => "War",
        10770 => "TV Movie",
        _ => return None,
    })
}

/// Decode a search response body; the first hit wins
pub fn parse_search_response(body: &str, query: &TitleQuery) -> Result<MediaMetadata, FetchError> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Decode(e.to_string()))?;

    response
        .results
        .into_iter()
        .next()
        .map(SearchHit::into_metadata)
        .ok_or_else(|| FetchError::NotFound(query.slug()))
}

/// TMDB-compatible HTTP client
pub struct TmdbClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl TmdbClient {
    pub fn new(config: TmdbConfig) -> Result<Self, FetchError> {
        if config.api_key.trim().is_empty() {
            return Err(FetchError::Config("API key is empty".to_string()));
        }

        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| FetchError::Config(e.to_string()))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(per_second));

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            rate_limiter,
        })
    }
}

#[async_trait]
impl MetadataSource for TmdbClient {
    fn name(&self) -> &str {
        "tmdb"
    }

    async fn lookup(&self, query: &TitleQuery) -> Result<MediaMetadata, FetchError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/search/movie", self.base_url);
        let mut params = vec![
            ("api_key", self.api_key.clone()),
            ("query", query.title.clone()),
            ("include_adult", "false".to_string()),
        ];
        if let Some(year) = query.year {
            params.push(("year", year.to_string()));
        }

        tracing::debug!(title = %query.title, year = ?query.year, "Querying metadata provider");

        let response = self.http_client.get(&url).query(&params).send().await?;
        let status = response.status();

        if !status.is_success() {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after_secs, &body));
        }

        let body = response.text().await?;
        let metadata = parse_search_response(&body, query)?;

        tracing::debug!(
            title = %metadata.title,
            provider_id = ?metadata.provider_id,
            "Metadata provider match"
        );

        Ok(metadata)
    }
}
