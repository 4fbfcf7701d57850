//! HTTP client for the package service.
//!
//! All endpoints live under the configured API base URL. Arguments are
//! validated locally before any request is made, and non-2xx responses are
//! turned into [`MtgvError::Backend`] carrying the server's own message when
//! it sends one.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;

use crate::config;
use crate::error::{MtgvError, Result};
use crate::models::{CardListItem, CardPackage, DefaultSelection, Game};

/// Body of a create-package request.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePackageRequest {
    pub card_list: Vec<CardListItem>,
    pub game: Game,
    pub default_selection: DefaultSelection,
}

#[derive(Debug, Clone, Serialize)]
struct RandomPackageRequest {
    count: u32,
    game: Game,
    default_selection: DefaultSelection,
}

/// Export formats offered by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Marketplace deep link that fills a cart with the package.
    Tcgplayer,
    /// Plain text card list.
    Text,
}

impl ExportFormat {
    fn path_segment(self) -> &'static str {
        match self {
            ExportFormat::Tcgplayer => "tcgplayer",
            ExportFormat::Text => "text",
        }
    }
}

/// Backend operations the realtime client and search depend on.
#[async_trait]
pub trait PackageApi: Send + Sync {
    async fn create_package(&self, request: &CreatePackageRequest) -> Result<CardPackage>;

    async fn random_package(
        &self,
        count: u32,
        game: Game,
        default_selection: DefaultSelection,
    ) -> Result<CardPackage>;

    async fn get_package(&self, package_id: &str) -> Result<CardPackage>;

    async fn search_cards(&self, query: &str, exact: bool) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

/// Async `reqwest` client bound to one API base URL.
#[derive(Clone)]
pub struct ApiClient {
    base: String,
    http: Client,
}

impl ApiClient {
    /// Create a client for `base` (e.g. `http://localhost:8000`).
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Client for `MTGV_API_BASE_URL` with the default timeout.
    pub fn from_env() -> Result<Self> {
        Self::new(&config::api_base_from_env(), config::HTTP_TIMEOUT)
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Fetch an export of a package.
    ///
    /// The marketplace export answers either with `{"url": "..."}` or with the
    /// link as the raw body; both yield the link.
    pub async fn export(&self, package_id: &str, format: ExportFormat) -> Result<String> {
        let package_id = require_id(package_id)?;
        let url = format!(
            "{}/card_package/{}/export/{}",
            self.base,
            package_id,
            format.path_segment()
        );
        let resp = check(self.http.get(&url).send().await?).await?;
        let body = resp.text().await?;
        let link = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| {
                ["url", "text", "data"]
                    .iter()
                    .find_map(|k| v.get(k).and_then(Value::as_str).map(str::to_string))
            })
            .unwrap_or(body);
        Ok(link)
    }

    pub async fn export_tcgplayer(&self, package_id: &str) -> Result<String> {
        self.export(package_id, ExportFormat::Tcgplayer).await
    }

    pub async fn export_text(&self, package_id: &str) -> Result<String> {
        self.export(package_id, ExportFormat::Text).await
    }
}

#[async_trait]
impl PackageApi for ApiClient {
    async fn create_package(&self, request: &CreatePackageRequest) -> Result<CardPackage> {
        if request.card_list.is_empty() {
            return Err(MtgvError::InvalidArgument(
                "Add at least one card before creating a package".into(),
            ));
        }
        let url = format!("{}/card_package", self.base);
        log::debug!("Creating package with {} cards", request.card_list.len());
        let resp = check(self.http.post(&url).json(request).send().await?).await?;
        Ok(resp.json().await?)
    }

    async fn random_package(
        &self,
        count: u32,
        game: Game,
        default_selection: DefaultSelection,
    ) -> Result<CardPackage> {
        if count == 0 {
            return Err(MtgvError::InvalidArgument(
                "Random package size must be at least 1".into(),
            ));
        }
        let url = format!("{}/card_package/random", self.base);
        let body = RandomPackageRequest {
            count,
            game,
            default_selection,
        };
        let resp = check(self.http.post(&url).json(&body).send().await?).await?;
        Ok(resp.json().await?)
    }

    async fn get_package(&self, package_id: &str) -> Result<CardPackage> {
        let package_id = require_id(package_id)?;
        let url = format!("{}/card_package/{}", self.base, package_id);
        let resp = self.http.get(&url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(MtgvError::NotFound(format!(
                "Package '{package_id}' does not exist"
            )));
        }
        Ok(check(resp).await?.json().await?)
    }

    async fn search_cards(&self, query: &str, exact: bool) -> Result<Vec<String>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(MtgvError::InvalidArgument("Search query is empty".into()));
        }
        let url = format!("{}/cards/search", self.base);
        let exact = if exact { "true" } else { "false" };
        let resp = check(
            self.http
                .get(&url)
                .query(&[("q", query), ("exact", exact)])
                .send()
                .await?,
        )
        .await?;
        let body: Value = resp.json().await?;
        let names = match body.get("data").unwrap_or(&body) {
            Value::Array(items) => items
                .iter()
                .filter_map(|v| {
                    v.as_str()
                        .or_else(|| v.get("name").and_then(Value::as_str))
                        .map(str::to_string)
                })
                .collect(),
            _ => Vec::new(),
        };
        Ok(names)
    }
}

fn require_id(package_id: &str) -> Result<&str> {
    let trimmed = package_id.trim();
    if trimmed.is_empty() {
        return Err(MtgvError::InvalidArgument("Package id is required".into()));
    }
    Ok(trimmed)
}

/// Pass 2xx responses through; turn anything else into a `Backend` error.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            ["detail", "error", "message"]
                .iter()
                .find_map(|k| v.get(k).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string());
    log::warn!("Backend returned {status}: {message}");
    Err(MtgvError::Backend {
        status: status.as_u16(),
        message,
    })
}
