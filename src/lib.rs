//! MTGV SDK for Rust.
//!
//! Client for the MTGV card package service: build a package from a card
//! list, pick printings, price it, and keep it synchronized in real time with
//! everyone else viewing the same package.
//!
//! # Quick start
//!
//! ```no_run
//! use mtgv_sdk::{CardListItem, DefaultSelection, Game, MtgvSdk};
//!
//! # async fn example() -> mtgv_sdk::Result<()> {
//! let sdk = MtgvSdk::builder()
//!     .api_base("http://localhost:8000")
//!     .build()
//!     .await?;
//!
//! let client = sdk.client();
//! client
//!     .create_package(
//!         vec![CardListItem::new("Lightning Bolt", 4)],
//!         Game::Paper,
//!         DefaultSelection::Cheapest,
//!     )
//!     .await?;
//!
//! // Applied locally at once, sent to the room after a short quiet period.
//! client.update_version_selection("oracle-id", "print-id");
//!
//! let suggestions = sdk.search().search("light", false).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod debounce;
pub mod decklist;
pub mod error;
pub mod models;
pub mod protocol;
pub mod search;
pub mod storage;
pub mod transport;

pub use api::{ApiClient, CreatePackageRequest, ExportFormat, PackageApi};
pub use cache::{CacheStats, TtlCache};
pub use client::{ClientOptions, ClientSnapshot, PackageClient};
pub use debounce::Debouncer;
pub use error::{MtgvError, Result};
pub use models::{CardListItem, CardPackage, CardPrint, DefaultSelection, Game, PackageEntry, PriceValue};
pub use protocol::{InboundMessage, OutboundMessage, VersionSelection};
pub use search::CardSearch;
pub use storage::{FileStore, MemoryStore, PackageStore};
pub use transport::{ConnectionState, ReconnectPolicy, Transport, TransportEvent, WsConnection};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// MtgvSdkBuilder
// ---------------------------------------------------------------------------

/// Builder for configuring and constructing an [`MtgvSdk`] instance.
///
/// Use [`MtgvSdk::builder()`] to obtain a builder, chain configuration
/// methods, and call [`build()`](MtgvSdkBuilder::build) to connect.
pub struct MtgvSdkBuilder {
    api_base: Option<String>,
    ws_url: Option<String>,
    data_dir: Option<PathBuf>,
    persist: bool,
    restore: bool,
    timeout: Duration,
    search_ttl: Duration,
    reconnect: ReconnectPolicy,
    options: ClientOptions,
}

impl Default for MtgvSdkBuilder {
    fn default() -> Self {
        Self {
            api_base: None,
            ws_url: None,
            data_dir: None,
            persist: true,
            restore: true,
            timeout: config::HTTP_TIMEOUT,
            search_ttl: config::SEARCH_CACHE_TTL,
            reconnect: ReconnectPolicy::default(),
            options: ClientOptions::default(),
        }
    }
}

impl MtgvSdkBuilder {
    /// Set the backend base URL.
    ///
    /// If not set, `MTGV_API_BASE_URL` is read, falling back to
    /// [`config::DEFAULT_API_BASE`].
    pub fn api_base(mut self, url: &str) -> Self {
        self.api_base = Some(url.trim_end_matches('/').to_string());
        self
    }

    /// Override the realtime endpoint. Derived from the API base by default.
    pub fn ws_url(mut self, url: &str) -> Self {
        self.ws_url = Some(url.to_string());
        self
    }

    /// Directory holding the persisted package id.
    ///
    /// If not set, the platform-appropriate data directory is used
    /// (e.g. `~/.local/share/mtgv-sdk` on Linux).
    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Persist the current package id across restarts. Defaults to `true`.
    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    /// Reload the persisted package while building. Defaults to `true`.
    pub fn restore(mut self, restore: bool) -> Self {
        self.restore = restore;
        self
    }

    /// HTTP request timeout. Defaults to 30 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How long search results stay cached. Defaults to 15 minutes.
    pub fn search_ttl(mut self, ttl: Duration) -> Self {
        self.search_ttl = ttl;
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn client_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the SDK: open the realtime connection, start the event loop and
    /// the search-cache cleanup timer, then restore the last package.
    ///
    /// Must be called inside a Tokio runtime. Connection problems are not
    /// errors here; the transport keeps retrying in the background.
    pub async fn build(self) -> Result<MtgvSdk> {
        let api_base = self.api_base.unwrap_or_else(config::api_base_from_env);
        let ws_url = match self.ws_url {
            Some(url) => url,
            None => config::ws_url_for(&api_base)?,
        };

        let api = Arc::new(ApiClient::new(&api_base, self.timeout)?);
        let store: Arc<dyn PackageStore> = if self.persist {
            Arc::new(FileStore::new(self.data_dir)?)
        } else {
            Arc::new(MemoryStore::new())
        };

        let (connection, events) = WsConnection::open(&ws_url, self.reconnect);
        let client = Arc::new(PackageClient::new(
            api.clone(),
            connection.clone(),
            store,
            self.options,
        ));
        let event_task = client.run(events);

        let search = CardSearch::new(api.clone(), self.search_ttl);
        let cleanup_task = search.spawn_cleanup(config::CACHE_CLEANUP_INTERVAL);

        if self.restore {
            client.restore().await;
        }

        Ok(MtgvSdk {
            api,
            client,
            search,
            connection,
            ws_url,
            event_task,
            cleanup_task,
        })
    }
}

// ---------------------------------------------------------------------------
// MtgvSdk
// ---------------------------------------------------------------------------

/// The main entry point for the MTGV SDK.
///
/// Owns the HTTP client, the realtime connection, the package client and the
/// cached search. Created via [`MtgvSdk::builder()`].
pub struct MtgvSdk {
    api: Arc<ApiClient>,
    client: Arc<PackageClient>,
    search: CardSearch,
    connection: Arc<WsConnection>,
    ws_url: String,
    event_task: JoinHandle<()>,
    cleanup_task: JoinHandle<()>,
}

impl MtgvSdk {
    /// Create a new builder for configuring the SDK.
    pub fn builder() -> MtgvSdkBuilder {
        MtgvSdkBuilder::default()
    }

    /// The realtime package client.
    pub fn client(&self) -> &Arc<PackageClient> {
        &self.client
    }

    /// Cached card-name search.
    pub fn search(&self) -> &CardSearch {
        &self.search
    }

    /// Direct access to the HTTP API, e.g. for exports.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn connection(&self) -> &WsConnection {
        &self.connection
    }

    /// Send pending edits, close the realtime connection and stop background
    /// tasks.
    pub fn close(self) {
        self.client.shutdown();
        self.connection.close();
        // Drop aborts the tasks.
        drop(self);
    }
}

impl Drop for MtgvSdk {
    fn drop(&mut self) {
        self.event_task.abort();
        self.cleanup_task.abort();
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for MtgvSdk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.client.snapshot();
        write!(
            f,
            "MtgvSdk(api={}, ws={}, package={}, connection={:?})",
            self.api.base_url(),
            self.ws_url,
            snapshot.package_id.as_deref().unwrap_or("none"),
            snapshot.connection
        )
    }
}
