//! Shared test fixtures for the MTGV SDK integration tests.
//!
//! Provides in-process fakes for the two collaborators of the realtime
//! client: `FakeApi` (the HTTP backend) and `FakeTransport` (the realtime
//! connection), plus a small sample package.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mtgv_sdk::{
    CardListItem, CardPackage, CardPrint, ClientOptions, ConnectionState, CreatePackageRequest,
    DefaultSelection, Game, MemoryStore, MtgvError, OutboundMessage, PackageApi, PackageClient,
    PackageEntry, PackageStore, PriceValue, Result, Transport,
};

// ---------------------------------------------------------------------------
// FakeTransport
// ---------------------------------------------------------------------------

/// Records every outbound message instead of sending it.
#[derive(Default)]
pub struct FakeTransport {
    pub sent: Mutex<Vec<OutboundMessage>>,
    pub state: Mutex<ConnectionState>,
}

impl FakeTransport {
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn joins(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::JoinPackage { package_id } => Some(package_id),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Transport for FakeTransport {
    fn send(&self, message: OutboundMessage) {
        self.sent.lock().unwrap().push(message);
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// FakeApi
// ---------------------------------------------------------------------------

/// Answers every package request with `package`, or with a 500 when unset.
#[derive(Default)]
pub struct FakeApi {
    pub package: Mutex<Option<CardPackage>>,
    pub calls: AtomicUsize,
    pub search_calls: AtomicUsize,
    /// Delay applied to package requests.
    pub latency: Mutex<Option<Duration>>,
}

impl FakeApi {
    pub fn returning(package: CardPackage) -> Self {
        Self {
            package: Mutex::new(Some(package)),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(&self) -> Result<CardPackage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let package = self.package.lock().unwrap().clone();
        package.ok_or(MtgvError::Backend {
            status: 500,
            message: "Internal Server Error".to_string(),
        })
    }
}

#[async_trait]
impl PackageApi for FakeApi {
    async fn create_package(&self, _request: &CreatePackageRequest) -> Result<CardPackage> {
        self.respond().await
    }

    async fn random_package(
        &self,
        _count: u32,
        _game: Game,
        _default_selection: DefaultSelection,
    ) -> Result<CardPackage> {
        self.respond().await
    }

    async fn get_package(&self, package_id: &str) -> Result<CardPackage> {
        match self.respond().await {
            Ok(package) if package.package_id.as_deref() == Some(package_id) => Ok(package),
            Ok(_) => Err(MtgvError::NotFound(format!("Package '{package_id}' does not exist"))),
            Err(e) => Err(e),
        }
    }

    /// Queries starting with `slow` take ten seconds to answer.
    async fn search_cards(&self, query: &str, _exact: bool) -> Result<Vec<String>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if query.starts_with("slow") {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        Ok(vec![format!("{query} result")])
    }
}

// ---------------------------------------------------------------------------
// Sample data
// ---------------------------------------------------------------------------

pub fn print(id: &str, usd: f64) -> CardPrint {
    CardPrint {
        scryfall_id: id.to_string(),
        set_name: "Masters 25".to_string(),
        collector_number: "141".to_string(),
        image_uris: vec![format!("https://img.example/{id}.jpg")],
        prices: BTreeMap::from([("usd".to_string(), Some(PriceValue::Number(usd)))]),
    }
}

/// Package `p1` with two resolved entries, each with two prints.
pub fn sample_package() -> CardPackage {
    CardPackage {
        package_id: Some("p1".to_string()),
        card_list: vec![
            CardListItem::new("Lightning Bolt", 4),
            CardListItem::new("Counterspell", 2),
        ],
        game: Game::Paper,
        default_selection: DefaultSelection::Newest,
        package_entries: vec![
            PackageEntry {
                count: 4,
                oracle_id: Some("oracle-1".to_string()),
                name: "Lightning Bolt".to_string(),
                card_prints: vec![print("printA", 1.0), print("printB", 2.5)],
                selected_print: Some("printA".to_string()),
                user_selected: false,
                not_found: false,
            },
            PackageEntry {
                count: 2,
                oracle_id: Some("oracle-2".to_string()),
                name: "Counterspell".to_string(),
                card_prints: vec![print("printC", 0.5), print("printD", 3.0)],
                selected_print: Some("printC".to_string()),
                user_selected: false,
                not_found: false,
            },
        ],
    }
}

pub struct Harness {
    pub api: Arc<FakeApi>,
    pub transport: Arc<FakeTransport>,
    pub store: Arc<MemoryStore>,
    pub client: Arc<PackageClient>,
}

/// Build a client around fresh fakes.
pub fn harness(api: FakeApi) -> Harness {
    harness_with_store(api, MemoryStore::new())
}

pub fn harness_with_store(api: FakeApi, store: MemoryStore) -> Harness {
    let api = Arc::new(api);
    let transport = Arc::new(FakeTransport::default());
    let store = Arc::new(store);
    let client = Arc::new(PackageClient::new(
        api.clone(),
        transport.clone(),
        store.clone(),
        ClientOptions::default(),
    ));
    Harness {
        api,
        transport,
        store,
        client,
    }
}

/// Client already showing `sample_package()` and joined to `p1`.
pub async fn loaded_harness() -> Harness {
    let h = harness(FakeApi::returning(sample_package()));
    h.client
        .create_package(
            vec![CardListItem::new("Lightning Bolt", 4)],
            Game::Paper,
            DefaultSelection::Newest,
        )
        .await
        .unwrap();
    h.transport.clear();
    h
}

pub fn stored_id(store: &MemoryStore) -> Option<String> {
    store.load()
}
