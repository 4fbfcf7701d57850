//! Realtime package client.
//!
//! [`PackageClient`] owns the package currently on screen and keeps it in
//! sync with every other viewer of the same package id:
//!
//! - local edits are applied immediately (optimistic update) and sent as
//!   debounced messages: the card list through one debouncer, version
//!   selections through one debouncer per entry, so each send fully
//!   describes what it replaces;
//! - broadcasts from the server overwrite local state (last writer via the
//!   server wins);
//! - room membership is re-established every time the transport comes back
//!   up, since it does not survive a reconnect;
//! - the current package id is persisted so a restart can refetch it.
//!
//! Every failure ends up as an error string in the client state. Methods
//! that can fail also return the error, but nothing panics and nothing is
//! left half-loading.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::api::{CreatePackageRequest, PackageApi};
use crate::config;
use crate::debounce::Debouncer;
use crate::error::{MtgvError, Result};
use crate::models::{CardListItem, CardPackage, DefaultSelection, Game};
use crate::protocol::{InboundMessage, OutboundMessage, VersionSelection};
use crate::storage::PackageStore;
use crate::transport::{ConnectionState, Transport, TransportEvent};

pub const PACKAGE_GONE_MESSAGE: &str = "Package no longer exists";
pub const EMPTY_CARD_LIST_MESSAGE: &str = "Please enter at least one card";
pub const INVALID_COUNT_MESSAGE: &str = "Please choose at least one card";

/// Timing knobs for [`PackageClient`].
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub card_list_debounce: Duration,
    pub version_selection_debounce: Duration,
    /// Longest time inbound updates are ignored while the startup fetch runs.
    pub startup_guard: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            card_list_debounce: config::CARD_LIST_DEBOUNCE,
            version_selection_debounce: config::VERSION_SELECTION_DEBOUNCE,
            startup_guard: config::STARTUP_GUARD_TIMEOUT,
        }
    }
}

/// Point-in-time copy of everything a view needs to render.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientSnapshot {
    pub package: Option<CardPackage>,
    pub package_id: Option<String>,
    pub error: Option<String>,
    pub loading: bool,
    pub connection: ConnectionState,
}

#[derive(Default)]
struct ClientState {
    package: Option<CardPackage>,
    package_id: Option<String>,
    error: Option<String>,
    loading: bool,
    connection: ConnectionState,
    ignore_inbound_until: Option<Instant>,
}

impl ClientState {
    fn inbound_blocked(&self) -> bool {
        self.ignore_inbound_until
            .is_some_and(|until| Instant::now() < until)
    }
}

/// Synchronizes one card package between local edits and the server.
pub struct PackageClient {
    api: Arc<dyn PackageApi>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn PackageStore>,
    options: ClientOptions,
    state: Mutex<ClientState>,
    card_list_sender: Debouncer<OutboundMessage>,
    /// Version selection senders keyed by oracle id.
    version_senders: Mutex<HashMap<String, Debouncer<OutboundMessage>>>,
}

impl PackageClient {
    pub fn new(
        api: Arc<dyn PackageApi>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn PackageStore>,
        options: ClientOptions,
    ) -> Self {
        let list_transport = Arc::clone(&transport);
        let connection = transport.state();
        Self {
            card_list_sender: Debouncer::new(options.card_list_debounce, move |msg| {
                list_transport.send(msg)
            }),
            version_senders: Mutex::new(HashMap::new()),
            api,
            transport,
            store,
            options,
            state: Mutex::new(ClientState {
                connection,
                ..Default::default()
            }),
        }
    }

    // -- Snapshot accessors ------------------------------------------------

    pub fn snapshot(&self) -> ClientSnapshot {
        let st = self.lock();
        ClientSnapshot {
            package: st.package.clone(),
            package_id: st.package_id.clone(),
            error: st.error.clone(),
            loading: st.loading,
            connection: st.connection,
        }
    }

    pub fn package(&self) -> Option<CardPackage> {
        self.lock().package.clone()
    }

    pub fn package_id(&self) -> Option<String> {
        self.lock().package_id.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lock().connection
    }

    /// Clear the inline error message.
    pub fn dismiss_error(&self) {
        self.lock().error = None;
    }

    // -- Package lifecycle -------------------------------------------------

    /// Create a package from a card list, replacing whatever is on screen.
    ///
    /// An empty list is rejected without contacting the backend. On success
    /// the client joins the new package's room.
    pub async fn create_package(
        &self,
        cards: Vec<CardListItem>,
        game: Game,
        default_selection: DefaultSelection,
    ) -> Result<()> {
        if cards.is_empty() {
            return Err(self.reject(EMPTY_CARD_LIST_MESSAGE));
        }
        let request = CreatePackageRequest {
            card_list: cards,
            game,
            default_selection,
        };
        let _loading = self.begin_load();
        let result = self.api.create_package(&request).await;
        self.finish_load(result)
    }

    /// Ask the backend for a random package of `count` cards.
    pub async fn create_random_package(
        &self,
        count: u32,
        game: Game,
        default_selection: DefaultSelection,
    ) -> Result<()> {
        if count == 0 {
            return Err(self.reject(INVALID_COUNT_MESSAGE));
        }
        let _loading = self.begin_load();
        let result = self.api.random_package(count, game, default_selection).await;
        self.finish_load(result)
    }

    /// Reload the package whose id was persisted by a previous session.
    ///
    /// Returns `true` if a package was restored. A dangling id is dropped
    /// silently and the user starts fresh. Until the fetch settles (or the
    /// startup guard expires) inbound updates are ignored, so a stale
    /// broadcast cannot overwrite the freshly fetched package.
    pub async fn restore(&self) -> bool {
        let Some(stored_id) = self.store.load() else {
            return false;
        };
        log::info!("Restoring package {stored_id}");

        let _loading = LoadingGuard::start(self);
        self.lock().ignore_inbound_until = Some(Instant::now() + self.options.startup_guard);
        let result = self.api.get_package(&stored_id).await;
        self.lock().ignore_inbound_until = None;

        match result {
            Ok(package) => {
                let id = package.package_id.clone().unwrap_or(stored_id);
                self.lock().package = Some(package);
                self.join(&id);
                true
            }
            Err(e) => {
                log::warn!("Could not restore package {stored_id}: {e}");
                if let Err(e) = self.store.clear() {
                    log::warn!("Could not clear stored package id: {e}");
                }
                false
            }
        }
    }

    /// Make `package_id` current and subscribe to its room.
    pub fn join(&self, package_id: &str) {
        self.lock().package_id = Some(package_id.to_string());
        if let Err(e) = self.store.save(package_id) {
            log::warn!("Could not persist package id: {e}");
        }
        self.transport.send(OutboundMessage::JoinPackage {
            package_id: package_id.to_string(),
        });
    }

    /// Leave the current package's room, if any.
    ///
    /// Edits still waiting in a debouncer are sent first so they are not lost.
    pub fn leave(&self) {
        self.flush_pending();
        self.drop_membership();
        self.card_list_sender.forget_last_sent();
        self.lock_senders().clear();
    }

    /// Leave the room and forget the package entirely.
    pub fn clear_package(&self) {
        self.leave();
        {
            let mut st = self.lock();
            st.package = None;
            st.error = None;
        }
        self.forget_stored_id();
    }

    // -- Optimistic edits --------------------------------------------------

    /// Replace the card list locally and schedule the update for the room.
    ///
    /// Does nothing when no package is current.
    pub fn update_card_list(&self, cards: Vec<CardListItem>) {
        let package_id = {
            let mut st = self.lock();
            let Some(package_id) = st.package_id.clone() else {
                return;
            };
            if let Some(package) = st.package.as_mut() {
                package.card_list = cards.clone();
            }
            package_id
        };
        self.card_list_sender.schedule(OutboundMessage::UpdateCardList {
            package_id,
            data: cards,
        });
    }

    /// Select `scryfall_id` for the entry with `oracle_id`, locally first,
    /// then for the room.
    ///
    /// Does nothing when no package is current.
    pub fn update_version_selection(&self, oracle_id: &str, scryfall_id: &str) {
        let package_id = {
            let mut st = self.lock();
            let Some(package_id) = st.package_id.clone() else {
                return;
            };
            let applied = st
                .package
                .as_mut()
                .is_some_and(|p| p.apply_version_selection(oracle_id, scryfall_id));
            if !applied {
                log::debug!("No local entry for oracle id {oracle_id}; sending anyway");
            }
            package_id
        };
        let message = OutboundMessage::UpdateVersionSelection {
            package_id,
            data: VersionSelection {
                oracle_id: oracle_id.to_string(),
                scryfall_id: scryfall_id.to_string(),
            },
        };
        let mut senders = self.lock_senders();
        let sender = senders.entry(oracle_id.to_string()).or_insert_with(|| {
            let transport = Arc::clone(&self.transport);
            Debouncer::new(
                self.options.version_selection_debounce,
                move |msg: OutboundMessage| transport.send(msg),
            )
        });
        sender.schedule(message);
    }

    // -- Transport events --------------------------------------------------

    /// Apply one event from the transport.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged(state) => self.handle_state_change(state),
            TransportEvent::Message(message) => self.handle_inbound(message),
        }
    }

    /// Consume `events` on a background task until the stream ends.
    pub fn run(self: &Arc<Self>, mut events: UnboundedReceiver<TransportEvent>) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                client.handle_event(event);
            }
            log::debug!("Transport event stream ended");
        })
    }

    /// Send any pending debounced edits immediately.
    pub fn shutdown(&self) {
        self.flush_pending();
    }

    fn handle_state_change(&self, state: ConnectionState) {
        let (previous, package_id) = {
            let mut st = self.lock();
            let previous = st.connection;
            st.connection = state;
            (previous, st.package_id.clone())
        };
        if state != ConnectionState::Connected || previous == ConnectionState::Connected {
            return;
        }
        if let Some(package_id) = package_id {
            log::info!("Connected; rejoining package {package_id}");
            self.transport
                .send(OutboundMessage::JoinPackage { package_id });
        }
    }

    fn handle_inbound(&self, message: InboundMessage) {
        if message.is_package_not_found() {
            log::warn!("Server reports the current package no longer exists");
            self.card_list_sender.cancel();
            {
                let mut senders = self.lock_senders();
                for sender in senders.values() {
                    sender.cancel();
                }
                senders.clear();
            }
            {
                let mut st = self.lock();
                st.package = None;
                st.package_id = None;
                st.error = Some(PACKAGE_GONE_MESSAGE.to_string());
            }
            self.forget_stored_id();
            return;
        }

        let mut st = self.lock();
        match message {
            InboundMessage::CardListUpdated { data } => {
                if st.inbound_blocked() {
                    log::debug!("Ignoring card list update during startup fetch");
                    return;
                }
                match st.package.as_mut() {
                    Some(package) => package.card_list = data,
                    None => log::debug!("Card list update with no package loaded"),
                }
                drop(st);
                // Our last send no longer describes the room; an identical
                // local edit must go out again.
                self.card_list_sender.forget_last_sent();
            }
            InboundMessage::VersionSelectionUpdated { data } => {
                if st.inbound_blocked() {
                    log::debug!("Ignoring version selection during startup fetch");
                    return;
                }
                let matched = st
                    .package
                    .as_mut()
                    .is_some_and(|p| p.apply_version_selection(&data.oracle_id, &data.scryfall_id));
                if !matched {
                    log::debug!("Version selection for unknown oracle id {}", data.oracle_id);
                }
                drop(st);
                if let Some(sender) = self.lock_senders().get(&data.oracle_id) {
                    sender.forget_last_sent();
                }
            }
            InboundMessage::JoinedPackage { package_id } => {
                log::debug!("Joined package room {}", package_id.as_deref().unwrap_or("?"));
            }
            InboundMessage::Error { error } => {
                log::warn!("Server error: {error}");
                st.error = Some(error);
            }
        }
    }

    // -- Internals ---------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, ClientState> {
        // Every write leaves the state consistent, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_senders(&self) -> MutexGuard<'_, HashMap<String, Debouncer<OutboundMessage>>> {
        self.version_senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn flush_pending(&self) {
        self.card_list_sender.flush_now();
        for sender in self.lock_senders().values() {
            sender.flush_now();
        }
    }

    /// Record a local validation failure.
    fn reject(&self, message: &str) -> MtgvError {
        self.lock().error = Some(message.to_string());
        MtgvError::InvalidArgument(message.to_string())
    }

    /// Drop the current package and room, then mark the client loading.
    fn begin_load(&self) -> LoadingGuard<'_> {
        self.leave();
        {
            let mut st = self.lock();
            st.package = None;
            st.error = None;
        }
        LoadingGuard::start(self)
    }

    fn finish_load(&self, result: Result<CardPackage>) -> Result<()> {
        match result {
            Ok(package) => {
                let package_id = package.package_id.clone();
                self.lock().package = Some(package);
                if let Some(package_id) = package_id {
                    self.join(&package_id);
                }
                Ok(())
            }
            Err(e) => {
                log::warn!("Package request failed: {e}");
                let mut st = self.lock();
                st.package = None;
                st.error = Some(e.user_message());
                Err(e)
            }
        }
    }

    fn drop_membership(&self) {
        let Some(package_id) = self.lock().package_id.take() else {
            return;
        };
        self.transport
            .send(OutboundMessage::LeavePackage { package_id });
        self.forget_stored_id();
    }

    fn forget_stored_id(&self) {
        if let Err(e) = self.store.clear() {
            log::warn!("Could not clear stored package id: {e}");
        }
    }
}

/// Clears the loading flag when dropped, including when the request future
/// is cancelled mid-flight.
struct LoadingGuard<'a> {
    client: &'a PackageClient,
}

impl<'a> LoadingGuard<'a> {
    fn start(client: &'a PackageClient) -> Self {
        client.lock().loading = true;
        Self { client }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.client.lock().loading = false;
    }
}
