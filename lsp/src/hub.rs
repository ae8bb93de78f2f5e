//! StatusHub: the panel-facing side of the language-server bridge.
//!
//! Producers push [`ServerEvent`]s through [`StatusHub::sender`]. The owner
//! drains them with [`StatusHub::poll_events`] on its own tick; each drained
//! event updates the hub's stores first and then fires the matching
//! [`Event`], so listeners and resource getters always agree.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bridge_events::{
    Event, EventError, Flow, ObserverScope, Resource, ResourceError, Subscription,
    WithoutReentrancy, combine, on_event_while, without_reentrancy,
};
use tokio::sync::{mpsc, oneshot};

use crate::diagnostics::DiagnosticsStore;
use crate::types::{
    Diagnostic, DiagnosticsSnapshot, HubConfig, ServerConfig, ServerEvent, ServerState,
    ServerStatus,
};

/// Channel capacity between producers and the hub.
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub type ServerMap = BTreeMap<String, ServerState>;

/// Future returned by a refresh source: the full set of per-file diagnostics.
pub type RefreshFut =
    Pin<Box<dyn Future<Output = anyhow::Result<Vec<(PathBuf, Vec<Diagnostic>)>>> + Send>>;

type OutcomeFut = Pin<Box<dyn Future<Output = RefreshOutcome> + Send>>;
type RefreshAction = Box<dyn Fn() -> OutcomeFut + Send + Sync>;

/// Result of [`StatusHub::request_refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { files: usize },
    /// Another refresh was still in flight.
    Skipped,
    /// No refresh source was installed.
    Unavailable,
    Failed(String),
}

fn build_extension_map(config: &HubConfig) -> HashMap<String, String> {
    let mut extension_map = HashMap::new();
    let mut names: Vec<&String> = config.servers.keys().collect();
    names.sort();
    for name in names {
        for ext in &config.servers[name].file_extensions {
            if let Some(existing) = extension_map.get(ext) {
                tracing::warn!(
                    extension = %ext,
                    "Multiple servers configured for extension: '{existing}' and '{name}'. Using '{existing}'."
                );
                continue;
            }
            extension_map.insert(ext.clone(), name.clone());
        }
    }
    extension_map
}

fn report_fire(event: &str, result: Result<(), EventError>) {
    match result {
        Ok(()) => {}
        Err(EventError::ListenerPanicked { panicked, .. }) => {
            tracing::warn!(event, panicked, "hub listeners panicked");
        }
        Err(EventError::Disposed) => {
            tracing::debug!(event, "hub event already disposed");
        }
    }
}

pub struct StatusHub {
    event_rx: mpsc::Receiver<ServerEvent>,
    event_tx: mpsc::Sender<ServerEvent>,
    servers: Arc<Mutex<ServerMap>>,
    diagnostics: DiagnosticsStore,
    server_configs: HashMap<String, ServerConfig>,
    /// Maps file extension (e.g. "lean") to server name.
    extension_map: HashMap<String, String>,
    on_status: Event<ServerStatus>,
    on_diagnostics: Event<DiagnosticsSnapshot>,
    on_document_changed: Event<PathBuf>,
    on_published: Event<PathBuf>,
    diagnostics_resource: Resource<DiagnosticsSnapshot>,
    servers_resource: Resource<ServerMap>,
    last_status: Resource<ServerStatus>,
    refresh: Option<WithoutReentrancy<RefreshAction, RefreshOutcome>>,
}

impl StatusHub {
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let extension_map = build_extension_map(&config);
        let servers: Arc<Mutex<ServerMap>> = Arc::new(Mutex::new(
            config
                .servers
                .keys()
                .map(|name| (name.clone(), ServerState::Stopped))
                .collect(),
        ));
        let diagnostics = DiagnosticsStore::new();
        let on_status: Event<ServerStatus> = Event::new();
        let on_diagnostics: Event<DiagnosticsSnapshot> = Event::new();

        let diagnostics_resource = {
            let store = diagnostics.clone();
            Resource::from_event(&on_diagnostics)
                .getter(move || store.snapshot())
                .inactive_read(config.inactive_read)
                .name("diagnostics")
                .build()
        };

        let servers_resource = {
            let on_status = on_status.clone();
            let map = Arc::clone(&servers);
            Resource::<ServerMap>::builder(move |sink| {
                Ok(on_status.subscribe(move |_| sink.refresh()))
            })
            .getter(move || lock(&map).clone())
            .inactive_read(config.inactive_read)
            .name("servers")
            .build()
        };

        let last_status = Resource::from_event(&on_status)
            .inactive_read(config.inactive_read)
            .name("last-status")
            .build();

        Self {
            event_rx,
            event_tx,
            servers,
            diagnostics,
            server_configs: config.servers,
            extension_map,
            on_status,
            on_diagnostics,
            on_document_changed: Event::new(),
            on_published: Event::new(),
            diagnostics_resource,
            servers_resource,
            last_status,
            refresh: None,
        }
    }

    /// Install the source used by [`Self::request_refresh`].
    ///
    /// The fetched diagnostics replace the whole store and are announced
    /// through [`Self::on_diagnostics`].
    #[must_use]
    pub fn with_refresher(
        mut self,
        fetch: impl Fn() -> RefreshFut + Send + Sync + 'static,
    ) -> Self {
        let store = self.diagnostics.clone();
        let on_diagnostics = self.on_diagnostics.clone();
        let action: RefreshAction = Box::new(move || -> OutcomeFut {
            let pending = fetch();
            let store = store.clone();
            let on_diagnostics = on_diagnostics.clone();
            Box::pin(async move {
                match pending.await {
                    Ok(files) => {
                        let count = files.len();
                        store.replace_all(files);
                        report_fire("diagnostics", on_diagnostics.fire(store.snapshot()));
                        tracing::debug!(files = count, "diagnostics refreshed");
                        RefreshOutcome::Refreshed { files: count }
                    }
                    Err(err) => {
                        tracing::warn!("diagnostics refresh failed: {err:#}");
                        RefreshOutcome::Failed(format!("{err:#}"))
                    }
                }
            })
        });
        self.refresh = Some(without_reentrancy(RefreshOutcome::Skipped, action));
        self
    }

    /// Sender for producers. Sends fail once the hub is shut down.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<ServerEvent> {
        self.event_tx.clone()
    }

    /// Drain pending producer events, up to `budget`. Never blocks.
    pub fn poll_events(&mut self, budget: usize) -> usize {
        let mut count = 0;
        while count < budget {
            match self.event_rx.try_recv() {
                Ok(event) => {
                    self.handle_event(event);
                    count += 1;
                }
                Err(mpsc::error::TryRecvError::Empty | mpsc::error::TryRecvError::Disconnected) => {
                    break;
                }
            }
        }
        count
    }

    fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Status { server, state } => {
                match &state {
                    ServerState::Failed(reason) => {
                        tracing::warn!(server = %server, error = %reason, "server failed");
                    }
                    other => tracing::info!(server = %server, state = other.label(), "server state"),
                }
                lock(&self.servers).insert(server.clone(), state.clone());
                report_fire("status", self.on_status.fire(ServerStatus { server, state }));
            }
            ServerEvent::Diagnostics { path, items } => {
                tracing::debug!(path = %path.display(), count = items.len(), "diagnostics updated");
                self.diagnostics.update(path.clone(), items);
                report_fire(
                    "diagnostics",
                    self.on_diagnostics.fire(self.diagnostics.snapshot()),
                );
                report_fire("published", self.on_published.fire(path));
            }
        }
    }

    /// Fires after every drained status change.
    #[must_use]
    pub fn on_status(&self) -> &Event<ServerStatus> {
        &self.on_status
    }

    /// Fires with the full snapshot after every diagnostics change.
    #[must_use]
    pub fn on_diagnostics(&self) -> &Event<DiagnosticsSnapshot> {
        &self.on_diagnostics
    }

    /// Fires for every [`Self::document_changed`] call.
    #[must_use]
    pub fn on_document_changed(&self) -> &Event<PathBuf> {
        &self.on_document_changed
    }

    /// Name of the server responsible for `path`, by file extension.
    #[must_use]
    pub fn server_for_path(&self, path: &Path) -> Option<&str> {
        let ext = path.extension().and_then(|e| e.to_str())?;
        self.extension_map.get(ext).map(String::as_str)
    }

    /// Announce an editor-side document change.
    pub fn document_changed(&self, path: &Path) {
        report_fire(
            "document_changed",
            self.on_document_changed.fire(path.to_path_buf()),
        );
    }

    /// Paths whose panel view should be recomputed: documents edited in a
    /// file some server handles, and files a server published diagnostics
    /// for. Dispose the subscription to stop the stream.
    #[must_use]
    pub fn refresh_triggers(&self) -> (Event<PathBuf>, Subscription) {
        let extension_map = self.extension_map.clone();
        combine(
            &self.on_document_changed,
            move |path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|ext| extension_map.contains_key(ext))
            },
            &self.on_published,
            |_| true,
        )
    }

    /// Launch parameters for `server`, for the owner of its process.
    #[must_use]
    pub fn server_config(&self, server: &str) -> Option<&ServerConfig> {
        self.server_configs.get(server)
    }

    /// Current state of every known server.
    #[must_use]
    pub fn servers(&self) -> ServerMap {
        lock(&self.servers).clone()
    }

    #[must_use]
    pub fn server_state(&self, server: &str) -> Option<ServerState> {
        lock(&self.servers).get(server).cloned()
    }

    #[must_use]
    pub fn has_running_servers(&self) -> bool {
        lock(&self.servers)
            .values()
            .any(|state| *state == ServerState::Running)
    }

    /// Resolves once `server` reports [`ServerState::Running`], immediately
    /// if it already has. The receiver errors if the hub shuts down first.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn when_running(&self, server: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if self.server_state(server) == Some(ServerState::Running) {
            let _ = tx.send(());
            return rx;
        }

        let server = server.to_string();
        let tx = Mutex::new(Some(tx));
        on_event_while(&self.on_status, move |status: ServerStatus| {
            let ready = status.server == server && status.state == ServerState::Running;
            if ready && let Some(tx) = lock(&tx).take() {
                let _ = tx.send(());
            }
            async move { if ready { Flow::Stop } else { Flow::Continue } }
        })
        .detach();
        rx
    }

    /// Diagnostics snapshot that is live while observed and computed from
    /// the store otherwise.
    #[must_use]
    pub fn diagnostics_resource(&self) -> Resource<DiagnosticsSnapshot> {
        self.diagnostics_resource.clone()
    }

    #[must_use]
    pub fn servers_resource(&self) -> Resource<ServerMap> {
        self.servers_resource.clone()
    }

    /// Most recent status change. Has no getter, so unobserved reads follow
    /// the configured inactive-read policy.
    #[must_use]
    pub fn last_status(&self) -> Resource<ServerStatus> {
        self.last_status.clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Status-bar text, read through `scope` so the diagnostics resource
    /// stays live for as long as the caller's render context lives.
    pub fn status_line(&self, scope: &ObserverScope) -> Result<String, ResourceError> {
        Ok(self
            .diagnostics_resource
            .current_in(scope)?
            .map(|snapshot| snapshot.status_string())
            .unwrap_or_default())
    }

    /// Error-level diagnostics for the given files.
    #[must_use]
    pub fn errors_for_files(&self, paths: &[PathBuf]) -> Vec<(PathBuf, Vec<Diagnostic>)> {
        self.diagnostics.errors_for_files(paths)
    }

    /// Run the installed refresh source. A call made while another refresh
    /// is in flight returns [`RefreshOutcome::Skipped`] at once.
    pub async fn request_refresh(&self) -> RefreshOutcome {
        match &self.refresh {
            Some(refresh) => refresh.call().await,
            None => RefreshOutcome::Unavailable,
        }
    }

    /// Close the producer channel and dispose every event and resource.
    pub fn shutdown(&mut self) {
        self.event_rx.close();
        let mut discarded = 0usize;
        while self.event_rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(discarded, "dropped undelivered server events on shutdown");
        }

        self.diagnostics_resource.dispose();
        self.servers_resource.dispose();
        self.last_status.dispose();
        self.on_status.dispose();
        self.on_diagnostics.dispose();
        self.on_document_changed.dispose();
        self.on_published.dispose();
        self.diagnostics.clear();
        tracing::info!("status hub shut down");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
