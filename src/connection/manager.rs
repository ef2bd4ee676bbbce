//! Venue connection manager
//!
//! Owns the single live manager session for the process. A build or rebuild
//! happens under one mutex, so a credential rotation can never leave two
//! sessions connected at the same time. Callers take an `Arc` to the current
//! handle and use it outside the lock; a concurrent rotation may let one
//! in-flight call finish on the old handle. Status readers see a snapshot
//! published after each change and never wait for a connect.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

use crate::domain::ConnectionSettings;
use crate::error::{ErrorKind, GatewayError, Result};
use crate::persistence::SettingsSource;
use crate::secrets::SecretCipher;
use crate::venue::{classify, ConnectParams, ManagerMode, VenueConnector, VenueResult, VenueSession};

/// Options forwarded to the vendor connect primitive
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    pub mode: ManagerMode,
    pub timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            mode: ManagerMode::Default,
            timeout: Duration::from_secs(30),
        }
    }
}

/// The live session plus the settings it was built from
pub struct ManagedConnection {
    session: Mutex<Box<dyn VenueSession>>,
    settings: ConnectionSettings,
    connected: AtomicBool,
    generation: u64,
    connected_at: DateTime<Utc>,
}

impl ManagedConnection {
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Run one blocking vendor call on this session.
    ///
    /// The outer `Result` fails only when the handle has been torn down.
    pub(crate) fn call<T>(
        &self,
        f: impl FnOnce(&mut dyn VenueSession) -> VenueResult<T>,
    ) -> Result<VenueResult<T>> {
        if !self.is_connected() {
            return Err(GatewayError::ConnectionUnavailable(format!(
                "handle generation {} was invalidated",
                self.generation
            )));
        }
        let mut session = self.session.lock();
        Ok(f(session.as_mut()))
    }

    fn teardown(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        // An in-flight call holds the session; Drop disconnects it later.
        if let Some(mut session) = self.session.try_lock() {
            session.disconnect();
        }
    }
}

impl Drop for ManagedConnection {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        self.session.get_mut().disconnect();
    }
}

impl std::fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("settings_id", &self.settings.id)
            .field("server", &self.settings.server_address)
            .field("generation", &self.generation)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Snapshot for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub generation: Option<u64>,
    pub settings_id: Option<i64>,
    pub server_address: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub connect_attempts: u64,
    pub invalidations: u64,
}

type InvalidationHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Slot {
    current: Option<Arc<ManagedConnection>>,
    next_generation: u64,
    last_error: Option<String>,
}

/// Copy of the slot for readers that must not wait on a connect
#[derive(Default)]
struct Published {
    current: Option<Arc<ManagedConnection>>,
    last_error: Option<String>,
}

struct Inner {
    connector: Arc<dyn VenueConnector>,
    settings: Arc<dyn SettingsSource>,
    cipher: Arc<SecretCipher>,
    runtime: Handle,
    options: ConnectOptions,
    slot: Mutex<Slot>,
    published: RwLock<Published>,
    hooks: RwLock<Vec<InvalidationHook>>,
    live_handles: AtomicUsize,
    connect_attempts: AtomicU64,
    invalidations: AtomicU64,
}

/// Process-wide owner of the venue session. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Must be created inside a tokio runtime; the handle is used to read
    /// settings from blocking call sites.
    pub fn new(
        connector: Arc<dyn VenueConnector>,
        settings: Arc<dyn SettingsSource>,
        cipher: Arc<SecretCipher>,
        options: ConnectOptions,
    ) -> Self {
        Self::with_runtime(connector, settings, cipher, options, Handle::current())
    }

    pub fn with_runtime(
        connector: Arc<dyn VenueConnector>,
        settings: Arc<dyn SettingsSource>,
        cipher: Arc<SecretCipher>,
        options: ConnectOptions,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                settings,
                cipher,
                runtime,
                options,
                slot: Mutex::new(Slot::default()),
                published: RwLock::new(Published::default()),
                hooks: RwLock::new(Vec::new()),
                live_handles: AtomicUsize::new(0),
                connect_attempts: AtomicU64::new(0),
                invalidations: AtomicU64::new(0),
            }),
        }
    }

    /// Async entry point; the blocking connect runs on the blocking pool.
    pub async fn get_connection(&self) -> Result<Arc<ManagedConnection>> {
        let manager = self.clone();
        tokio::task::spawn_blocking(move || manager.get_connection_blocking())
            .await
            .map_err(|e| GatewayError::Internal(format!("connect task failed: {e}")))?
    }

    /// Blocking entry point for synchronous call sites.
    ///
    /// Must not be called from inside an async task; use [`get_connection`](Self::get_connection).
    pub fn get_connection_blocking(&self) -> Result<Arc<ManagedConnection>> {
        let mut slot = self.inner.slot.lock();
        let result = self.refresh_locked(&mut slot);
        self.publish(&slot);
        result
    }

    fn refresh_locked(&self, slot: &mut Slot) -> Result<Arc<ManagedConnection>> {
        let inner = &self.inner;
        let latest = inner.runtime.block_on(inner.settings.latest_settings());
        let latest = match latest {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                self.discard_locked(slot);
                slot.last_error = Some("no connection settings configured".to_string());
                return Err(GatewayError::ConnectionUnavailable(
                    "no connection settings configured".to_string(),
                ));
            }
            Err(e) => {
                slot.last_error = Some(format!("settings lookup failed: {e}"));
                return Err(GatewayError::ConnectionUnavailable(format!(
                    "settings lookup failed: {e}"
                )));
            }
        };

        if let Some(current) = slot.current.as_ref() {
            if current.is_connected() && current.settings.is_same_revision(&latest) {
                return Ok(current.clone());
            }
            info!(
                "Venue settings changed (id {} -> {}), rebuilding connection",
                current.settings.id, latest.id
            );
        }

        // Fail closed: nothing stays installed if the connect below fails.
        self.discard_locked(slot);
        self.publish(slot);
        match self.connect_locked(slot, latest) {
            Ok(conn) => Ok(conn),
            Err(e) => {
                slot.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn connect_locked(
        &self,
        slot: &mut Slot,
        settings: ConnectionSettings,
    ) -> Result<Arc<ManagedConnection>> {
        let inner = &self.inner;
        inner.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let secret = inner.cipher.decrypt(&settings.secret_reversible).map_err(|e| {
            GatewayError::ConnectionUnavailable(format!("cannot decrypt venue secret: {e}"))
        })?;
        let params = ConnectParams {
            address: settings.server_address.clone(),
            login: settings.login,
            secret,
            mode: inner.options.mode,
            timeout: inner.options.timeout,
        };

        debug!(
            "Connecting to venue {} as manager {}",
            params.address, params.login
        );
        let session = inner.connector.connect(&params).map_err(|code| {
            error!(
                "Venue connect to {} failed with code {}",
                params.address, code
            );
            match classify(code) {
                ErrorKind::PermissionDenied => GatewayError::PermissionDenied(format!(
                    "manager {} may not connect to {} (code {code})",
                    params.login, params.address
                )),
                _ => GatewayError::ConnectionUnavailable(format!(
                    "connect to {} failed (code {code})",
                    params.address
                )),
            }
        })?;

        slot.next_generation += 1;
        let conn = Arc::new(ManagedConnection {
            session: Mutex::new(session),
            settings,
            connected: AtomicBool::new(true),
            generation: slot.next_generation,
            connected_at: Utc::now(),
        });
        inner.live_handles.fetch_add(1, Ordering::SeqCst);
        slot.current = Some(conn.clone());
        slot.last_error = None;

        info!(
            "Venue connection established: {} (generation {})",
            conn.settings.server_address, conn.generation
        );
        Ok(conn)
    }

    /// Taken after the slot lock and held only for the copy
    fn publish(&self, slot: &Slot) {
        *self.inner.published.write() = Published {
            current: slot.current.clone(),
            last_error: slot.last_error.clone(),
        };
    }

    fn discard_locked(&self, slot: &mut Slot) {
        if let Some(old) = slot.current.take() {
            if old.is_connected() {
                self.inner.live_handles.fetch_sub(1, Ordering::SeqCst);
            }
            old.teardown();
            debug!("Venue connection generation {} torn down", old.generation);
        }
    }

    /// Drop the current handle and clear dependent caches. Idempotent.
    ///
    /// Hooks run under the manager lock and must not call back into it.
    pub fn invalidate(&self) {
        let mut slot = self.inner.slot.lock();
        self.discard_locked(&mut slot);
        slot.last_error = None;
        self.publish(&slot);
        self.inner.invalidations.fetch_add(1, Ordering::SeqCst);
        for hook in self.inner.hooks.read().iter() {
            hook();
        }
        info!("Venue connection invalidated");
    }

    /// `invalidate` without blocking an async worker on the manager lock
    pub async fn invalidate_async(&self) -> Result<()> {
        let manager = self.clone();
        tokio::task::spawn_blocking(move || manager.invalidate())
            .await
            .map_err(|e| GatewayError::Internal(format!("invalidate task failed: {e}")))
    }

    /// True when `conn` is still the installed, connected handle.
    ///
    /// Never waits for an in-progress connect.
    pub fn is_current(&self, conn: &ManagedConnection) -> bool {
        let published = self.inner.published.read();
        conn.is_connected()
            && published
                .current
                .as_ref()
                .is_some_and(|current| current.generation == conn.generation)
    }

    pub fn on_invalidate(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner.hooks.write().push(Box::new(hook));
    }

    /// Handles currently counted as live (never more than one)
    pub fn live_handles(&self) -> usize {
        self.inner.live_handles.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ConnectionStatus {
        let published = self.inner.published.read();
        let current = published.current.as_ref();
        ConnectionStatus {
            connected: current.is_some_and(|c| c.is_connected()),
            generation: current.map(|c| c.generation),
            settings_id: current.map(|c| c.settings.id),
            server_address: current.map(|c| c.settings.server_address.clone()),
            connected_at: current.map(|c| c.connected_at),
            last_error: published.last_error.clone(),
            connect_attempts: self.inner.connect_attempts.load(Ordering::SeqCst),
            invalidations: self.inner.invalidations.load(Ordering::SeqCst),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(conn) = self.slot.get_mut().current.take() {
            debug!("Connection manager dropped, closing generation {}", conn.generation);
            conn.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewConnectionSettings;
    use crate::persistence::{MemoryStore, RecordStore};
    use crate::secrets::SecretString;
    use crate::venue::{SimulatedVenue, VenueCode};

    const KEY: [u8; 32] = [3; 32];

    struct Fixture {
        venue: SimulatedVenue,
        store: Arc<MemoryStore>,
        cipher: Arc<SecretCipher>,
        manager: ConnectionManager,
    }

    fn fixture() -> Fixture {
        let venue = SimulatedVenue::new();
        let store = Arc::new(MemoryStore::new());
        let cipher = Arc::new(SecretCipher::new(&KEY).unwrap());
        let manager = ConnectionManager::new(
            Arc::new(venue.connector()),
            store.clone(),
            cipher.clone(),
            ConnectOptions::default(),
        );
        Fixture {
            venue,
            store,
            cipher,
            manager,
        }
    }

    async fn rotate(f: &Fixture, address: &str, secret: &str) {
        let blob = f.cipher.encrypt(&SecretString::new(secret)).unwrap();
        f.store
            .insert_connection_settings(&NewConnectionSettings {
                server_address: address.to_string(),
                login: 1000,
                secret_hash: String::new(),
                secret_reversible: blob,
                display_name: "test".to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_settings_is_connection_unavailable() {
        let f = fixture();
        let err = f.manager.get_connection().await.unwrap_err();
        assert!(matches!(err, GatewayError::ConnectionUnavailable(_)));
        assert_eq!(f.venue.connect_count(), 0);
    }

    #[tokio::test]
    async fn connects_lazily_and_reuses_handle() {
        let f = fixture();
        rotate(&f, "venue-a:443", "pw").await;

        let first = f.manager.get_connection().await.unwrap();
        let second = f.manager.get_connection().await.unwrap();
        assert_eq!(first.generation(), second.generation());
        assert_eq!(f.venue.connect_count(), 1);
        assert_eq!(f.venue.last_connect(), Some(("venue-a:443".to_string(), 1000)));
    }

    #[tokio::test]
    async fn new_settings_row_triggers_rebuild() {
        let f = fixture();
        rotate(&f, "venue-a:443", "pw").await;
        let old = f.manager.get_connection().await.unwrap();

        rotate(&f, "venue-b:443", "pw2").await;
        let new = f.manager.get_connection().await.unwrap();

        assert!(!old.is_connected());
        assert!(new.is_connected());
        assert_eq!(new.settings().server_address, "venue-b:443");
        assert_eq!(f.venue.live_sessions(), 1);
        assert_eq!(f.manager.live_handles(), 1);
    }

    #[tokio::test]
    async fn invalidate_is_idempotent_and_runs_hooks() {
        let f = fixture();
        rotate(&f, "venue-a:443", "pw").await;
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        f.manager.on_invalidate(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let conn = f.manager.get_connection().await.unwrap();
        f.manager.invalidate_async().await.unwrap();
        f.manager.invalidate_async().await.unwrap();

        assert!(!conn.is_connected());
        assert!(!f.manager.is_current(&conn));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(f.manager.live_handles(), 0);
        assert_eq!(f.venue.live_sessions(), 0);

        let rebuilt = f.manager.get_connection().await.unwrap();
        assert!(rebuilt.generation() > conn.generation());
    }

    #[tokio::test]
    async fn failed_connect_leaves_nothing_installed() {
        let f = fixture();
        rotate(&f, "venue-a:443", "pw").await;
        let old = f.manager.get_connection().await.unwrap();

        rotate(&f, "venue-b:443", "pw").await;
        f.venue.refuse_connect(Some(VenueCode::ERR_NETWORK));
        let err = f.manager.get_connection().await.unwrap_err();
        assert!(matches!(err, GatewayError::ConnectionUnavailable(_)));
        assert!(!old.is_connected());

        let status = f.manager.status();
        assert!(!status.connected);
        assert!(status.last_error.is_some());
        assert_eq!(f.manager.live_handles(), 0);

        f.venue.refuse_connect(None);
        let conn = f.manager.get_connection().await.unwrap();
        assert_eq!(conn.settings().server_address, "venue-b:443");
        assert!(f.manager.status().last_error.is_none());
    }

    #[tokio::test]
    async fn permission_failure_is_distinct() {
        let f = fixture();
        rotate(&f, "venue-a:443", "pw").await;
        f.venue.refuse_connect(Some(VenueCode::ERR_PERMISSIONS));
        let err = f.manager.get_connection().await.unwrap_err();
        assert!(matches!(err, GatewayError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn wrong_secret_is_refused() {
        let f = fixture();
        f.venue.require_secret("right");
        rotate(&f, "venue-a:443", "wrong").await;
        assert!(f.manager.get_connection().await.is_err());

        rotate(&f, "venue-a:443", "right").await;
        assert!(f.manager.get_connection().await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_rotation_never_has_two_live_handles() {
        let f = fixture();
        rotate(&f, "venue-0:443", "pw").await;

        let mut tasks = Vec::new();
        for i in 0..32 {
            let manager = f.manager.clone();
            tasks.push(tokio::spawn(async move {
                if i % 4 == 0 {
                    manager.invalidate_async().await.unwrap();
                    None
                } else {
                    manager.get_connection().await.ok()
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(f.venue.max_live_sessions() <= 1);
        assert!(f.manager.live_handles() <= 1);

        rotate(&f, "venue-final:443", "pw").await;
        f.manager.invalidate_async().await.unwrap();
        let conn = f.manager.get_connection().await.unwrap();
        assert_eq!(conn.settings().server_address, "venue-final:443");
        assert_eq!(f.venue.live_sessions(), 1);
    }

    #[tokio::test]
    async fn status_does_not_wait_for_a_slow_connect() {
        let f = fixture();
        rotate(&f, "venue-a:443", "pw").await;
        let old = f.manager.get_connection().await.unwrap();

        f.venue.slow_connect(Some(Duration::from_millis(500)));
        rotate(&f, "venue-b:443", "pw").await;
        let manager = f.manager.clone();
        let rebuild = tokio::spawn(async move { manager.get_connection().await });

        // wait until the rebuild is inside the connect call
        while f.venue.connect_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let started = std::time::Instant::now();
        let status = f.manager.status();
        let current = f.manager.is_current(&old);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(!status.connected);
        assert!(!current);

        let conn = rebuild.await.unwrap().unwrap();
        let status = f.manager.status();
        assert!(status.connected);
        assert_eq!(status.generation, Some(conn.generation()));
        assert!(f.manager.is_current(&conn));
    }

    #[test]
    fn blocking_callers_share_the_handle() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let venue = SimulatedVenue::new();
        let store = Arc::new(MemoryStore::new());
        let cipher = Arc::new(SecretCipher::new(&KEY).unwrap());
        let blob = cipher.encrypt(&SecretString::new("pw")).unwrap();
        runtime
            .block_on(store.insert_connection_settings(&NewConnectionSettings {
                server_address: "venue-a:443".to_string(),
                login: 1000,
                secret_hash: String::new(),
                secret_reversible: blob,
                display_name: "test".to_string(),
            }))
            .unwrap();

        let manager = ConnectionManager::with_runtime(
            Arc::new(venue.connector()),
            store,
            cipher,
            ConnectOptions::default(),
            runtime.handle().clone(),
        );

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let manager = manager.clone();
                std::thread::spawn(move || manager.get_connection_blocking().map(|c| c.generation()))
            })
            .collect();
        let generations: Vec<u64> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        assert!(generations.iter().all(|g| *g == generations[0]));
        assert_eq!(venue.connect_count(), 1);
    }
}
