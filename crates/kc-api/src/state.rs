//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers via
//! the `State` extractor.
//!
//! ## Concurrency
//!
//! Every aggregate lives in a [`Store`]. Status transitions and kit
//! consumption run as a single read-validate-write under the store's write
//! lock ([`Store::try_update`]), so two requests can never both observe the
//! same prior state. Database write-through happens after the map lock is
//! released and is guarded by an optimistic `WHERE` on the prior value.
//!
//! Commit and write-through together run under a per-key commit lock
//! ([`Store::lock_commits`]), so a rollback after a failed persist always
//! restores the value the database still holds. Kit orders, consultations
//! and doctors are keyed by their own id; the subscription ledger is keyed
//! by the owning user, because "pick the active subscription and consume
//! from it" spans several records.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use utoipa::ToSchema;
use uuid::Uuid;

use kc_core::{Money, ValidationError, KIT_BASE_PRICE_KEY, KIT_SHIPPING_FEE_KEY};
use kc_state::{ConsultationRequest, KitOrder, Subscription};

use crate::middleware::metrics::ApiMetrics;
use crate::settings::{default_settings, SettingsCache};

// -- Generic In-Memory Store --------------------------------------------------

/// Thread-safe, cloneable in-memory key-value store.
///
/// The map lock is `parking_lot` and is never held across `.await`. The
/// per-key commit locks are async and are held across the database write.
#[derive(Debug)]
pub struct Store<T: Clone + Send + Sync> {
    data: Arc<RwLock<HashMap<Uuid, T>>>,
    commit_locks: CommitLocks,
}

type CommitLocks = Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>;

/// Exclusive right to commit and persist changes under one key.
///
/// Dropping the guard releases the key and forgets its lock once nobody
/// else is waiting on it.
#[derive(Debug)]
pub struct CommitGuard {
    key: Uuid,
    locks: CommitLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CommitGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        // One reference in the map, one held by our own guard.
        if locks.get(&self.key).is_some_and(|l| Arc::strong_count(l) <= 2) {
            locks.remove(&self.key);
        }
        self.guard.take();
    }
}

impl<T: Clone + Send + Sync> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            commit_locks: Arc::clone(&self.commit_locks),
        }
    }
}

impl<T: Clone + Send + Sync> Store<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            commit_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for exclusive commit rights on `key`. Hold the guard from the
    /// in-memory commit until the write-through (or its rollback) is done.
    pub async fn lock_commits(&self, key: Uuid) -> CommitGuard {
        let lock = Arc::clone(self.commit_locks.lock().entry(key).or_default());
        let guard = lock.lock_owned().await;
        CommitGuard {
            key,
            locks: Arc::clone(&self.commit_locks),
            guard: Some(guard),
        }
    }

    /// Number of keys with a live commit lock.
    pub fn commit_locks_len(&self) -> usize {
        self.commit_locks.lock().len()
    }

    /// Insert a record, returning the previous value if the key existed.
    pub fn insert(&self, id: Uuid, value: T) -> Option<T> {
        self.data.write().insert(id, value)
    }

    /// Retrieve a record by ID.
    pub fn get(&self, id: &Uuid) -> Option<T> {
        self.data.read().get(id).cloned()
    }

    /// List all records.
    pub fn list(&self) -> Vec<T> {
        self.data.read().values().cloned().collect()
    }

    /// Records matching `pred`.
    pub fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.data.read().values().filter(|v| pred(v)).cloned().collect()
    }

    /// Atomically read-validate-update a record.
    ///
    /// The closure may inspect the record, check preconditions, mutate it and
    /// return `Ok(R)`, or return `Err(E)`. The whole operation runs under one
    /// write lock. `None` if the record does not exist.
    pub fn try_update<R, E>(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        self.data.write().get_mut(id).map(f)
    }

    /// Run `f` against the whole map under the write lock. Used where a
    /// decision spans several records (creation guards, "pick the active
    /// one and consume from it").
    pub fn with_write<R>(&self, f: impl FnOnce(&mut HashMap<Uuid, T>) -> R) -> R {
        f(&mut self.data.write())
    }

    /// Remove a record by ID.
    pub fn remove(&self, id: &Uuid) -> Option<T> {
        self.data.write().remove(id)
    }

    /// Return the number of records.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync + PartialEq> Store<T> {
    /// Undo an in-memory commit: put `previous` back, but only if the record
    /// still equals `committed`. Returns whether the rollback applied.
    pub fn restore_if_unchanged(&self, id: &Uuid, committed: &T, previous: T) -> bool {
        let mut guard = self.data.write();
        match guard.get_mut(id) {
            Some(current) if current == committed => {
                *current = previous;
                true
            }
            _ => false,
        }
    }
}

impl<T: Clone + Send + Sync> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

// -- API-Owned Records --------------------------------------------------------

/// A partner doctor consultations can be assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct PartnerDoctor {
    pub id: Uuid,
    pub name: String,
    pub specialty: Option<String>,
    /// Inactive doctors stay referenced by past consultations but cannot
    /// be newly assigned.
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

// -- Configuration ------------------------------------------------------------

/// Application configuration.
///
/// Custom `Debug` redacts the `auth_token`.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Static bearer secret. `None` disables authentication.
    pub auth_token: Option<String>,
    /// Whether the request-counting middleware is installed.
    pub metrics_enabled: bool,
    /// Setting values seeded at startup for keys the store does not hold.
    pub pricing_seed: HashMap<String, Money>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("metrics_enabled", &self.metrics_enabled)
            .field("pricing_seed", &self.pricing_seed)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: None,
            metrics_enabled: true,
            pricing_seed: default_settings(),
        }
    }
}

impl AppConfig {
    /// Build configuration from the environment.
    ///
    /// `PORT`, `AUTH_TOKEN`, `KC_METRICS_ENABLED`, `KIT_BASE_PRICE` and
    /// `KIT_SHIPPING_FEE`. Malformed prices are an error; a malformed port
    /// falls back to 8080.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ValidationError> {
        let mut config = Self::default();
        if let Some(port) = lookup("PORT").and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        config.auth_token = lookup("AUTH_TOKEN").filter(|t| !t.is_empty());
        if let Some(flag) = lookup("KC_METRICS_ENABLED") {
            config.metrics_enabled = !matches!(flag.as_str(), "0" | "false" | "off" | "no");
        }
        for (var, key) in [
            ("KIT_BASE_PRICE", KIT_BASE_PRICE_KEY),
            ("KIT_SHIPPING_FEE", KIT_SHIPPING_FEE_KEY),
        ] {
            if let Some(raw) = lookup(var) {
                config.pricing_seed.insert(key.to_string(), Money::parse(&raw)?);
            }
        }
        Ok(config)
    }
}

// -- Application State --------------------------------------------------------

/// Shared state for all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub kit_orders: Store<KitOrder>,
    pub consultations: Store<ConsultationRequest>,
    pub subscriptions: Store<Subscription>,
    pub doctors: Store<PartnerDoctor>,

    /// Pricing and tier price settings.
    pub settings: SettingsCache,

    /// Request and workflow counters.
    pub metrics: ApiMetrics,

    /// PostgreSQL pool for write-through persistence. `None` runs the API
    /// in-memory only.
    pub db_pool: Option<PgPool>,

    pub config: AppConfig,
}

impl AppState {
    /// In-memory state with default configuration.
    pub fn new() -> Self {
        Self::with_config(AppConfig::default(), None)
    }

    /// State with the given configuration and optional database pool.
    pub fn with_config(config: AppConfig, db_pool: Option<PgPool>) -> Self {
        Self {
            kit_orders: Store::new(),
            consultations: Store::new(),
            subscriptions: Store::new(),
            doctors: Store::new(),
            settings: SettingsCache::new(config.pricing_seed.clone()),
            metrics: ApiMetrics::new(),
            db_pool,
            config,
        }
    }

    /// Hydrate in-memory stores from the database.
    ///
    /// Called once on startup when a pool is available. Seeds missing
    /// settings first so the loaded settings include them.
    pub async fn hydrate_from_db(&self) -> Result<(), String> {
        let pool = match &self.db_pool {
            Some(pool) => pool,
            None => return Ok(()),
        };

        crate::db::settings::seed_missing(pool, &self.config.pricing_seed)
            .await
            .map_err(|e| format!("failed to seed settings: {e}"))?;
        let settings = crate::db::settings::load_all(pool)
            .await
            .map_err(|e| format!("failed to load settings: {e}"))?;
        let setting_count = settings.len();
        self.settings.load(settings);

        let orders = crate::db::kit_orders::load_all(pool)
            .await
            .map_err(|e| format!("failed to load kit orders: {e}"))?;
        let order_count = orders.len();
        for order in orders {
            self.kit_orders.insert(*order.id.as_uuid(), order);
        }

        let consultations = crate::db::consultations::load_all(pool)
            .await
            .map_err(|e| format!("failed to load consultations: {e}"))?;
        let consultation_count = consultations.len();
        for consultation in consultations {
            self.consultations.insert(*consultation.id.as_uuid(), consultation);
        }

        let subscriptions = crate::db::subscriptions::load_all(pool)
            .await
            .map_err(|e| format!("failed to load subscriptions: {e}"))?;
        let subscription_count = subscriptions.len();
        for subscription in subscriptions {
            self.subscriptions.insert(*subscription.id.as_uuid(), subscription);
        }

        let doctors = crate::db::doctors::load_all(pool)
            .await
            .map_err(|e| format!("failed to load partner doctors: {e}"))?;
        let doctor_count = doctors.len();
        for doctor in doctors {
            self.doctors.insert(doctor.id, doctor);
        }

        tracing::info!(
            settings = setting_count,
            kit_orders = order_count,
            consultations = consultation_count,
            subscriptions = subscription_count,
            doctors = doctor_count,
            "Hydrated in-memory stores from database"
        );

        Ok(())
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
