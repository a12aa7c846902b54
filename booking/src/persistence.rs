//! Persisted Selection Store.
//!
//! The only code that touches durable storage. Selections (pickup addresses,
//! pickup datetimes, the latest reservation and the search-type preference)
//! are written through on every change so a restarted session resumes where
//! the previous one stopped.
//!
//! Several sessions may share one backend. Each [`SelectionStore`] stamps its
//! writes with its own [`ContextId`]; a session listens for changes stamped by
//! anyone else and folds them into its state. Writes are last-write-wins.

use crate::types::{AddressId, Leg, ReservationPayload, TripKind};
use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Identifies one booking context (one session)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Fresh random id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A write or removal observed on a backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageChange {
    /// Raw key
    pub key: String,
    /// New raw value; `None` when removed
    pub value: Option<String>,
    /// Context that made the change
    pub origin: ContextId,
}

/// Durable storage failure
#[derive(Error, Debug)]
pub enum StorageError {
    /// Reading or writing the backing file failed
    #[error("Storage I/O failed for {path}: {source}")]
    Io {
        /// Backing file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The backing document is not valid JSON
    #[error("Storage document {path} is corrupt: {source}")]
    Corrupt {
        /// Backing file
        path: PathBuf,
        /// Parse error
        source: serde_json::Error,
    },

    /// A value could not be encoded
    #[error("Failed to encode {key}: {source}")]
    Encode {
        /// Key being written
        key: &'static str,
        /// Encode error
        source: serde_json::Error,
    },
}

/// Durable key/value storage with change notifications
pub trait StorageBackend: Send + Sync {
    /// Raw value for `key`
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key` and notify subscribers
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend cannot be written.
    fn set(&self, key: &str, value: String, origin: ContextId) -> Result<(), StorageError>;

    /// Delete `key` and notify subscribers
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend cannot be written.
    fn remove(&self, key: &str, origin: ContextId) -> Result<(), StorageError>;

    /// Receive every change made through this backend
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

const CHANGE_CAPACITY: usize = 64;

fn notify(changes: &broadcast::Sender<StorageChange>, change: StorageChange) {
    // No subscribers is fine.
    let _ = changes.send(change);
}

/// Process-local backend; clones of the `Arc` share entries and notifications
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, String>>,
    changes: broadcast::Sender<StorageChange>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Empty backend
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            changes: broadcast::channel(CHANGE_CAPACITY).0,
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: String, origin: ContextId) -> Result<(), StorageError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.clone());
        notify(
            &self.changes,
            StorageChange {
                key: key.to_string(),
                value: Some(value),
                origin,
            },
        );
        Ok(())
    }

    fn remove(&self, key: &str, origin: ContextId) -> Result<(), StorageError> {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if removed.is_some() {
            notify(
                &self.changes,
                StorageChange {
                    key: key.to_string(),
                    value: None,
                    origin,
                },
            );
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

/// How long a writer waits for another process to release the document
const LOCK_TIMEOUT: Duration = Duration::from_secs(2);
const LOCK_RETRY: Duration = Duration::from_millis(5);
/// A lock file older than this was left behind by a crashed writer
const LOCK_STALE_AFTER: Duration = Duration::from_secs(10);

/// Exclusive lock on the document, held by one writer across processes.
///
/// The lock is a sibling file created with `create_new`; dropping the guard
/// removes it.
struct DocumentLock {
    path: PathBuf,
}

impl DocumentLock {
    fn acquire(path: PathBuf) -> std::io::Result<Self> {
        let deadline = Instant::now() + LOCK_TIMEOUT;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Self::is_stale(&path) {
                        tracing::warn!(path = %path.display(), "Removing stale storage lock");
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(std::io::Error::new(
                            ErrorKind::TimedOut,
                            format!("{} is held by another writer", path.display()),
                        ));
                    }
                    std::thread::sleep(LOCK_RETRY);
                },
                Err(e) => return Err(e),
            }
        }
    }

    fn is_stale(path: &Path) -> bool {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age > LOCK_STALE_AFTER)
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// State shared between a [`FileBackend`] and its watcher task
struct FileDocument {
    path: PathBuf,
    /// Document as this handle last saw it; guards every load-compare-save
    known: Mutex<BTreeMap<String, String>>,
    changes: broadcast::Sender<StorageChange>,
    /// Origin stamped on changes read back from disk
    external: ContextId,
}

impl FileDocument {
    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    fn sibling_path(&self, suffix: &str) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "selection".into(), |n| n.to_string_lossy());
        self.dir().join(format!(".{file_name}.{suffix}"))
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|source| StorageError::Corrupt {
                path: self.path.clone(),
                source,
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let content = serde_json::to_vec_pretty(entries).map_err(|source| StorageError::Encode {
            key: "document",
            source,
        })?;
        let tmp_path = self.sibling_path(&format!("{}.tmp", Uuid::new_v4().simple()));

        let written = (|| {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&content)?;
            file.sync_all()?;
            drop(file);
            std::fs::rename(&tmp_path, &self.path)
        })();

        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(self.io_error(e));
        }
        Ok(())
    }

    /// Announce keys that differ between `known` and `disk` as changes made
    /// elsewhere, then adopt `disk`.
    fn absorb(&self, known: &mut BTreeMap<String, String>, disk: BTreeMap<String, String>) {
        {
            let keys: BTreeSet<&String> = known.keys().chain(disk.keys()).collect();
            for key in keys {
                let value = disk.get(key);
                if known.get(key) != value {
                    notify(
                        &self.changes,
                        StorageChange {
                            key: key.clone(),
                            value: value.cloned(),
                            origin: self.external,
                        },
                    );
                }
            }
        }
        *known = disk;
    }

    /// Pick up writes made through other handles or processes
    fn poll(&self) -> Result<(), StorageError> {
        let mut known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
        let disk = self.load()?;
        if *known != disk {
            self.absorb(&mut known, disk);
        }
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        value: Option<String>,
        origin: ContextId,
    ) -> Result<(), StorageError> {
        let mut known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
        std::fs::create_dir_all(self.dir()).map_err(|e| self.io_error(e))?;
        let _lock = DocumentLock::acquire(self.sibling_path("lock")).map_err(|e| self.io_error(e))?;

        let mut entries = self.load()?;
        if *known != entries {
            self.absorb(&mut known, entries.clone());
        }
        let changed = match &value {
            Some(v) => entries.insert(key.to_string(), v.clone()).as_ref() != Some(v),
            None => entries.remove(key).is_some(),
        };
        if !changed {
            return Ok(());
        }
        self.save(&entries)?;
        *known = entries;
        notify(
            &self.changes,
            StorageChange {
                key: key.to_string(),
                value,
                origin,
            },
        );
        Ok(())
    }
}

/// One JSON document on disk, replaced atomically on every write.
///
/// Writers serialise on a lock file next to the document and re-read it
/// before changing their key, so concurrent writers to different keys never
/// lose each other's values. Reads go to disk each time. Once subscribed, a
/// watcher task polls the document and reports writes made through other
/// handles or processes.
pub struct FileBackend {
    document: Arc<FileDocument>,
    poll_interval: Duration,
    watching: AtomicBool,
}

impl FileBackend {
    /// Default interval between checks for writes made elsewhere
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

    /// Backend over `path`; the file and its directory are created on first write
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let document = FileDocument {
            path: path.into(),
            known: Mutex::new(BTreeMap::new()),
            changes: broadcast::channel(CHANGE_CAPACITY).0,
            external: ContextId::new(),
        };
        // Changes made before this handle existed are not news.
        let initial = document.load().unwrap_or_default();
        *document.known.lock().unwrap_or_else(PoisonError::into_inner) = initial;
        Self {
            document: Arc::new(document),
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            watching: AtomicBool::new(false),
        }
    }

    /// Check for writes made elsewhere every `interval`
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.document.path
    }

    /// Start the watcher on the current tokio runtime, once
    fn watch(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(
                path = %self.path().display(),
                "No runtime; writes from other handles go unnoticed"
            );
            return;
        };
        if self.watching.swap(true, Ordering::AcqRel) {
            return;
        }

        let document = Arc::downgrade(&self.document);
        let interval = self.poll_interval;
        runtime.spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let Some(document) = document.upgrade() else {
                    break;
                };
                if let Err(error) = document.poll() {
                    tracing::debug!(%error, "Storage poll failed");
                }
            }
        });
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.document.load()?.remove(key))
    }

    fn set(&self, key: &str, value: String, origin: ContextId) -> Result<(), StorageError> {
        self.document.update(key, Some(value), origin)
    }

    fn remove(&self, key: &str, origin: ContextId) -> Result<(), StorageError> {
        self.document.update(key, None, origin)
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.watch();
        self.document.changes.subscribe()
    }
}

/// Fixed storage keys
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SelectionKey {
    /// Pickup address for the outbound leg
    BoardingAddressId,
    /// Pickup address for the return leg
    ReturnAddressId,
    /// Pickup datetime for the outbound leg
    BoardingDatetime,
    /// Pickup datetime for the return leg
    ReturnDatetime,
    /// Last reservation created
    LatestReservation,
    /// One-way or round preference
    SearchType,
}

impl SelectionKey {
    /// Every key
    pub const ALL: [Self; 6] = [
        Self::BoardingAddressId,
        Self::ReturnAddressId,
        Self::BoardingDatetime,
        Self::ReturnDatetime,
        Self::LatestReservation,
        Self::SearchType,
    ];

    /// Storage key string
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BoardingAddressId => "tripdesk.boarding_address_id",
            Self::ReturnAddressId => "tripdesk.return_address_id",
            Self::BoardingDatetime => "tripdesk.boarding_datetime",
            Self::ReturnDatetime => "tripdesk.return_datetime",
            Self::LatestReservation => "tripdesk.latest_reservation",
            Self::SearchType => "tripdesk.search_type",
        }
    }

    /// Key for a raw storage key string
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == raw)
    }

    /// Address key for `leg`
    #[must_use]
    pub const fn address(leg: Leg) -> Self {
        match leg {
            Leg::Outbound => Self::BoardingAddressId,
            Leg::Return => Self::ReturnAddressId,
        }
    }

    /// Datetime key for `leg`
    #[must_use]
    pub const fn datetime(leg: Leg) -> Self {
        match leg {
            Leg::Outbound => Self::BoardingDatetime,
            Leg::Return => Self::ReturnDatetime,
        }
    }
}

/// Everything the store holds, decoded
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PersistedSelection {
    /// Outbound pickup address
    pub boarding_address_id: Option<AddressId>,
    /// Return pickup address
    pub return_address_id: Option<AddressId>,
    /// Outbound pickup time
    pub boarding_datetime: Option<NaiveDateTime>,
    /// Return pickup time
    pub return_datetime: Option<NaiveDateTime>,
    /// Last reservation created
    pub latest_reservation: Option<ReservationPayload>,
    /// One-way or round preference
    pub search_type: Option<TripKind>,
}

impl PersistedSelection {
    /// Pickup address for `leg`
    #[must_use]
    pub const fn address(&self, leg: Leg) -> Option<AddressId> {
        match leg {
            Leg::Outbound => self.boarding_address_id,
            Leg::Return => self.return_address_id,
        }
    }

    /// Pickup datetime for `leg`
    #[must_use]
    pub const fn datetime(&self, leg: Leg) -> Option<NaiveDateTime> {
        match leg {
            Leg::Outbound => self.boarding_datetime,
            Leg::Return => self.return_datetime,
        }
    }

    /// Apply a decoded change
    pub fn apply(&mut self, change: SelectionChange) {
        match change {
            SelectionChange::Address {
                leg: Leg::Outbound,
                id,
            } => self.boarding_address_id = id,
            SelectionChange::Address {
                leg: Leg::Return,
                id,
            } => self.return_address_id = id,
            SelectionChange::DateTime {
                leg: Leg::Outbound,
                at,
            } => self.boarding_datetime = at,
            SelectionChange::DateTime {
                leg: Leg::Return,
                at,
            } => self.return_datetime = at,
            SelectionChange::LatestReservation(payload) => self.latest_reservation = payload,
            SelectionChange::SearchType(kind) => self.search_type = kind,
        }
    }
}

/// A typed change to one persisted key
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectionChange {
    /// Pickup address set or cleared
    Address {
        /// Leg
        leg: Leg,
        /// New address
        id: Option<AddressId>,
    },
    /// Pickup datetime set or cleared
    DateTime {
        /// Leg
        leg: Leg,
        /// New datetime
        at: Option<NaiveDateTime>,
    },
    /// Latest reservation replaced or cleared
    LatestReservation(Option<ReservationPayload>),
    /// Search-type preference changed
    SearchType(Option<TripKind>),
}

impl SelectionChange {
    /// Key the change belongs to
    #[must_use]
    pub const fn key(&self) -> SelectionKey {
        match self {
            Self::Address { leg, .. } => SelectionKey::address(*leg),
            Self::DateTime { leg, .. } => SelectionKey::datetime(*leg),
            Self::LatestReservation(_) => SelectionKey::LatestReservation,
            Self::SearchType(_) => SelectionKey::SearchType,
        }
    }
}

fn decode<T: DeserializeOwned>(key: SelectionKey, raw: Option<&str>) -> Option<T> {
    let raw = raw?;
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(key = key.as_str(), %error, "Ignoring undecodable persisted value");
            None
        },
    }
}

/// Typed write-through access to the fixed selection keys.
///
/// Writes never fail the caller: errors are logged at `warn` and the
/// in-memory state stays authoritative for the current session.
#[derive(Clone)]
pub struct SelectionStore {
    backend: Arc<dyn StorageBackend>,
    context: ContextId,
}

impl SelectionStore {
    /// Store over `backend` with a fresh context id
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            context: ContextId::new(),
        }
    }

    /// Store over a fresh [`MemoryBackend`]
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Another context over the same backend, as a second tab would be
    #[must_use]
    pub fn sibling(&self) -> Self {
        Self::new(Arc::clone(&self.backend))
    }

    /// This store's context id
    #[must_use]
    pub const fn context_id(&self) -> ContextId {
        self.context
    }

    /// Write `value` under `key`, or remove the key for `None`
    pub fn persist<T: Serialize>(&self, key: SelectionKey, value: Option<&T>) {
        let result = match value {
            Some(value) => serde_json::to_string(value)
                .map_err(|source| StorageError::Encode {
                    key: key.as_str(),
                    source,
                })
                .and_then(|raw| self.backend.set(key.as_str(), raw, self.context)),
            None => self.backend.remove(key.as_str(), self.context),
        };
        if let Err(error) = result {
            tracing::warn!(key = key.as_str(), %error, "Failed to persist selection");
        }
    }

    /// Read and decode `key`; unreadable or undecodable values are absent
    #[must_use]
    pub fn read<T: DeserializeOwned>(&self, key: SelectionKey) -> Option<T> {
        match self.backend.get(key.as_str()) {
            Ok(raw) => decode(key, raw.as_deref()),
            Err(error) => {
                tracing::warn!(key = key.as_str(), %error, "Failed to read persisted selection");
                None
            },
        }
    }

    /// Write a typed change
    pub fn write(&self, change: &SelectionChange) {
        let key = change.key();
        match change {
            SelectionChange::Address { id, .. } => self.persist(key, id.as_ref()),
            SelectionChange::DateTime { at, .. } => self.persist(key, at.as_ref()),
            SelectionChange::LatestReservation(payload) => self.persist(key, payload.as_ref()),
            SelectionChange::SearchType(kind) => self.persist(key, kind.as_ref()),
        }
    }

    /// Every persisted selection
    #[must_use]
    pub fn load(&self) -> PersistedSelection {
        PersistedSelection {
            boarding_address_id: self.read(SelectionKey::BoardingAddressId),
            return_address_id: self.read(SelectionKey::ReturnAddressId),
            boarding_datetime: self.read(SelectionKey::BoardingDatetime),
            return_datetime: self.read(SelectionKey::ReturnDatetime),
            latest_reservation: self.read(SelectionKey::LatestReservation),
            search_type: self.read(SelectionKey::SearchType),
        }
    }

    /// Raw change feed of the backend, own writes included
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.backend.subscribe()
    }

    /// Decode a change made by another context; `None` for own writes and
    /// unknown keys
    #[must_use]
    pub fn foreign_change(&self, change: &StorageChange) -> Option<SelectionChange> {
        if change.origin == self.context {
            return None;
        }
        let key = SelectionKey::parse(&change.key)?;
        let raw = change.value.as_deref();
        Some(match key {
            SelectionKey::BoardingAddressId | SelectionKey::ReturnAddressId => {
                SelectionChange::Address {
                    leg: if key == SelectionKey::BoardingAddressId {
                        Leg::Outbound
                    } else {
                        Leg::Return
                    },
                    id: decode(key, raw),
                }
            },
            SelectionKey::BoardingDatetime | SelectionKey::ReturnDatetime => {
                SelectionChange::DateTime {
                    leg: if key == SelectionKey::BoardingDatetime {
                        Leg::Outbound
                    } else {
                        Leg::Return
                    },
                    at: decode(key, raw),
                }
            },
            SelectionKey::LatestReservation => SelectionChange::LatestReservation(decode(key, raw)),
            SelectionKey::SearchType => SelectionChange::SearchType(decode(key, raw)),
        })
    }
}

impl fmt::Debug for SelectionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionStore")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
