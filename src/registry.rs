//! All-time player registry and its storage
//!
//! The registry accumulates every participant's points across games, keyed
//! by stable identity. It is folded into once per ended game and written
//! through a [`Persistence`] backend; storage failures are reported to the
//! caller but never undo the in-memory update.

use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::{config::Settings, roster::Id};

/// Cumulative record of one player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Most recent display name
    pub name: String,
    /// Points earned over all games
    pub total_points: u64,
    /// Number of games the player was on the roster of
    pub games_played: u64,
    /// Registration sequence number, used as a stable tie-break
    pub first_seen: u64,
}

impl RegistryEntry {
    /// Mean points per game, 0 before the first game
    pub fn average_points(&self) -> f64 {
        if self.games_played == 0 {
            0.
        } else {
            self.total_points as f64 / self.games_played as f64
        }
    }
}

/// All-time records keyed by identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRegistry {
    entries: HashMap<Id, RegistryEntry>,
    #[serde(default)]
    next_sequence: u64,
}

impl PlayerRegistry {
    /// Credits one finished game to `id`
    ///
    /// Unknown identities are registered on the fly; the display name is
    /// refreshed either way.
    pub fn record_game(&mut self, id: Id, name: &str, points: u64) {
        let next_sequence = &mut self.next_sequence;
        let entry = self.entries.entry(id).or_insert_with(|| {
            let first_seen = *next_sequence;
            *next_sequence += 1;
            RegistryEntry {
                name: name.to_owned(),
                total_points: 0,
                games_played: 0,
                first_seen,
            }
        });

        name.clone_into(&mut entry.name);
        entry.total_points += points;
        entry.games_played += 1;
    }

    /// Looks up a player's record
    pub fn get(&self, id: Id) -> Option<&RegistryEntry> {
        self.entries.get(&id)
    }

    /// Number of registered players
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nobody has been registered yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all records in no particular order
    pub fn entries(&self) -> impl Iterator<Item = (Id, &RegistryEntry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }
}

/// Errors that can occur while loading or saving the registry
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Reading or writing the backing file failed
    #[error("registry i/o failed: {0}")]
    Io(#[from] io::Error),
    /// The stored registry could not be encoded or decoded
    #[error("registry is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Storage backend for the registry
pub trait Persistence: Send + Sync + 'static {
    /// Loads the stored registry, or an empty one if nothing is stored yet
    ///
    /// # Errors
    ///
    /// Returns a `PersistenceError` if the stored data cannot be read.
    fn load(&self) -> Result<PlayerRegistry, PersistenceError>;

    /// Replaces the stored registry
    ///
    /// Called from the blocking thread pool, one save at a time.
    ///
    /// # Errors
    ///
    /// Returns a `PersistenceError` if the registry cannot be written.
    fn save(&self, registry: &PlayerRegistry) -> Result<(), PersistenceError>;
}

/// Stores the registry as a JSON file
///
/// Each save goes to its own uniquely named temporary file next to the
/// target, which is synced and then renamed over it, so a crash or a
/// concurrent writer never leaves a partial registry behind.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Creates a store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates a store backed by the configured registry path
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.registry_path)
    }

    /// The file the registry is stored in
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Persistence for JsonFileStore {
    fn load(&self) -> Result<PlayerRegistry, PersistenceError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(PlayerRegistry::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, registry: &PlayerRegistry) -> Result<(), PersistenceError> {
        let directory = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };

        let mut file = NamedTempFile::new_in(directory)?;
        serde_json::to_writer_pretty(&mut file, registry)?;
        file.flush()?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;

        Ok(())
    }
}

/// Keeps the registry in memory
///
/// Used by tests and deployments that do not need the board to survive a
/// restart. Writes can be made to fail to exercise error handling.
#[derive(Debug, Default)]
pub struct MemoryStore {
    stored: Mutex<Option<PlayerRegistry>>,
    failing: Mutex<bool>,
}

impl MemoryStore {
    /// The last saved registry
    pub fn stored(&self) -> Option<PlayerRegistry> {
        self.stored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Makes subsequent saves fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = failing;
    }
}

impl Persistence for MemoryStore {
    fn load(&self) -> Result<PlayerRegistry, PersistenceError> {
        Ok(self.stored().unwrap_or_default())
    }

    fn save(&self, registry: &PlayerRegistry) -> Result<(), PersistenceError> {
        if *self.failing.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(io::Error::other("memory store is failing").into());
        }

        *self.stored.lock().unwrap_or_else(PoisonError::into_inner) = Some(registry.clone());
        Ok(())
    }
}
