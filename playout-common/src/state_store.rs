//! Durable named key/value state with rate-limited persistence
//!
//! One store per owning execution unit. Every committed change is written to
//! `<dir>/<name>.json` synchronously and then announced to the registered
//! callbacks in order. Keys marked rate-limited (playback position and the
//! like) still change in memory on every update but are only written and
//! announced once per period.
//!
//! Other processes may read a snapshot with [`read_snapshot`]; they never
//! write it.

use crate::time;
use crate::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Key holding the write time in persisted snapshots
pub const LAST_UPDATED_KEY: &str = "last_updated";

/// Key/value mapping held by a store
pub type StateMap = Map<String, Value>;

/// Change notification, invoked with the full mapping after each commit
pub type StateCallback = Box<dyn Fn(&StateMap) -> anyhow::Result<()> + Send>;

/// What an [`StateStore::update`] call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Index out of bounds or key not a list; nothing changed
    Ignored,
    /// Same scalar value as before; nothing changed
    Unchanged,
    /// Changed in memory; write and callbacks skipped by the rate limiter
    Deferred,
    /// Changed, written and announced
    Committed,
    /// Changed and announced, but the snapshot could not be written
    WriteFailed,
}

pub struct StateStore {
    name: String,
    path: PathBuf,
    state: StateMap,
    /// Rate-limited keys and the earliest instant each may be written again
    next_write: HashMap<String, Instant>,
    period: Duration,
    callbacks: Vec<StateCallback>,
}

impl StateStore {
    /// Open the named store under `dir`
    ///
    /// An absent or unreadable snapshot yields an exact copy of `defaults`.
    /// A readable snapshot missing some default keys gets each of them merged
    /// in and written immediately.
    pub fn open(
        dir: impl AsRef<Path>,
        name: &str,
        defaults: StateMap,
        rate_limited_keys: &[&str],
        period: Duration,
    ) -> Self {
        let path = snapshot_path(dir.as_ref(), name);
        let now = Instant::now();

        let mut store = Self {
            name: name.to_string(),
            path,
            state: StateMap::new(),
            next_write: rate_limited_keys
                .iter()
                .map(|k| (k.to_string(), now))
                .collect(),
            period,
            callbacks: Vec::new(),
        };

        match load_snapshot(&store.path) {
            Ok(loaded) => {
                info!("Loaded state '{}' from {}", name, store.path.display());
                store.state = loaded;
                for (key, value) in defaults {
                    if store.state.contains_key(&key) {
                        continue;
                    }
                    debug!("State '{}' missing key '{}', using default", name, key);
                    store.state.insert(key.clone(), value);
                    if let Err(e) = store.write_snapshot() {
                        warn!("State '{}': failed to persist default '{}': {}", name, key, e);
                    }
                }
            }
            Err(e) => {
                info!("State '{}' starting from defaults ({})", name, e);
                store.state = defaults;
            }
        }

        store
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the full mapping
    pub fn get(&self) -> StateMap {
        self.state.clone()
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Register a callback; callbacks live as long as the store
    pub fn add_callback(&mut self, callback: StateCallback) {
        self.callbacks.push(callback);
    }

    /// Set `key` (or element `index` of the list under `key`)
    ///
    /// Scalars equal to the current value are ignored. Lists and objects
    /// always go through.
    pub fn update(&mut self, key: &str, value: Value, index: Option<usize>) -> UpdateOutcome {
        match index {
            Some(i) => match self.state.get_mut(key) {
                Some(Value::Array(list)) if i < list.len() => list[i] = value,
                Some(Value::Array(list)) => {
                    warn!(
                        "State '{}': index {} out of bounds for '{}' (len {})",
                        self.name,
                        i,
                        key,
                        list.len()
                    );
                    return UpdateOutcome::Ignored;
                }
                _ => {
                    warn!("State '{}': '{}' is not a list, cannot set index {}", self.name, key, i);
                    return UpdateOutcome::Ignored;
                }
            },
            None => {
                let aggregate = matches!(value, Value::Array(_) | Value::Object(_));
                if !aggregate && self.state.get(key) == Some(&value) {
                    return UpdateOutcome::Unchanged;
                }
                self.state.insert(key.to_string(), value);
            }
        }

        if let Some(next_allowed) = self.next_write.get_mut(key) {
            let now = Instant::now();
            if now < *next_allowed {
                trace!("State '{}': '{}' rate limited, write deferred", self.name, key);
                return UpdateOutcome::Deferred;
            }
            *next_allowed = now + self.period;
        }

        let outcome = match self.write_snapshot() {
            Ok(()) => UpdateOutcome::Committed,
            Err(e) => {
                error!("State '{}': failed to write snapshot: {}", self.name, e);
                UpdateOutcome::WriteFailed
            }
        };
        self.notify();
        outcome
    }

    /// Serialize `value` and [`update`](Self::update) with it
    pub fn update_serialized<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> UpdateOutcome {
        match serde_json::to_value(value) {
            Ok(v) => self.update(key, v, None),
            Err(e) => {
                warn!("State '{}': cannot serialize '{}': {}", self.name, key, e);
                UpdateOutcome::Ignored
            }
        }
    }

    fn notify(&self) {
        for (i, callback) in self.callbacks.iter().enumerate() {
            if let Err(e) = invoke(callback, &self.state) {
                warn!("State '{}': callback {}: {}", self.name, i, e);
            }
        }
    }

    fn write_snapshot(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut snapshot = self.state.clone();
        snapshot.insert(LAST_UPDATED_KEY.to_string(), Value::String(time::now_rfc3339()));
        let text = serde_json::to_string_pretty(&Value::Object(snapshot))?;

        // Rename keeps readers in other processes from seeing a partial file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("keys", &self.state.len())
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// Run one callback, turning an error or a panic into [`Error::Callback`]
fn invoke(callback: &StateCallback, state: &StateMap) -> Result<()> {
    match catch_unwind(AssertUnwindSafe(|| callback(state))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::Callback(format!("{:#}", e))),
        Err(_) => Err(Error::Callback("panicked".into())),
    }
}

/// Read another owner's last persisted snapshot, read-only
///
/// The `last_updated` stamp is kept in the returned mapping.
pub fn read_snapshot(dir: impl AsRef<Path>, name: &str) -> Result<StateMap> {
    let path = snapshot_path(dir.as_ref(), name);
    let text = fs::read_to_string(&path)
        .map_err(|e| Error::Persistence(format!("{}: {}", path.display(), e)))?;
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::Persistence(format!("{}: not a JSON object", path.display()))),
        Err(e) => Err(Error::Persistence(format!("{}: {}", path.display(), e))),
    }
}

pub fn snapshot_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.json", name))
}

fn load_snapshot(path: &Path) -> Result<StateMap> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::Persistence(format!("{}: {}", path.display(), e)))?;
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(mut map)) => {
            map.remove(LAST_UPDATED_KEY);
            Ok(map)
        }
        Ok(_) => Err(Error::Persistence(format!("{}: not a JSON object", path.display()))),
        Err(e) => Err(Error::Persistence(format!("{}: {}", path.display(), e))),
    }
}
