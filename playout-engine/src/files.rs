//! File-lifecycle collaborator boundary
//!
//! The cache and normalisation pipeline that fetches audio is external.
//! This module holds the on-disk layout the player and the pipeline agree
//! on. It also holds the consumer of the router's file-lifecycle queue,
//! which watches plan and status broadcasts and reports items whose audio
//! is not on disk yet.

use playout_common::plan::{ContentRef, PlanItem};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::router::Routed;

/// Cache directory under the root folder
pub const CACHE_DIR: &str = "cache";

/// Where the audio for a content reference lives
///
/// Library tracks and managed items are cached as
/// `<root>/cache/track-<id>.mp3` and `<root>/cache/managed-<id>.mp3`. File
/// references are relative to the root folder unless absolute.
pub fn content_path(root_folder: &Path, content: &ContentRef) -> PathBuf {
    match content {
        ContentRef::Track(id) => root_folder.join(CACHE_DIR).join(format!("track-{}.mp3", id)),
        ContentRef::Managed(id) => root_folder.join(CACHE_DIR).join(format!("managed-{}.mp3", id)),
        ContentRef::File(name) => root_folder.join(name),
    }
}

/// Unreadable metadata counts as missing
async fn is_cached(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Consumer of GET_PLAN and STATUS messages for the cache pipeline
pub struct FileLifecycle {
    root_folder: PathBuf,
    /// Paths already reported missing, so each is logged once
    reported: HashSet<PathBuf>,
}

impl FileLifecycle {
    pub fn new(root_folder: impl Into<PathBuf>) -> Self {
        Self {
            root_folder: root_folder.into(),
            reported: HashSet::new(),
        }
    }

    /// Audio paths referenced by a status payload
    ///
    /// Looks at the `show_plan` list and the `loaded_item`. Entries that do
    /// not decode as plan items are skipped.
    pub fn referenced_files(&self, state: &Value) -> Vec<PathBuf> {
        let plan = state
            .get("show_plan")
            .and_then(Value::as_array)
            .map(|items| items.iter().collect::<Vec<_>>())
            .unwrap_or_default();
        let loaded = state.get("loaded_item").filter(|v| !v.is_null());

        let mut paths = Vec::new();
        for value in plan.into_iter().chain(loaded) {
            let Ok(item) = PlanItem::from_value(value) else {
                continue;
            };
            let path = content_path(&self.root_folder, &item.content);
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        paths
    }

    /// Referenced paths that do not exist on disk
    pub async fn missing_files(&self, state: &Value) -> Vec<PathBuf> {
        let mut missing = Vec::new();
        for path in self.referenced_files(state) {
            if !is_cached(&path).await {
                missing.push(path);
            }
        }
        missing
    }

    /// Inspect one routed message
    ///
    /// A missing path is reported once until it shows up on disk; if it is
    /// evicted afterwards it is reported again.
    pub async fn observe(&mut self, routed: &Routed) {
        let Some(payload) = routed.message.payload.as_deref() else {
            return;
        };
        let Ok(state) = serde_json::from_str::<Value>(payload) else {
            debug!("Channel {}: {} payload is not a state document", routed.channel, routed.message.topic);
            return;
        };

        for path in self.referenced_files(&state) {
            if is_cached(&path).await {
                if self.reported.remove(&path) {
                    debug!("Channel {}: audio now cached: {}", routed.channel, path.display());
                }
            } else if self.reported.insert(path.clone()) {
                warn!("Channel {}: audio not cached yet: {}", routed.channel, path.display());
            }
        }
    }

    /// Whether `path` was reported missing and has not appeared since
    pub fn is_reported(&self, path: &Path) -> bool {
        self.reported.contains(path)
    }

    pub async fn run(mut self, mut messages: mpsc::Receiver<Routed>, mut shutdown: watch::Receiver<bool>) {
        info!("File lifecycle watcher started for {}", self.root_folder.display());
        loop {
            tokio::select! {
                message = messages.recv() => match message {
                    Some(routed) => self.observe(&routed).await,
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("File lifecycle watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playout_common::message::{Outbound, Topic};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_content_paths() {
        let root = Path::new("/srv/playout");
        assert_eq!(
            content_path(root, &ContentRef::Track(12)),
            PathBuf::from("/srv/playout/cache/track-12.mp3")
        );
        assert_eq!(
            content_path(root, &ContentRef::Managed(3)),
            PathBuf::from("/srv/playout/cache/managed-3.mp3")
        );
        assert_eq!(
            content_path(root, &ContentRef::File("jingles/id.mp3".into())),
            PathBuf::from("/srv/playout/jingles/id.mp3")
        );
        assert_eq!(
            content_path(root, &ContentRef::File("/abs/x.mp3".into())),
            PathBuf::from("/abs/x.mp3")
        );
    }

    #[tokio::test]
    async fn test_missing_files_from_state() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(CACHE_DIR)).unwrap();
        std::fs::write(dir.path().join(CACHE_DIR).join("track-1.mp3"), b"").unwrap();

        let state = json!({
            "show_plan": [
                {"id": "a", "weight": 0, "title": "A", "trackid": 1},
                {"id": "b", "weight": 1, "title": "B", "trackid": 2},
                {"weight": 2, "title": "broken"},
            ],
            "loaded_item": {"id": "c", "weight": -1, "title": "C", "managedid": 7},
        });

        let lifecycle = FileLifecycle::new(dir.path());
        assert_eq!(lifecycle.referenced_files(&state).len(), 3);
        let missing = lifecycle.missing_files(&state).await;
        assert_eq!(
            missing,
            vec![
                dir.path().join(CACHE_DIR).join("track-2.mp3"),
                dir.path().join(CACHE_DIR).join("managed-7.mp3"),
            ]
        );
    }

    fn status_for_track(id: i64) -> Routed {
        let payload = json!({"show_plan": [{"id": "a", "weight": 0, "title": "A", "trackid": id}]});
        Routed {
            channel: 0,
            message: Outbound::broadcast(Topic::Status, Some(payload.to_string())),
        }
    }

    #[tokio::test]
    async fn test_observe_reports_each_path_once() {
        let dir = TempDir::new().unwrap();
        let mut lifecycle = FileLifecycle::new(dir.path());
        let routed = status_for_track(9);

        lifecycle.observe(&routed).await;
        lifecycle.observe(&routed).await;
        assert_eq!(lifecycle.reported.len(), 1);
    }

    #[tokio::test]
    async fn test_evicted_file_is_reported_again() {
        let dir = TempDir::new().unwrap();
        let cached = dir.path().join(CACHE_DIR).join("track-9.mp3");
        let mut lifecycle = FileLifecycle::new(dir.path());
        let routed = status_for_track(9);

        lifecycle.observe(&routed).await;
        assert!(lifecycle.is_reported(&cached));

        std::fs::create_dir_all(dir.path().join(CACHE_DIR)).unwrap();
        std::fs::write(&cached, b"").unwrap();
        lifecycle.observe(&routed).await;
        assert!(!lifecycle.is_reported(&cached));

        std::fs::remove_file(&cached).unwrap();
        lifecycle.observe(&routed).await;
        assert!(lifecycle.is_reported(&cached));
    }
}
