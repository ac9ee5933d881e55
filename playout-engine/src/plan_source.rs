//! Content-metadata boundary used by GET_PLAN
//!
//! The upstream show-planning API is external. A [`PlanSource`] turns a show
//! id into validated plan items; [`JsonPlanSource`] reads plans exported to
//! `<root>/plans/<show id>.json`.

use playout_common::plan::PlanItem;
use playout_common::{Error, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

pub trait PlanSource: Send + Sync {
    /// Items of a show, in plan order
    ///
    /// Any invalid item rejects the whole plan.
    fn fetch(&self, show_id: &str) -> Result<Vec<PlanItem>>;
}

/// Plans stored as JSON arrays of item records
#[derive(Debug, Clone)]
pub struct JsonPlanSource {
    dir: PathBuf,
}

impl JsonPlanSource {
    pub fn new(root_folder: &Path) -> Self {
        Self {
            dir: root_folder.join("plans"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl PlanSource for JsonPlanSource {
    fn fetch(&self, show_id: &str) -> Result<Vec<PlanItem>> {
        let valid = !show_id.is_empty()
            && show_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::validation("show plan id", format!("'{}' is not a plain id", show_id)));
        }

        let path = self.dir.join(format!("{}.json", show_id));
        let text = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(format!("show plan {}", show_id)),
            _ => Error::Io(e),
        })?;

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| Error::validation("show plan", format!("{}: {}", path.display(), e)))?;
        let records = value
            .as_array()
            .ok_or_else(|| Error::validation("show plan", "expected a JSON array of items"))?;

        let items = records
            .iter()
            .map(PlanItem::from_value)
            .collect::<Result<Vec<_>>>()?;
        debug!("Fetched {} items for show plan {} from {}", items.len(), show_id, path.display());
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source_with(plan: &str) -> (TempDir, JsonPlanSource) {
        let dir = TempDir::new().unwrap();
        let source = JsonPlanSource::new(dir.path());
        std::fs::create_dir_all(source.dir()).unwrap();
        std::fs::write(source.dir().join("1234.json"), plan).unwrap();
        (dir, source)
    }

    #[test]
    fn test_fetch_plan() {
        let (_dir, source) = source_with(
            r#"[
                {"id": "10", "weight": 0, "title": "Opener", "trackid": 10, "length": "00:03:10"},
                {"weight": 1, "title": "Sting", "managedid": 4}
            ]"#,
        );

        let items = source.fetch("1234").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].length, 190.0);
        assert!(items[1].needs_id());
    }

    #[test]
    fn test_missing_plan_is_not_found() {
        let (_dir, source) = source_with("[]");
        assert!(matches!(source.fetch("999"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_invalid_item_rejects_plan() {
        let (_dir, source) = source_with(r#"[{"id": "1", "title": "No content"}]"#);
        assert!(matches!(source.fetch("1234"), Err(Error::Validation { .. })));
    }

    #[test]
    fn test_path_like_ids_rejected() {
        let (_dir, source) = source_with("[]");
        assert!(matches!(source.fetch("../secret"), Err(Error::Validation { .. })));
        assert!(matches!(source.fetch(""), Err(Error::Validation { .. })));
    }
}
