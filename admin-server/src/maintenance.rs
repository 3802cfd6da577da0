use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::io;
use thiserror::Error;

use crate::models::Collection;
use crate::store::{CollectionStore, StoreError};
use crate::uploads::{AssetKind, UploadManager};

#[derive(Error, Debug)]
pub enum MaintenanceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Failed to list assets: {0}")]
    Io(#[from] io::Error),
}

/// Stored assets that no item refers to. Reported only; removal is left to
/// the operator.
#[derive(Debug, Default, PartialEq, Serialize)]
pub struct OrphanReport {
    pub images: Vec<String>,
    pub files: Vec<String>,
}

pub fn find_orphans(
    store: &dyn CollectionStore,
    uploads: &UploadManager,
) -> Result<OrphanReport, MaintenanceError> {
    let mut references = HashSet::new();
    for collection in Collection::ALL {
        for item in store.list(collection)? {
            for value in item.fields().values() {
                collect_strings(value, &mut references);
            }
        }
    }

    let unreferenced = |kind: AssetKind| -> io::Result<Vec<String>> {
        Ok(uploads
            .list_stored(kind)?
            .into_iter()
            .filter(|name| !is_referenced(name, &references))
            .collect())
    };

    Ok(OrphanReport {
        images: unreferenced(AssetKind::Image)?,
        files: unreferenced(AssetKind::Document)?,
    })
}

fn collect_strings(value: &Value, out: &mut HashSet<String>) {
    match value {
        Value::String(s) => {
            out.insert(s.clone());
        }
        Value::Array(values) => values.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

// Items hold either the bare filename or a URL/path ending in it.
fn is_referenced(filename: &str, references: &HashSet<String>) -> bool {
    if references.contains(filename) {
        return true;
    }
    let suffix = format!("/{filename}");
    references.iter().any(|r| r.ends_with(&suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn reports_only_unreferenced_assets() {
        let tmp = tempfile::tempdir().unwrap();
        let uploads = UploadManager::new(tmp.path());
        let used = uploads.store_image(b"a", "a.png", Some("coordinators")).unwrap();
        let linked = uploads.store_image(b"b", "b.png", None).unwrap();
        let orphan = uploads.store_image(b"c", "c.png", None).unwrap();
        let guide = uploads.store_document(b"d", "guide.pdf", None).unwrap();

        let store = MemoryStore::new();
        let fields = |v: Value| v.as_object().cloned().unwrap();
        store
            .insert(Collection::Coordinators, fields(json!({ "photo": used.filename })))
            .unwrap();
        store
            .insert(
                Collection::EventPhotos,
                fields(json!({
                    "gallery": [{ "src": format!("https://cdn.example.org/build{}", linked.path) }]
                })),
            )
            .unwrap();

        let report = find_orphans(&store, &uploads).unwrap();

        assert_eq!(report.images, vec![orphan.filename]);
        assert_eq!(report.files, vec![guide.filename]);
    }
}
