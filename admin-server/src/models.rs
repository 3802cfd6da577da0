use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::store::StoreError;

/// Key holding the item identifier, stored as `{"$oid": "<hex>"}`.
pub const ID_FIELD: &str = "_id";
pub const OID_KEY: &str = "$oid";
/// Key holding the creation timestamp, stored as `{"$date": "<rfc3339>"}`.
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const DATE_KEY: &str = "$date";
/// Legacy document version counter. Written as 0 and never bumped.
pub const VERSION_FIELD: &str = "__v";

/// The fixed set of collections the admin manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Coordinators,
    Events,
    EventPhotos,
    ImportantLinks,
    Materials,
    SisterNodals,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Coordinators,
        Collection::Events,
        Collection::EventPhotos,
        Collection::ImportantLinks,
        Collection::Materials,
        Collection::SisterNodals,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Collection::Coordinators => "coordinators",
            Collection::Events => "events",
            Collection::EventPhotos => "eventphotos",
            Collection::ImportantLinks => "importantlinks",
            Collection::Materials => "materials",
            Collection::SisterNodals => "sisternodals",
        }
    }

    /// File name of the collection inside the data directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Collection::Coordinators => "nsm-database.coordinators.json",
            Collection::Events => "nsm-database.events.json",
            Collection::EventPhotos => "nsm-database.eventphotos.json",
            Collection::ImportantLinks => "nsm-database.importantlinks.json",
            Collection::Materials => "nsm-database.materials.json",
            Collection::SisterNodals => "nsm-database.sisternodals.json",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| StoreError::UnknownCollection(s.to_string()))
    }
}

/// One entry of a collection file. Field order is kept as read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(Map<String, Value>);

impl Item {
    /// Builds a freshly created item. Server-owned fields always win over
    /// whatever the caller sent under the same keys.
    pub fn new(id: &str, created_at: DateTime<Utc>, fields: Map<String, Value>) -> Self {
        let mut map = Map::with_capacity(fields.len() + 3);
        map.insert(ID_FIELD.to_string(), json!({ OID_KEY: id }));
        for (key, value) in fields {
            if matches!(key.as_str(), ID_FIELD | CREATED_AT_FIELD | VERSION_FIELD) {
                continue;
            }
            map.insert(key, value);
        }
        map.insert(
            CREATED_AT_FIELD.to_string(),
            json!({ DATE_KEY: created_at.to_rfc3339_opts(SecondsFormat::Millis, true) }),
        );
        map.insert(VERSION_FIELD.to_string(), json!(0));
        Item(map)
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD)?.get(OID_KEY)?.as_str()
    }

    pub fn has_id(&self, id: &str) -> bool {
        self.id() == Some(id)
    }

    pub fn created_at(&self) -> Option<&str> {
        self.0.get(CREATED_AT_FIELD)?.get(DATE_KEY)?.as_str()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Item {
    fn from(map: Map<String, Value>) -> Self {
        Item(map)
    }
}

/// Shallow merge of `patch` over `existing`.
///
/// Keys present in `patch` overwrite in place, keys only in `existing` are
/// kept, new keys are appended. `_id` is never taken from `patch`, so the
/// identity of the existing item always survives.
pub fn merge_fields(
    existing: &Map<String, Value>,
    patch: &Map<String, Value>,
) -> Map<String, Value> {
    let mut merged = existing.clone();
    for (key, value) in patch {
        if key == ID_FIELD {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    merged
}
