use axum::{
    body::Bytes,
    extract::{Multipart, Path, State},
    Json,
};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::error::AppError;
use crate::maintenance::{find_orphans, OrphanReport};
use crate::models::{Collection, Item};
use crate::state::AppState;
use crate::uploads::{AssetKind, StoredAsset};

pub async fn list_items(
    State(state): State<AppState>,
    Path(collection): Path<String>,
) -> Result<Json<Vec<Item>>, AppError> {
    let collection: Collection = collection.parse()?;
    Ok(Json(state.store.list(collection)?))
}

pub async fn insert_item(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    body: Bytes,
) -> Result<Json<Item>, AppError> {
    let collection: Collection = collection.parse()?;
    let fields = json_object(&body)?;

    let item = state.store.insert(collection, fields)?;
    info!(%collection, id = item.id().unwrap_or_default(), "Item created");
    Ok(Json(item))
}

pub async fn update_item(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Item>, AppError> {
    let collection: Collection = collection.parse()?;
    let fields = json_object(&body)?;

    let item = state.store.update(collection, &id, &fields)?;
    info!(%collection, %id, fields = fields.len(), "Item updated");
    Ok(Json(item))
}

pub async fn delete_item(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let collection: Collection = collection.parse()?;

    // Assets the item pointed at stay on disk.
    state.store.delete(collection, &id)?;
    info!(%collection, %id, "Item deleted");
    Ok(Json(json!({ "success": true })))
}

pub async fn upload_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<StoredAsset>, AppError> {
    upload(&state, AssetKind::Image, multipart).await
}

pub async fn upload_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<StoredAsset>, AppError> {
    upload(&state, AssetKind::Document, multipart).await
}

pub async fn trigger_build(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let output = state.publisher.build().await?;
    Ok(Json(json!({
        "success": true,
        "output": output.stdout,
        "message": "Build completed successfully",
    })))
}

pub async fn purge_cdn(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let report = state.publisher.purge_cdn(&state.uploads).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Purged {} files, {} failed", report.success_count, report.failed_count),
        "totalFiles": report.total_files,
        "successCount": report.success_count,
        "failedCount": report.failed_count,
    })))
}

pub async fn orphan_report(State(state): State<AppState>) -> Result<Json<OrphanReport>, AppError> {
    Ok(Json(find_orphans(state.store.as_ref(), &state.uploads)?))
}

/// Reads one multipart upload. The optional `collection` text field names the
/// file; only the field matching `kind` is treated as the payload.
async fn upload(
    state: &AppState,
    kind: AssetKind,
    mut multipart: Multipart,
) -> Result<Json<StoredAsset>, AppError> {
    let mut hint = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "collection" {
            hint = Some(
                field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?,
            );
        } else if name == kind.form_field() {
            // A part without a filename is a plain form value, not a file.
            let Some(original) = field.file_name().map(str::to_string) else {
                continue;
            };
            let payload = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            file = Some((original, payload));
        }
    }

    let (original, payload) = file.ok_or(AppError::MissingFile)?;
    let stored = state
        .uploads
        .store(kind, &payload, &original, hint.as_deref())?;
    Ok(Json(stored))
}

fn json_object(body: &[u8]) -> Result<Map<String, Value>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AppError::BadRequest(
            "Request body must be a JSON object".to_string(),
        )),
        Err(e) => Err(AppError::BadRequest(format!("Invalid JSON: {e}"))),
    }
}
