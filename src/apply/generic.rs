//! Create-or-update for objects without a dedicated strategy.

use super::{covers, merge_object_meta, ApplyError};
use crate::cluster::{ClusterStore, ObjectKey};
use kube::api::DynamicObject;

/// Merge `required` onto `existing`
///
/// Metadata is merged with [`merge_object_meta`]. Every other top-level field
/// except `status` that `existing` does not [`covers`] is replaced whole.
/// Returns the object to write, or `None` when the existing object already
/// satisfies `required`.
#[must_use]
pub fn merge_generic(existing: &DynamicObject, required: &DynamicObject) -> Option<DynamicObject> {
    let mut merged = existing.clone();
    let mut modified = merge_object_meta(&mut merged.metadata, &required.metadata);

    if let Some(fields) = required.data.as_object() {
        for (field, value) in fields.iter().filter(|(k, _)| k.as_str() != "status") {
            let target = &mut merged.data[field.as_str()];
            if !covers(target, value) {
                *target = value.clone();
                modified = true;
            }
        }
    }
    modified.then_some(merged)
}

/// Create `required` if absent, otherwise update it when the merge changes anything
///
/// Returns whether the cluster was written.
pub async fn apply_generic(
    store: &dyn ClusterStore,
    required: &DynamicObject,
) -> Result<bool, ApplyError> {
    let key = ObjectKey::of(required).map_err(|source| ApplyError::Decode {
        key: required.metadata.name.clone().unwrap_or_default(),
        source,
    })?;

    let existing = match store.get(&key).await {
        Ok(existing) => existing,
        Err(e) if e.is_not_found() => {
            store
                .create(required)
                .await
                .map_err(|e| ApplyError::store(&key, e))?;
            return Ok(true);
        }
        Err(e) => return Err(ApplyError::store(&key, e)),
    };

    match merge_generic(&existing, required) {
        Some(merged) => {
            store
                .update(&merged)
                .await
                .map_err(|e| ApplyError::store(&key, e))?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Create `required` if absent and never touch an existing object
pub async fn ensure_exists(
    store: &dyn ClusterStore,
    required: &DynamicObject,
) -> Result<bool, ApplyError> {
    let key = ObjectKey::of(required).map_err(|source| ApplyError::Decode {
        key: required.metadata.name.clone().unwrap_or_default(),
        source,
    })?;
    match store.get(&key).await {
        Ok(_) => Ok(false),
        Err(e) if e.is_not_found() => {
            store
                .create(required)
                .await
                .map_err(|e| ApplyError::store(&key, e))?;
            Ok(true)
        }
        Err(e) => Err(ApplyError::store(&key, e)),
    }
}
