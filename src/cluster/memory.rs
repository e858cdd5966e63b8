//! # In-Memory Store
//!
//! A [`ClusterStore`] that keeps objects in a map.
//!
//! It mimics the API server closely enough for the reconciler: `generation` is
//! bumped only when something outside `metadata` and `status` changes,
//! `resourceVersion` is bumped on every write, and `status` is preserved on
//! replace the way a status subresource behaves.

use super::{matches_selector, merge_patch, ClusterStore, ObjectKey, StoreError, TypeRef};
use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<ObjectKey, DynamicObject>>,
    writes: AtomicUsize,
    next_version: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object as-is, bypassing write accounting
    pub fn insert(&self, obj: DynamicObject) -> Result<(), StoreError> {
        let key = ObjectKey::of(&obj)?;
        self.lock().insert(key, obj);
        Ok(())
    }

    /// Snapshot of a stored object
    #[must_use]
    pub fn object(&self, key: &ObjectKey) -> Option<DynamicObject> {
        self.lock().get(key).cloned()
    }

    /// Every stored object, ordered by key
    #[must_use]
    pub fn objects(&self) -> Vec<DynamicObject> {
        self.lock().values().cloned().collect()
    }

    /// Number of create/update/patch/delete calls that reached the store
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<ObjectKey, DynamicObject>> {
        // A poisoned map only means a test panicked mid-write; the data is still usable.
        self.objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn bump_version(&self, obj: &mut DynamicObject) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        obj.metadata.resource_version = Some(version.to_string());
    }
}

/// Everything that contributes to `generation`
fn spec_fields(obj: &DynamicObject) -> Value {
    let mut data = obj.data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
    }
    data
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject, StoreError> {
        self.object(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ObjectKey::of(obj)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut objects = self.lock();
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        let mut stored = obj.clone();
        stored.metadata.generation = Some(1);
        stored.metadata.uid = Some(format!("uid-{}", key.name));
        self.bump_version(&mut stored);
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = ObjectKey::of(obj)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut objects = self.lock();
        let existing = objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        let mut stored = obj.clone();
        let generation = existing.metadata.generation.unwrap_or(1);
        stored.metadata.generation = Some(if spec_fields(existing) == spec_fields(obj) {
            generation
        } else {
            generation + 1
        });
        stored.metadata.uid.clone_from(&existing.metadata.uid);
        let status = existing.data.get("status");
        if let (Some(status), Some(map)) = (status, stored.data.as_object_mut()) {
            map.insert("status".to_string(), status.clone());
        }
        self.bump_version(&mut stored);
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn patch(&self, key: &ObjectKey, patch: &Value) -> Result<DynamicObject, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut objects = self.lock();
        let existing = objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        let mut raw = serde_json::to_value(existing)?;
        merge_patch(&mut raw, patch);
        let mut patched: DynamicObject = serde_json::from_value(raw)?;
        let generation = existing.metadata.generation.unwrap_or(1);
        if spec_fields(existing) != spec_fields(&patched) {
            patched.metadata.generation = Some(generation + 1);
        }
        self.bump_version(&mut patched);
        objects.insert(key.clone(), patched.clone());
        Ok(patched)
    }

    async fn patch_status(
        &self,
        key: &ObjectKey,
        patch: &Value,
    ) -> Result<DynamicObject, StoreError> {
        let status_only = match patch.get("status") {
            Some(status) => serde_json::json!({ "status": status }),
            None => serde_json::json!({}),
        };
        self.patch(key, &status_only).await
    }

    async fn list(
        &self,
        type_ref: &TypeRef,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        Ok(self
            .lock()
            .iter()
            .filter(|(key, _)| &key.type_ref == type_ref)
            .filter(|(key, _)| namespace.is_none() || key.namespace.as_deref() == namespace)
            .filter(|(_, obj)| {
                label_selector
                    .map_or(true, |sel| matches_selector(obj.metadata.labels.as_ref(), sel))
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}
