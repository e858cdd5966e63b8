//! # CRD Apply
//!
//! CustomResourceDefinitions whose conversion webhook CA bundle is injected
//! by the service CA operator must keep the injected value. Without this the
//! injected bundle would be reset to the manifest's empty value on every pass.

use super::{covers, merge_object_meta, ApplyError};
use crate::cluster::{from_dynamic, to_dynamic, ClusterStore, ObjectKey, StoreError, TypeRef};
use crate::constants::INJECT_CABUNDLE_ANNOTATION;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::ByteString;

fn existing_ca_bundle(existing: &CustomResourceDefinition) -> Option<&ByteString> {
    let injected = existing
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(INJECT_CABUNDLE_ANNOTATION))
        .is_some_and(|v| v == "true");
    if !injected {
        return None;
    }
    let conversion = existing.spec.conversion.as_ref()?;
    if conversion.strategy != "Webhook" {
        return None;
    }
    conversion
        .webhook
        .as_ref()?
        .client_config
        .as_ref()?
        .ca_bundle
        .as_ref()
}

/// Copy an injected CA bundle from `existing` onto `required`
///
/// Applies only when `existing` is annotated for injection and converts via webhook.
pub fn preserve_ca_bundle(
    existing: &CustomResourceDefinition,
    required: &mut CustomResourceDefinition,
) {
    let Some(bundle) = existing_ca_bundle(existing) else {
        return;
    };
    if let Some(client_config) = required
        .spec
        .conversion
        .as_mut()
        .and_then(|c| c.webhook.as_mut())
        .and_then(|w| w.client_config.as_mut())
    {
        client_config.ca_bundle = Some(bundle.clone());
    }
}

/// Merge `required` onto `existing`
///
/// The spec is replaced whole unless `existing` already [`covers`] it.
/// Returns the object to write, or `None` when nothing would change.
pub fn merge_crd(
    existing: &CustomResourceDefinition,
    required: &CustomResourceDefinition,
) -> Result<Option<CustomResourceDefinition>, StoreError> {
    let mut required = required.clone();
    preserve_ca_bundle(existing, &mut required);

    let mut to_write = existing.clone();
    let meta_modified = merge_object_meta(&mut to_write.metadata, &required.metadata);
    let spec_modified = !covers(
        &serde_json::to_value(&existing.spec)?,
        &serde_json::to_value(&required.spec)?,
    );

    if !meta_modified && !spec_modified {
        return Ok(None);
    }
    if spec_modified {
        to_write.spec = required.spec;
    }
    Ok(Some(to_write))
}

/// Create or update a CRD, preserving an injected CA bundle
pub async fn apply_crd(
    store: &dyn ClusterStore,
    required: &CustomResourceDefinition,
) -> Result<bool, ApplyError> {
    let key = ObjectKey::new(
        TypeRef::of::<CustomResourceDefinition>(),
        None,
        required.metadata.name.clone().unwrap_or_default(),
    );
    let err = |e| ApplyError::store(&key, e);

    let existing = match store.get(&key).await {
        Ok(obj) => from_dynamic::<CustomResourceDefinition>(&obj).map_err(err)?,
        Err(e) if e.is_not_found() => {
            store
                .create(&to_dynamic(required).map_err(err)?)
                .await
                .map_err(err)?;
            return Ok(true);
        }
        Err(e) => return Err(err(e)),
    };

    match merge_crd(&existing, required).map_err(err)? {
        Some(to_write) => {
            store
                .update(&to_dynamic(&to_write).map_err(err)?)
                .await
                .map_err(err)?;
            Ok(true)
        }
        None => Ok(false),
    }
}
