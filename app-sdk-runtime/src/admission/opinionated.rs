//! Opinionated admission wrappers enforcing the SDK's reserved-metadata
//! invariants around a user-supplied controller.
//!
//! The validating wrapper rejects writes that tamper with `createdBy`,
//! `updatedBy` or `updateTimestamp` before the wrapped controller ever runs.
//! The mutating wrapper runs the wrapped controller first, then stamps the
//! identity fields and the stored-version label onto whatever object comes
//! out.
use std::sync::Arc;

use app_sdk_core::{
    admission::{AdmissionAction, AdmissionError, AdmissionRequest, MutatingResponse},
    metadata::VERSION_LABEL,
    object::Object,
};
use chrono::Utc;
use futures::future::BoxFuture;

use super::{apply_patch_to_object, MutatingAdmissionController, ValidatingAdmissionController};

/// Enforces reserved-metadata invariants, then defers to the wrapped
/// controller (when there is one).
pub struct OpinionatedValidatingController {
    inner: Option<Arc<dyn ValidatingAdmissionController>>,
}

impl OpinionatedValidatingController {
    /// A standalone validator enforcing only the reserved-metadata rules
    pub fn new() -> Self {
        Self { inner: None }
    }

    /// Wrap a user controller; it runs only after the reserved-metadata
    /// rules pass
    pub fn wrap(inner: Arc<dyn ValidatingAdmissionController>) -> Self {
        Self { inner: Some(inner) }
    }
}

impl Default for OpinionatedValidatingController {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidatingAdmissionController for OpinionatedValidatingController {
    fn validate<'a>(
        &'a self,
        request: &'a AdmissionRequest,
    ) -> BoxFuture<'a, Result<(), AdmissionError>> {
        Box::pin(async move {
            enforce_reserved_metadata(request)?;
            match &self.inner {
                Some(inner) => inner.validate(request).await,
                None => Ok(()),
            }
        })
    }
}

fn enforce_reserved_metadata(request: &AdmissionRequest) -> Result<(), AdmissionError> {
    let metadata = request.object.common_metadata();
    let username = request.username();
    match request.action {
        AdmissionAction::Create => {
            if !metadata.created_by.is_empty() && metadata.created_by != username {
                return Err(AdmissionError::field_not_allowed(
                    "cannot set createdBy to a user other than the request submitter",
                ));
            }
            if !metadata.updated_by.is_empty() && metadata.updated_by != username {
                return Err(AdmissionError::field_not_allowed(
                    "cannot set updatedBy to a user other than the request submitter",
                ));
            }
            if metadata.update_timestamp.is_some() {
                return Err(AdmissionError::field_not_allowed(
                    "cannot set updateTimestamp on create",
                ));
            }
        }
        AdmissionAction::Update => {
            let Some(old) = &request.old_object else {
                return Ok(());
            };
            let old_metadata = old.common_metadata();
            if metadata.created_by != old_metadata.created_by {
                return Err(AdmissionError::field_not_allowed("cannot change createdBy"));
            }
            if metadata.updated_by != old_metadata.updated_by && metadata.updated_by != username {
                return Err(AdmissionError::field_not_allowed(
                    "cannot set updatedBy to a user other than the request submitter",
                ));
            }
            if metadata.update_timestamp != old_metadata.update_timestamp {
                return Err(AdmissionError::field_not_allowed(
                    "cannot change updateTimestamp",
                ));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Runs the wrapped controller (when there is one), then stamps the
/// reserved identity metadata and the stored-version label.
pub struct OpinionatedMutatingController {
    inner: Option<Arc<dyn MutatingAdmissionController>>,
}

impl OpinionatedMutatingController {
    /// A standalone mutator applying only the reserved-metadata stamps
    pub fn new() -> Self {
        Self { inner: None }
    }

    /// Wrap a user controller; its output object is stamped afterwards
    pub fn wrap(inner: Arc<dyn MutatingAdmissionController>) -> Self {
        Self { inner: Some(inner) }
    }
}

impl Default for OpinionatedMutatingController {
    fn default() -> Self {
        Self::new()
    }
}

impl MutatingAdmissionController for OpinionatedMutatingController {
    fn mutate<'a>(
        &'a self,
        request: &'a AdmissionRequest,
    ) -> BoxFuture<'a, Result<MutatingResponse, AdmissionError>> {
        Box::pin(async move {
            let inner_response = match &self.inner {
                Some(inner) => inner.mutate(request).await?,
                None => MutatingResponse::Unchanged,
            };
            let mut obj = match inner_response {
                MutatingResponse::Object(obj) => obj,
                MutatingResponse::Unchanged => request.object.clone_object(),
                // A pre-built patch is folded into the object so the stamps
                // land on the patched state.
                MutatingResponse::Patch(patch) => {
                    apply_patch_to_object(request.object.as_ref(), &patch)?
                }
            };
            stamp_reserved_metadata(request, obj.as_mut());
            Ok(MutatingResponse::Object(obj))
        })
    }
}

fn stamp_reserved_metadata(request: &AdmissionRequest, obj: &mut dyn Object) {
    let username = request.username().to_string();
    let stored_version = obj.static_metadata().version.clone();
    let metadata = obj.common_metadata_mut();
    match request.action {
        AdmissionAction::Create => {
            metadata.created_by = username;
            metadata.update_timestamp = metadata.creation_timestamp;
        }
        AdmissionAction::Update => {
            metadata.updated_by = username;
            metadata.update_timestamp = Some(Utc::now());
        }
        _ => {}
    }
    metadata.labels.insert(VERSION_LABEL.to_string(), stored_version);
}
