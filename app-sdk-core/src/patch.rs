//! JSON-Patch request model and reserved-metadata path rewriting.
//!
//! Callers address SDK metadata fields as if they were real object fields
//! (`/metadata/<customKey>`, `/metadata/extraFields/<k8sField>`); before a
//! patch hits the wire those paths are rewritten onto the storage locations
//! the translation layer actually uses.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::Error, metadata::RESERVED_ANNOTATION_PREFIX};

/// A JSON-Patch operation type (RFC 6902)
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    /// Add a value at a path
    Add,
    /// Remove the value at a path
    Remove,
    /// Replace the value at a path; fails server-side when the path is absent
    Replace,
    /// Move a value between paths
    Move,
    /// Copy a value between paths
    Copy,
    /// Assert the value at a path
    Test,
}

/// One JSON-Patch operation
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PatchOperation {
    /// The operation to perform
    pub op: PatchOp,
    /// JSON pointer to the target
    pub path: String,
    /// Operand value, unused for `remove`
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
}

/// An ordered JSON-Patch, serialized as the RFC 6902 operation array.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct PatchRequest {
    /// The operations, applied in order
    pub operations: Vec<PatchOperation>,
}

impl PatchRequest {
    /// A patch from a list of operations
    pub fn new(operations: Vec<PatchOperation>) -> Self {
        Self { operations }
    }

    /// Rewrites operations addressing SDK metadata onto their storage paths.
    ///
    /// - `/metadata/extraFields/<field>` → `/metadata/<field>` (the caller is
    ///   addressing real Kubernetes metadata through the extraFields bucket)
    /// - `/metadata/<field>` where `<field>` is not native `ObjectMeta` →
    ///   `/metadata/annotations/grafana.com~1<field>`, with `replace`
    ///   downgraded to `add` so the operation succeeds when the annotation
    ///   does not exist yet (equivalent in a map when it does)
    /// - wholesale `/metadata` or `/metadata/extraFields` targets are
    ///   rejected
    pub fn rewrite_metadata_paths(&mut self) -> Result<(), Error> {
        for op in &mut self.operations {
            rewrite_operation(op)?;
        }
        Ok(())
    }
}

// Fields ObjectMeta stores natively; patches on these pass through untouched.
const NATIVE_METADATA_FIELDS: [&str; 15] = [
    "name",
    "generateName",
    "namespace",
    "selfLink",
    "uid",
    "resourceVersion",
    "generation",
    "creationTimestamp",
    "deletionTimestamp",
    "deletionGracePeriodSeconds",
    "labels",
    "annotations",
    "ownerReferences",
    "finalizers",
    "managedFields",
];

fn rewrite_operation(op: &mut PatchOperation) -> Result<(), Error> {
    let Some(rest) = op.path.strip_prefix("/metadata") else {
        return Ok(());
    };
    if rest.is_empty() {
        return Err(Error::Validation("cannot patch entire metadata object".into()));
    }
    let Some(rest) = rest.strip_prefix('/') else {
        return Ok(()); // e.g. /metadataFoo, not ours
    };
    let (field, remainder) = match rest.split_once('/') {
        Some((field, tail)) => (field, format!("/{tail}")),
        None => (rest, String::new()),
    };

    if field == "extraFields" {
        if remainder.is_empty() {
            return Err(Error::Validation("cannot patch entire extraFields object".into()));
        }
        op.path = format!("/metadata{remainder}");
        return Ok(());
    }
    if NATIVE_METADATA_FIELDS.contains(&field) {
        return Ok(());
    }

    let escaped = format!("{RESERVED_ANNOTATION_PREFIX}{field}")
        .replace('~', "~0")
        .replace('/', "~1");
    op.path = format!("/metadata/annotations/{escaped}{remainder}");
    if op.op == PatchOp::Replace {
        op.op = PatchOp::Add;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(op: PatchOp, path: &str, value: Value) -> PatchOperation {
        PatchOperation {
            op,
            path: path.into(),
            value,
        }
    }

    #[test]
    fn native_metadata_paths_are_identity() {
        let mut patch = PatchRequest::new(vec![
            op(PatchOp::Replace, "/metadata/labels/app", json!("blog")),
            op(PatchOp::Add, "/metadata/finalizers/-", json!("grafana.com/cleanup")),
            op(PatchOp::Replace, "/spec/title", json!("latency")),
        ]);
        let before = patch.clone();
        patch.rewrite_metadata_paths().unwrap();
        assert_eq!(patch, before);
    }

    #[test]
    fn custom_key_rewrites_to_annotation_add() {
        let mut patch = PatchRequest::new(vec![
            op(PatchOp::Replace, "/metadata/customKey", json!("v")),
            op(PatchOp::Replace, "/metadata/extraFields/generation", json!("12")),
        ]);
        patch.rewrite_metadata_paths().unwrap();
        let rendered = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            rendered,
            json!([
                {"op": "add", "path": "/metadata/annotations/grafana.com~1customKey", "value": "v"},
                {"op": "replace", "path": "/metadata/generation", "value": "12"},
            ])
        );
    }

    #[test]
    fn wholesale_metadata_patch_rejected() {
        let mut patch = PatchRequest::new(vec![op(PatchOp::Replace, "/metadata", json!({}))]);
        let err = patch.rewrite_metadata_paths().unwrap_err();
        assert_eq!(err.to_string(), "validation failed: cannot patch entire metadata object");
    }

    #[test]
    fn wholesale_extra_fields_patch_rejected() {
        let mut patch = PatchRequest::new(vec![op(PatchOp::Replace, "/metadata/extraFields", json!({}))]);
        assert!(patch.rewrite_metadata_paths().is_err());
    }

    #[test]
    fn remove_on_custom_key_keeps_op() {
        let mut patch = PatchRequest::new(vec![op(PatchOp::Remove, "/metadata/customKey", Value::Null)]);
        patch.rewrite_metadata_paths().unwrap();
        assert_eq!(patch.operations[0].op, PatchOp::Remove);
        assert_eq!(
            patch.operations[0].path,
            "/metadata/annotations/grafana.com~1customKey"
        );
    }

    #[test]
    fn serializes_as_rfc6902_array() {
        let patch = PatchRequest::new(vec![op(PatchOp::Test, "/metadata/name", json!("dash"))]);
        assert_eq!(
            serde_json::to_string(&patch).unwrap(),
            r#"[{"op":"test","path":"/metadata/name","value":"dash"}]"#
        );
    }
}
