//! Metadata patch application: RFC 7396 merge patch and RFC 6902 JSON
//! patch.

use crate::Error;

/// Apply an RFC 7396 merge patch.
pub fn apply_merge_patch(document: &mut serde_json::Value, patch: &serde_json::Value) {
    json_patch::merge(document, patch);
}

/// Apply an RFC 6902 JSON patch. Errors from the patch library surface
/// as 400 with the library's message.
pub fn apply_json_patch(
    document: &mut serde_json::Value,
    patch: &serde_json::Value,
) -> Result<(), Error> {
    let patch: json_patch::Patch = serde_json::from_value(patch.clone())
        .map_err(|err| Error::BadRequest(format!("invalid JSON patch: {err}")))?;
    json_patch::patch(document, &patch)
        .map_err(|err| Error::BadRequest(format!("patch failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_patch_semantics() {
        let mut document = serde_json::json!({"a": 1, "b": {"c": 2}, "drop": true});
        apply_merge_patch(
            &mut document,
            &serde_json::json!({"b": {"c": 3}, "drop": null, "new": "x"}),
        );
        assert_eq!(
            document,
            serde_json::json!({"a": 1, "b": {"c": 3}, "new": "x"})
        );
    }

    #[test]
    fn json_patch_ops_and_failures() {
        let mut document = serde_json::json!({"a": 1, "list": [1, 2]});
        apply_json_patch(
            &mut document,
            &serde_json::json!([
                {"op": "replace", "path": "/a", "value": 2},
                {"op": "add", "path": "/list/-", "value": 3},
                {"op": "remove", "path": "/list/0"},
            ]),
        )
        .unwrap();
        assert_eq!(document, serde_json::json!({"a": 2, "list": [2, 3]}));

        let err = apply_json_patch(
            &mut document,
            &serde_json::json!([{"op": "test", "path": "/a", "value": 999}]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }
}
