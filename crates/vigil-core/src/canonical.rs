use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;

use crate::error::Result;

/// Remove the fields named by dotted paths from a parsed JSON value.
///
/// A path is a sequence of object keys: `dash.modified` deletes `modified`
/// inside the object at key `dash`. Removing a missing path is a no-op, as
/// is a path that traverses a non-object.
pub fn strip_paths(value: &mut Value, paths: &[String]) {
    for path in paths {
        strip_path(value, path);
    }
}

fn strip_path(value: &mut Value, path: &str) {
    let mut segments = path.split('.').peekable();
    let mut current = value;
    while let Some(segment) = segments.next() {
        let Some(object) = current.as_object_mut() else {
            return;
        };
        if segments.peek().is_none() {
            object.remove(segment);
            return;
        }
        match object.get_mut(segment) {
            Some(next) => current = next,
            None => return,
        }
    }
}

/// Encode a value the way artifact files are stored: two-space indent and a
/// trailing newline so textual diffs stay stable. `serde_json` never escapes
/// `<>&`, matching the required encoder settings.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(256);
    let formatter = PrettyFormatter::with_indent(b"  ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    out.push(b'\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn strips_nested_path() {
        let mut value = json!({"dash": {"modified": "2019-01-01", "title": "t"}});
        strip_paths(&mut value, &["dash.modified".to_string()]);
        assert_eq!(value, json!({"dash": {"title": "t"}}));
    }

    #[test]
    fn strips_top_level_fields() {
        let mut value = json!({"modified": 1, "overall_state": "OK", "name": "m"});
        strip_paths(
            &mut value,
            &["modified".to_string(), "overall_state".to_string()],
        );
        assert_eq!(value, json!({"name": "m"}));
    }

    #[test]
    fn missing_path_is_a_noop() {
        let mut value = json!({"name": "m"});
        let original = value.clone();
        strip_paths(&mut value, &["dash.modified".to_string()]);
        assert_eq!(value, original);
    }

    #[test]
    fn path_through_non_object_is_a_noop() {
        let mut value = json!({"dash": [1, 2, 3]});
        let original = value.clone();
        strip_paths(&mut value, &["dash.modified".to_string()]);
        assert_eq!(value, original);
    }

    #[test]
    fn canonical_bytes_use_two_space_indent_and_trailing_newline() {
        let value = json!({"a": 1, "b": {"c": "<&>"}});
        let bytes = to_canonical_bytes(&value).expect("encode");
        let text = String::from_utf8(bytes).expect("utf8");
        assert_eq!(text, "{\n  \"a\": 1,\n  \"b\": {\n    \"c\": \"<&>\"\n  }\n}\n");
    }

    fn arb_json(depth: u32) -> impl Strategy<Value = serde_json::Value> {
        let leaf = prop_oneof![
            Just(serde_json::Value::Null),
            any::<bool>().prop_map(serde_json::Value::from),
            any::<i64>().prop_map(serde_json::Value::from),
            "[a-z<>&]{0,8}".prop_map(serde_json::Value::from),
        ];
        leaf.prop_recursive(depth, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(|entries| {
                    serde_json::Value::Object(entries.into_iter().collect())
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn canonical_encoding_is_idempotent(value in arb_json(3)) {
            let once = to_canonical_bytes(&value).expect("encode");
            let reparsed: serde_json::Value =
                serde_json::from_slice(&once).expect("reparse");
            let twice = to_canonical_bytes(&reparsed).expect("encode again");
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn strip_is_idempotent(value in arb_json(3)) {
            let paths = vec!["modified".to_string(), "dash.modified".to_string()];
            let mut first = value.clone();
            strip_paths(&mut first, &paths);
            let mut second = first.clone();
            strip_paths(&mut second, &paths);
            prop_assert_eq!(first, second);
        }
    }
}
