//! Textual normalisation so that persisted state is deterministic.

use crate::attribute::AttributeValue;
use crate::error::Result;

/// Trims trailing whitespace on every line and drops trailing blank lines.
#[must_use]
pub fn trim_trailing_whitespace(text: &str) -> String {
    text.trim_end()
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Re-serialises a JSON document with sorted keys and no insignificant
/// whitespace.
///
/// # Errors
///
/// Returns an error when the text is not valid JSON.
pub fn canonical_json(text: &str) -> Result<String> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    Ok(serde_json::to_string(&value)?)
}

/// Returns true when two JSON documents are equal after canonicalisation.
#[must_use]
pub fn json_equivalent(left: &str, right: &str) -> bool {
    match (canonical_json(left), canonical_json(right)) {
        (Ok(l), Ok(r)) => l == r,
        _ => left == right,
    }
}

/// Sorts a list of records by the string value of `key`, then by the whole
/// record for a stable order among equal keys.
pub fn sort_records_by(items: &mut [AttributeValue], key: &str) {
    items.sort_by(|a, b| {
        let ka = a.as_map().and_then(|m| m.get(key)).and_then(AttributeValue::as_str);
        let kb = b.as_map().and_then(|m| m.get(key)).and_then(AttributeValue::as_str);
        ka.cmp(&kb)
            .then_with(|| a.to_json().to_string().cmp(&b.to_json().to_string()))
    });
}

/// Sorts and deduplicates a list of strings.
pub fn sort_strings(items: &mut Vec<String>) {
    items.sort();
    items.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trim_trailing_whitespace() {
        let rule = "jq(.process.name) == \"nc\"   \n  and true\t\r\n\n";
        assert_eq!(
            trim_trailing_whitespace(rule),
            "jq(.process.name) == \"nc\"\n  and true"
        );
        assert_eq!(trim_trailing_whitespace("a  \n\n  b \r\n"), "a\n\n  b");
        assert_eq!(trim_trailing_whitespace(""), "");
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        assert_eq!(
            canonical_json("{ \"b\": 1,\n \"a\": {\"d\": [2, 1], \"c\": null} }").unwrap(),
            r#"{"a":{"c":null,"d":[2,1]},"b":1}"#
        );
        assert!(canonical_json("{").is_err());
        assert!(json_equivalent(r#"{"a":1,"b":2}"#, r#"{"b":2, "a":1}"#));
        assert!(!json_equivalent(r#"{"a":1}"#, r#"{"a":2}"#));
    }

    #[test]
    fn test_sort_records_by() {
        let mut items: Vec<AttributeValue> = vec![
            AttributeValue::from_json(json!({"name": "c"})),
            AttributeValue::from_json(json!({"name": "a", "n": 2})),
            AttributeValue::from_json(json!({"name": "a", "n": 1})),
        ];
        sort_records_by(&mut items, "name");
        let names: Vec<serde_json::Value> = items.iter().map(AttributeValue::to_json).collect();
        assert_eq!(
            names,
            vec![
                json!({"name": "a", "n": 1}),
                json!({"name": "a", "n": 2}),
                json!({"name": "c"})
            ]
        );
    }

    #[test]
    fn test_sort_strings() {
        let mut ids = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        sort_strings(&mut ids);
        assert_eq!(ids, vec!["a", "b"]);
    }
}
