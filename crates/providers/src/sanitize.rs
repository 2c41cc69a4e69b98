//! Recovery of tool-call argument JSON that models emit with invalid
//! escape sequences.
//!
//! Ladder: plain parse → backslash-unescape reparse → double the common
//! offenders (`\t`, `\n`, `\r`) into valid escapes and reparse → give up.

use serde_json::Value;

/// Decode a tool-call argument string into a JSON object, repairing the
/// common escape-sequence failure modes. `None` means unrecoverable.
pub fn decode_arguments(raw: &str) -> Option<Value> {
    if raw.trim().is_empty() {
        return Some(Value::Object(Default::default()));
    }

    if let Ok(v) = serde_json::from_str(raw) {
        return Some(v);
    }

    // Interpret the payload as a string-escape-decoded form: models
    // sometimes double-escape the whole argument object.
    if let Ok(v) = serde_json::from_str(&unescape_backslashes(raw)) {
        return Some(v);
    }

    // Last resort: raw control characters inside string values (a literal
    // tab or newline where the model meant the escape). Doubling them into
    // their escape form yields valid JSON.
    let doubled = raw
        .replace('\t', "\\t")
        .replace('\n', "\\n")
        .replace('\r', "\\r");
    serde_json::from_str(&doubled).ok()
}

/// Resolve backslash escape sequences into their literal characters,
/// leaving unknown sequences untouched.
fn unescape_backslashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('n') => {
                chars.next();
                out.push('\n');
            }
            Some('t') => {
                chars.next();
                out.push('\t');
            }
            Some('r') => {
                chars.next();
                out.push('\r');
            }
            Some('"') => {
                chars.next();
                out.push('"');
            }
            Some('\\') => {
                chars.next();
                out.push('\\');
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_json_passes_through() {
        let v = decode_arguments(r#"{"path": "a.txt", "lines": 3}"#).unwrap();
        assert_eq!(v["path"], "a.txt");
        assert_eq!(v["lines"], 3);
    }

    #[test]
    fn empty_arguments_become_empty_object() {
        assert_eq!(
            decode_arguments("   ").unwrap(),
            Value::Object(Default::default())
        );
    }

    #[test]
    fn double_escaped_object_is_recovered() {
        // The model escaped the quotes of the whole object.
        let raw = r#"{\"path\": \"a.txt\"}"#;
        assert!(serde_json::from_str::<Value>(raw).is_err());
        let v = decode_arguments(raw).unwrap();
        assert_eq!(v["path"], "a.txt");
    }

    #[test]
    fn raw_control_characters_are_recovered_by_doubling() {
        // A literal tab character inside the JSON string, which strict
        // parsers reject.
        let raw = "{\"content\": \"col1\tcol2\"}";
        assert!(serde_json::from_str::<Value>(raw).is_err());
        let v = decode_arguments(raw).unwrap();
        assert_eq!(v["content"], "col1\tcol2");
    }

    #[test]
    fn unescape_resolves_common_sequences() {
        assert_eq!(unescape_backslashes(r"a\nb"), "a\nb");
        assert_eq!(unescape_backslashes(r"a\tb"), "a\tb");
        assert_eq!(unescape_backslashes(r"a\\b"), r"a\b");
        // Unknown escapes are preserved.
        assert_eq!(unescape_backslashes(r"a\qb"), r"a\qb");
    }

    #[test]
    fn unrecoverable_garbage_returns_none() {
        assert!(decode_arguments("{not json at all").is_none());
    }
}
