//! Order-preserving JSON pretty-printer for diagnostic output.
//!
//! A `serde_json::Value` round-trip would reorder object keys, so the input is
//! rewritten in one left-to-right pass instead. Only whitespace is added:
//!
//! - newline + deeper indent after `{`, `[` and after `,`
//! - trailing whitespace trimmed, newline + shallower indent before `}` and `]`
//! - one space after `:`
//!
//! Structural characters inside string literals (including escaped quotes) are
//! left alone. Invalid JSON is echoed unchanged.

use serde::de::IgnoredAny;

const INDENT: &str = "  ";

/// Pretty-print `raw`, preserving key order and value text exactly.
///
/// Returns `raw` unchanged when it is not valid JSON.
pub fn pretty_print(raw: &str) -> String {
    if serde_json::from_str::<IgnoredAny>(raw).is_err() {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len() * 2);
    let mut level: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for ch in raw.chars() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            },
            '{' | '[' => {
                out.push(ch);
                level += 1;
                newline(&mut out, level);
            },
            ',' => {
                out.push(ch);
                newline(&mut out, level);
            },
            '}' | ']' => {
                let trimmed = out.trim_end_matches([' ', '\t', '\n', '\r']).len();
                out.truncate(trimmed);
                level = level.saturating_sub(1);
                newline(&mut out, level);
                out.push(ch);
            },
            ':' => {
                out.push(ch);
                out.push(' ');
            },
            _ => out.push(ch),
        }
    }

    out
}

fn newline(out: &mut String, level: usize) {
    out.push('\n');
    for _ in 0..level {
        out.push_str(INDENT);
    }
}

/// Pretty-print raw bytes, decoding lossily.
pub fn pretty_print_bytes(raw: &[u8]) -> String {
    pretty_print(&String::from_utf8_lossy(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_object() {
        let out = pretty_print(r#"{"b":1,"a":[true,null]}"#);
        assert_eq!(out, "{\n  \"b\": 1,\n  \"a\": [\n    true,\n    null\n  ]\n}");
    }

    #[test]
    fn test_preserves_key_order() {
        let out = pretty_print(r#"{"zeta":1,"alpha":2,"mid":3}"#);
        let z = out.find("zeta").unwrap();
        let a = out.find("alpha").unwrap();
        let m = out.find("mid").unwrap();
        assert!(z < a && a < m);
    }

    #[test]
    fn test_structural_chars_in_strings() {
        let raw = r#"{"text":"a, b: {c} [d]","q":"say \"hi\", {ok}"}"#;
        let out = pretty_print(raw);
        assert!(out.contains(r#""a, b: {c} [d]""#));
        assert!(out.contains(r#""say \"hi\", {ok}""#));

        let reparsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        let original: serde_json::Value = serde_json::from_str(raw).unwrap();
        assert_eq!(reparsed, original);
    }

    #[test]
    fn test_escaped_backslash_before_quote() {
        let raw = r#"{"path":"C:\\","next":[1]}"#;
        let out = pretty_print(raw);
        assert_eq!(out, "{\n  \"path\": \"C:\\\\\",\n  \"next\": [\n    1\n  ]\n}");
    }

    #[test]
    fn test_empty_containers() {
        assert_eq!(pretty_print("{}"), "{\n}");
        assert_eq!(pretty_print("[]"), "[\n]");
    }

    #[test]
    fn test_scalars_unchanged() {
        assert_eq!(pretty_print("42"), "42");
        assert_eq!(pretty_print(r#""a,b""#), r#""a,b""#);
    }

    #[test]
    fn test_invalid_json_echoed() {
        assert_eq!(pretty_print("[DONE]"), "[DONE]");
        assert_eq!(pretty_print(r#"{"a":"#), r#"{"a":"#);
        assert_eq!(pretty_print(""), "");
    }

    #[test]
    fn test_unicode_passthrough() {
        let out = pretty_print(r#"{"text":"héllo, 世界"}"#);
        assert_eq!(out, "{\n  \"text\": \"héllo, 世界\"\n}");
    }

    #[test]
    fn test_pretty_print_bytes() {
        assert_eq!(pretty_print_bytes(br#"{"a":1}"#), "{\n  \"a\": 1\n}");
    }
}
