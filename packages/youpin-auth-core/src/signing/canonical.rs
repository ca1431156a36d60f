//! # Canonical Serialization
//!
//! Turns an unordered parameter set into the one byte string the gateway
//! hashes when it re-derives a signature.
//!
//! ## Rule
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       CANONICAL STRING                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  { "timestamp": "2023-12-05 16:15:00",                                 │
//! │    "appKey": "123456",                                                 │
//! │    "sign": "...",            ◄── always dropped                        │
//! │    "note": "",               ◄── dropped (empty string)                │
//! │    "extra": null,            ◄── dropped (null)                        │
//! │    "idempotentId": "202212050001" }                                    │
//! │                                                                         │
//! │  sort keys byte-wise, then concatenate  key + compact-JSON(value)      │
//! │                                                                         │
//! │  appKey"123456"idempotentId"202212050001"timestamp"2023-12-05 16:15:00"│
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Values are rendered exactly as the gateway's reference JSON encoder
//! renders them. Where that encoder differs from `serde_json`'s defaults,
//! [`ReferenceFormatter`] follows the gateway:
//!
//! | Input                    | serde_json default | Gateway         |
//! |--------------------------|--------------------|-----------------|
//! | `<` `>` `&` in strings   | literal            | `\u003c` etc.   |
//! | U+2028, U+2029           | literal            | `\u2028` etc.   |
//! | `\b`, `\f`               | `\b`, `\f`         | `\u0008` etc.   |
//! | `100.0_f64`              | `100.0`            | `100`           |
//! | `1e21_f64`               | `1e21`             | `1e+21`         |

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::ser::{CharEscape, Formatter};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Name of the signature field, never part of the canonical string
pub const SIGN_FIELD: &str = "sign";

/// API parameters to be signed, excluding the signature itself.
///
/// Insertion order is irrelevant; canonical order is always re-derived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureRequest(BTreeMap<String, Value>);

impl SignatureRequest {
    /// An empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a parameter, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove a parameter
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Look up a parameter
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when there are no parameters
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parameters in byte-wise key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Convert a request struct into a parameter set
    ///
    /// ## Errors
    ///
    /// `Error::Serialization` if `value` does not serialize to a JSON object.
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        match serde_json::to_value(value)? {
            Value::Object(map) => Ok(Self::from(map)),
            other => Err(Error::Serialization(format!(
                "request parameters must serialize to an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Consume into the underlying map
    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for SignatureRequest {
    fn from(map: Map<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl From<BTreeMap<String, Value>> for SignatureRequest {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for SignatureRequest {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// The deterministic byte string that gets hashed and signed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalString(String);

impl CanonicalString {
    /// As text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// As bytes (the digest input)
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for CanonicalString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonicalize a parameter set
///
/// Drops `sign`, `null` values and empty strings; concatenates the remaining
/// `key + compact value` pairs in byte-wise key order with no separators.
///
/// ## Errors
///
/// `Error::Serialization` if a value cannot be rendered.
pub fn canonicalize(request: &SignatureRequest) -> Result<CanonicalString> {
    let mut out = Vec::with_capacity(request.len() * 32);

    // BTreeMap<String, _> iterates in byte-wise order
    for (key, value) in request.iter() {
        if key == SIGN_FIELD || is_omitted(value) {
            continue;
        }
        out.extend_from_slice(key.as_bytes());
        write_compact(&mut out, value)?;
    }

    String::from_utf8(out)
        .map(CanonicalString)
        .map_err(|e| Error::Serialization(e.to_string()))
}

/// Render one value the way the gateway's reference encoder does
pub fn to_compact_json(value: &Value) -> Result<String> {
    let mut out = Vec::new();
    write_compact(&mut out, value)?;
    String::from_utf8(out).map_err(|e| Error::Serialization(e.to_string()))
}

fn write_compact(out: &mut Vec<u8>, value: &Value) -> Result<()> {
    let mut ser = serde_json::Serializer::with_formatter(out, ReferenceFormatter);
    Sorted(value).serialize(&mut ser)?;
    Ok(())
}

fn is_omitted(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// SORTED VALUE VIEW
// ============================================================================

/// Serializes a `Value` with object keys in byte-wise order regardless of
/// whether `serde_json`'s `preserve_order` feature is enabled in the build.
struct Sorted<'a>(&'a Value);

impl Serialize for Sorted<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

                let mut m = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    m.serialize_entry(k, &Sorted(v))?;
                }
                m.end()
            }
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&Sorted(item))?;
                }
                seq.end()
            }
            other => other.serialize(serializer),
        }
    }
}

// ============================================================================
// REFERENCE FORMATTER
// ============================================================================

/// `serde_json` formatter reproducing the gateway's reference encoder
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceFormatter;

const HEX: &[u8; 16] = b"0123456789abcdef";

impl Formatter for ReferenceFormatter {
    fn write_string_fragment<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            let escaped: &[u8] = match c {
                '<' => b"\\u003c",
                '>' => b"\\u003e",
                '&' => b"\\u0026",
                '\u{2028}' => b"\\u2028",
                '\u{2029}' => b"\\u2029",
                _ => continue,
            };
            writer.write_all(fragment[start..i].as_bytes())?;
            writer.write_all(escaped)?;
            start = i + c.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }

    fn write_char_escape<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        char_escape: CharEscape,
    ) -> io::Result<()> {
        let s: &[u8] = match char_escape {
            CharEscape::Quote => b"\\\"",
            CharEscape::ReverseSolidus => b"\\\\",
            CharEscape::Solidus => b"\\/",
            CharEscape::Backspace => b"\\u0008",
            CharEscape::FormFeed => b"\\u000c",
            CharEscape::LineFeed => b"\\n",
            CharEscape::CarriageReturn => b"\\r",
            CharEscape::Tab => b"\\t",
            CharEscape::AsciiControl(byte) => {
                let buf = [
                    b'\\',
                    b'u',
                    b'0',
                    b'0',
                    HEX[(byte >> 4) as usize],
                    HEX[(byte & 0xf) as usize],
                ];
                return writer.write_all(&buf);
            }
        };
        writer.write_all(s)
    }

    fn write_f32<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: f32) -> io::Result<()> {
        self.write_f64(writer, f64::from(value))
    }

    fn write_f64<W: ?Sized + io::Write>(&mut self, writer: &mut W, value: f64) -> io::Result<()> {
        writer.write_all(format_reference_float(value).as_bytes())
    }
}

/// Shortest round-trip decimal, switching to exponent form outside
/// `[1e-6, 1e21)`; the exponent always carries a sign and no zero padding.
fn format_reference_float(value: f64) -> String {
    let abs = value.abs();
    if abs != 0.0 && !(1e-6..1e21).contains(&abs) {
        let rendered = format!("{value:e}");
        match rendered.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => rendered,
        }
    } else {
        // Display never uses exponent notation and drops a trailing ".0"
        format!("{value}")
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn request(value: Value) -> SignatureRequest {
        match value {
            Value::Object(map) => SignatureRequest::from(map),
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn test_gateway_documentation_example() {
        let req = request(json!({
            "appKey": "123456",
            "idempotentId": "202212050001",
            "timestamp": "2023-12-05 16:15:00"
        }));

        assert_eq!(
            canonicalize(&req).unwrap().as_str(),
            r#"appKey"123456"idempotentId"202212050001"timestamp"2023-12-05 16:15:00""#
        );
    }

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            (-1.0e9..1.0e9f64).prop_map(Value::from),
            "[ -~]{0,12}".prop_map(Value::from),
        ]
    }

    fn entries() -> impl Strategy<Value = Vec<(String, Value)>> {
        proptest::collection::btree_map("[a-zA-Z]{1,10}", leaf(), 0..16)
            .prop_map(|m| m.into_iter().collect())
    }

    proptest! {
        #[test]
        fn test_canonical_form_is_independent_of_insertion_order(
            (ordered, shuffled) in entries()
                .prop_flat_map(|e| (Just(e.clone()), Just(e).prop_shuffle()))
        ) {
            let forward: SignatureRequest = ordered.clone().into_iter().collect();
            let permuted: SignatureRequest = shuffled.clone().into_iter().collect();
            prop_assert_eq!(canonicalize(&forward).unwrap(), canonicalize(&permuted).unwrap());

            let nested_forward =
                SignatureRequest::new().with("data", Value::Object(ordered.into_iter().collect()));
            let nested_permuted =
                SignatureRequest::new().with("data", Value::Object(shuffled.into_iter().collect()));
            prop_assert_eq!(
                canonicalize(&nested_forward).unwrap(),
                canonicalize(&nested_permuted).unwrap()
            );
        }
    }

    #[test]
    fn test_any_value_change_changes_output() {
        let base = request(json!({
            "commodityId": 12345,
            "price": 99.5,
            "name": "AK-47 | Redline",
            "tags": ["ft", "st"],
            "meta": {"wear": 0.15}
        }));
        let original = canonicalize(&base).unwrap();

        let mutations = [
            ("commodityId", json!(12346)),
            ("price", json!(99.6)),
            ("name", json!("AK-47 | Redline ")),
            ("tags", json!(["ft"])),
            ("meta", json!({"wear": 0.16})),
        ];
        for (key, value) in mutations {
            let mutated = base.clone().with(key, value);
            assert_ne!(canonicalize(&mutated).unwrap(), original, "mutating {key}");
        }
    }

    #[test]
    fn test_sign_null_and_empty_are_dropped() {
        let req = request(json!({
            "sign": "c2lnbmF0dXJl",
            "a": null,
            "b": "",
            "c": "kept",
            "d": [],
            "e": {},
            "f": 0,
            "g": false
        }));

        assert_eq!(
            canonicalize(&req).unwrap().as_str(),
            r#"c"kept"d[]e{}f0gfalse"#
        );
    }

    #[test]
    fn test_keys_sort_byte_wise() {
        let req = request(json!({"b": 1, "B": 2, "_": 3, "a": 4, "aa": 5}));
        assert_eq!(canonicalize(&req).unwrap().as_str(), "B2_3a4aa5b1");
    }

    #[test]
    fn test_nested_objects_are_sorted_and_compact() {
        let req = request(json!({
            "filter": {"z": 1, "a": {"y": [3, {"k": "v", "b": null}], "x": true}}
        }));

        assert_eq!(
            canonicalize(&req).unwrap().as_str(),
            r#"filter{"a":{"x":true,"y":[3,{"b":null,"k":"v"}]},"z":1}"#
        );
    }

    #[test]
    fn test_html_sensitive_characters_are_escaped() {
        assert_eq!(
            to_compact_json(&json!("<a href=\"x\">&</a>")).unwrap(),
            r#""\u003ca href=\"x\"\u003e\u0026\u003c/a\u003e""#
        );
        assert_eq!(
            to_compact_json(&json!("line\u{2028}para\u{2029}")).unwrap(),
            r#""line\u2028para\u2029""#
        );
    }

    #[test]
    fn test_control_characters() {
        assert_eq!(
            to_compact_json(&json!("\u{8}\u{c}\n\r\t\u{1}\u{1f}\\/")).unwrap(),
            r#""\u0008\u000c\n\r\t\u0001\u001f\\/""#
        );
    }

    #[test]
    fn test_non_ascii_is_literal() {
        assert_eq!(to_compact_json(&json!("饰品 ★")).unwrap(), "\"饰品 ★\"");
    }

    #[test]
    fn test_float_rendering() {
        let cases = [
            (100.0, "100"),
            (-0.5, "-0.5"),
            (99.99, "99.99"),
            (0.000001, "0.000001"),
            (0.0000001, "1e-7"),
            (1.5e-10, "1.5e-10"),
            (1e20, "100000000000000000000"),
            (1e21, "1e+21"),
            (-2.5e22, "-2.5e+22"),
            (0.0, "0"),
        ];
        for (input, expected) in cases {
            assert_eq!(to_compact_json(&json!(input)).unwrap(), expected, "{input}");
        }
    }

    #[test]
    fn test_integers_are_untouched() {
        assert_eq!(to_compact_json(&json!(u64::MAX)).unwrap(), "18446744073709551615");
        assert_eq!(to_compact_json(&json!(-42)).unwrap(), "-42");
    }

    #[test]
    fn test_from_serializable() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct QueryOrders {
            page_index: u32,
            order_status: Option<u8>,
            keyword: &'static str,
        }

        let req = SignatureRequest::from_serializable(&QueryOrders {
            page_index: 1,
            order_status: None,
            keyword: "",
        })
        .unwrap();

        assert_eq!(req.len(), 3);
        assert_eq!(canonicalize(&req).unwrap().as_str(), "pageIndex1");
    }

    #[test]
    fn test_from_serializable_rejects_non_objects() {
        let err = SignatureRequest::from_serializable(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_empty_request() {
        assert_eq!(canonicalize(&SignatureRequest::new()).unwrap().as_str(), "");
    }
}
