//! Deciding whether two parameter definitions are candidates for a shared template entry.

use crate::device::{is_import, Device, IMPORT, PARAM_NO};
use ahash::{AHashMap, AHasher};
use serde_json::{Map, Value};
use std::fmt;
use std::hash::{Hash, Hasher};
use strsim::normalized_levenshtein;

/// Fields that must agree before two parameters are ever offered for merging.
pub const RANGE_FIELDS: [&str; 4] = ["minValue", "maxValue", "defaultValue", "valueSize"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Similarity {
    /// Same number, same range, same label.
    Exact,
    /// Same number and range, different label.
    Range,
    /// Same range under a different number, with a similar label.
    Fuzzy(f64),
}

impl fmt::Display for Similarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Similarity::Exact => write!(f, "exact"),
            Similarity::Range => write!(f, "same range"),
            Similarity::Fuzzy(score) => write!(f, "fuzzy label match {}%", (score * 100.0) as u32),
        }
    }
}

/// Deep equality where numbers compare by value, so `1` equals `1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

/// Missing fields only equal missing fields.
fn field_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => values_equal(a, b),
        _ => false,
    }
}

pub fn same_range(a: &Value, b: &Value) -> bool {
    RANGE_FIELDS
        .iter()
        .all(|field| field_equal(a.get(*field), b.get(*field)))
}

/// Normalized Levenshtein similarity of two labels, ignoring case and outer whitespace.
pub fn label_similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(&a.trim().to_lowercase(), &b.trim().to_lowercase())
}

pub fn classify(
    base_key: &str,
    base: &Value,
    test_key: &str,
    test: &Value,
    fuzzy: Option<f64>,
) -> Option<Similarity> {
    if !same_range(base, test) {
        return None;
    }

    if base_key == test_key {
        return if field_equal(base.get("label"), test.get("label")) {
            Some(Similarity::Exact)
        } else {
            Some(Similarity::Range)
        };
    }

    let threshold = fuzzy?;
    let base_label = base.get("label")?.as_str()?;
    let test_label = test.get("label")?.as_str()?;
    let score = label_similarity(base_label, test_label);
    (score >= threshold).then_some(Similarity::Fuzzy(score))
}

/// Hash of the range fields; equal ranges always share a signature.
pub fn range_signature(param: &Value) -> u64 {
    let mut hasher = AHasher::default();
    for field in RANGE_FIELDS {
        match param.get(field) {
            None => 0u8.hash(&mut hasher),
            Some(value) => {
                1u8.hash(&mut hasher);
                hash_value(value, &mut hasher);
            }
        }
    }
    hasher.finish()
}

/// Hash a value so that values equal under [`values_equal`] hash equal.
fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Value::Number(n) => {
            2u8.hash(state);
            match n.as_f64() {
                // -0.0 and 0.0 compare equal
                Some(f) => (if f == 0.0 { 0.0f64 } else { f }).to_bits().hash(state),
                None => n.to_string().hash(state),
            }
        }
        Value::String(s) => {
            3u8.hash(state);
            s.hash(state);
        }
        Value::Array(items) => {
            4u8.hash(state);
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            5u8.hash(state);
            map.len().hash(state);
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (key, item) in entries {
                key.hash(state);
                hash_value(item, state);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamLocation {
    pub device: usize,
    pub key: String,
}

/// Parameter locations bucketed by range signature, in device then key order.
#[derive(Debug, Default)]
pub struct SignatureIndex {
    buckets: AHashMap<u64, Vec<ParamLocation>>,
}

impl SignatureIndex {
    pub fn build(devices: &[Device]) -> Self {
        let mut buckets: AHashMap<u64, Vec<ParamLocation>> = AHashMap::new();
        for (device, entry) in devices.iter().enumerate() {
            for key in entry.param_keys() {
                let Some(param) = entry.param(&key) else { continue };
                if is_import(param) {
                    continue;
                }
                buckets
                    .entry(range_signature(param))
                    .or_default()
                    .push(ParamLocation { device, key });
            }
        }
        Self { buckets }
    }

    pub fn candidates(&self, param: &Value) -> &[ParamLocation] {
        self.buckets
            .get(&range_signature(param))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

fn comparable(param: &Value) -> Value {
    let mut value = param.clone();
    if let Some(map) = value.as_object_mut() {
        map.shift_remove(PARAM_NO);
        map.shift_remove(IMPORT);
    }
    value
}

/// Name of the master template entry with the same definition as `param`.
pub fn find_master_entry<'a>(master: &'a Map<String, Value>, param: &Value) -> Option<&'a str> {
    let wanted = comparable(param);
    master
        .iter()
        .find(|(_, entry)| values_equal(&comparable(entry), &wanted))
        .map(|(name, _)| name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn param(label: &str, min: i64, max: i64, default: i64) -> Value {
        json!({
            "label": label,
            "valueSize": 1,
            "minValue": min,
            "maxValue": max,
            "defaultValue": default
        })
    }

    #[test]
    fn test_values_equal_numbers() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!({ "a": [1, 2.0] }), &json!({ "a": [1.0, 2] })));
        assert!(!values_equal(&json!({ "a": 1 }), &json!({ "a": 1, "b": 2 })));
        assert!(!values_equal(&json!("1"), &json!(1)));
    }

    #[test]
    fn test_missing_fields_only_match_missing() {
        let a = json!({ "minValue": 0, "maxValue": 1 });
        let b = json!({ "minValue": 0, "maxValue": 1 });
        let c = json!({ "minValue": 0, "maxValue": 1, "defaultValue": 0 });
        assert!(same_range(&a, &b));
        assert!(!same_range(&a, &c));
    }

    #[test]
    fn test_classify_exact_and_range() {
        let base = param("LED indicator", 0, 2, 0);
        let same = param("LED indicator", 0, 2, 0);
        let relabeled = param("LED Light", 0, 2, 0);

        assert_eq!(classify("3", &base, "3", &same, None), Some(Similarity::Exact));
        assert_eq!(classify("3", &base, "3", &relabeled, None), Some(Similarity::Range));
    }

    #[test]
    fn test_classify_rejects_different_range() {
        let base = param("LED indicator", 0, 2, 0);
        let other_default = param("LED indicator", 0, 2, 1);
        let other_max = param("LED indicator", 0, 3, 0);

        assert_eq!(classify("3", &base, "3", &other_default, Some(0.5)), None);
        assert_eq!(classify("3", &base, "3", &other_max, Some(0.5)), None);
    }

    #[test]
    fn test_classify_fuzzy_requires_threshold() {
        let base = param("LED Indicator", 0, 2, 0);
        let moved = param("LED indicators", 0, 2, 0);
        let unrelated = param("Auto off timer", 0, 2, 0);

        assert_eq!(classify("3", &base, "4", &moved, None), None);
        match classify("3", &base, "4", &moved, Some(0.8)) {
            Some(Similarity::Fuzzy(score)) => assert!(score > 0.9),
            other => panic!("expected fuzzy match, got {:?}", other),
        }
        assert_eq!(classify("3", &base, "4", &unrelated, Some(0.8)), None);
    }

    #[test]
    fn test_range_signature_matches_loose_equality() {
        let a = json!({ "minValue": 0, "maxValue": 255, "defaultValue": 1.0, "valueSize": 1 });
        let b = json!({ "minValue": -0.0, "maxValue": 255.0, "defaultValue": 1, "valueSize": 1 });
        let c = json!({ "minValue": 0, "maxValue": 255, "valueSize": 1 });

        assert!(same_range(&a, &b));
        assert_eq!(range_signature(&a), range_signature(&b));
        assert_ne!(range_signature(&a), range_signature(&c));
    }

    #[test]
    fn test_range_signature_ignores_key_order_and_number_spelling() {
        let a = json!({ "defaultValue": { "on": 1, "levels": [0, 2.0] } });
        let b = json!({ "defaultValue": { "levels": [0.0, 2], "on": 1.0 } });
        assert!(same_range(&a, &b));
        assert_eq!(range_signature(&a), range_signature(&b));

        let c = json!({ "defaultValue": { "levels": [2, 0], "on": 1 } });
        assert!(!same_range(&a, &c));
    }

    #[test]
    fn test_signature_index_order_and_imports() {
        let devices = vec![
            Device::new("a.json", json!({ "paramInformation": {
                "1": param("A", 0, 1, 0),
                "2": { "$import": "templates/t.json#x" },
                "5": param("B", 0, 99, 5)
            } })),
            Device::new("b.json", json!({ "paramInformation": [
                { "#": "7", "label": "C", "valueSize": 1, "minValue": 0, "maxValue": 1, "defaultValue": 0 }
            ] })),
        ];

        let index = SignatureIndex::build(&devices);
        let found = index.candidates(&param("whatever", 0, 1, 0));
        assert_eq!(
            found,
            &[
                ParamLocation { device: 0, key: "1".into() },
                ParamLocation { device: 1, key: "7".into() },
            ]
        );
        assert!(index.candidates(&param("none", 5, 6, 5)).is_empty());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_find_master_entry() {
        let mut master = Map::new();
        master.insert("base_enable_disable".into(), param("Enable", 0, 1, 0));
        master.insert("led_mode".into(), param("LED Mode", 0, 2, 0));

        let candidate = json!({
            "#": "4",
            "label": "LED Mode",
            "valueSize": 1,
            "minValue": 0,
            "maxValue": 2.0,
            "defaultValue": 0
        });
        assert_eq!(find_master_entry(&master, &candidate), Some("led_mode"));
        assert_eq!(find_master_entry(&master, &param("LED Mode", 0, 3, 0)), None);
    }
}
