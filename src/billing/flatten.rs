use chrono::{DateTime, FixedOffset};
use serde_json::Value;

use super::models::{FlatRecord, RemoteObject};

const KEY_SEPARATOR: &str = "_";

/// Top-level fields holding Unix epoch seconds that are rendered as local time.
pub const EPOCH_FIELDS: [&str; 7] = [
    "billing_cycle_anchor",
    "created",
    "current_period_end",
    "current_period_start",
    "start_date",
    "trial_end",
    "trial_start",
];

/// UTC+9, the offset every localized timestamp is rendered in.
pub const LOCAL_OFFSET_SECS: i32 = 9 * 3600;

const LOCAL_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Renders epoch seconds as `YYYY/MM/DD HH:MM:SS` at [`LOCAL_OFFSET_SECS`].
pub fn localize_epoch(seconds: i64) -> Option<String> {
    let offset = FixedOffset::east_opt(LOCAL_OFFSET_SECS)?;
    let instant = DateTime::from_timestamp(seconds, 0)?;
    Some(instant.with_timezone(&offset).format(LOCAL_FORMAT).to_string())
}

/// Collapses every nested object and list into `_`-joined keys.
///
/// List elements are addressed by zero-based index. When two paths join to
/// the same key the field processed last wins.
pub fn flatten_full(object: &RemoteObject) -> FlatRecord {
    let mut out = FlatRecord::new();
    flatten_into(&mut out, object, "");
    out
}

/// Flattens the first level only: fields of nested objects are lifted with a
/// `parent_` prefix, list elements become `parent_<index>`, and anything
/// deeper is kept as is.
pub fn flatten_one_level(object: &RemoteObject) -> FlatRecord {
    let mut out = FlatRecord::new();
    for (key, value) in object {
        match value {
            Value::Object(nested) => {
                for (child, child_value) in nested {
                    out.insert(join(key, child), child_value.clone());
                }
            }
            Value::Array(elements) => {
                for (index, element) in elements.iter().enumerate() {
                    out.insert(join(key, &index.to_string()), element.clone());
                }
            }
            scalar => {
                out.insert(key.clone(), localize_field(key, scalar));
            }
        }
    }
    out
}

fn flatten_into(out: &mut FlatRecord, object: &RemoteObject, prefix: &str) {
    for (key, value) in object {
        let key = join(prefix, key);
        match value {
            Value::Object(nested) => flatten_into(out, nested, &key),
            Value::Array(elements) => flatten_list(out, elements, &key),
            scalar => {
                let localized = localize_field(&key, scalar);
                out.insert(key, localized);
            }
        }
    }
}

fn flatten_list(out: &mut FlatRecord, elements: &[Value], prefix: &str) {
    for (index, element) in elements.iter().enumerate() {
        let key = join(prefix, &index.to_string());
        match element {
            Value::Object(nested) => flatten_into(out, nested, &key),
            Value::Array(inner) => flatten_list(out, inner, &key),
            scalar => {
                out.insert(key, scalar.clone());
            }
        }
    }
}

fn localize_field(key: &str, value: &Value) -> Value {
    if !EPOCH_FIELDS.contains(&key) {
        return value.clone();
    }
    value
        .as_i64()
        .and_then(localize_epoch)
        .map(Value::String)
        .unwrap_or_else(|| value.clone())
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}{KEY_SEPARATOR}{key}")
    }
}
