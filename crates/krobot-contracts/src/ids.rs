use rand::Rng;
use serde_json::Value;

const CHAT_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub const CHAT_ID_LEN: usize = 12;
pub const APP_ID_LEN: usize = 19;

/// Random lowercase alphanumeric chat id of [`CHAT_ID_LEN`] characters.
pub fn random_chat_id() -> String {
    random_chat_id_with(&mut rand::rng(), CHAT_ID_LEN)
}

pub fn random_chat_id_with<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| CHAT_ID_ALPHABET[rng.random_range(0..CHAT_ID_ALPHABET.len())] as char)
        .collect()
}

/// Random numeric app id of [`APP_ID_LEN`] digits, never starting with zero.
pub fn random_app_id() -> String {
    random_app_id_with(&mut rand::rng())
}

pub fn random_app_id_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut out = String::with_capacity(APP_ID_LEN);
    out.push(char::from(b'0' + rng.random_range(1..10u8)));
    for _ in 1..APP_ID_LEN {
        out.push(char::from(b'0' + rng.random_range(0..10u8)));
    }
    out
}

/// Best-effort lookup of an uploaded artifact's reference id.
///
/// Walks the parsed body depth-first looking for a numeric (or numeric
/// string) value under an `id` or `appId` key. Within an object the direct
/// keys are checked first, then nested objects, then nested arrays. When no
/// keyed value exists the raw body is scanned for the first run of digits
/// that fits in an `i64`. Only the observed upload response shapes are
/// targeted; this is a heuristic, not a contract.
pub fn resolve_response_id(raw: &str) -> Option<i64> {
    if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
        if let Some(id) = find_keyed_id(&parsed) {
            return Some(id);
        }
    }
    first_digit_run(raw)
}

pub fn find_keyed_id(value: &Value) -> Option<i64> {
    match value {
        Value::Object(map) => {
            for key in ["id", "appId"] {
                if let Some(id) = map.get(key).and_then(id_scalar) {
                    return Some(id);
                }
            }
            map.values()
                .filter(|child| child.is_object())
                .chain(map.values().filter(|child| child.is_array()))
                .find_map(find_keyed_id)
        }
        Value::Array(items) => items
            .iter()
            .filter(|child| child.is_object())
            .chain(items.iter().filter(|child| child.is_array()))
            .find_map(find_keyed_id),
        _ => None,
    }
}

fn id_scalar(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn first_digit_run(raw: &str) -> Option<i64> {
    raw.split(|ch: char| !ch.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .find_map(|run| run.parse::<i64>().ok())
}
