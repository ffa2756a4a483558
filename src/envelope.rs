// src/envelope.rs
use serde_json::{Map, Value};

/// Prefix shared by every notification the relay publishes.
pub const NAMESPACE: &str = "djr";
/// Payload member naming the event type.
pub const TYPE_FIELD: &str = "type";
/// Payload member naming the entity an event is about.
pub const ID_FIELD: &str = ":id";
/// Event type used when the payload does not carry a usable one.
pub const DEFAULT_EVENT_TYPE: &str = "message";
/// Event type the server sends once its side of the stream is set up.
pub const CONNECTED_EVENT_TYPE: &str = "connected";

/// Notification key for an event type, e.g. `djr:chat_message`.
pub fn event_key(event_type: &str) -> String {
    format!("{NAMESPACE}:{event_type}")
}

/// A parsed inbound payload.
///
/// Only JSON-parseability is enforced. The envelope remembers the derived
/// event type and, when present, the identifier used for the scoped key.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    payload: Value,
    event_type: String,
    id: Option<String>,
}

impl Envelope {
    /// Parse the `data` of one frame.
    ///
    /// A JSON `null` is rejected along with unparseable text: there is
    /// nothing to read a type from.
    pub fn parse(data: &str) -> Result<Self, serde_json::Error> {
        let payload: Value = serde_json::from_str(data)?;
        if payload.is_null() {
            return Err(serde::de::Error::custom("payload is null"));
        }
        Ok(Self::from_payload(payload))
    }

    pub fn from_payload(payload: Value) -> Self {
        let event_type = match payload.get(TYPE_FIELD) {
            Some(value) if is_truthy(value) => to_key_fragment(value),
            _ => DEFAULT_EVENT_TYPE.to_string(),
        };
        // present-but-null still counts, only a missing member does not
        let id = payload.get(ID_FIELD).map(to_key_fragment);

        Self {
            payload,
            event_type,
            id,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The payload handed to the `on_message` callback.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Detail attached to published notifications. Falsy scalars become `{}`.
    pub fn detail(&self) -> Value {
        if is_truthy(&self.payload) {
            self.payload.clone()
        } else {
            Value::Object(Map::new())
        }
    }

    pub fn type_key(&self) -> String {
        event_key(&self.event_type)
    }

    /// `djr:<type>:<id>` when the payload carries an identifier.
    pub fn id_key(&self) -> Option<String> {
        self.id
            .as_ref()
            .map(|id| format!("{}:{id}", self.type_key()))
    }

    pub fn is_connected(&self) -> bool {
        self.event_type == CONNECTED_EVENT_TYPE
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// String form of a JSON value as it appears inside a notification key.
///
/// Strings are used verbatim and numbers are written as JavaScript would
/// write them, so `{"type": "item", ":id": 7.0}` and `{"type": "item", ":id": 7}`
/// both address `djr:item:7`.
pub fn to_key_fragment(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => to_key_fragment(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

fn format_number(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) => js_number_string(f),
        None => n.to_string(),
    }
}

/// `f` rendered the way JavaScript's `String(number)` does: shortest
/// round-trip digits, plain notation for exponents in `-7..21`, otherwise
/// `1e+21` / `1.5e-7` style.
fn js_number_string(f: f64) -> String {
    if f == 0.0 {
        return "0".to_string();
    }
    if !f.is_finite() {
        return if f.is_nan() {
            "NaN".to_string()
        } else if f > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        };
    }

    let sign = if f < 0.0 { "-" } else { "" };
    // `{:e}` gives the shortest round-trip digits, e.g. "1.2345e3"
    let scientific = format!("{:e}", f.abs());
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let k = digits.len() as i32;
    // position of the decimal point relative to the digits
    let n = exponent.parse::<i32>().unwrap_or(0) + 1;

    let body = if k <= n && n <= 21 {
        format!("{digits}{}", "0".repeat((n - k) as usize))
    } else if 0 < n && n <= 21 {
        let (int, frac) = digits.split_at(n as usize);
        format!("{int}.{frac}")
    } else if -6 < n && n <= 0 {
        format!("0.{}{digits}", "0".repeat(-n as usize))
    } else {
        let e = n - 1;
        let e_sign = if e >= 0 { '+' } else { '-' };
        match digits.split_at(1) {
            (first, "") => format!("{first}e{e_sign}{}", e.abs()),
            (first, rest) => format!("{first}.{rest}e{e_sign}{}", e.abs()),
        }
    };
    format!("{sign}{body}")
}
