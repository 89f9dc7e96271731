// Wire models for the controller's JSON envelopes.
//
// Every response body has the shape `{ "totalCount": "N", "imdata": [...] }`
// where each `imdata` item is a managed-object fragment
// `{ "<class>": { "attributes": {...}, "children": [...] } }`.
// Attribute values are strings on the wire, numbers included.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

// ── Envelope ─────────────────────────────────────────────────────────

/// Standard response envelope.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Imdata {
    #[serde(default)]
    pub imdata: Vec<Value>,
    #[serde(rename = "totalCount", default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<String>,
}

// ── Fragments ────────────────────────────────────────────────────────

/// Borrowed view of one managed-object fragment.
#[derive(Debug, Clone, Copy)]
pub struct Fragment<'a> {
    pub class_name: &'a str,
    pub attributes: &'a Map<String, Value>,
    pub children: &'a [Value],
}

static EMPTY_MAP: std::sync::LazyLock<Map<String, Value>> = std::sync::LazyLock::new(Map::new);

impl<'a> Fragment<'a> {
    /// View `value` as a fragment. Returns `None` unless it is an object
    /// with exactly one key whose value is an object.
    pub fn parse(value: &'a Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.len() != 1 {
            return None;
        }
        let (class_name, body) = obj.iter().next()?;
        let body = body.as_object()?;
        let attributes = match body.get("attributes") {
            Some(Value::Object(map)) => map,
            Some(_) => return None,
            None => &*EMPTY_MAP,
        };
        let children = body
            .get("children")
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice);
        Some(Self {
            class_name,
            attributes,
            children,
        })
    }

    /// String value of an attribute (numbers and booleans are stringified).
    pub fn attr(&self, key: &str) -> Option<String> {
        attribute_string(self.attributes.get(key)?)
    }
}

/// Render a wire attribute as a string.
pub fn attribute_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ── Login / refresh ──────────────────────────────────────────────────

/// Token material returned by `aaaLogin` and `aaaRefresh`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub token: String,
    pub refresh_timeout_secs: u64,
}

impl LoginGrant {
    /// Extract the grant from an `aaaLogin` envelope.
    pub fn from_imdata(data: &Imdata) -> Result<Self, Error> {
        let fragment = data
            .imdata
            .iter()
            .filter_map(Fragment::parse)
            .find(|f| f.class_name == "aaaLogin")
            .ok_or_else(|| Error::Authentication {
                message: "login response carried no aaaLogin object".into(),
            })?;

        let token = fragment.attr("token").ok_or_else(|| Error::Authentication {
            message: "login response carried no token".into(),
        })?;
        let refresh_timeout_secs = fragment
            .attr("refreshTimeoutSeconds")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_REFRESH_TIMEOUT_SECS);

        Ok(Self {
            token,
            refresh_timeout_secs,
        })
    }
}

/// Used when the controller omits `refreshTimeoutSeconds`.
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 300;

// ── Controller errors ────────────────────────────────────────────────

/// Parsed `{ "error": { "attributes": { "code", "text" } } }` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerFault {
    pub code: Option<String>,
    pub text: String,
}

impl ControllerFault {
    pub fn from_imdata(data: &Imdata) -> Option<Self> {
        let fragment = data
            .imdata
            .iter()
            .filter_map(Fragment::parse)
            .find(|f| f.class_name == "error")?;
        Some(Self {
            code: fragment.attr("code"),
            text: fragment.attr("text").unwrap_or_default(),
        })
    }
}

// ── Subscriptions ────────────────────────────────────────────────────

/// Controller-assigned subscription identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub String);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Response to a `subscription=yes` query: the id plus the initial snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionAck {
    #[serde(rename = "subscriptionId")]
    pub id: SubscriptionId,
    #[serde(default)]
    pub imdata: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(SubscriptionId),
    Many(Vec<SubscriptionId>),
}

/// One frame read from the notification socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawNotification")]
pub struct Notification {
    pub subscription_ids: Vec<SubscriptionId>,
    pub imdata: Vec<Value>,
}

#[derive(Deserialize)]
struct RawNotification {
    #[serde(rename = "subscriptionId")]
    subscription_id: OneOrMany,
    #[serde(default)]
    imdata: Vec<Value>,
}

impl From<RawNotification> for Notification {
    fn from(raw: RawNotification) -> Self {
        let subscription_ids = match raw.subscription_id {
            OneOrMany::One(id) => vec![id],
            OneOrMany::Many(ids) => ids,
        };
        Self {
            subscription_ids,
            imdata: raw.imdata,
        }
    }
}

impl Notification {
    pub fn parse(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: text.to_owned(),
        })
    }
}
