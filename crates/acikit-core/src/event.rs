// ── Subscription events ──
//
// What consumers pop from a subscription queue: either a managed-object
// change parsed from a notification frame (or a synthetic `created` from the
// initial snapshot), or an in-band marker that the notification channel was
// re-established and changes may have been missed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use strum::{Display, EnumString};

use acikit_api::Fragment;

/// Change kind carried in a fragment's `status` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Created,
    Modified,
    Deleted,
}

/// One managed-object change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoEvent {
    pub class_name: String,
    pub dn: String,
    pub status: EventStatus,
    pub attributes: Map<String, Value>,
    pub received_at: DateTime<Utc>,
}

impl MoEvent {
    /// Parse a notification fragment. Fragments without a `dn` are rejected;
    /// a missing or unrecognized `status` reads as `modified`.
    pub fn from_fragment(value: &Value) -> Option<Self> {
        let fragment = Fragment::parse(value)?;
        let dn = fragment.attr("dn")?;
        let status = fragment
            .attr("status")
            .and_then(|s| s.parse().ok())
            .unwrap_or(EventStatus::Modified);
        Some(Self {
            class_name: fragment.class_name.to_owned(),
            dn,
            status,
            attributes: fragment.attributes.clone(),
            received_at: Utc::now(),
        })
    }

    /// A snapshot object presented as a `created` event.
    pub fn snapshot(value: &Value) -> Option<Self> {
        Self::from_fragment(value).map(|mut event| {
            event.status = EventStatus::Created;
            event
        })
    }

    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes
            .get(key)
            .and_then(acikit_api::models::attribute_string)
    }
}

/// Item delivered on a subscription queue.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Object(MoEvent),
    /// The channel reconnected (now at `generation`); events the controller
    /// emitted during the outage are lost and consumers should resync.
    SubscriptionLost { generation: u64 },
}

impl SubscriptionEvent {
    pub fn as_object(&self) -> Option<&MoEvent> {
        match self {
            Self::Object(event) => Some(event),
            Self::SubscriptionLost { .. } => None,
        }
    }

    pub fn is_lost(&self) -> bool {
        matches!(self, Self::SubscriptionLost { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_status() {
        let event = MoEvent::from_fragment(&json!({
            "fvTenant": { "attributes": { "dn": "uni/tn-t2", "status": "deleted" } }
        }))
        .unwrap();
        assert_eq!(event.status, EventStatus::Deleted);
        assert_eq!(event.class_name, "fvTenant");
        assert_eq!(event.dn, "uni/tn-t2");
    }

    #[test]
    fn missing_status_is_modified() {
        let event = MoEvent::from_fragment(&json!({
            "fvTenant": { "attributes": { "dn": "uni/tn-t2", "descr": "x" } }
        }))
        .unwrap();
        assert_eq!(event.status, EventStatus::Modified);
        assert_eq!(event.attribute("descr").as_deref(), Some("x"));
    }

    #[test]
    fn fragment_without_dn_is_rejected() {
        assert!(MoEvent::from_fragment(&json!({ "fvTenant": { "attributes": {} } })).is_none());
    }

    #[test]
    fn snapshot_forces_created() {
        let event = MoEvent::snapshot(&json!({
            "fvTenant": { "attributes": { "dn": "uni/tn-t1", "status": "" } }
        }))
        .unwrap();
        assert_eq!(event.status, EventStatus::Created);
    }
}
