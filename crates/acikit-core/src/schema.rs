//! Managed-object classes.
//!
//! A [`MoClass`] describes one controller class: its name, how its relative
//! name is formed, which classes it may live under, which relation children
//! it understands, and which search terms it contributes. Nodes in the
//! [`Graph`](crate::graph::Graph) hold an `Arc<dyn MoClass>` and defer all
//! kind-specific behavior to it.
//!
//! The built-in classes are plain [`StaticClass`] tables. Applications with
//! richer needs implement the trait themselves and register it in a
//! [`Registry`](crate::registry::Registry).

use std::fmt;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use acikit_api::models::attribute_string;

use crate::graph::NodeView;
use crate::search::Term;

/// Attributes that describe the wire event rather than the object.
const TRANSIENT_ATTRIBUTES: &[&str] = &["dn", "rn", "status", "childAction"];

/// A relation child class such as `fvRsBd`.
///
/// On build, a child fragment of class `class_name` under the owning node
/// resolves to a target of class `target_class`, either through its `tDn`
/// or by the name in `name_attribute`. On push, each attached (or detached)
/// relation to a `target_class` node serializes as
/// `{class_name: {attributes: {name_attribute: <peer name>}}}`, together with
/// any other attributes the child carried when it was built. Children whose
/// target never resolved are pushed back as they arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationSpec {
    pub class_name: &'static str,
    pub target_class: &'static str,
    pub name_attribute: &'static str,
}

/// Kind-specific behavior of a managed-object class.
pub trait MoClass: Send + Sync + fmt::Debug {
    /// Controller class name, e.g. `fvTenant`.
    fn class_name(&self) -> &str;

    /// Human-readable kind, e.g. `Tenant`.
    fn kind(&self) -> &str;

    /// Relative-name prefix, e.g. `tn-`.
    fn rn_prefix(&self) -> &str;

    /// Classes this class may be a child of. Empty for top-level classes.
    fn parent_classes(&self) -> &[&'static str];

    /// DN prefix for instances without a parent node (`uni` for tenants).
    fn root_dn(&self) -> Option<&str> {
        None
    }

    fn naming_attribute(&self) -> &str {
        "name"
    }

    /// Attributes a fragment must carry to be built.
    fn mandatory_attributes(&self) -> &[&'static str] {
        &[]
    }

    fn relations(&self) -> &[RelationSpec] {
        &[]
    }

    /// Copy a fragment's flat attributes into the stored attribute map.
    fn populate(&self, attributes: &Map<String, Value>) -> IndexMap<String, String> {
        stored_attributes(attributes)
    }

    /// Keyword/value pairs this node contributes to search.
    fn define_searchables(&self, node: &NodeView<'_>) -> Vec<Term> {
        default_searchables(node)
    }

    fn accepts_parent(&self, parent_class: &str) -> bool {
        self.parent_classes().contains(&parent_class)
    }
}

/// A fragment's attributes minus the ones describing the wire event.
pub fn stored_attributes(attributes: &Map<String, Value>) -> IndexMap<String, String> {
    attributes
        .iter()
        .filter(|(k, _)| !TRANSIENT_ATTRIBUTES.contains(&k.as_str()))
        .filter_map(|(k, v)| attribute_string(v).map(|s| (k.clone(), s)))
        .collect()
}

/// Class, name, DN and every non-empty attribute as primary terms; each
/// attached relation as an indirect term keyed by the peer's kind.
pub fn default_searchables(node: &NodeView<'_>) -> Vec<Term> {
    let mut terms = vec![
        Term::primary("class", node.kind()),
        Term::primary("name", node.name()),
        Term::primary("dn", node.dn()),
    ];
    terms.extend(
        node.attributes()
            .iter()
            .filter(|(k, v)| k.as_str() != "name" && !v.is_empty())
            .map(|(k, v)| Term::primary(k, v)),
    );
    terms.extend(
        node.related()
            .map(|peer| Term::indirect(peer.kind().to_ascii_lowercase(), peer.name())),
    );
    terms
}

// ── Built-in classes ─────────────────────────────────────────────────

/// Table-driven class definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticClass {
    pub class_name: &'static str,
    pub kind: &'static str,
    pub rn_prefix: &'static str,
    pub parents: &'static [&'static str],
    pub root_dn: Option<&'static str>,
    pub mandatory: &'static [&'static str],
    pub relations: &'static [RelationSpec],
}

impl MoClass for StaticClass {
    fn class_name(&self) -> &str {
        self.class_name
    }

    fn kind(&self) -> &str {
        self.kind
    }

    fn rn_prefix(&self) -> &str {
        self.rn_prefix
    }

    fn parent_classes(&self) -> &[&'static str] {
        self.parents
    }

    fn root_dn(&self) -> Option<&str> {
        self.root_dn
    }

    fn mandatory_attributes(&self) -> &[&'static str] {
        self.mandatory
    }

    fn relations(&self) -> &[RelationSpec] {
        self.relations
    }
}

pub const TENANT: StaticClass = StaticClass {
    class_name: "fvTenant",
    kind: "Tenant",
    rn_prefix: "tn-",
    parents: &[],
    root_dn: Some("uni"),
    mandatory: &["name"],
    relations: &[],
};

pub const APP_PROFILE: StaticClass = StaticClass {
    class_name: "fvAp",
    kind: "AppProfile",
    rn_prefix: "ap-",
    parents: &["fvTenant"],
    root_dn: None,
    mandatory: &["name"],
    relations: &[],
};

pub const EPG: StaticClass = StaticClass {
    class_name: "fvAEPg",
    kind: "EPG",
    rn_prefix: "epg-",
    parents: &["fvAp"],
    root_dn: None,
    mandatory: &["name"],
    relations: &[RelationSpec {
        class_name: "fvRsBd",
        target_class: "fvBD",
        name_attribute: "tnFvBDName",
    }],
};

pub const BRIDGE_DOMAIN: StaticClass = StaticClass {
    class_name: "fvBD",
    kind: "BridgeDomain",
    rn_prefix: "BD-",
    parents: &["fvTenant"],
    root_dn: None,
    mandatory: &["name"],
    relations: &[RelationSpec {
        class_name: "fvRsCtx",
        target_class: "fvCtx",
        name_attribute: "tnFvCtxName",
    }],
};

pub const CONTEXT: StaticClass = StaticClass {
    class_name: "fvCtx",
    kind: "Context",
    rn_prefix: "ctx-",
    parents: &["fvTenant"],
    root_dn: None,
    mandatory: &["name"],
    relations: &[],
};

pub const BUILTIN_CLASSES: &[StaticClass] = &[TENANT, APP_PROFILE, EPG, BRIDGE_DOMAIN, CONTEXT];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn populate_skips_transient_attributes() {
        let attrs = json!({
            "dn": "uni/tn-t1",
            "name": "t1",
            "status": "created",
            "descr": "",
            "pcTag": 49153
        });
        let stored = TENANT.populate(attrs.as_object().unwrap_or(&Map::new()));
        assert_eq!(stored.get("name").map(String::as_str), Some("t1"));
        assert_eq!(stored.get("pcTag").map(String::as_str), Some("49153"));
        assert!(!stored.contains_key("dn"));
        assert!(!stored.contains_key("status"));
    }

    #[test]
    fn parents_are_declared() {
        assert!(EPG.accepts_parent("fvAp"));
        assert!(!EPG.accepts_parent("fvTenant"));
        assert!(TENANT.parent_classes().is_empty());
    }
}
