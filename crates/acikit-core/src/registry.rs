// ── Class registry ──
//
// Maps controller class names to their `MoClass` implementation. Built once
// at start-up and shared (read-only) by every graph and controller; there is
// no global table.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::dn;
use crate::error::SchemaError;
use crate::schema::{BUILTIN_CLASSES, MoClass};

/// Class of tag children (`{tagInst: {attributes: {name}}}`).
pub const TAG_CLASS: &str = "tagInst";

/// One step of a resolved DN.
#[derive(Debug, Clone)]
pub struct DnLink {
    pub class: Arc<dyn MoClass>,
    pub name: String,
    pub dn: String,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    classes: IndexMap<String, Arc<dyn MoClass>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in tenant/app-profile/EPG/BD/context classes.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for class in BUILTIN_CLASSES {
            registry.register(*class);
        }
        registry
    }

    /// Add (or replace) a class.
    pub fn register(&mut self, class: impl MoClass + 'static) -> &mut Self {
        self.register_arc(Arc::new(class))
    }

    pub fn register_arc(&mut self, class: Arc<dyn MoClass>) -> &mut Self {
        self.classes.insert(class.class_name().to_owned(), class);
        self
    }

    pub fn get(&self, class_name: &str) -> Option<&Arc<dyn MoClass>> {
        self.classes.get(class_name)
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.classes.contains_key(class_name)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn is_tag(class_name: &str) -> bool {
        class_name == TAG_CLASS
    }

    /// Resolve every RN of `dn` to a registered class, outermost first.
    ///
    /// Leading RNs that form a class's `root_dn` (e.g. `uni`) are consumed
    /// without producing a link.
    pub fn resolve_dn(&self, dn: &str) -> Result<Vec<DnLink>, SchemaError> {
        let rns = dn::split(dn)?;

        let (start, root) = (0..rns.len())
            .find_map(|i| {
                let base = rns[..i].join("/");
                self.classes
                    .values()
                    .filter(|c| match c.root_dn() {
                        Some(root) => root == base,
                        None => i == 0 && c.parent_classes().is_empty(),
                    })
                    .find(|c| dn::name_from_rn(rns[i], c.rn_prefix()).is_some())
                    .map(|c| (i, Arc::clone(c)))
            })
            .ok_or_else(|| SchemaError::InvalidDn {
                dn: dn.to_owned(),
                reason: "no registered top-level class matches".into(),
            })?;

        let mut links = Vec::with_capacity(rns.len() - start);
        let mut current_dn = rns[..=start].join("/");
        links.push(DnLink {
            name: name_of(rns[start], root.rn_prefix(), dn)?,
            class: root,
            dn: current_dn.clone(),
        });

        for rn in &rns[start + 1..] {
            let parent_class = links
                .last()
                .map(|l| l.class.class_name().to_owned())
                .unwrap_or_default();
            let class = self
                .child_class_for_rn(&parent_class, rn)
                .ok_or_else(|| SchemaError::UnknownClass(format!("`{rn}` under {parent_class}")))?;
            current_dn = format!("{current_dn}/{rn}");
            links.push(DnLink {
                name: name_of(rn, class.rn_prefix(), dn)?,
                class,
                dn: current_dn.clone(),
            });
        }
        Ok(links)
    }

    /// The class under `parent_class` whose RN prefix matches `rn`
    /// (longest prefix wins).
    fn child_class_for_rn(&self, parent_class: &str, rn: &str) -> Option<Arc<dyn MoClass>> {
        self.classes
            .values()
            .filter(|c| c.accepts_parent(parent_class))
            .filter(|c| dn::name_from_rn(rn, c.rn_prefix()).is_some())
            .max_by_key(|c| c.rn_prefix().len())
            .cloned()
    }
}

fn name_of(rn: &str, prefix: &str, dn: &str) -> Result<String, SchemaError> {
    dn::name_from_rn(rn, prefix)
        .map(str::to_owned)
        .ok_or_else(|| SchemaError::InvalidDn {
            dn: dn.to_owned(),
            reason: format!("`{rn}` has no name after `{prefix}`"),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn resolves_typed_chain() {
        let registry = Registry::with_defaults();
        let links = registry.resolve_dn("uni/tn-t1/ap-app/epg-web").unwrap();
        let classes: Vec<&str> = links.iter().map(|l| l.class.class_name()).collect();
        assert_eq!(classes, vec!["fvTenant", "fvAp", "fvAEPg"]);
        assert_eq!(links[2].name, "web");
        assert_eq!(links[1].dn, "uni/tn-t1/ap-app");
    }

    #[test]
    fn unregistered_rn_is_unknown_class() {
        let registry = Registry::with_defaults();
        let err = registry.resolve_dn("uni/tn-t1/out-l3").unwrap_err();
        assert!(matches!(err, SchemaError::UnknownClass(_)));
    }

    #[test]
    fn rn_must_fit_parent() {
        let registry = Registry::with_defaults();
        // EPGs live under application profiles, not tenants.
        assert!(registry.resolve_dn("uni/tn-t1/epg-web").is_err());
    }

    #[test]
    fn missing_root_is_invalid() {
        let registry = Registry::with_defaults();
        assert!(matches!(
            registry.resolve_dn("topology/pod-1"),
            Err(SchemaError::InvalidDn { .. })
        ));
    }

    #[test]
    fn bracketed_names() {
        let registry = Registry::with_defaults();
        let links = registry.resolve_dn("uni/tn-[a/b]").unwrap();
        assert_eq!(links[0].name, "a/b");
        assert_eq!(links[0].dn, "uni/tn-[a/b]");
    }
}
