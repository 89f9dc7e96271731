//! In-memory managed-object graph.
//!
//! Nodes live in an arena owned by [`Graph`] and are addressed by
//! [`NodeId`]. Parent and relation edges are ids into the same arena, so the
//! ownership tree has no cycles even though the index graph does.
//!
//! A graph is built from controller responses ([`Graph::build`]), assembled
//! by hand for a push ([`Graph::add_root`] / [`Graph::add_child`]), kept up
//! to date from subscription events ([`Graph::apply_event`]), and serialized
//! back to controller JSON ([`Graph::get_json`]).
//!
//! The graph is not internally synchronized. Share it behind a lock if more
//! than one task mutates it.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use acikit_api::Fragment;

use crate::dn;
use crate::error::SchemaError;
use crate::event::{EventStatus, MoEvent};
use crate::registry::{DnLink, Registry, TAG_CLASS};
use crate::schema::{MoClass, RelationSpec, stored_attributes};
use crate::search::SearchTerm;

// ── Identifiers ──────────────────────────────────────────────────────

/// Index of a node in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// `(class, parent, name)`: what makes two nodes the same object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub class_name: String,
    /// DN of the parent node, `None` for roots.
    pub parent: Option<String>,
    pub name: String,
}

// ── Relations and tags ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationStatus {
    Attached,
    /// Kept until the next push so the controller sees the unlink.
    Detached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub peer: NodeId,
    pub status: RelationStatus,
    pub relation_type: Option<String>,
}

impl Relation {
    pub fn is_attached(&self) -> bool {
        self.status == RelationStatus::Attached
    }

    fn matches(&self, peer: NodeId, relation_type: Option<&str>) -> bool {
        self.peer == peer && self.relation_type.as_deref() == relation_type
    }
}

/// A relation child as the controller sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationChild {
    pub class_name: String,
    pub attributes: IndexMap<String, String>,
    /// Target node, once resolved.
    pub peer: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub deleted: bool,
}

// ── Node ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Node {
    class: Arc<dyn MoClass>,
    name: String,
    dn: String,
    parent: Option<NodeId>,
    parent_dn: Option<String>,
    children: Vec<NodeId>,
    attributes: IndexMap<String, String>,
    relations: Vec<Relation>,
    attachments: Vec<Relation>,
    relation_children: Vec<RelationChild>,
    tags: Vec<Tag>,
    deleted: bool,
    /// Created only as an ancestor of something else; no fragment seen yet.
    implicit: bool,
    removed: bool,
}

impl Node {
    pub fn class(&self) -> &Arc<dyn MoClass> {
        &self.class
    }

    pub fn class_name(&self) -> &str {
        self.class.class_name()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dn(&self) -> &str {
        &self.dn
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn attributes(&self) -> &IndexMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Outgoing relations.
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Incoming relations (mirrors of other nodes' outgoing ones).
    pub fn attachments(&self) -> &[Relation] {
        &self.attachments
    }

    /// Relation children read from the controller, resolved or not.
    pub fn relation_children(&self) -> &[RelationChild] {
        &self.relation_children
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// This node's own deletion flag (ancestors not considered).
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn identity(&self) -> Identity {
        Identity {
            class_name: self.class_name().to_owned(),
            parent: self.parent_dn.clone(),
            name: self.name.clone(),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.class_name() == other.class_name()
            && self.parent_dn == other.parent_dn
            && self.name == other.name
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.class_name().hash(state);
        self.parent_dn.hash(state);
        self.name.hash(state);
    }
}

/// Read-only view of one node with access to its neighbours.
#[derive(Clone, Copy)]
pub struct NodeView<'g> {
    graph: &'g Graph,
    id: NodeId,
}

impl<'g> NodeView<'g> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    fn node(&self) -> &'g Node {
        self.graph.node(self.id)
    }

    pub fn kind(&self) -> &'g str {
        self.node().class.kind()
    }

    pub fn class_name(&self) -> &'g str {
        self.node().class_name()
    }

    pub fn name(&self) -> &'g str {
        &self.node().name
    }

    pub fn dn(&self) -> &'g str {
        &self.node().dn
    }

    pub fn attributes(&self) -> &'g IndexMap<String, String> {
        &self.node().attributes
    }

    /// Peers of this node's attached outgoing relations.
    pub fn related(&self) -> impl Iterator<Item = NodeView<'g>> + 'g {
        let graph = self.graph;
        self.node()
            .relations
            .iter()
            .filter(|r| r.is_attached())
            .map(move |r| graph.view(r.peer))
    }
}

// ── Build report ─────────────────────────────────────────────────────

/// A relation child whose target was not present in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedRelation {
    pub source: String,
    pub relation_class: String,
    pub target: String,
}

/// Outcome of a bulk build. The walk never aborts early; per-fragment
/// failures are collected here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Nodes for the top-level fragments, in response order.
    pub nodes: Vec<NodeId>,
    /// Count of nodes instantiated (descendants and implied ancestors included).
    pub created: usize,
    pub errors: Vec<SchemaError>,
    /// Class names of fragments that were ignored.
    pub skipped: Vec<String>,
    pub unresolved: Vec<UnresolvedRelation>,
}

impl BuildReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// First schema error, for callers that want all-or-nothing.
    pub fn ensure_clean(&self) -> Result<(), SchemaError> {
        match self.errors.first() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

struct PendingRelation {
    source: NodeId,
    /// Index into the source's relation children.
    child: usize,
    spec: RelationSpec,
    target_dn: Option<String>,
    target_name: Option<String>,
}

struct BuildContext<'a> {
    limit_to: &'a [&'a str],
    pending: Vec<PendingRelation>,
    report: BuildReport,
}

impl BuildContext<'_> {
    fn allows(&self, class_name: &str) -> bool {
        self.limit_to.is_empty() || self.limit_to.contains(&class_name)
    }

    fn skip(&mut self, class_name: &str) {
        if !self.report.skipped.iter().any(|s| s == class_name) {
            self.report.skipped.push(class_name.to_owned());
        }
    }
}

// ── Graph ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Graph {
    registry: Arc<Registry>,
    nodes: Vec<Node>,
    by_dn: HashMap<String, NodeId>,
    roots: Vec<NodeId>,
    dropped_events: u64,
}

impl Graph {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            nodes: Vec::new(),
            by_dn: HashMap::new(),
            roots: Vec::new(),
            dropped_events: 0,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.by_dn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_dn.is_empty()
    }

    /// # Panics
    ///
    /// If `id` was issued by a different graph.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn view(&self, id: NodeId) -> NodeView<'_> {
        NodeView { graph: self, id }
    }

    pub fn dn(&self, id: NodeId) -> &str {
        &self.node(id).dn
    }

    pub fn find_by_dn(&self, dn: &str) -> Option<NodeId> {
        self.by_dn.get(dn).copied()
    }

    /// Nodes without a parent node, in creation order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Every live node, in creation order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.removed)
            .map(|(i, _)| NodeId(i))
    }

    pub fn children_of_kind(&self, id: NodeId, class_name: &str) -> Vec<NodeId> {
        self.node(id)
            .children
            .iter()
            .copied()
            .filter(|c| self.node(*c).class_name() == class_name)
            .collect()
    }

    /// Parent, grandparent, ... up to the root.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = self.node(id).parent;
        while let Some(p) = cursor {
            out.push(p);
            cursor = self.node(p).parent;
        }
        out
    }

    /// All nodes below `id`, pre-order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.node(id).children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.node(next).children.iter().rev().copied());
        }
        out
    }

    /// Events discarded because their DN or class could not be mapped.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    // ── Construction ─────────────────────────────────────────────────

    /// Create a top-level node (e.g. a tenant).
    pub fn add_root(&mut self, class_name: &str, name: &str) -> Result<NodeId, SchemaError> {
        let class = self.class(class_name)?;
        self.insert(class, name, None, false)
    }

    /// Create a node under `parent`.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        class_name: &str,
        name: &str,
    ) -> Result<NodeId, SchemaError> {
        let class = self.class(class_name)?;
        self.insert(class, name, Some(parent), false)
    }

    pub fn set_attribute(&mut self, id: NodeId, key: impl Into<String>, value: impl Into<String>) {
        self.node_mut(id).attributes.insert(key.into(), value.into());
    }

    fn class(&self, class_name: &str) -> Result<Arc<dyn MoClass>, SchemaError> {
        self.registry
            .get(class_name)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownClass(class_name.to_owned()))
    }

    fn dn_for(&self, class: &dyn MoClass, name: &str, parent: Option<NodeId>) -> String {
        let rn = dn::rn(class.rn_prefix(), name);
        match (parent, class.root_dn()) {
            (Some(p), _) => format!("{}/{rn}", self.node(p).dn),
            (None, Some(root)) => format!("{root}/{rn}"),
            (None, None) => rn,
        }
    }

    fn insert(
        &mut self,
        class: Arc<dyn MoClass>,
        name: &str,
        parent: Option<NodeId>,
        implicit: bool,
    ) -> Result<NodeId, SchemaError> {
        if name.is_empty() {
            return Err(SchemaError::MissingAttribute {
                class: class.class_name().to_owned(),
                attribute: class.naming_attribute().to_owned(),
            });
        }
        match parent {
            Some(p) => {
                let parent_class = self.node(p).class_name();
                if !class.accepts_parent(parent_class) {
                    return Err(SchemaError::InvalidParent {
                        child: class.class_name().to_owned(),
                        parent: parent_class.to_owned(),
                    });
                }
            }
            None if class.root_dn().is_none() && !class.parent_classes().is_empty() => {
                return Err(SchemaError::InvalidParent {
                    child: class.class_name().to_owned(),
                    parent: "(none)".into(),
                });
            }
            None => {}
        }

        let dn = self.dn_for(class.as_ref(), name, parent);
        if self.by_dn.contains_key(&dn) {
            return Err(SchemaError::Duplicate { dn });
        }

        let id = NodeId(self.nodes.len());
        let parent_dn = parent.map(|p| self.node(p).dn.clone());
        let mut attributes = IndexMap::new();
        attributes.insert(class.naming_attribute().to_owned(), name.to_owned());
        self.nodes.push(Node {
            class,
            name: name.to_owned(),
            dn: dn.clone(),
            parent,
            parent_dn,
            children: Vec::new(),
            attributes,
            relations: Vec::new(),
            attachments: Vec::new(),
            relation_children: Vec::new(),
            tags: Vec::new(),
            deleted: false,
            implicit,
            removed: false,
        });
        self.by_dn.insert(dn, id);
        match parent {
            Some(p) => self.node_mut(p).children.push(id),
            None => self.roots.push(id),
        }
        Ok(id)
    }

    /// Find or create each link of a resolved DN; returns the last one.
    fn ensure_chain(&mut self, links: &[DnLink]) -> Result<Option<NodeId>, SchemaError> {
        let mut parent = None;
        for link in links {
            let id = match self.find_by_dn(&link.dn) {
                Some(id) => id,
                None => {
                    debug!(dn = %link.dn, "instantiating ancestor");
                    self.insert(Arc::clone(&link.class), &link.name, parent, true)?
                }
            };
            parent = Some(id);
        }
        Ok(parent)
    }

    // ── Relations ────────────────────────────────────────────────────

    /// Attach `a → b`. Both sides are updated.
    pub fn attach(&mut self, a: NodeId, b: NodeId, relation_type: Option<&str>) {
        upsert_relation(&mut self.node_mut(a).relations, b, relation_type, RelationStatus::Attached);
        upsert_relation(&mut self.node_mut(b).attachments, a, relation_type, RelationStatus::Attached);
    }

    /// Detach `a → b`, leaving detached markers on both sides.
    /// Returns `false` if no such relation existed.
    pub fn detach(&mut self, a: NodeId, b: NodeId, relation_type: Option<&str>) -> bool {
        let found = self
            .node(a)
            .relations
            .iter()
            .any(|r| r.matches(b, relation_type));
        if found {
            upsert_relation(&mut self.node_mut(a).relations, b, relation_type, RelationStatus::Detached);
            upsert_relation(&mut self.node_mut(b).attachments, a, relation_type, RelationStatus::Detached);
        }
        found
    }

    pub fn has_relation(&self, a: NodeId, b: NodeId, relation_type: Option<&str>) -> bool {
        self.node(a)
            .relations
            .iter()
            .any(|r| r.is_attached() && r.matches(b, relation_type))
    }

    pub fn has_attachment(&self, b: NodeId, a: NodeId, relation_type: Option<&str>) -> bool {
        self.node(b)
            .attachments
            .iter()
            .any(|r| r.is_attached() && r.matches(a, relation_type))
    }

    // ── Tags ─────────────────────────────────────────────────────────

    /// Add a tag; adding an existing (or lazily removed) tag revives it.
    pub fn add_tag(&mut self, id: NodeId, name: &str) {
        let tags = &mut self.node_mut(id).tags;
        match tags.iter_mut().find(|t| t.name == name) {
            Some(tag) => tag.deleted = false,
            None => tags.push(Tag {
                name: name.to_owned(),
                deleted: false,
            }),
        }
    }

    /// Mark a tag deleted. It serializes with `status="deleted"` until
    /// [`clear_pushed`](Self::clear_pushed).
    pub fn remove_tag(&mut self, id: NodeId, name: &str) -> bool {
        match self.node_mut(id).tags.iter_mut().find(|t| t.name == name) {
            Some(tag) => {
                tag.deleted = true;
                true
            }
            None => false,
        }
    }

    pub fn has_tag(&self, id: NodeId, name: &str) -> bool {
        self.node(id).tags.iter().any(|t| t.name == name && !t.deleted)
    }

    // ── Deletion ─────────────────────────────────────────────────────

    pub fn mark_as_deleted(&mut self, id: NodeId) {
        self.node_mut(id).deleted = true;
    }

    /// Deleted itself or under a deleted ancestor.
    pub fn is_deleted(&self, id: NodeId) -> bool {
        self.node(id).deleted || self.ancestors(id).iter().any(|a| self.node(*a).deleted)
    }

    /// Forget detached relations and deleted tags under `id` once a push
    /// has been accepted.
    pub fn clear_pushed(&mut self, id: NodeId) {
        let mut subtree = vec![id];
        subtree.extend(self.descendants(id));
        for node_id in subtree {
            let detached: Vec<Relation> = self
                .node(node_id)
                .relations
                .iter()
                .filter(|r| !r.is_attached())
                .cloned()
                .collect();
            for rel in &detached {
                self.node_mut(rel.peer).attachments.retain(|m| {
                    m.is_attached() || !m.matches(node_id, rel.relation_type.as_deref())
                });
            }
            let node = self.node_mut(node_id);
            node.relation_children.retain(|c| {
                c.peer.is_none_or(|peer| {
                    !detached
                        .iter()
                        .any(|r| r.peer == peer && r.relation_type.as_deref().is_none_or(|t| t == c.class_name))
                })
            });
            node.relations.retain(Relation::is_attached);
            node.tags.retain(|t| !t.deleted);
        }
    }

    /// Unlink every node flagged deleted, with its subtree. Returns how many
    /// nodes were removed.
    pub fn prune_deleted(&mut self) -> usize {
        let flagged: Vec<NodeId> = self
            .ids()
            .filter(|id| self.node(*id).deleted)
            .collect();
        let mut removed = 0;
        for id in flagged {
            if !self.node(id).removed {
                removed += self.remove(id);
            }
        }
        removed
    }

    fn remove(&mut self, id: NodeId) -> usize {
        let mut subtree = vec![id];
        subtree.extend(self.descendants(id));

        match self.node(id).parent {
            Some(p) => self.node_mut(p).children.retain(|c| *c != id),
            None => self.roots.retain(|r| *r != id),
        }
        for node_id in &subtree {
            let node_id = *node_id;
            let peers: Vec<NodeId> = self
                .node(node_id)
                .relations
                .iter()
                .chain(self.node(node_id).attachments.iter())
                .map(|r| r.peer)
                .collect();
            for peer in peers {
                let peer_node = self.node_mut(peer);
                peer_node.relations.retain(|r| r.peer != node_id);
                peer_node.attachments.retain(|r| r.peer != node_id);
                peer_node.relation_children.retain(|c| c.peer != Some(node_id));
            }
            let dn = self.node(node_id).dn.clone();
            self.by_dn.remove(&dn);
            self.node_mut(node_id).removed = true;
        }
        subtree.len()
    }

    // ── Building from controller JSON ────────────────────────────────

    /// Build nodes from a controller response's `imdata` array.
    ///
    /// Each top-level fragment is placed under `parent` when given, otherwise
    /// under the ancestors its `dn` names (created on demand). `limit_to`
    /// restricts which classes are instantiated; empty means all registered
    /// classes. Relation children are resolved once the whole response has
    /// been walked.
    pub fn build(
        &mut self,
        working_data: &[Value],
        parent: Option<NodeId>,
        limit_to: &[&str],
    ) -> BuildReport {
        let mut ctx = BuildContext {
            limit_to,
            pending: Vec::new(),
            report: BuildReport::default(),
        };
        let before = self.len();

        for value in working_data {
            let Some(fragment) = Fragment::parse(value) else {
                ctx.report
                    .errors
                    .push(SchemaError::Malformed("not a managed-object fragment".into()));
                continue;
            };
            if Registry::is_tag(fragment.class_name) {
                if let (Some(p), Some(name)) = (parent, fragment.attr("name")) {
                    self.add_tag(p, &name);
                }
                continue;
            }
            let Some(class) = self.registry.get(fragment.class_name).cloned() else {
                ctx.skip(fragment.class_name);
                continue;
            };
            if !ctx.allows(fragment.class_name) {
                ctx.skip(fragment.class_name);
                continue;
            }

            let placed = match parent {
                Some(p) => Ok(Some(p)),
                None => self.parent_from_dn(&fragment, class.as_ref()),
            };
            match placed.and_then(|p| self.build_fragment(&fragment, &class, p, &mut ctx)) {
                Ok(id) => ctx.report.nodes.push(id),
                Err(e) => {
                    warn!(class = fragment.class_name, error = %e, "skipping fragment");
                    ctx.report.errors.push(e);
                }
            }
        }

        self.resolve_relations(&mut ctx);
        ctx.report.created = self.len() - before;
        ctx.report
    }

    fn parent_from_dn(
        &mut self,
        fragment: &Fragment<'_>,
        class: &dyn MoClass,
    ) -> Result<Option<NodeId>, SchemaError> {
        let Some(dn) = fragment.attr("dn") else {
            return Ok(None);
        };
        let links = self.registry.resolve_dn(&dn)?;
        match links.split_last() {
            Some((last, ancestors)) if last.class.class_name() == class.class_name() => {
                self.ensure_chain(ancestors)
            }
            _ => Err(SchemaError::InvalidDn {
                dn,
                reason: format!("does not name a {}", class.class_name()),
            }),
        }
    }

    fn build_fragment(
        &mut self,
        fragment: &Fragment<'_>,
        class: &Arc<dyn MoClass>,
        parent: Option<NodeId>,
        ctx: &mut BuildContext<'_>,
    ) -> Result<NodeId, SchemaError> {
        for attribute in class.mandatory_attributes() {
            if fragment.attr(attribute).is_none() {
                return Err(SchemaError::MissingAttribute {
                    class: class.class_name().to_owned(),
                    attribute: (*attribute).to_owned(),
                });
            }
        }

        let name = fragment
            .attr(class.naming_attribute())
            .or_else(|| name_from_fragment_dn(fragment, class.as_ref()))
            .ok_or_else(|| SchemaError::MissingAttribute {
                class: class.class_name().to_owned(),
                attribute: class.naming_attribute().to_owned(),
            })?;

        let dn = self.dn_for(class.as_ref(), &name, parent);
        let id = match self.find_by_dn(&dn) {
            Some(existing) if self.node(existing).implicit => {
                self.node_mut(existing).implicit = false;
                existing
            }
            Some(_) => return Err(SchemaError::Duplicate { dn }),
            None => self.insert(Arc::clone(class), &name, parent, false)?,
        };

        let populated = class.populate(fragment.attributes);
        self.node_mut(id).attributes.extend(populated);
        if fragment.attr("status").as_deref() == Some("deleted") {
            self.mark_as_deleted(id);
        }

        for child in fragment.children {
            let Some(child_fragment) = Fragment::parse(child) else {
                continue;
            };
            let child_class_name = child_fragment.class_name;

            if child_class_name == TAG_CLASS {
                if let Some(tag) = child_fragment.attr("name") {
                    self.add_tag(id, &tag);
                }
            } else if let Some(spec) = class
                .relations()
                .iter()
                .find(|s| s.class_name == child_class_name)
            {
                let children = &mut self.node_mut(id).relation_children;
                children.push(RelationChild {
                    class_name: child_class_name.to_owned(),
                    attributes: stored_attributes(child_fragment.attributes),
                    peer: None,
                });
                ctx.pending.push(PendingRelation {
                    source: id,
                    child: children.len() - 1,
                    spec: *spec,
                    target_dn: child_fragment.attr("tDn").filter(|s| !s.is_empty()),
                    target_name: child_fragment
                        .attr(spec.name_attribute)
                        .filter(|s| !s.is_empty()),
                });
            } else if let Some(child_class) = self
                .registry
                .get(child_class_name)
                .filter(|c| c.accepts_parent(class.class_name()))
                .cloned()
            {
                if !ctx.allows(child_class_name) {
                    ctx.skip(child_class_name);
                    continue;
                }
                if let Err(e) = self.build_fragment(&child_fragment, &child_class, Some(id), ctx) {
                    warn!(class = child_class_name, error = %e, "skipping child fragment");
                    ctx.report.errors.push(e);
                }
            } else {
                ctx.skip(child_class_name);
            }
        }

        Ok(id)
    }

    fn resolve_relations(&mut self, ctx: &mut BuildContext<'_>) {
        for pending in std::mem::take(&mut ctx.pending) {
            if pending.target_dn.is_none() && pending.target_name.is_none() {
                continue;
            }
            let target = pending
                .target_dn
                .as_deref()
                .and_then(|dn| self.find_by_dn(dn))
                .or_else(|| {
                    pending.target_name.as_deref().and_then(|name| {
                        self.resolve_by_name(pending.source, pending.spec.target_class, name)
                    })
                });
            match target {
                Some(target) => {
                    self.attach(pending.source, target, Some(pending.spec.class_name));
                    if let Some(child) = self
                        .node_mut(pending.source)
                        .relation_children
                        .get_mut(pending.child)
                    {
                        child.peer = Some(target);
                    }
                }
                None => ctx.report.unresolved.push(UnresolvedRelation {
                    source: self.node(pending.source).dn.clone(),
                    relation_class: pending.spec.class_name.to_owned(),
                    target: pending
                        .target_dn
                        .or(pending.target_name)
                        .unwrap_or_default(),
                }),
            }
        }
    }

    /// Look for a `target_class` named `name` beside each ancestor of
    /// `source`, nearest first, then in the `common` tenant.
    fn resolve_by_name(&self, source: NodeId, target_class: &str, name: &str) -> Option<NodeId> {
        let class = self.registry.get(target_class)?;
        let rn = dn::rn(class.rn_prefix(), name);
        self.ancestors(source)
            .into_iter()
            .filter(|a| class.accepts_parent(self.node(*a).class_name()))
            .find_map(|a| self.find_by_dn(&format!("{}/{rn}", self.node(a).dn)))
            .or_else(|| self.find_by_dn(&format!("uni/tn-common/{rn}")))
    }

    // ── Events ───────────────────────────────────────────────────────

    /// Merge one subscription event into the graph.
    ///
    /// Missing ancestors whose classes are registered are instantiated.
    /// Events whose DN cannot be mapped (unregistered class anywhere on the
    /// path) are counted in [`dropped_events`](Self::dropped_events) and
    /// returned as errors. Deleted objects stay in the graph, flagged, until
    /// [`prune_deleted`](Self::prune_deleted).
    pub fn apply_event(&mut self, event: &MoEvent) -> Result<NodeId, SchemaError> {
        let result = self.merge_event(event);
        if let Err(ref e) = result {
            self.dropped_events += 1;
            warn!(dn = %event.dn, class = %event.class_name, error = %e, "dropping event");
        }
        result
    }

    fn merge_event(&mut self, event: &MoEvent) -> Result<NodeId, SchemaError> {
        if !self.registry.contains(&event.class_name) {
            return Err(SchemaError::UnknownClass(event.class_name.clone()));
        }
        let links = self.registry.resolve_dn(&event.dn)?;
        let Some((last, ancestors)) = links.split_last() else {
            return Err(SchemaError::InvalidDn {
                dn: event.dn.clone(),
                reason: "empty".into(),
            });
        };
        if last.class.class_name() != event.class_name {
            return Err(SchemaError::InvalidDn {
                dn: event.dn.clone(),
                reason: format!("does not name a {}", event.class_name),
            });
        }

        let parent = self.ensure_chain(ancestors)?;
        let id = match self.find_by_dn(&last.dn) {
            Some(id) => id,
            None => self.insert(Arc::clone(&last.class), &last.name, parent, false)?,
        };

        let populated = last.class.populate(&event.attributes);
        let node = self.node_mut(id);
        node.attributes.extend(populated);
        node.implicit = false;
        match event.status {
            EventStatus::Deleted => node.deleted = true,
            EventStatus::Created => node.deleted = false,
            EventStatus::Modified => {}
        }
        Ok(id)
    }

    // ── Serialization ────────────────────────────────────────────────

    /// Controller-format JSON for `id` and its subtree, ready to push.
    ///
    /// Children come first (post-order), then relation children, then tags.
    /// A deleted node, and everything under it, carries `status="deleted"`.
    pub fn get_json(&self, id: NodeId) -> Value {
        self.serialize(id, false)
    }

    fn serialize(&self, id: NodeId, inherited_delete: bool) -> Value {
        let node = self.node(id);
        let deleted = inherited_delete || node.deleted;

        let mut children: Vec<Value> = node
            .children
            .iter()
            .map(|c| self.serialize(*c, deleted))
            .collect();

        for rel in &node.relations {
            let peer = self.node(rel.peer);
            let spec = node.class.relations().iter().find(|s| {
                s.target_class == peer.class_name()
                    && rel
                        .relation_type
                        .as_deref()
                        .is_none_or(|t| t == s.class_name)
            });
            let Some(spec) = spec else {
                continue;
            };
            let mut attrs: Map<String, Value> = node
                .relation_children
                .iter()
                .find(|c| c.peer == Some(rel.peer) && c.class_name == spec.class_name)
                .map(|c| attribute_map(&c.attributes))
                .unwrap_or_default();
            attrs.insert(spec.name_attribute.to_owned(), Value::from(peer.name.clone()));
            if deleted || !rel.is_attached() {
                attrs.insert("status".into(), Value::from("deleted"));
            }
            children.push(json!({ spec.class_name: { "attributes": attrs } }));
        }

        for child in node.relation_children.iter().filter(|c| c.peer.is_none()) {
            let mut attrs = attribute_map(&child.attributes);
            if deleted {
                attrs.insert("status".into(), Value::from("deleted"));
            }
            children.push(json!({ child.class_name.clone(): { "attributes": attrs } }));
        }

        for tag in &node.tags {
            let mut attrs = Map::new();
            attrs.insert("name".into(), Value::from(tag.name.clone()));
            if deleted || tag.deleted {
                attrs.insert("status".into(), Value::from("deleted"));
            }
            children.push(json!({ TAG_CLASS: { "attributes": attrs } }));
        }

        let mut attrs = Map::new();
        attrs.insert("dn".into(), Value::from(node.dn.clone()));
        for (key, value) in &node.attributes {
            attrs.insert(key.clone(), Value::from(value.clone()));
        }
        if deleted {
            attrs.insert("status".into(), Value::from("deleted"));
        }

        let mut body = Map::new();
        body.insert("attributes".into(), Value::Object(attrs));
        if !children.is_empty() {
            body.insert("children".into(), Value::Array(children));
        }
        json!({ node.class_name(): body })
    }

    // ── Search ───────────────────────────────────────────────────────

    /// Search terms for `id` and its subtree.
    ///
    /// Each term's context is the path from its originating node up to and
    /// including `id`. Children are visited in DN order so the result does
    /// not depend on insertion order.
    pub fn get_searchable(&self, id: NodeId) -> Vec<SearchTerm> {
        let node = self.node(id);
        let mut terms: Vec<SearchTerm> = node
            .class
            .define_searchables(&self.view(id))
            .into_iter()
            .map(|term| SearchTerm {
                term,
                primary: id,
                context: Vec::new(),
            })
            .collect();

        let mut children = node.children.clone();
        children.sort_by(|a, b| self.node(*a).dn.cmp(&self.node(*b).dn));
        for child in children {
            terms.extend(self.get_searchable(child));
        }

        for term in &mut terms {
            term.context.push(id);
        }
        terms
    }
}

fn upsert_relation(
    list: &mut Vec<Relation>,
    peer: NodeId,
    relation_type: Option<&str>,
    status: RelationStatus,
) {
    match list.iter_mut().find(|r| r.matches(peer, relation_type)) {
        Some(existing) => existing.status = status,
        None => list.push(Relation {
            peer,
            status,
            relation_type: relation_type.map(str::to_owned),
        }),
    }
}

fn attribute_map(attributes: &IndexMap<String, String>) -> Map<String, Value> {
    attributes
        .iter()
        .map(|(k, v)| (k.clone(), Value::from(v.clone())))
        .collect()
}

fn name_from_fragment_dn(fragment: &Fragment<'_>, class: &dyn MoClass) -> Option<String> {
    let dn_attr = fragment.attr("dn")?;
    let rns = dn::split(&dn_attr).ok()?;
    let last = rns.last()?;
    dn::name_from_rn(last, class.rn_prefix()).map(str::to_owned)
}
