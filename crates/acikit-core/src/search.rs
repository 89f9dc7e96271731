// Searchable overlay: keyword/value terms with ancestor context, and a flat
// index over them for free-text lookup.

use std::fmt;

use serde::Serialize;

use crate::graph::{Graph, NodeId};

/// Whether a term is known locally or learned from a related object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TermRelation {
    Primary,
    Indirect,
}

/// One keyword/value pair contributed by a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Term {
    pub keyword: String,
    pub value: String,
    pub relation: TermRelation,
}

impl Term {
    pub fn primary(keyword: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            value: value.into(),
            relation: TermRelation::Primary,
        }
    }

    pub fn indirect(keyword: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            value: value.into(),
            relation: TermRelation::Indirect,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.keyword, self.value)
    }
}

/// A term together with the node that produced it and the path from that
/// node up to the node the walk started at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTerm {
    pub term: Term,
    pub primary: NodeId,
    /// Originating node first, walk root last.
    pub context: Vec<NodeId>,
}

// ── Query ────────────────────────────────────────────────────────────

/// Parsed search expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// `keyword=value`: both must match exactly (case-insensitive).
    Exact { keyword: String, value: String },
    /// `keyword=`: any value for this keyword.
    Keyword(String),
    /// `=value`: this value under any keyword.
    Value(String),
    /// Bare text: substring of either keyword or value.
    Text(String),
}

impl Query {
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        match input.split_once('=') {
            Some((k, v)) => {
                let (k, v) = (k.trim().to_lowercase(), v.trim().to_lowercase());
                match (k.is_empty(), v.is_empty()) {
                    (false, false) => Self::Exact { keyword: k, value: v },
                    (false, true) => Self::Keyword(k),
                    (true, false) => Self::Value(v),
                    (true, true) => Self::Text(String::new()),
                }
            }
            None => Self::Text(input.to_lowercase()),
        }
    }

    fn matches(&self, keyword: &str, value: &str) -> bool {
        match self {
            Self::Exact { keyword: k, value: v } => {
                keyword.eq_ignore_ascii_case(k) && value.to_lowercase() == *v
            }
            Self::Keyword(k) => keyword.eq_ignore_ascii_case(k),
            Self::Value(v) => value.to_lowercase() == *v,
            Self::Text(t) => {
                keyword.to_lowercase().contains(t.as_str()) || value.to_lowercase().contains(t.as_str())
            }
        }
    }
}

// ── Index ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub keyword: String,
    pub value: String,
    pub relation: TermRelation,
    pub primary_dn: String,
    /// DNs from the matching object up to the indexed root.
    pub context: Vec<String>,
}

/// Snapshot of the searchable terms under a set of roots.
///
/// DNs are resolved at build time, so the index stays valid after the graph
/// changes; rebuild it to see the changes.
#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    entries: Vec<SearchHit>,
}

impl SearchIndex {
    pub fn build(graph: &Graph, roots: &[NodeId]) -> Self {
        let entries = roots
            .iter()
            .flat_map(|root| graph.get_searchable(*root))
            .map(|st| SearchHit {
                keyword: st.term.keyword,
                value: st.term.value,
                relation: st.term.relation,
                primary_dn: graph.dn(st.primary).to_owned(),
                context: st.context.iter().map(|id| graph.dn(*id).to_owned()).collect(),
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn search(&self, query: &str) -> Vec<&SearchHit> {
        let query = Query::parse(query);
        self.entries
            .iter()
            .filter(|hit| query.matches(&hit.keyword, &hit.value))
            .collect()
    }

    /// Distinct primary DNs matching `query`, in index order.
    pub fn matching_dns(&self, query: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for hit in self.search(query) {
            if !out.contains(&hit.primary_dn.as_str()) {
                out.push(&hit.primary_dn);
            }
        }
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::registry::Registry;

    fn graph() -> (Graph, NodeId) {
        let mut g = Graph::new(Arc::new(Registry::with_defaults()));
        let tenant = g.add_root("fvTenant", "t1").unwrap();
        let app = g.add_child(tenant, "fvAp", "app").unwrap();
        let epg = g.add_child(app, "fvAEPg", "web").unwrap();
        let bd = g.add_child(tenant, "fvBD", "bd1").unwrap();
        g.set_attribute(epg, "descr", "Frontend servers");
        g.attach(epg, bd, Some("fvRsBd"));
        (g, tenant)
    }

    #[test]
    fn context_runs_from_origin_to_root() {
        let (g, tenant) = graph();
        let terms = g.get_searchable(tenant);
        let epg = g.find_by_dn("uni/tn-t1/ap-app/epg-web").unwrap();
        let app = g.node(epg).parent().unwrap();

        let term = terms
            .iter()
            .find(|t| t.primary == epg && t.term.keyword == "descr")
            .unwrap();
        assert_eq!(term.context, vec![epg, app, tenant]);

        let own = terms.iter().find(|t| t.primary == tenant).unwrap();
        assert_eq!(own.context, vec![tenant]);
    }

    #[test]
    fn searchables_are_repeatable() {
        let (g, tenant) = graph();
        assert_eq!(g.get_searchable(tenant), g.get_searchable(tenant));
    }

    #[test]
    fn sibling_order_does_not_matter() {
        let reg = Arc::new(Registry::with_defaults());
        let mut a = Graph::new(Arc::clone(&reg));
        let ta = a.add_root("fvTenant", "t").unwrap();
        a.add_child(ta, "fvBD", "x").unwrap();
        a.add_child(ta, "fvCtx", "y").unwrap();

        let mut b = Graph::new(reg);
        let tb = b.add_root("fvTenant", "t").unwrap();
        b.add_child(tb, "fvCtx", "y").unwrap();
        b.add_child(tb, "fvBD", "x").unwrap();

        let terms = |g: &Graph, root| -> Vec<(Term, String)> {
            g.get_searchable(root)
                .into_iter()
                .map(|t| (t.term, g.dn(t.primary).to_owned()))
                .collect()
        };
        assert_eq!(terms(&a, ta), terms(&b, tb));
    }

    #[test]
    fn relation_yields_indirect_term() {
        let (g, tenant) = graph();
        let index = SearchIndex::build(&g, &[tenant]);
        let hits = index.search("bridgedomain=bd1");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].relation, TermRelation::Indirect);
        assert_eq!(hits[0].primary_dn, "uni/tn-t1/ap-app/epg-web");
    }

    #[test]
    fn query_forms() {
        let (g, tenant) = graph();
        let index = SearchIndex::build(&g, &[tenant]);

        assert_eq!(index.matching_dns("name=WEB"), vec!["uni/tn-t1/ap-app/epg-web"]);
        assert_eq!(index.search("descr=").len(), 1);
        assert_eq!(index.matching_dns("=app"), vec!["uni/tn-t1/ap-app"]);
        assert_eq!(index.matching_dns("frontend"), vec!["uni/tn-t1/ap-app/epg-web"]);
        assert!(index.search("name=nope").is_empty());
    }

    #[test]
    fn parse_query() {
        assert_eq!(
            Query::parse(" Name = Web "),
            Query::Exact {
                keyword: "name".into(),
                value: "web".into()
            }
        );
        assert_eq!(Query::parse("dn="), Query::Keyword("dn".into()));
        assert_eq!(Query::parse("=x"), Query::Value("x".into()));
        assert_eq!(Query::parse("Foo"), Query::Text("foo".into()));
    }
}
