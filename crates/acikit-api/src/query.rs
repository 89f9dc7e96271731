//! Query URL builders for class and managed-object lookups.
//!
//! ```rust,ignore
//! let url = ClassQuery::new("fvTenant").target(QueryTarget::SelfOnly).path();
//! assert_eq!(url, "/api/class/fvTenant.json?query-target=self");
//! ```

use strum::{Display, EnumString};

/// Scope of a query relative to the addressed object or class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum QueryTarget {
    #[strum(serialize = "self")]
    SelfOnly,
    Children,
    Subtree,
}

/// How much of each result's subtree the controller includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum RspSubtree {
    No,
    Children,
    Full,
}

/// Query-string options shared by class and MO queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub target: Option<QueryTarget>,
    pub target_subtree_class: Vec<String>,
    pub filter: Option<String>,
    pub rsp_subtree: Option<RspSubtree>,
    pub rsp_subtree_class: Vec<String>,
    pub rsp_subtree_include: Vec<String>,
    pub config_only: bool,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub subscription: bool,
}

impl QueryOptions {
    /// Render as `?k=v&...`, or an empty string when nothing is set.
    ///
    /// Keys are emitted in a fixed order with `subscription=yes` last so equal
    /// option sets always produce identical URLs.
    pub fn query_string(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(target) = self.target {
            parts.push(format!("query-target={target}"));
        }
        if !self.target_subtree_class.is_empty() {
            parts.push(format!(
                "target-subtree-class={}",
                self.target_subtree_class.join(",")
            ));
        }
        if let Some(ref filter) = self.filter {
            parts.push(format!("query-target-filter={filter}"));
        }
        if let Some(rsp) = self.rsp_subtree {
            parts.push(format!("rsp-subtree={rsp}"));
        }
        if !self.rsp_subtree_class.is_empty() {
            parts.push(format!("rsp-subtree-class={}", self.rsp_subtree_class.join(",")));
        }
        if !self.rsp_subtree_include.is_empty() {
            parts.push(format!(
                "rsp-subtree-include={}",
                self.rsp_subtree_include.join(",")
            ));
        }
        if self.config_only {
            parts.push("rsp-prop-include=config-only".into());
        }
        if let Some(page) = self.page {
            parts.push(format!("page={page}"));
        }
        if let Some(size) = self.page_size {
            parts.push(format!("page-size={size}"));
        }
        if self.subscription {
            parts.push(SUBSCRIPTION_MARKER.into());
        }

        if parts.is_empty() {
            String::new()
        } else {
            format!("?{}", parts.join("&"))
        }
    }
}

macro_rules! option_setters {
    () => {
        pub fn target(mut self, target: QueryTarget) -> Self {
            self.options.target = Some(target);
            self
        }

        pub fn target_subtree_class(mut self, class: impl Into<String>) -> Self {
            self.options.target_subtree_class.push(class.into());
            self
        }

        pub fn filter(mut self, filter: impl Into<String>) -> Self {
            self.options.filter = Some(filter.into());
            self
        }

        pub fn rsp_subtree(mut self, rsp: RspSubtree) -> Self {
            self.options.rsp_subtree = Some(rsp);
            self
        }

        pub fn rsp_subtree_class(mut self, class: impl Into<String>) -> Self {
            self.options.rsp_subtree_class.push(class.into());
            self
        }

        pub fn rsp_subtree_include(mut self, include: impl Into<String>) -> Self {
            self.options.rsp_subtree_include.push(include.into());
            self
        }

        pub fn config_only(mut self, config_only: bool) -> Self {
            self.options.config_only = config_only;
            self
        }

        pub fn page(mut self, page: u32, page_size: u32) -> Self {
            self.options.page = Some(page);
            self.options.page_size = Some(page_size);
            self
        }

        pub fn subscribe(mut self) -> Self {
            self.options.subscription = true;
            self
        }

        pub fn options(&self) -> &QueryOptions {
            &self.options
        }
    };
}

/// `GET /api/class/<class>.json?...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassQuery {
    class_name: String,
    options: QueryOptions,
}

impl ClassQuery {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            options: QueryOptions::default(),
        }
    }

    option_setters!();

    pub fn path(&self) -> String {
        format!(
            "/api/class/{}.json{}",
            self.class_name,
            self.options.query_string()
        )
    }
}

/// `GET /api/mo/<dn>.json?...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoQuery {
    dn: String,
    options: QueryOptions,
}

impl MoQuery {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            options: QueryOptions::default(),
        }
    }

    option_setters!();

    pub fn path(&self) -> String {
        format!("/api/mo/{}.json{}", self.dn, self.options.query_string())
    }
}

/// Path for pushing a configuration body under `dn`.
pub fn mo_path(dn: &str) -> String {
    format!("/api/mo/{dn}.json")
}

const SUBSCRIPTION_MARKER: &str = "subscription=yes";

/// Canonical subscription form of `url`: parameters ordered by name, the
/// `subscription=yes` marker present exactly once and last. Two spellings
/// of the same query yield the same string.
pub fn with_subscription(url: &str) -> String {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let mut params: Vec<&str> = query
        .split('&')
        .filter(|kv| !kv.is_empty() && *kv != SUBSCRIPTION_MARKER)
        .collect();
    // Stable, so repeated names keep their relative order.
    params.sort_by_key(|kv| kv.split_once('=').map_or(*kv, |(name, _)| name));
    params.dedup();
    params.push(SUBSCRIPTION_MARKER);
    format!("{path}?{}", params.join("&"))
}
