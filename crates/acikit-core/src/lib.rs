//! Object graph, subscriptions and controller facade over `acikit-api`.
//!
//! - **[`Controller`]**: connection lifecycle. [`connect()`](Controller::connect)
//!   logs in and starts the subscription pump;
//!   [`Controller::oneshot()`](Controller::oneshot) runs a single closure
//!   without subscriptions for CLI use.
//!
//! - **[`Graph`]**: arena of managed objects built from controller responses
//!   ([`Controller::get_class`], [`Controller::get_deep`]), assembled locally
//!   for a push, and kept current from subscription events.
//!
//! - **[`Multiplexer`]**: maps query URLs to subscription queues, refreshes
//!   controller-side subscriptions and replays them after a reconnect. A
//!   [`SubscriptionEvent::SubscriptionLost`] marks each reconnect in-band.
//!
//! - **[`Registry`]** / [`MoClass`]: which controller classes the graph
//!   understands and how each one names, nests and describes itself.
//!
//! - **[`SearchIndex`]**: keyword/value search over a graph, each hit carrying
//!   its ancestor context.

pub mod config;
pub mod controller;
pub mod deadline;
pub mod dn;
pub mod error;
pub mod event;
pub mod graph;
pub mod registry;
pub mod schema;
pub mod search;
pub mod subscription;

// ── Primary re-exports ──────────────────────────────────────────────
pub use acikit_api::{ReconnectConfig, RspSubtree};
pub use config::{AuthCredentials, ControllerConfig, DEFAULT_QUEUE_CAPACITY, TlsVerification};
pub use controller::{ConnectionState, Controller, DeepQuery, Seams, Snapshot};
pub use deadline::within;
pub use error::{CoreError, SchemaError};
pub use event::{EventStatus, MoEvent, SubscriptionEvent};
pub use graph::{
    BuildReport, Graph, Identity, Node, NodeId, NodeView, Relation, RelationChild, RelationStatus,
    Tag, UnresolvedRelation,
};
pub use registry::{DnLink, Registry, TAG_CLASS};
pub use schema::{MoClass, RelationSpec, StaticClass, default_searchables};
pub use search::{Query, SearchHit, SearchIndex, SearchTerm, Term, TermRelation};
pub use subscription::{Multiplexer, MuxStats, SubscriptionHandle, SubscriptionState};
