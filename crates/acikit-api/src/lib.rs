// acikit-api: Async Rust client for fabric controller REST and notification APIs

pub mod auth;
pub mod clock;
pub mod dispatch;
pub mod error;
pub mod mock;
pub mod models;
pub mod query;
pub mod session;
pub mod transport;
pub mod websocket;

pub use auth::{AuthStrategy, Credentials, RequestSigner};
pub use clock::{Clock, FakeClock, SystemClock};
pub use dispatch::{ApiRequest, Dispatcher, HttpDispatcher, Method, RawResponse, Response};
pub use error::Error;
pub use models::{
    ControllerFault, Fragment, Imdata, LoginGrant, Notification, SubscriptionAck, SubscriptionId,
};
pub use query::{ClassQuery, MoQuery, QueryOptions, QueryTarget, RspSubtree};
pub use session::Session;
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{
    ChannelConfig, ChannelStats, Connector, EventChannel, FrameStream, ReconnectConfig,
    WsConnector, calculate_backoff,
};
