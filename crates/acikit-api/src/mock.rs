// Scripted stand-ins for the dispatcher and socket seams.
//
// Used by this workspace's tests and by `Session::detached`, which records
// requests instead of sending them.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use url::Url;

use crate::dispatch::{ApiRequest, Dispatcher, Method, RawResponse};
use crate::error::Error;
use crate::websocket::{Connector, FrameStream};

// ── MockDispatcher ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Reply {
    Status(u16, Value),
    Fail,
}

#[derive(Debug)]
struct Route {
    method: Method,
    path: String,
    replies: VecDeque<Reply>,
}

impl Route {
    fn matches_exact(&self, req: &ApiRequest) -> bool {
        self.method == req.method && self.path == req.path
    }

    fn matches_ignoring_query(&self, req: &ApiRequest) -> bool {
        !self.path.contains('?')
            && self.method == req.method
            && req.path.split('?').next() == Some(self.path.as_str())
    }

    /// Replies are consumed in order; the last one repeats.
    fn next_reply(&mut self) -> Option<Reply> {
        if self.replies.len() > 1 {
            self.replies.pop_front()
        } else {
            self.replies.front().cloned()
        }
    }
}

/// Dispatcher answering from registered routes.
///
/// A route registered without a query string also matches requests that
/// carry one. Unmatched requests get `200 {"imdata": []}`.
#[derive(Debug, Default)]
pub struct MockDispatcher {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `method path`.
    pub fn respond(&self, method: Method, path: &str, status: u16, body: Value) {
        self.push_reply(method, path, Reply::Status(status, body));
    }

    pub fn respond_json(&self, method: Method, path: &str, body: Value) {
        self.respond(method, path, 200, body);
    }

    /// Make `method path` fail at the transport level.
    pub fn fail(&self, method: Method, path: &str) {
        self.push_reply(method, path, Reply::Fail);
    }

    /// Successful `aaaLogin` answer.
    pub fn on_login(&self, token: &str, refresh_timeout_secs: u64) {
        self.respond_json(Method::Post, "/api/aaaLogin.json", grant(token, refresh_timeout_secs));
    }

    /// Successful `aaaRefresh` answer.
    pub fn on_refresh(&self, token: &str, refresh_timeout_secs: u64) {
        self.respond_json(Method::Get, "/api/aaaRefresh.json", grant(token, refresh_timeout_secs));
    }

    /// Every request dispatched so far, oldest first.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    /// Requests whose path (without query) equals `path`.
    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path.split('?').next() == Some(path))
            .cloned()
            .collect()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    fn push_reply(&self, method: Method, path: &str, reply: Reply) {
        let mut routes = self.routes.lock();
        if let Some(route) = routes
            .iter_mut()
            .find(|r| r.method == method && r.path == path)
        {
            route.replies.push_back(reply);
            return;
        }
        routes.push(Route {
            method,
            path: path.to_owned(),
            replies: VecDeque::from([reply]),
        });
    }

    fn reply_for(&self, req: &ApiRequest) -> Option<Reply> {
        let mut routes = self.routes.lock();
        if let Some(route) = routes.iter_mut().find(|r| r.matches_exact(req)) {
            return route.next_reply();
        }
        routes
            .iter_mut()
            .find(|r| r.matches_ignoring_query(req))
            .and_then(Route::next_reply)
    }
}

fn grant(token: &str, refresh_timeout_secs: u64) -> Value {
    json!({
        "totalCount": "1",
        "imdata": [{
            "aaaLogin": { "attributes": {
                "token": token,
                "refreshTimeoutSeconds": refresh_timeout_secs.to_string(),
            }}
        }]
    })
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    async fn dispatch(&self, request: ApiRequest) -> Result<RawResponse, Error> {
        let reply = self.reply_for(&request);
        self.requests.lock().push(request);
        match reply {
            Some(Reply::Status(status, body)) => Ok(RawResponse {
                status,
                body: body.to_string(),
            }),
            Some(Reply::Fail) => Err(Error::Timeout { timeout_secs: 0 }),
            None => Ok(RawResponse {
                status: 200,
                body: json!({ "totalCount": "0", "imdata": [] }).to_string(),
            }),
        }
    }
}

// ── MockConnector ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ConnectorState {
    urls: Vec<Url>,
    current: Option<mpsc::UnboundedSender<String>>,
    fail_next: u32,
}

/// Socket connector whose frames are pushed by the test.
#[derive(Debug)]
pub struct MockConnector {
    state: Mutex<ConnectorState>,
    connected: watch::Sender<usize>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        let (connected, _) = watch::channel(0);
        Self {
            state: Mutex::new(ConnectorState::default()),
            connected,
        }
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().fail_next = n;
    }

    /// Successful connections so far.
    pub fn connect_count(&self) -> usize {
        *self.connected.borrow()
    }

    /// URLs of every attempt, failed ones included.
    pub fn urls(&self) -> Vec<Url> {
        self.state.lock().urls.clone()
    }

    /// Deliver a JSON frame on the current connection.
    pub fn send_frame(&self, frame: &Value) -> bool {
        self.send_raw(&frame.to_string())
    }

    /// Deliver raw text on the current connection.
    pub fn send_raw(&self, text: &str) -> bool {
        self.state
            .lock()
            .current
            .as_ref()
            .is_some_and(|tx| tx.send(text.to_owned()).is_ok())
    }

    /// End the current connection as if the peer went away.
    pub fn drop_connection(&self) {
        self.state.lock().current = None;
    }

    /// Wait until at least `n` successful connections have been made.
    pub async fn wait_for_connection(&self, n: usize) {
        let mut rx = self.connected.subscribe();
        // Sender lives as long as `self`, so this only ends when satisfied.
        let _ = rx.wait_for(|count| *count >= n).await;
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn FrameStream>, Error> {
        let rx = {
            let mut state = self.state.lock();
            state.urls.push(url.clone());
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(Error::WebSocketConnect("connection refused".into()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            state.current = Some(tx);
            rx
        };
        self.connected.send_modify(|count| *count += 1);
        Ok(Box::new(MockFrames { rx }))
    }
}

struct MockFrames {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameStream for MockFrames {
    async fn next_frame(&mut self) -> Option<Result<String, Error>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}
