// Request dispatch seam.
//
// The session decides *what* to send (auth cookies, refresh ordering,
// re-login); a `Dispatcher` decides *how*. `HttpDispatcher` talks to the
// controller over reqwest; `mock::MockDispatcher` answers from a script.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use strum::Display;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{ControllerFault, Imdata};
use crate::transport::TransportConfig;

/// HTTP verbs the controller API uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Delete,
}

/// A request ready to be dispatched. `path` includes the query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and body as returned by a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// A controller response: status, parsed body, and raw body.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub json: Value,
    pub text: String,
}

impl Response {
    pub fn from_raw(raw: RawResponse) -> Self {
        let json = serde_json::from_str(&raw.body).unwrap_or(Value::Null);
        Self {
            status: raw.status,
            json,
            text: raw.body,
        }
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the `imdata` envelope.
    pub fn envelope(&self) -> Result<Imdata, Error> {
        serde_json::from_value(self.json.clone()).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: self.text.clone(),
        })
    }

    /// The `imdata` items, or an empty slice when absent.
    pub fn imdata(&self) -> &[Value] {
        self.json
            .get("imdata")
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice)
    }

    /// The controller's error payload, if the body carries one.
    pub fn fault(&self) -> Option<ControllerFault> {
        ControllerFault::from_imdata(&self.envelope().ok()?)
    }

    /// Turn a non-success status into [`Error::Controller`].
    pub fn error_for_status(self) -> Result<Self, Error> {
        if self.is_ok() {
            return Ok(self);
        }
        let fault = self.fault();
        Err(Error::Controller {
            status: self.status,
            code: fault.as_ref().and_then(|f| f.code.clone()),
            text: fault.map_or_else(
                || self.text.chars().take(200).collect(),
                |f| f.text,
            ),
        })
    }
}

/// Sends requests on behalf of a session.
#[async_trait]
pub trait Dispatcher: Send + Sync + fmt::Debug {
    async fn dispatch(&self, request: ApiRequest) -> Result<RawResponse, Error>;
}

/// Dispatcher backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpDispatcher {
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            base_url,
        })
    }

    /// Use a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}{path}"))?)
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, request: ApiRequest) -> Result<RawResponse, Error> {
        let url = self.url(&request.path)?;
        debug!("{} {}", request.method, url);

        let mut builder = match request.method {
            Method::Get => self.http.get(url),
            Method::Post => self.http.post(url),
            Method::Delete => self.http.delete(url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let resp = builder.send().await.map_err(Error::Transport)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(Error::Transport)?;
        Ok(RawResponse { status, body })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(status: u16, body: &Value) -> Response {
        Response::from_raw(RawResponse {
            status,
            body: body.to_string(),
        })
    }

    #[test]
    fn ok_response_exposes_imdata() {
        let resp = response(200, &json!({ "imdata": [{ "fvTenant": { "attributes": {} } }] }));
        assert!(resp.is_ok());
        assert_eq!(resp.imdata().len(), 1);
        assert!(resp.error_for_status().is_ok());
    }

    #[test]
    fn error_status_carries_controller_fault() {
        let resp = response(
            400,
            &json!({ "imdata": [{ "error": { "attributes": { "code": "122", "text": "unknown class" } } }] }),
        );
        match resp.error_for_status() {
            Err(Error::Controller { status, code, text }) => {
                assert_eq!(status, 400);
                assert_eq!(code.as_deref(), Some("122"));
                assert_eq!(text, "unknown class");
            }
            other => panic!("expected Controller error, got {other:?}"),
        }
    }

    #[test]
    fn non_json_body_keeps_raw_text() {
        let resp = Response::from_raw(RawResponse {
            status: 502,
            body: "Bad Gateway".into(),
        });
        assert!(resp.json.is_null());
        assert!(resp.imdata().is_empty());
        assert!(matches!(
            resp.error_for_status(),
            Err(Error::Controller { status: 502, .. })
        ));
    }

    #[test]
    fn method_renders_uppercase() {
        assert_eq!(Method::Get.to_string(), "GET");
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }

    #[test]
    fn dispatcher_keeps_base_prefix() {
        let d = HttpDispatcher::with_client(
            reqwest::Client::new(),
            Url::parse("https://c.example/").unwrap(),
        );
        assert_eq!(
            d.url("/api/class/fvTenant.json").unwrap().as_str(),
            "https://c.example/api/class/fvTenant.json"
        );
    }
}
