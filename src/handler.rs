//! Request and response types exchanged between the runtime and resources.
//!
//! Parameters and headers live in `SmallVec`s; a typical request (up to 8
//! params, up to 16 headers) keeps both lists inline.

#![deny(clippy::inefficient_to_string)]
#![deny(clippy::unnecessary_to_owned)]

use crate::ids::RequestId;
use http::Method;
use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

pub const MAX_INLINE_PARAMS: usize = 8;
pub const MAX_INLINE_HEADERS: usize = 16;

/// Name/value pairs. Names are `Arc<str>` shared with the route table.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// Header pairs, lowercase names on the request side.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Later entries shadow earlier ones with the same name.
fn last_named<'a>(pairs: &'a [(Arc<str>, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .rev()
        .find_map(|(k, v)| (k.as_ref() == name).then_some(v.as_str()))
}

fn header_named<'a>(pairs: &'a [(Arc<str>, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find_map(|(k, v)| k.eq_ignore_ascii_case(name).then_some(v.as_str()))
}

fn owned_map(pairs: &[(Arc<str>, String)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (String::from(k.as_ref()), v.clone()))
        .collect()
}

/// A request routed to one resource method of one application.
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    pub request_id: RequestId,
    pub method: Method,
    /// Path as received, context path included
    pub path: String,
    /// Path below the application base
    pub application_path: String,
    pub application: Arc<str>,
    pub resource: Arc<str>,
    /// Operation name of the matched method
    pub operation: Arc<str>,
    pub path_params: ParamVec,
    pub query_params: ParamVec,
    pub headers: HeaderVec,
    /// JSON body, or a string when the body was not JSON
    pub body: Option<Value>,
}

impl Default for HandlerRequest {
    fn default() -> Self {
        let empty: Arc<str> = Arc::from("");
        Self {
            request_id: RequestId::new(),
            method: Method::GET,
            path: String::new(),
            application_path: String::new(),
            application: Arc::clone(&empty),
            resource: Arc::clone(&empty),
            operation: empty,
            path_params: ParamVec::new(),
            query_params: ParamVec::new(),
            headers: HeaderVec::new(),
            body: None,
        }
    }
}

impl HandlerRequest {
    /// Value of a `{name}` path segment; the deepest one wins on repeats.
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        last_named(&self.path_params, name)
    }

    #[inline]
    #[must_use]
    pub fn get_query_param(&self, name: &str) -> Option<&str> {
        last_named(&self.query_params, name)
    }

    /// Case-insensitive header lookup.
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        header_named(&self.headers, name)
    }

    /// Path parameters as an owned map. Allocates.
    #[must_use]
    pub fn path_params_map(&self) -> HashMap<String, String> {
        owned_map(&self.path_params)
    }

    /// Query parameters as an owned map. Allocates.
    #[must_use]
    pub fn query_params_map(&self) -> HashMap<String, String> {
        owned_map(&self.query_params)
    }
}

/// A request as received by the transport, before routing.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub query_params: ParamVec,
    pub headers: HeaderVec,
    pub body: Option<Value>,
}

impl InboundRequest {
    #[must_use]
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            query_params: ParamVec::new(),
            headers: HeaderVec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .push((Arc::from(name.to_ascii_lowercase()), value.to_string()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Response produced by a resource, or short-circuited by an extension.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerResponse {
    pub status: u16,
    #[serde(skip_serializing)]
    pub headers: HeaderVec,
    /// Written as JSON; a JSON string is written as plain text
    pub body: Value,
}

impl HandlerResponse {
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((Arc::from("content-type"), String::from("application/json")));
        Self { status, headers, body }
    }

    /// `{"error": message}` with `status`.
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, serde_json::json!({ "error": message }))
    }

    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        header_named(&self.headers, name)
    }

    /// Replace every header called `name` (any case) with one entry.
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut resp = HandlerResponse::json(200, Value::Null);
        resp.set_header("Content-Type", "text/plain".to_string());
        assert_eq!(resp.headers.len(), 1);
        assert_eq!(resp.get_header("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_repeated_params_last_wins() {
        let mut req = HandlerRequest::default();
        req.path_params.push((Arc::from("id"), "outer".to_string()));
        req.path_params.push((Arc::from("id"), "inner".to_string()));
        req.query_params.push((Arc::from("q"), "x".to_string()));
        assert_eq!(req.get_path_param("id"), Some("inner"));
        assert_eq!(req.get_query_param("q"), Some("x"));
        assert_eq!(req.path_params_map().get("id").map(String::as_str), Some("inner"));
    }

    #[test]
    fn test_error_body_shape() {
        let resp = HandlerResponse::error(404, "nope");
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body, serde_json::json!({ "error": "nope" }));
    }
}
