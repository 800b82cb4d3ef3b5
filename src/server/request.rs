use crate::handler::{HeaderVec, InboundRequest, ParamVec};
use http::Method;
use may_minihttp::Request;
use std::io::Read;
use std::sync::Arc;
use tracing::debug;

/// Split a raw request target into path and decoded query parameters.
#[must_use]
pub fn split_target(target: &str) -> (String, ParamVec) {
    match target.split_once('?') {
        Some((path, query)) => {
            let params = url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (Arc::from(k.as_ref()), v.into_owned()))
                .collect();
            (normalize_path(path), params)
        }
        None => (normalize_path(target), ParamVec::new()),
    }
}

fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// Parse a JSON body. A non-JSON body is kept as a JSON string so resources
/// still see it; an empty body is `None`.
#[must_use]
pub fn parse_body(raw: &str) -> Option<serde_json::Value> {
    if raw.trim().is_empty() {
        return None;
    }
    Some(
        serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
    )
}

/// Turn a `may_minihttp` request into an [`InboundRequest`]. `None` when the
/// method is not a valid HTTP token.
pub fn parse_request(req: Request) -> Option<InboundRequest> {
    let method = Method::from_bytes(req.method().as_bytes()).ok()?;
    let (path, query_params) = split_target(req.path());

    let headers: HeaderVec = req
        .headers()
        .iter()
        .map(|h| {
            (
                Arc::from(h.name.to_ascii_lowercase()),
                String::from_utf8_lossy(h.value).into_owned(),
            )
        })
        .collect();

    let mut raw = String::new();
    let body = match req.body().read_to_string(&mut raw) {
        Ok(_) => parse_body(&raw),
        Err(e) => {
            debug!(error = %e, "Request body unreadable, ignored");
            None
        }
    };

    debug!(
        method = %method,
        path = %path,
        headers = headers.len(),
        query_params = query_params.len(),
        has_body = body.is_some(),
        "HTTP request parsed"
    );

    Some(InboundRequest {
        method,
        path,
        query_params,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_target() {
        let (path, params) = split_target("/shop/items?limit=10&name=a%20b");
        assert_eq!(path, "/shop/items");
        assert_eq!(params.len(), 2);
        assert_eq!(params[1].0.as_ref(), "name");
        assert_eq!(params[1].1, "a b");

        let (path, params) = split_target("");
        assert_eq!(path, "/");
        assert!(params.is_empty());
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body("  "), None);
        assert_eq!(parse_body(r#"{"a":1}"#), Some(serde_json::json!({"a": 1})));
        assert_eq!(parse_body("plain"), Some(serde_json::json!("plain")));
    }
}
