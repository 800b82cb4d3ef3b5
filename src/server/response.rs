use crate::handler::HandlerResponse;
use dashmap::DashMap;
use may_minihttp::Response;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::debug;

/// Distinct header lines kept alive for the process. `may_minihttp` only
/// accepts `&'static str` headers, so each distinct line is leaked once.
const MAX_INTERNED_HEADERS: usize = 4096;

static INTERNED: OnceLock<DashMap<String, &'static str>> = OnceLock::new();

fn intern(line: String) -> Option<&'static str> {
    let interned = INTERNED.get_or_init(DashMap::new);
    if let Some(existing) = interned.get(&line) {
        return Some(*existing);
    }
    if interned.len() >= MAX_INTERNED_HEADERS {
        return None;
    }
    let leaked: &'static str = Box::leak(line.clone().into_boxed_str());
    interned.insert(line, leaked);
    Some(leaked)
}

pub(crate) fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "OK",
    }
}

/// Headers the HTTP server writes itself.
fn is_managed(name: &str) -> bool {
    ["content-type", "content-length", "date", "server", "connection"]
        .iter()
        .any(|m| name.eq_ignore_ascii_case(m))
}

/// Write a resource response. A JSON string body goes out as text unless the
/// resource chose a non-JSON content type itself.
pub fn write_handler_response(res: &mut Response, response: HandlerResponse) {
    res.status_code(usize::from(response.status), status_reason(response.status));
    for (name, value) in &response.headers {
        if is_managed(name) {
            continue;
        }
        match intern(format!("{name}: {value}")) {
            Some(line) => {
                res.header(line);
            }
            None => debug!(header = %name, "Header cache full, header dropped"),
        }
    }
    let declared = response
        .get_header("content-type")
        .filter(|ct| !ct.starts_with("application/json"))
        .map(ToString::to_string);
    match response.body {
        Value::Null if response.status == 204 => {}
        Value::String(s) => {
            content_type(res, declared.as_deref().unwrap_or("text/plain"));
            res.body_vec(s.into_bytes());
        }
        other => {
            content_type(res, declared.as_deref().unwrap_or("application/json"));
            res.body_vec(other.to_string().into_bytes());
        }
    }
}

fn content_type(res: &mut Response, media_type: &str) {
    match media_type {
        "application/json" => res.header("Content-Type: application/json"),
        "text/plain" => res.header("Content-Type: text/plain"),
        other => match intern(format!("Content-Type: {other}")) {
            Some(line) => res.header(line),
            None => res.header("Content-Type: application/octet-stream"),
        },
    };
}

pub fn write_json(res: &mut Response, status: u16, body: &Value) {
    res.status_code(usize::from(status), status_reason(status));
    write_json_body(res, body);
}

fn write_json_body(res: &mut Response, body: &Value) {
    content_type(res, "application/json");
    res.body_vec(body.to_string().into_bytes());
}
