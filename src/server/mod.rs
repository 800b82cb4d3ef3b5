//! HTTP transport: a `may_minihttp` server feeding requests to a
//! [`WhiteboardRuntime`](crate::runtime::WhiteboardRuntime).

mod http_server;
mod request;
mod response;
mod service;

pub use http_server::{HttpServer, ServerHandle};
pub use request::{parse_body, parse_request, split_target};
pub use response::{write_handler_response, write_json};
pub use service::WhiteboardService;
