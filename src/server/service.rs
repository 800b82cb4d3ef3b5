use super::request::parse_request;
use super::response::{write_handler_response, write_json};
use crate::runtime::WhiteboardRuntime;
use crate::whiteboard::WhiteboardDispatcher;
use may_minihttp::{HttpService, Request, Response};
use serde_json::json;
use std::io;
use std::sync::Arc;
use tracing::warn;

/// HTTP entry point of one whiteboard: every request is handed to the
/// runtime, except `GET` on the optional status path.
#[derive(Clone)]
pub struct WhiteboardService {
    runtime: Arc<WhiteboardRuntime>,
    dispatcher: Option<Arc<WhiteboardDispatcher>>,
    status_path: Option<Arc<str>>,
}

impl WhiteboardService {
    #[must_use]
    pub fn new(runtime: Arc<WhiteboardRuntime>) -> Self {
        Self {
            runtime,
            dispatcher: None,
            status_path: None,
        }
    }

    /// Serve the dispatcher's status document at `path`.
    #[must_use]
    pub fn with_status(mut self, dispatcher: Arc<WhiteboardDispatcher>, path: &str) -> Self {
        self.dispatcher = Some(dispatcher);
        self.status_path = Some(Arc::from(path));
        self
    }

    fn is_status_request(&self, method: &http::Method, path: &str) -> bool {
        *method == http::Method::GET && self.status_path.as_deref() == Some(path)
    }
}

impl HttpService for WhiteboardService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let Some(inbound) = parse_request(req) else {
            warn!("Request with an invalid method rejected");
            write_json(res, 400, &json!({ "error": "Bad Request" }));
            return Ok(());
        };

        if self.is_status_request(&inbound.method, &inbound.path) {
            if let Some(dispatcher) = &self.dispatcher {
                match serde_json::to_value(dispatcher.status()) {
                    Ok(body) => write_json(res, 200, &body),
                    Err(e) => {
                        warn!(error = %e, "Status document not serializable");
                        write_json(res, 500, &json!({ "error": "Internal Server Error" }));
                    }
                }
                return Ok(());
            }
        }

        let response = self.runtime.dispatch(inbound);
        write_handler_response(res, response);
        Ok(())
    }
}
