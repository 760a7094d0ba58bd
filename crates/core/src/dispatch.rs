use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::protocol::{Request, Response};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
pub type Handler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Canonical verbs that must be present in every dispatcher regardless
/// of what else gets registered; the verb set itself stays open-ended
/// (DESIGN.md Open Question 2).
pub const CANONICAL_VERBS: &[&str] = &[
    "ping",
    "status",
    "navigate",
    "click",
    "fill",
    "type_text",
    "execute_script",
    "wait_for_element",
    "get_cookies",
    "set_cookies",
    "clear_cookies",
    "set_proxy",
    "get_proxy_status",
    "set_proxy_list",
    "screenshot_viewport",
    "screenshot_full_page",
    "recording_start",
    "recording_stop",
    "list_sessions",
    "get_session_info",
    "list_tabs",
    "navigate_tab",
    "close_tab",
    "get_active_tab",
    "key_press",
    "key_combination",
    "mouse_move",
    "mouse_click",
    "mouse_drag",
    "click_at_element",
    "keyboard_layouts",
    "special_keys",
    "list_sock_puppets",
];

/// `browser_*`-prefixed MCP aliases for every canonical verb.
pub fn mcp_alias(verb: &str) -> String {
    format!("browser_{verb}")
}

/// Open-set registry keyed by verb string, mapping to a handler.
/// Replaces the teacher's dynamic-command-table-via-string-keys pattern
/// with the same open extensibility but a single typed entry point.
#[derive(Clone)]
pub struct CommandRegistry {
    handlers: Arc<RwLock<HashMap<String, Handler>>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self { handlers: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub async fn register(&self, verb: impl Into<String>, handler: Handler) {
        let verb = verb.into();
        let alias = mcp_alias(&verb);
        let mut handlers = self.handlers.write().await;
        handlers.insert(alias, Arc::clone(&handler));
        handlers.insert(verb, handler);
    }

    /// Parses and validates the frame, routes to a handler, and returns
    /// a response carrying the originating `id` regardless of success.
    pub async fn dispatch(&self, raw: &str) -> Response {
        let request: Request = match serde_json::from_str(raw) {
            Ok(r) => r,
            Err(e) => return Response::err("", &Error::Serialization(e)),
        };

        if request.command.is_empty() {
            return Response::err(request.id, &Error::ArgumentMissing("command".into()));
        }

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&request.command).cloned()
        };

        match handler {
            Some(handler) => match handler(request.args).await {
                Ok(data) => Response::ok(request.id, data),
                Err(e) => Response::err(request.id, &e),
            },
            None => Response::err(request.id, &Error::UnknownCommand(request.command)),
        }
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn required_str(args: &Value, name: &str) -> Result<String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::ArgumentMissing(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(f: impl Fn(Value) -> HandlerFuture + Send + Sync + 'static) -> Handler {
        Arc::new(f)
    }

    #[tokio::test]
    async fn dispatch_of_unknown_command_scenario() {
        let registry = CommandRegistry::new();
        let response = registry.dispatch(r#"{"id":"x","command":"not_real"}"#).await;
        assert_eq!(response.id, "x");
        assert!(!response.success);
        assert!(response.error.unwrap().to_lowercase().contains("unknown command"));
    }

    #[tokio::test]
    async fn empty_command_is_argument_missing() {
        let registry = CommandRegistry::new();
        let response = registry.dispatch(r#"{"id":"x","command":""}"#).await;
        assert!(!response.success);
        assert_eq!(response.kind, Some("argument_missing"));
    }

    #[tokio::test]
    async fn registered_command_routes_and_echoes_id() {
        let registry = CommandRegistry::new();
        registry
            .register("ping", handler(|_| Box::pin(async { Ok(serde_json::json!({"pong": true})) })))
            .await;
        let response = registry.dispatch(r#"{"id":"7","command":"ping"}"#).await;
        assert_eq!(response.id, "7");
        assert!(response.success);
    }

    #[tokio::test]
    async fn mcp_alias_routes_to_the_same_handler() {
        let registry = CommandRegistry::new();
        registry
            .register("ping", handler(|_| Box::pin(async { Ok(serde_json::json!({"pong": true})) })))
            .await;
        let response = registry.dispatch(r#"{"id":"1","command":"browser_ping"}"#).await;
        assert!(response.success);
    }
}
