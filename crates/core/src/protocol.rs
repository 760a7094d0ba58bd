use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client frame: `{"id":"<echo>","command":"<verb>", ...args}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub id: String,
    pub command: String,
    #[serde(flatten)]
    pub args: Value,
}

/// Response frame: `{"id":"<echo>","success":true|false, ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    pub fn ok(id: impl Into<String>, data: Value) -> Self {
        Self { id: id.into(), success: true, error: None, kind: None, data: Some(data) }
    }

    pub fn err(id: impl Into<String>, error: &crate::error::Error) -> Self {
        Self { id: id.into(), success: false, error: Some(error.to_string()), kind: Some(error.kind()), data: None }
    }
}

/// Server-push frame: `{"type":"...", ...}`, no `id`, broadcast to every
/// open client.
#[derive(Debug, Clone, Serialize)]
pub struct Push {
    #[serde(flatten)]
    pub event: crate::events::Event,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_flattened_args() {
        let raw = r#"{"id":"x","command":"navigate","url":"https://example.com"}"#;
        let req: Request = serde_json::from_str(raw).unwrap();
        assert_eq!(req.command, "navigate");
        assert_eq!(req.args.get("url").and_then(|v| v.as_str()), Some("https://example.com"));
    }

    #[test]
    fn error_response_carries_kind() {
        let err = crate::error::Error::UnknownCommand("not_real".into());
        let resp = Response::err("x", &err);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["kind"], "unknown_command");
    }
}
