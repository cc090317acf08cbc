//! Device-registry update command for the host automation platform.
//!
//! One update per connection: authenticate, send a single
//! `config/device_registry/update` command, return its result.

use http::Uri;
use log::{debug, info};
use serde_json::{Map, Value, json};
use std::fmt::{self, Display, Formatter};
use std::net::TcpStream;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

pub const UPDATE_COMMAND: &str = "config/device_registry/update";
const COMMAND_ID: u64 = 1;

#[derive(Debug)]
pub enum RegistryError {
    MissingArgument(&'static str),
    MissingToken,
    InvalidUrl(String),
    Connect { url: String, source: tungstenite::Error },
    Transport(tungstenite::Error),
    Auth(String),
    Protocol(String),
    /// The platform answered the command with `success: false`.
    Rejected { code: String, message: String },
    Json(serde_json::Error),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::MissingArgument(what) => write!(f, "Missing required argument: {}", what),
            RegistryError::MissingToken => write!(f, "SUPERVISOR_TOKEN is not defined."),
            RegistryError::InvalidUrl(msg) => write!(f, "invalid url: {}", msg),
            RegistryError::Connect { url, source } => write!(f, "failed to connect to {}: {}", url, source),
            RegistryError::Transport(e) => write!(f, "websocket error: {}", e),
            RegistryError::Auth(msg) => write!(f, "authentication failed: {}", msg),
            RegistryError::Protocol(msg) => write!(f, "unexpected message: {}", msg),
            RegistryError::Rejected { code, message } => write!(f, "{} ({})", message, code),
            RegistryError::Json(e) => write!(f, "invalid json: {}", e),
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::Connect { source, .. } => Some(source),
            RegistryError::Transport(e) => Some(e),
            RegistryError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tungstenite::Error> for RegistryError {
    fn from(value: tungstenite::Error) -> Self {
        RegistryError::Transport(value)
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(value: serde_json::Error) -> Self {
        RegistryError::Json(value)
    }
}

/// The fields one update changes. `None` leaves a field untouched;
/// `area_id: Some(None)` clears the area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryUpdate {
    pub device_id: String,
    pub name_by_user: Option<String>,
    pub area_id: Option<Option<String>>,
    pub labels: Option<Vec<String>>,
}

impl RegistryUpdate {
    /// Validate raw command-line values (each `None` when the flag was absent).
    pub fn from_args(
        id: Option<&str>,
        name: Option<&str>,
        area_id: Option<&str>,
        labels: Option<&str>,
    ) -> Result<Self, RegistryError> {
        let device_id = id.map(str::trim).unwrap_or_default();
        if device_id.is_empty() {
            return Err(RegistryError::MissingArgument("--id"));
        }
        if name.is_none() && area_id.is_none() && labels.is_none() {
            return Err(RegistryError::MissingArgument("--name, --area-id, or --labels"));
        }
        let name_by_user = match name.map(str::trim) {
            Some("") => return Err(RegistryError::MissingArgument("--name")),
            other => other.map(str::to_string),
        };
        let area_id = area_id.map(|raw| Some(raw.trim().to_string()).filter(|s| !s.is_empty()));

        Ok(RegistryUpdate {
            device_id: device_id.to_string(),
            name_by_user,
            area_id,
            labels: labels.map(parse_labels),
        })
    }

    pub fn payload(&self, id: u64) -> Value {
        let mut msg = Map::new();
        msg.insert("id".into(), json!(id));
        msg.insert("type".into(), json!(UPDATE_COMMAND));
        msg.insert("device_id".into(), json!(self.device_id));
        if let Some(name) = &self.name_by_user {
            msg.insert("name_by_user".into(), json!(name));
        }
        if let Some(area) = &self.area_id {
            msg.insert("area_id".into(), json!(area));
        }
        if let Some(labels) = &self.labels {
            msg.insert("labels".into(), json!(labels));
        }
        Value::Object(msg)
    }
}

/// A JSON array of labels, or else a comma-separated list. Blank entries are dropped.
pub fn parse_labels(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(values)) => values
            .into_iter()
            .filter_map(|v| match v {
                Value::Null => None,
                Value::String(s) => Some(s.trim().to_string()),
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Ok(_) => Vec::new(),
        Err(_) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

/// A text-message channel to the platform.
pub trait MessageChannel {
    fn send_text(&mut self, text: String) -> Result<(), RegistryError>;
    /// Next text message, skipping control frames.
    fn recv_text(&mut self) -> Result<String, RegistryError>;
    fn close(&mut self) -> Result<(), RegistryError>;
}

pub struct WebSocketChannel {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl WebSocketChannel {
    pub fn connect(url: &Uri) -> Result<Self, RegistryError> {
        let target = url.to_string();
        let (socket, response) = tungstenite::connect(target.as_str()).map_err(|source| RegistryError::Connect {
            url: target.clone(),
            source,
        })?;
        debug!("Registry: connected to {} (HTTP {})", target, response.status());
        Ok(WebSocketChannel { socket })
    }
}

impl MessageChannel for WebSocketChannel {
    fn send_text(&mut self, text: String) -> Result<(), RegistryError> {
        self.socket.send(Message::text(text))?;
        Ok(())
    }

    fn recv_text(&mut self) -> Result<String, RegistryError> {
        loop {
            match self.socket.read()? {
                Message::Text(text) => return Ok(text.as_str().to_string()),
                Message::Binary(bytes) => {
                    return String::from_utf8(bytes.to_vec())
                        .map_err(|_| RegistryError::Protocol("binary frame is not UTF-8".to_string()));
                }
                Message::Close(frame) => {
                    return Err(RegistryError::Protocol(format!("connection closed by server ({:?})", frame)));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    fn close(&mut self) -> Result<(), RegistryError> {
        match self.socket.close(None) {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn recv_json(channel: &mut dyn MessageChannel) -> Result<Value, RegistryError> {
    let raw = channel.recv_text()?;
    Ok(serde_json::from_str(&raw)?)
}

fn message_type(msg: &Value) -> &str {
    msg.get("type").and_then(Value::as_str).unwrap_or_default()
}

/// Complete the `auth_required` / `auth` / `auth_ok` handshake.
pub fn authenticate(channel: &mut dyn MessageChannel, token: &str) -> Result<(), RegistryError> {
    let hello = recv_json(channel)?;
    if message_type(&hello) != "auth_required" {
        return Err(RegistryError::Protocol(format!("expected auth_required, got {}", hello)));
    }
    debug!(
        "Registry: server version {}",
        hello.get("ha_version").and_then(Value::as_str).unwrap_or("unknown")
    );

    channel.send_text(json!({"type": "auth", "access_token": token}).to_string())?;

    let reply = recv_json(channel)?;
    match message_type(&reply) {
        "auth_ok" => Ok(()),
        "auth_invalid" => Err(RegistryError::Auth(
            reply
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("invalid access token")
                .to_string(),
        )),
        _ => Err(RegistryError::Protocol(format!("expected auth_ok, got {}", reply))),
    }
}

/// Authenticate, send `update`, and return the command's `result` as JSON text.
pub fn update_device(
    channel: &mut dyn MessageChannel,
    token: &str,
    update: &RegistryUpdate,
) -> Result<String, RegistryError> {
    authenticate(channel, token)?;
    channel.send_text(update.payload(COMMAND_ID).to_string())?;
    info!("Registry: update sent for device {}", update.device_id);

    loop {
        let msg = recv_json(channel)?;
        let is_reply = message_type(&msg) == "result" && msg.get("id").and_then(Value::as_u64) == Some(COMMAND_ID);
        if !is_reply {
            debug!("Registry: ignoring {}", msg);
            continue;
        }
        if msg.get("success").and_then(Value::as_bool) == Some(true) {
            let result = msg.get("result").cloned().unwrap_or(Value::Null);
            return Ok(serde_json::to_string(&result)?);
        }
        let error = msg.get("error");
        let field = |name: &str| {
            error
                .and_then(|e| e.get(name))
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string()
        };
        return Err(RegistryError::Rejected {
            code: field("code"),
            message: field("message"),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays canned server messages and records what the client sent.
    #[derive(Default)]
    struct ScriptedChannel {
        incoming: VecDeque<String>,
        sent: Vec<String>,
    }

    impl ScriptedChannel {
        fn new(script: &[Value]) -> Self {
            ScriptedChannel {
                incoming: script.iter().map(Value::to_string).collect(),
                sent: Vec::new(),
            }
        }

        fn sent_json(&self) -> Vec<Value> {
            self.sent.iter().map(|s| serde_json::from_str(s).unwrap()).collect()
        }
    }

    impl MessageChannel for ScriptedChannel {
        fn send_text(&mut self, text: String) -> Result<(), RegistryError> {
            self.sent.push(text);
            Ok(())
        }

        fn recv_text(&mut self) -> Result<String, RegistryError> {
            self.incoming
                .pop_front()
                .ok_or_else(|| RegistryError::Protocol("script exhausted".to_string()))
        }

        fn close(&mut self) -> Result<(), RegistryError> {
            Ok(())
        }
    }

    #[test]
    fn argument_validation_messages() {
        let err = RegistryUpdate::from_args(None, Some("Lamp"), None, None).unwrap_err();
        assert_eq!(err.to_string(), "Missing required argument: --id");

        let err = RegistryUpdate::from_args(Some("abc"), None, None, None).unwrap_err();
        assert_eq!(err.to_string(), "Missing required argument: --name, --area-id, or --labels");

        let err = RegistryUpdate::from_args(Some("abc"), Some("  "), None, None).unwrap_err();
        assert_eq!(err.to_string(), "Missing required argument: --name");
    }

    #[test]
    fn payload_includes_only_given_fields() {
        let update = RegistryUpdate::from_args(Some(" abc "), Some(" Desk lamp "), None, None).unwrap();
        assert_eq!(
            update.payload(1),
            json!({"id": 1, "type": UPDATE_COMMAND, "device_id": "abc", "name_by_user": "Desk lamp"})
        );

        let update = RegistryUpdate::from_args(Some("abc"), None, Some(""), Some("a, b")).unwrap();
        assert_eq!(
            update.payload(1),
            json!({"id": 1, "type": UPDATE_COMMAND, "device_id": "abc", "area_id": null, "labels": ["a", "b"]})
        );
    }

    #[test]
    fn labels_accept_json_or_commas() {
        assert_eq!(parse_labels(r#"["kitchen", " lights ", "", null]"#), vec!["kitchen", "lights"]);
        assert_eq!(parse_labels("kitchen, ,lights"), vec!["kitchen", "lights"]);
        assert_eq!(parse_labels(r#"{"a": 1}"#), Vec::<String>::new());
        assert!(parse_labels("  ").is_empty());
    }

    #[test]
    fn successful_exchange_returns_result() {
        let mut channel = ScriptedChannel::new(&[
            json!({"type": "auth_required", "ha_version": "2024.6.0"}),
            json!({"type": "auth_ok", "ha_version": "2024.6.0"}),
            json!({"type": "event", "id": 99}),
            json!({"id": 1, "type": "result", "success": true, "result": {"id": "abc", "name_by_user": "Lamp"}}),
        ]);
        let update = RegistryUpdate::from_args(Some("abc"), Some("Lamp"), None, None).unwrap();
        let out = update_device(&mut channel, "secret", &update).expect("exchange");

        assert_eq!(serde_json::from_str::<Value>(&out).unwrap(), json!({"id": "abc", "name_by_user": "Lamp"}));
        let sent = channel.sent_json();
        assert_eq!(sent[0], json!({"type": "auth", "access_token": "secret"}));
        assert_eq!(sent[1]["type"], UPDATE_COMMAND);
        assert_eq!(sent[1]["id"], 1);
    }

    #[test]
    fn invalid_token_is_an_auth_error() {
        let mut channel = ScriptedChannel::new(&[
            json!({"type": "auth_required"}),
            json!({"type": "auth_invalid", "message": "Invalid access token or password"}),
        ]);
        let update = RegistryUpdate::from_args(Some("abc"), Some("Lamp"), None, None).unwrap();
        let err = update_device(&mut channel, "bad", &update).unwrap_err();
        assert!(matches!(err, RegistryError::Auth(ref m) if m.contains("Invalid access token")));
        assert_eq!(channel.sent.len(), 1);
    }

    #[test]
    fn rejected_command_surfaces_platform_error() {
        let mut channel = ScriptedChannel::new(&[
            json!({"type": "auth_required"}),
            json!({"type": "auth_ok"}),
            json!({"id": 1, "type": "result", "success": false, "error": {"code": "not_found", "message": "Device not found"}}),
        ]);
        let update = RegistryUpdate::from_args(Some("nope"), None, Some("kitchen"), None).unwrap();
        let err = update_device(&mut channel, "t", &update).unwrap_err();
        assert_eq!(err.to_string(), "Device not found (not_found)");
    }
}
