//! JSON messages exchanged with clients.
//!
//! Inbound and outbound messages are objects discriminated by a `type` field.

use crate::error::{ErrorCode, RelayError};
use serde::{Deserialize, Serialize};

/// Port value as sent by clients: either a JSON number or a numeric string.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PortField {
    Number(u64),
    Text(String),
}

impl PortField {
    /// Resolve to a usable TCP port, rejecting 0 and out-of-range values.
    pub fn to_port(&self) -> Option<u16> {
        let value = match self {
            PortField::Number(n) => *n,
            PortField::Text(s) => s.trim().parse().ok()?,
        };
        u16::try_from(value).ok().filter(|p| *p != 0)
    }
}

/// Commands sent by a client.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Connect {
        host: String,
        port: PortField,
    },
    GetPorts,
    SelectPort {
        port: String,
    },
    SendInput {
        data: String,
    },
    ExecuteCommand {
        command: String,
    },
    ClearTerminal,
    Vi {
        command: String,
    },
    SaveVi {
        command: String,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    RunScript {
        #[serde(default)]
        script_text: Option<String>,
        #[serde(default)]
        script_id: Option<String>,
    },
    StopScript,
    Disconnect,
}

impl ClientMessage {
    /// Parse a raw client frame.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        serde_json::from_str(raw).map_err(|e| RelayError::Protocol(format!("Invalid message: {}", e)))
    }
}

/// Notices pushed to a client.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerNotice {
    Connected { message: String },
    TelnetClosed { message: String },
    Error { message: String, code: ErrorCode },
    TelnetData { data: String },
    SerialData { data: String },
    AutocompleteData { data: String },
    InputSent { message: String },
    CommandExecuted { message: String },
    TerminalCleared { message: String },
    #[serde(rename_all = "camelCase")]
    ViContent { file_path: String, content: String },
    ViSaved { message: String },
    ScriptQueued { message: String },
    ScriptCompleted { message: String },
    ScriptStopped { message: String },
    PortOpened { message: String },
    PortsList { ports: Vec<String> },
}

impl ServerNotice {
    pub fn to_json(&self) -> String {
        // Serializing these variants cannot fail: all fields are strings or unit enums.
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"serialization failed","code":"protocol"}"#.to_string()
        })
    }
}

impl From<&RelayError> for ServerNotice {
    fn from(err: &RelayError) -> Self {
        ServerNotice::Error {
            message: err.to_string(),
            code: err.code(),
        }
    }
}

impl From<RelayError> for ServerNotice {
    fn from(err: RelayError) -> Self {
        ServerNotice::from(&err)
    }
}
