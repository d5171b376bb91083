//! TermRelay Core: session-backed protocol engine for a telnet/serial relay
//!
//! Bridges browser-style client sessions to telnet servers and serial
//! devices: option negotiation, scripted command execution, tab-completion
//! echo handling and shell-emulated file read/write.

pub mod config;
pub mod error;
pub mod protocol;
pub mod sanitize;
pub mod script_source;
pub mod session;
pub mod transport;

pub use config::RelayConfig;
pub use error::{ErrorCode, RelayError};
pub use protocol::{ClientMessage, ServerNotice};
pub use script_source::{MemoryScriptSource, ScriptSource};
pub use session::{RegistryHandle, SessionId, SessionRegistry};

/// Initialize the logger. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::try_init();
    log::info!("TermRelay Core initialized");
}
