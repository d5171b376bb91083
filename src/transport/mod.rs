pub mod iac;
pub mod serial;
pub mod telnet;
pub mod utf8;

use crate::error::Result;
use std::fmt;
use std::sync::Arc;

use self::serial::SerialConnection;
use self::telnet::TelnetConnection;

/// Events produced by a live transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Decoded telnet payload.
    Data(Vec<u8>),
    /// One `\n`-delimited line from a serial device, delimiter removed.
    Line(String),
    OptionDo(u8),
    OptionWill(u8),
    Closed,
    Error(String),
}

/// Callback through which transport tasks report events to their owner.
#[derive(Clone)]
pub struct TransportSink {
    emit: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl TransportSink {
    pub fn new(emit: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self { emit: Arc::new(emit) }
    }

    pub fn emit(&self, event: TransportEvent) {
        (self.emit)(event)
    }
}

impl fmt::Debug for TransportSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransportSink")
    }
}

/// The live backend resource of a session.
#[derive(Debug)]
pub enum Transport {
    Telnet(TelnetConnection),
    Serial(SerialConnection),
}

impl Transport {
    pub fn write(&self, data: &[u8]) -> Result<()> {
        match self {
            Transport::Telnet(conn) => conn.write(data),
            Transport::Serial(conn) => conn.write(data),
        }
    }

    pub fn close(&mut self) {
        match self {
            Transport::Telnet(conn) => conn.close(),
            Transport::Serial(conn) => conn.close(),
        }
    }

    pub fn as_telnet(&self) -> Option<&TelnetConnection> {
        match self {
            Transport::Telnet(conn) => Some(conn),
            Transport::Serial(_) => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Transport::Telnet(conn) => format!("telnet {}", conn.peer()),
            Transport::Serial(conn) => format!("serial {}", conn.device()),
        }
    }
}
