//! Telnet IAC (Interpret As Command) decoding and encoding.
//!
//! The decoder is a byte-at-a-time state machine so sequences split across
//! TCP reads are handled. Negotiation policy lives in the caller; the decoder
//! only reports which options the peer asked about.

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

/// Something decoded from the inbound telnet stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetEvent {
    Data(Vec<u8>),
    Do(u8),
    Dont(u8),
    Will(u8),
    Wont(u8),
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Data,
    Iac,
    Negotiate(u8),
    Subneg {
        iac_seen: bool,
    },
}

/// Stateful IAC decoder.
#[derive(Debug, Default)]
pub struct IacDecoder {
    state: State,
}

impl IacDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk of socket bytes.
    ///
    /// Data bytes between two negotiation commands are emitted as separate
    /// `Data` events so ordering relative to negotiation is preserved.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<TelnetEvent> {
        let mut events = Vec::new();
        let mut data = Vec::with_capacity(chunk.len());

        for &b in chunk {
            match self.state {
                State::Data => {
                    if b == IAC {
                        self.state = State::Iac;
                    } else {
                        data.push(b);
                    }
                }
                State::Iac => match b {
                    IAC => {
                        data.push(IAC);
                        self.state = State::Data;
                    }
                    DO | DONT | WILL | WONT => self.state = State::Negotiate(b),
                    SB => self.state = State::Subneg { iac_seen: false },
                    // NOP, GA and friends carry no payload
                    _ => self.state = State::Data,
                },
                State::Negotiate(cmd) => {
                    if !data.is_empty() {
                        events.push(TelnetEvent::Data(std::mem::take(&mut data)));
                    }
                    events.push(match cmd {
                        DO => TelnetEvent::Do(b),
                        DONT => TelnetEvent::Dont(b),
                        WILL => TelnetEvent::Will(b),
                        _ => TelnetEvent::Wont(b),
                    });
                    self.state = State::Data;
                }
                State::Subneg { iac_seen } => {
                    if iac_seen {
                        self.state = if b == SE {
                            State::Data
                        } else {
                            State::Subneg { iac_seen: false }
                        };
                    } else if b == IAC {
                        self.state = State::Subneg { iac_seen: true };
                    }
                }
            }
        }

        if !data.is_empty() {
            events.push(TelnetEvent::Data(data));
        }
        events
    }
}

/// Fixed negotiation policy: refuse every DO, accept every WILL.
pub fn negotiation_reply(event: &TelnetEvent) -> Option<[u8; 3]> {
    match *event {
        TelnetEvent::Do(opt) => Some([IAC, WONT, opt]),
        TelnetEvent::Will(opt) => Some([IAC, DO, opt]),
        _ => None,
    }
}

/// Escape outbound data so a literal 0xFF is not read as a command.
pub fn encode_data(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        if b == IAC {
            out.push(IAC);
        }
        out.push(b);
    }
    out
}
