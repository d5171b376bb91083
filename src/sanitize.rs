use vte::{Parser, Perform};

/// Strip ANSI escape sequences and control characters from shell output.
///
/// Printable text passes through unchanged. CSI/OSC/DCS/ESC sequences are
/// consumed by the `vte` state machine and dropped, as are C0/C1 controls
/// other than `\n` and `\t`.
///
/// Unlike a blanket `[\x00-\x1F\x7F-\x9F]` strip, newlines survive so
/// multi-line file content keeps its line structure.
pub fn sanitize(text: &str) -> String {
    let mut parser = Parser::new();
    let mut collector = TextCollector {
        out: String::with_capacity(text.len()),
    };
    parser.advance(&mut collector, text.as_bytes());
    collector.out
}

/// Performer that keeps printable text only.
struct TextCollector {
    out: String,
}

impl Perform for TextCollector {
    fn print(&mut self, ch: char) {
        if !ch.is_control() {
            self.out.push(ch);
        }
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' | b'\t' => self.out.push(byte as char),
            _ => {}
        }
    }
}
