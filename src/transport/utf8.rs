//! Incremental UTF-8 decoding for byte streams read in arbitrary chunks.

/// Decodes chunks into text, holding back an incomplete trailing sequence
/// until the rest of its bytes arrive. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(error) => {
                    let valid_up_to = error.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match error.error_len() {
                        Some(error_len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + error_len);
                        }
                        None => {
                            // truncated sequence at the end; wait for more bytes
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Bytes held back waiting for the rest of a sequence.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.decode(b"login: "), "login: ");
        assert_eq!(dec.pending(), 0);
    }

    #[test]
    fn test_split_multibyte_char() {
        let bytes = "café €".as_bytes();
        let mut dec = Utf8Decoder::new();
        let split = 4; // inside the two-byte 'é'
        assert_eq!(dec.decode(&bytes[..split]), "caf");
        assert_eq!(dec.pending(), 1);
        assert_eq!(dec.decode(&bytes[split..split + 3]), "é ");
        assert_eq!(dec.decode(&bytes[split + 3..]), "€");
        assert_eq!(dec.pending(), 0);
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.decode(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(dec.pending(), 0);
    }
}
