//! Tab-completion echo disambiguation.
//!
//! After a send containing a tab, the shell answers with some mix of an echo
//! of the typed text, a bell (several candidates exist) and the completion
//! itself. Only the completion is forwarded to the client. The registry owns
//! the settle timer; this type only tracks the expectation.

/// Bell: the shell has several candidates and wants a second tab.
pub const BELL: char = '\u{7}';
/// Control-U: erase the line editor's current buffer.
pub const ERASE_LINE: u8 = 21;

/// How an inbound chunk was classified while an expectation is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Echo,
    Ambiguous,
    Completion,
}

#[derive(Debug, Default)]
pub struct Autocomplete {
    last_sent: Option<String>,
}

impl Autocomplete {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_expecting(&self) -> bool {
        self.last_sent.is_some()
    }

    #[cfg(test)]
    pub(crate) fn last_sent(&self) -> Option<&str> {
        self.last_sent.as_deref()
    }

    /// Arm the expectation if `sent` contains a tab. Returns whether it did.
    pub fn arm(&mut self, sent: &str) -> bool {
        if !sent.contains('\t') {
            return false;
        }
        self.last_sent = Some(sent.replace('\t', ""));
        true
    }

    /// Classify a chunk; `None` when no expectation is armed.
    pub fn classify(&self, chunk: &str) -> Option<Classification> {
        let last_sent = self.last_sent.as_deref()?;
        let trimmed = chunk.trim();
        let class = if trimmed == last_sent.trim() {
            Classification::Echo
        } else if trimmed.len() == 1 && trimmed.starts_with(BELL) {
            Classification::Ambiguous
        } else {
            Classification::Completion
        };
        Some(class)
    }

    /// Settle timer fired, or the session is being torn down.
    pub fn clear(&mut self) {
        self.last_sent = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_requires_tab() {
        let mut ac = Autocomplete::new();
        assert!(!ac.arm("ls"));
        assert!(!ac.is_expecting());
        assert!(ac.arm("ls\t"));
        assert_eq!(ac.last_sent(), Some("ls"));
    }

    #[test]
    fn test_classification() {
        let mut ac = Autocomplete::new();
        assert_eq!(ac.classify("anything"), None);

        ac.arm("ls\t");
        assert_eq!(ac.classify("ls\t"), Some(Classification::Echo));
        assert_eq!(ac.classify("\r\nls "), Some(Classification::Echo));
        assert_eq!(ac.classify("\u{7}"), Some(Classification::Ambiguous));
        assert_eq!(ac.classify("ls -la"), Some(Classification::Completion));
        assert_eq!(ac.classify("\u{7}\u{7}"), Some(Classification::Completion));
    }

    #[test]
    fn test_clear() {
        let mut ac = Autocomplete::new();
        ac.arm("cd /us\t");
        ac.clear();
        assert!(!ac.is_expecting());
        assert_eq!(ac.classify("cd /usr/"), None);
    }
}
