//! File read/write emulated over an interactive shell.
//!
//! Reading sends `cat <path>` and scrapes the output until the next shell
//! prompt. Writing sends a single `printf` with the content double-quoted.

use crate::error::RelayError;
use crate::sanitize::sanitize;

const NOT_FOUND_MARKER: &str = "No such file or directory";
const PROMPT_ENDINGS: [char; 4] = ['#', '$', '%', '>'];

/// Shell prompt heuristic: the trimmed line ends in one of `# $ % >`.
pub fn is_prompt_line(line: &str) -> bool {
    line.trim_end().ends_with(PROMPT_ENDINGS)
}

/// Command that dumps `path` to the terminal.
pub fn read_command(path: &str) -> String {
    format!("cat {}", path)
}

/// Escape backslashes, then double quotes, for use inside `"..."`.
pub fn escape_content(content: &str) -> String {
    content.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Full command line (newline included) that overwrites `path` with `content`.
pub fn write_command(path: &str, content: &str) -> String {
    format!("printf \"{}\" > {}\n", escape_content(content), path)
}

/// Outcome of feeding output into a pending read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Pending,
    Content(String),
    Failed(RelayError),
}

/// An in-flight `cat` round trip.
#[derive(Debug)]
pub struct PendingFileRead {
    path: String,
    expected_echo: String,
    lines: Vec<String>,
    partial: String,
}

impl PendingFileRead {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            expected_echo: read_command(path),
            lines: Vec::new(),
            partial: String::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn expected_echo(&self) -> &str {
        &self.expected_echo
    }

    /// Feed one chunk of transport output.
    ///
    /// Complete lines are classified in order. A trailing fragment without a
    /// newline is classified immediately only if it is a prompt or an error,
    /// otherwise it is held until the rest of the line arrives.
    pub fn feed(&mut self, chunk: &str) -> ReadOutcome {
        self.partial.push_str(chunk);
        let text = std::mem::take(&mut self.partial);
        let mut pieces: Vec<&str> = text.split('\n').collect();
        let tail = pieces.pop().unwrap_or("");

        for piece in pieces {
            if let Some(outcome) = self.classify(piece.trim()) {
                return outcome;
            }
        }

        let tail_trimmed = tail.trim();
        if tail_trimmed.contains(NOT_FOUND_MARKER) || is_prompt_line(tail_trimmed) {
            if let Some(outcome) = self.classify(tail_trimmed) {
                return outcome;
            }
        }
        self.partial = tail.to_string();
        ReadOutcome::Pending
    }

    fn classify(&mut self, line: &str) -> Option<ReadOutcome> {
        if line.contains(NOT_FOUND_MARKER) {
            log::error!("File does not exist: {}", line);
            return Some(ReadOutcome::Failed(RelayError::NotFound(line.to_string())));
        }
        if is_prompt_line(line) {
            let content = sanitize(&self.lines.join("\n"));
            log::info!("Read {} lines from {}", self.lines.len(), self.path);
            return Some(ReadOutcome::Content(content));
        }
        if line == self.expected_echo.trim() {
            return None;
        }
        if !line.is_empty() {
            self.lines.push(line.to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Undo POSIX double-quote escaping the way `sh` does for `\\` and `\"`.
    fn shell_unquote(arg: &str) -> String {
        let mut out = String::new();
        let mut chars = arg.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.peek() {
                    Some(&next) if matches!(next, '\\' | '"' | '$' | '`') => {
                        out.push(next);
                        chars.next();
                        continue;
                    }
                    _ => {}
                }
            }
            out.push(c);
        }
        out
    }

    #[test]
    fn test_prompt_lines() {
        assert!(is_prompt_line("user@host:~#"));
        assert!(is_prompt_line("user@host:~$ "));
        assert!(is_prompt_line("host%"));
        assert!(is_prompt_line("C:\\>"));
        assert!(!is_prompt_line("myhost"));
        assert!(!is_prompt_line(""));
    }

    #[test]
    fn test_read_existing_file() {
        let mut read = PendingFileRead::new("/etc/hostname");
        assert_eq!(read.feed("cat /etc/hostname\r\n"), ReadOutcome::Pending);
        assert_eq!(read.feed("myhost\r\n"), ReadOutcome::Pending);
        assert_eq!(read.feed("user@host:~# "), ReadOutcome::Content("myhost".to_string()));
    }

    #[test]
    fn test_read_in_one_chunk_strips_ansi() {
        let mut read = PendingFileRead::new("/etc/motd");
        let outcome = read.feed("cat /etc/motd\r\n\x1b[1mhello\x1b[0m\r\n\r\nworld\r\n/ # ");
        assert_eq!(outcome, ReadOutcome::Content("hello\nworld".to_string()));
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut read = PendingFileRead::new("/a");
        assert_eq!(read.feed("cat /a\r\nfirst li"), ReadOutcome::Pending);
        assert_eq!(read.feed("ne\r\nsecond\r\n$ "), ReadOutcome::Content("first line\nsecond".to_string()));
    }

    #[test]
    fn test_missing_file() {
        let mut read = PendingFileRead::new("/x");
        read.feed("cat /x\r\n");
        match read.feed("cat: /x: No such file or directory\r\n/ # ") {
            ReadOutcome::Failed(RelayError::NotFound(line)) => {
                assert_eq!(line, "cat: /x: No such file or directory")
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut read = PendingFileRead::new("/x");
        assert!(matches!(
            read.feed("cat /x: No such file or directory"),
            ReadOutcome::Failed(RelayError::NotFound(_))
        ));
    }

    #[test]
    fn test_write_command() {
        assert_eq!(write_command("/tmp/a", ""), "printf \"\" > /tmp/a\n");
        assert_eq!(
            write_command("/tmp/a", r#"say "hi" \ bye"#),
            "printf \"say \\\"hi\\\" \\\\ bye\" > /tmp/a\n"
        );
    }

    #[test]
    fn test_escaping_round_trips_through_shell_quoting() {
        for content in [r#"a"b\c"#, r#"\""#, "plain", r#"ends with \"#, "line1\nline2 \"q\""] {
            assert_eq!(shell_unquote(&escape_content(content)), content);
        }
    }
}
