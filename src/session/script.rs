//! Scripted command execution.
//!
//! A script is plain text, one command per line. Two directives pause the
//! script: `sleep(<ms>)` and `waitFor('<text>')`. Every other line is sent to
//! the transport followed by a newline; lines containing a tab are skipped.
//!
//! The runner performs no I/O. Each step returns the lines to send and the
//! reason it stopped, and the registry schedules timers and writes.

use std::time::Duration;

/// Lifecycle of a script execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    Running,
    Sleeping,
    Waiting,
    Completed,
    Stopped,
}

/// Why a run of consecutive commands ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Blocked {
    Sleeping(Duration),
    Waiting(String),
    Completed,
}

/// Result of advancing the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptProgress {
    /// Command lines to write, in order, without the trailing newline.
    pub sends: Vec<String>,
    pub blocked: Blocked,
}

#[derive(Debug, PartialEq, Eq)]
enum Directive<'a> {
    Sleep(u64),
    WaitFor(&'a str),
    Skip,
    Send,
}

fn parse_directive(line: &str) -> Directive<'_> {
    let lower = line.to_ascii_lowercase();

    if let Some(arg) = lower.strip_prefix("sleep(").and_then(|rest| rest.strip_suffix(')')) {
        if !arg.is_empty() && arg.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(ms) = arg.parse() {
                return Directive::Sleep(ms);
            }
        }
    }

    const WAIT_FOR: &str = "waitfor(";
    if lower.starts_with(WAIT_FOR) && lower.ends_with(')') {
        let inner = &line[WAIT_FOR.len()..line.len() - 1];
        let bytes = inner.as_bytes();
        let is_quote = |b: u8| b == b'\'' || b == b'"';
        if bytes.len() >= 3 && is_quote(bytes[0]) && is_quote(bytes[bytes.len() - 1]) {
            return Directive::WaitFor(&inner[1..inner.len() - 1]);
        }
    }

    if line.contains('\t') {
        Directive::Skip
    } else {
        Directive::Send
    }
}

/// Per-session script state machine.
#[derive(Debug)]
pub struct ScriptRunner {
    commands: Vec<String>,
    cursor: usize,
    wait_target: Option<String>,
    buffer: String,
    state: ScriptState,
}

impl ScriptRunner {
    /// Parse script text: lines are trimmed and blank lines dropped.
    pub fn new(script_text: &str) -> Self {
        let commands = script_text
            .split('\n')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            commands,
            cursor: 0,
            wait_target: None,
            buffer: String::new(),
            state: ScriptState::Running,
        }
    }

    #[cfg(test)]
    pub(crate) fn commands(&self) -> &[String] {
        &self.commands
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> ScriptState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn wait_target(&self) -> Option<&str> {
        self.wait_target.as_deref()
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        matches!(self.state, ScriptState::Completed | ScriptState::Stopped)
    }

    /// Begin execution at the first command.
    pub fn start(&mut self) -> ScriptProgress {
        log::info!("Starting script with {} commands", self.commands.len());
        self.run()
    }

    /// The sleep timer fired: step past the `sleep` line and continue.
    pub fn resume_after_sleep(&mut self) -> Option<ScriptProgress> {
        if self.state != ScriptState::Sleeping {
            return None;
        }
        self.cursor += 1;
        Some(self.run())
    }

    /// Feed transport output. Returns progress when a pending `waitFor` matched.
    pub fn on_data(&mut self, chunk: &str) -> Option<ScriptProgress> {
        if self.state != ScriptState::Waiting {
            return None;
        }
        let target = self.wait_target.as_deref()?.to_lowercase();
        self.buffer.push_str(chunk);
        if !self.buffer.to_lowercase().contains(&target) {
            return None;
        }
        log::info!("Wait condition met for: {}", target);
        self.wait_target = None;
        self.buffer.clear();
        Some(self.run())
    }

    /// Abandon the script. Pending wait and buffered output are discarded.
    pub fn stop(&mut self) {
        self.state = ScriptState::Stopped;
        self.wait_target = None;
        self.buffer.clear();
    }

    fn run(&mut self) -> ScriptProgress {
        let mut sends = Vec::new();
        self.state = ScriptState::Running;

        while let Some(line) = self.commands.get(self.cursor) {
            match parse_directive(line) {
                Directive::Sleep(ms) => {
                    log::info!("Sleeping for {} milliseconds", ms);
                    self.state = ScriptState::Sleeping;
                    return ScriptProgress {
                        sends,
                        blocked: Blocked::Sleeping(Duration::from_millis(ms)),
                    };
                }
                Directive::WaitFor(target) => {
                    log::info!("Waiting for string: {}", target);
                    let target = target.to_string();
                    self.wait_target = Some(target.clone());
                    self.buffer.clear();
                    self.cursor += 1;
                    self.state = ScriptState::Waiting;
                    return ScriptProgress {
                        sends,
                        blocked: Blocked::Waiting(target),
                    };
                }
                Directive::Skip => {
                    log::info!("Script command contains tab character. Command will be skipped.");
                    self.cursor += 1;
                }
                Directive::Send => {
                    sends.push(line.clone());
                    self.cursor += 1;
                }
            }
        }

        self.state = ScriptState::Completed;
        ScriptProgress {
            sends,
            blocked: Blocked::Completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lines() {
        let runner = ScriptRunner::new("  ls -la \n\n\r\n pwd\r\n");
        assert_eq!(runner.commands(), &["ls -la".to_string(), "pwd".to_string()]);
    }

    #[test]
    fn test_directives() {
        assert_eq!(parse_directive("sleep(250)"), Directive::Sleep(250));
        assert_eq!(parse_directive("SLEEP(5)"), Directive::Sleep(5));
        assert_eq!(parse_directive("sleep()"), Directive::Send);
        assert_eq!(parse_directive("sleep(1.5)"), Directive::Send);
        assert_eq!(parse_directive("waitFor('login:')"), Directive::WaitFor("login:"));
        assert_eq!(parse_directive("WAITFOR(\"Password\")"), Directive::WaitFor("Password"));
        assert_eq!(parse_directive("waitFor('')"), Directive::Send);
        assert_eq!(parse_directive("echo a\tb"), Directive::Skip);
        assert_eq!(parse_directive("echo sleep(1)"), Directive::Send);
    }

    #[test]
    fn test_sends_until_sleep() {
        let mut runner = ScriptRunner::new("ls\npwd\nsleep(250)\nwhoami");
        let progress = runner.start();
        assert_eq!(progress.sends, vec!["ls", "pwd"]);
        assert_eq!(progress.blocked, Blocked::Sleeping(Duration::from_millis(250)));
        assert_eq!(runner.state(), ScriptState::Sleeping);
        assert_eq!(runner.cursor(), 2);

        let progress = runner.resume_after_sleep().unwrap();
        assert_eq!(progress.sends, vec!["whoami"]);
        assert_eq!(progress.blocked, Blocked::Completed);
        assert!(runner.is_finished());
    }

    #[test]
    fn test_wait_for_is_case_insensitive_and_buffers() {
        let mut runner = ScriptRunner::new("waitFor('login:')\nroot");
        let progress = runner.start();
        assert!(progress.sends.is_empty());
        assert_eq!(progress.blocked, Blocked::Waiting("login:".to_string()));
        assert_eq!(runner.cursor(), 1);

        assert!(runner.on_data("Welcome\r\nLOG").is_none());
        let progress = runner.on_data("IN: ").unwrap();
        assert_eq!(progress.sends, vec!["root"]);
        assert_eq!(progress.blocked, Blocked::Completed);
        assert_eq!(runner.wait_target(), None);
    }

    #[test]
    fn test_data_ignored_unless_waiting() {
        let mut runner = ScriptRunner::new("sleep(10)\nwaitFor('ready')\nreboot");
        runner.start();
        assert!(runner.on_data("ready").is_none());
        let progress = runner.resume_after_sleep().unwrap();
        assert_eq!(progress.blocked, Blocked::Waiting("ready".to_string()));
        // output seen before the wait began does not count
        assert!(runner.on_data("not yet").is_none());
        assert_eq!(runner.on_data("Ready").unwrap().sends, vec!["reboot"]);
    }

    #[test]
    fn test_tab_lines_never_sent() {
        let mut runner = ScriptRunner::new("cd /tm\tp\nls");
        let progress = runner.start();
        assert_eq!(progress.sends, vec!["ls"]);
    }

    #[test]
    fn test_stop_clears_wait() {
        let mut runner = ScriptRunner::new("waitFor('never')\nls");
        runner.start();
        runner.stop();
        assert_eq!(runner.state(), ScriptState::Stopped);
        assert_eq!(runner.wait_target(), None);
        assert!(runner.on_data("never").is_none());
        assert!(runner.resume_after_sleep().is_none());
    }

    #[test]
    fn test_empty_script_completes() {
        let mut runner = ScriptRunner::new("\n  \n");
        assert_eq!(runner.start().blocked, Blocked::Completed);
    }
}
