//! Session registry.
//!
//! One actor task owns every per-session record: the transport, the script
//! execution, the autocomplete expectation and the pending file read. All
//! state changes happen while handling a `RegistryEvent`, one at a time.
//! Transport tasks, connect attempts and timers never touch session state;
//! they post events back to the actor. Every transport and timer carries a
//! generation number so events from something already replaced are dropped.

use super::autocomplete::{Autocomplete, Classification, ERASE_LINE};
use super::pseudo_file::{self, PendingFileRead, ReadOutcome};
use super::script::{Blocked, ScriptProgress, ScriptRunner};
use super::SessionId;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::protocol::{ClientMessage, PortField, ServerNotice};
use crate::script_source::ScriptSource;
use crate::transport::serial::{self, SerialConnection};
use crate::transport::telnet::TelnetConnection;
use crate::transport::utf8::Utf8Decoder;
use crate::transport::{Transport, TransportEvent, TransportSink};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_serial::SerialStream;

pub(crate) enum RegistryEvent {
    Open {
        session: SessionId,
        notices: mpsc::UnboundedSender<ServerNotice>,
    },
    Frame {
        session: SessionId,
        raw: String,
    },
    Client {
        session: SessionId,
        message: ClientMessage,
    },
    Close {
        session: SessionId,
    },
    TelnetConnected {
        session: SessionId,
        generation: u64,
        peer: String,
        result: Result<TcpStream>,
    },
    SerialOpened {
        session: SessionId,
        generation: u64,
        device: String,
        result: Result<SerialStream>,
    },
    PortsListed {
        session: SessionId,
        result: Result<Vec<String>>,
    },
    ScriptResolved {
        session: SessionId,
        result: Result<String>,
    },
    Transport {
        session: SessionId,
        generation: u64,
        event: TransportEvent,
    },
    SleepElapsed {
        session: SessionId,
        generation: u64,
    },
    AutocompleteSettled {
        session: SessionId,
        generation: u64,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// A scheduled event; aborted when dropped.
#[derive(Debug)]
struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl Timer {
    fn spawn(
        events: &mpsc::WeakUnboundedSender<RegistryEvent>,
        delay: Duration,
        generation: u64,
        event: RegistryEvent,
    ) -> Option<Self> {
        let tx = events.upgrade()?;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
        Some(Self { generation, handle })
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug)]
struct ActiveTransport {
    generation: u64,
    transport: Transport,
    text: Utf8Decoder,
}

impl ActiveTransport {
    fn new(generation: u64, transport: Transport) -> Self {
        Self {
            generation,
            transport,
            text: Utf8Decoder::new(),
        }
    }
}

#[derive(Debug)]
struct ActiveScript {
    runner: ScriptRunner,
    sleep: Option<Timer>,
}

/// Everything the registry holds for one client session.
#[derive(Debug)]
struct SessionState {
    notices: mpsc::UnboundedSender<ServerNotice>,
    transport: Option<ActiveTransport>,
    connecting: Option<u64>,
    script: Option<ActiveScript>,
    autocomplete: Autocomplete,
    settle: Option<Timer>,
    pending_read: Option<PendingFileRead>,
    editing_path: Option<String>,
}

impl SessionState {
    fn new(notices: mpsc::UnboundedSender<ServerNotice>) -> Self {
        Self {
            notices,
            transport: None,
            connecting: None,
            script: None,
            autocomplete: Autocomplete::new(),
            settle: None,
            pending_read: None,
            editing_path: None,
        }
    }

    fn notify(&self, notice: ServerNotice) {
        if self.notices.send(notice).is_err() {
            log::debug!("Client channel closed, notice dropped");
        }
    }

    fn transport(&self) -> Result<&Transport> {
        self.transport
            .as_ref()
            .map(|active| &active.transport)
            .ok_or_else(RelayError::telnet_not_open)
    }

    fn telnet(&self) -> Result<&TelnetConnection> {
        self.transport()?
            .as_telnet()
            .ok_or_else(RelayError::telnet_not_open)
    }

    fn stop_script(&mut self) -> bool {
        let Some(mut active) = self.script.take() else {
            return false;
        };
        active.runner.stop();
        log::info!("Script execution stopped");
        self.notify(ServerNotice::ScriptStopped {
            message: "Script execution stopped".to_string(),
        });
        true
    }

    fn clear_autocomplete(&mut self) {
        self.autocomplete.clear();
        self.settle = None;
    }

    fn fail_pending_read(&mut self, reason: &str) {
        if let Some(read) = self.pending_read.take() {
            let err = RelayError::ConnectionClosed(format!("{} while reading {}", reason, read.path()));
            log::warn!("{}", err);
            self.notify(ServerNotice::from(&err));
        }
        self.editing_path = None;
    }

    /// Drop everything that depends on the transport, then close it.
    fn release_transport(&mut self, reason: &str) {
        self.stop_script();
        self.clear_autocomplete();
        self.fail_pending_read(reason);
        self.connecting = None;
        if let Some(mut active) = self.transport.take() {
            log::info!("Closing {}", active.transport.describe());
            active.transport.close();
        }
    }
}

/// Owner of all client sessions. Runs as a single actor task.
pub struct SessionRegistry {
    config: RelayConfig,
    scripts: Arc<dyn ScriptSource>,
    sessions: HashMap<SessionId, SessionState>,
    events: mpsc::WeakUnboundedSender<RegistryEvent>,
    next_generation: u64,
}

impl SessionRegistry {
    /// Start the registry actor on the current tokio runtime.
    pub fn spawn(config: RelayConfig, scripts: Arc<dyn ScriptSource>) -> RegistryHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Self::new(config, scripts, tx.downgrade());
        tokio::spawn(registry.run(rx));
        RegistryHandle { events: tx }
    }

    fn new(
        config: RelayConfig,
        scripts: Arc<dyn ScriptSource>,
        events: mpsc::WeakUnboundedSender<RegistryEvent>,
    ) -> Self {
        Self {
            config,
            scripts,
            sessions: HashMap::new(),
            events,
            next_generation: 0,
        }
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<RegistryEvent>) {
        log::info!("Session registry started");
        while let Some(event) = events.recv().await {
            if let RegistryEvent::Shutdown { done } = event {
                self.shutdown();
                let _ = done.send(());
                return;
            }
            self.handle(event);
        }
        self.shutdown();
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn handle(&mut self, event: RegistryEvent) {
        match event {
            RegistryEvent::Open { session, notices } => {
                log::info!("New session {}", session);
                self.sessions.insert(session, SessionState::new(notices));
            }
            RegistryEvent::Frame { session, raw } => match ClientMessage::parse(&raw) {
                Ok(message) => self.dispatch(session, message),
                Err(err) => self.report(session, err),
            },
            RegistryEvent::Client { session, message } => self.dispatch(session, message),
            RegistryEvent::Close { session } => self.teardown(session),
            RegistryEvent::TelnetConnected {
                session,
                generation,
                peer,
                result,
            } => self.on_telnet_connected(session, generation, peer, result),
            RegistryEvent::SerialOpened {
                session,
                generation,
                device,
                result,
            } => self.on_serial_opened(session, generation, device, result),
            RegistryEvent::PortsListed { session, result } => match result {
                Ok(ports) => self.notify(session, ServerNotice::PortsList { ports }),
                Err(err) => self.report(session, err),
            },
            RegistryEvent::ScriptResolved { session, result } => {
                if let Err(err) = result.and_then(|text| self.run_script(session, &text)) {
                    self.report(session, err);
                }
            }
            RegistryEvent::Transport {
                session,
                generation,
                event,
            } => self.on_transport_event(session, generation, event),
            RegistryEvent::SleepElapsed { session, generation } => {
                self.on_sleep_elapsed(session, generation)
            }
            RegistryEvent::AutocompleteSettled { session, generation } => {
                self.on_autocomplete_settled(session, generation)
            }
            RegistryEvent::Count { reply } => {
                let _ = reply.send(self.sessions.len());
            }
            RegistryEvent::Shutdown { done } => {
                self.shutdown();
                let _ = done.send(());
            }
        }
    }

    fn dispatch(&mut self, session: SessionId, message: ClientMessage) {
        if !self.sessions.contains_key(&session) {
            log::warn!("Message for unknown session {} ignored", session);
            return;
        }

        let result = match message {
            ClientMessage::Connect { host, port } => {
                self.connect_telnet(session, &host, port.to_port())
            }
            ClientMessage::GetPorts => self.list_ports(session),
            ClientMessage::SelectPort { port } => self.select_serial_port(session, &port),
            ClientMessage::SendInput { data } => self.send_input(session, &data),
            ClientMessage::ExecuteCommand { command } => self.execute_command(session, &command),
            ClientMessage::ClearTerminal => self.clear_line(session),
            ClientMessage::Vi { command } => self.read_file(session, &command),
            ClientMessage::SaveVi { command, content } => self.save_file(session, &command, &content),
            ClientMessage::RunScript {
                script_text,
                script_id,
            } => self.request_script(session, script_text, script_id),
            ClientMessage::StopScript => self.stop_script(session),
            ClientMessage::Disconnect => {
                log::info!("Received disconnect request from {}", session);
                self.teardown(session);
                Ok(None)
            }
        };

        match result {
            Ok(Some(notice)) => self.notify(session, notice),
            Ok(None) => {}
            Err(err) => self.report(session, err),
        }
    }

    fn state_mut(&mut self, session: SessionId) -> Result<&mut SessionState> {
        self.sessions
            .get_mut(&session)
            .ok_or_else(|| RelayError::ConnectionClosed(format!("Unknown session {}", session)))
    }

    fn notify(&self, session: SessionId, notice: ServerNotice) {
        if let Some(state) = self.sessions.get(&session) {
            state.notify(notice);
        }
    }

    fn report(&self, session: SessionId, err: RelayError) {
        log::error!("Session {}: {}", session, err);
        self.notify(session, ServerNotice::from(&err));
    }

    fn transport_sink(&self, session: SessionId, generation: u64) -> TransportSink {
        let events = self.events.clone();
        TransportSink::new(move |event| {
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(RegistryEvent::Transport {
                    session,
                    generation,
                    event,
                });
            }
        })
    }

    fn connect_telnet(
        &mut self,
        session: SessionId,
        host: &str,
        port: Option<u16>,
    ) -> Result<Option<ServerNotice>> {
        let host = host.trim().to_string();
        let port = match port {
            Some(port) if !host.is_empty() => port,
            _ => return Err(RelayError::Connect("Invalid host or port".to_string())),
        };
        let tx = self
            .events
            .upgrade()
            .ok_or_else(|| RelayError::ConnectionClosed("Relay is shutting down".to_string()))?;
        let timeout = self.config.connect_timeout();
        let generation = self.next_generation();

        let state = self.state_mut(session)?;
        state.release_transport("Connection replaced");
        state.connecting = Some(generation);

        tokio::spawn(async move {
            let result = TelnetConnection::connect(&host, port, timeout).await;
            let _ = tx.send(RegistryEvent::TelnetConnected {
                session,
                generation,
                peer: format!("{}:{}", host, port),
                result,
            });
        });
        Ok(None)
    }

    fn on_telnet_connected(
        &mut self,
        session: SessionId,
        generation: u64,
        peer: String,
        result: Result<TcpStream>,
    ) {
        let sink = self.transport_sink(session, generation);
        let buffer_size = self.config.read_buffer_size;
        let Some(state) = self.sessions.get_mut(&session) else {
            log::info!("Session {} gone before connect to {} finished", session, peer);
            return;
        };
        if state.connecting != Some(generation) {
            log::info!("Discarding superseded connection to {}", peer);
            return;
        }
        state.connecting = None;

        match result {
            Ok(stream) => {
                let conn = TelnetConnection::start(stream, peer.clone(), sink, buffer_size);
                state.transport = Some(ActiveTransport::new(generation, Transport::Telnet(conn)));
                state.notify(ServerNotice::Connected {
                    message: format!("Connected to Telnet server at {}", peer),
                });
            }
            Err(err) => {
                log::error!("Failed to connect Telnet to {}: {}", peer, err);
                state.notify(ServerNotice::from(&err));
            }
        }
    }

    fn list_ports(&mut self, session: SessionId) -> Result<Option<ServerNotice>> {
        let tx = self
            .events
            .upgrade()
            .ok_or_else(|| RelayError::ConnectionClosed("Relay is shutting down".to_string()))?;
        tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(serial::list_ports).await {
                Ok(result) => result,
                Err(e) => Err(RelayError::Connect(format!("Error listing serial ports: {}", e))),
            };
            let _ = tx.send(RegistryEvent::PortsListed { session, result });
        });
        Ok(None)
    }

    fn select_serial_port(&mut self, session: SessionId, device: &str) -> Result<Option<ServerNotice>> {
        let device = device.trim().to_string();
        if device.is_empty() {
            return Err(RelayError::InvalidRequest("No serial port provided.".to_string()));
        }
        let tx = self
            .events
            .upgrade()
            .ok_or_else(|| RelayError::ConnectionClosed("Relay is shutting down".to_string()))?;
        let baud_rate = self.config.serial_baud_rate;
        let generation = self.next_generation();

        let state = self.state_mut(session)?;
        state.release_transport("Connection replaced");
        state.connecting = Some(generation);

        tokio::spawn(async move {
            let result = SerialConnection::connect(&device, baud_rate).await;
            let _ = tx.send(RegistryEvent::SerialOpened {
                session,
                generation,
                device,
                result,
            });
        });
        Ok(None)
    }

    fn on_serial_opened(
        &mut self,
        session: SessionId,
        generation: u64,
        device: String,
        result: Result<SerialStream>,
    ) {
        let sink = self.transport_sink(session, generation);
        let Some(state) = self.sessions.get_mut(&session) else {
            log::info!("Session {} gone before {} opened", session, device);
            return;
        };
        if state.connecting != Some(generation) {
            log::info!("Discarding superseded open of {}", device);
            return;
        }
        state.connecting = None;

        match result {
            Ok(stream) => {
                let conn = SerialConnection::from_stream(&device, stream, sink);
                state.transport = Some(ActiveTransport::new(generation, Transport::Serial(conn)));
                log::info!("Port selected and opened: {}", device);
                state.notify(ServerNotice::PortOpened {
                    message: "Port opened".to_string(),
                });
            }
            Err(err) => state.notify(ServerNotice::from(&err)),
        }
    }

    fn send_input(&mut self, session: SessionId, data: &str) -> Result<Option<ServerNotice>> {
        let events = self.events.clone();
        let settle = self.config.autocomplete_settle();
        let generation = self.next_generation();
        let state = self.state_mut(session)?;

        if let Transport::Serial(conn) = state.transport()? {
            conn.write(data.as_bytes())?;
            log::info!("Data written to serial port: {:?}", data);
            return Ok(Some(ServerNotice::InputSent {
                message: format!("Data sent: {}", data),
            }));
        }

        let has_tab = state.autocomplete.arm(data);
        if has_tab {
            state.settle = Timer::spawn(
                &events,
                settle,
                generation,
                RegistryEvent::AutocompleteSettled { session, generation },
            );
        }

        let telnet = state.telnet()?;
        telnet.write(data.as_bytes())?;
        log::info!("Input sent to Telnet: {:?}", data);
        if !has_tab {
            return Ok(Some(ServerNotice::InputSent {
                message: format!("Data sent: {}", data),
            }));
        }

        telnet.write(&[ERASE_LINE])?;
        log::info!("Control+U sent to Telnet server after Tab");
        Ok(Some(ServerNotice::InputSent {
            message: "Data and Control+U sent".to_string(),
        }))
    }

    fn execute_command(&mut self, session: SessionId, command: &str) -> Result<Option<ServerNotice>> {
        let mut line = command.replace('\t', "");
        if !line.ends_with('\n') {
            line.push('\n');
        }
        let state = self.state_mut(session)?;
        state.transport()?.write(line.as_bytes())?;
        log::info!("Command executed: {}", line.trim());
        Ok(Some(ServerNotice::CommandExecuted {
            message: format!("Command executed: {}", line.trim()),
        }))
    }

    fn clear_line(&mut self, session: SessionId) -> Result<Option<ServerNotice>> {
        let state = self.state_mut(session)?;
        state.telnet()?.write(&[ERASE_LINE])?;
        log::info!("Control+U sent to Telnet server");
        Ok(Some(ServerNotice::TerminalCleared {
            message: "Control+U sent".to_string(),
        }))
    }

    fn read_file(&mut self, session: SessionId, path: &str) -> Result<Option<ServerNotice>> {
        let path = path.trim();
        if path.is_empty() {
            return Err(RelayError::InvalidRequest(
                "File path is required for vi command.".to_string(),
            ));
        }
        let state = self.state_mut(session)?;
        let telnet = state.telnet()?;
        if state.pending_read.is_some() {
            return Err(RelayError::InvalidRequest(
                "A file read is already in progress".to_string(),
            ));
        }

        let read = PendingFileRead::new(path);
        telnet.write(format!("{}\n", read.expected_echo()).as_bytes())?;
        log::info!("Command sent to Telnet: {}", read.expected_echo());
        state.pending_read = Some(read);
        state.editing_path = Some(path.to_string());
        Ok(None)
    }

    /// Fire-and-forget: success means the `printf` was queued, not that the shell wrote the file.
    fn save_file(&mut self, session: SessionId, path: &str, content: &str) -> Result<Option<ServerNotice>> {
        let path = path.trim();
        if path.is_empty() {
            return Err(RelayError::InvalidRequest(
                "File path is required for saveVi command.".to_string(),
            ));
        }
        let state = self.state_mut(session)?;
        state
            .telnet()?
            .write(pseudo_file::write_command(path, content).as_bytes())?;
        log::info!("Wrote {} bytes to {} via printf", content.len(), path);
        Ok(Some(ServerNotice::ViSaved {
            message: format!("File {} updated successfully.", path),
        }))
    }

    fn request_script(
        &mut self,
        session: SessionId,
        script_text: Option<String>,
        script_id: Option<String>,
    ) -> Result<Option<ServerNotice>> {
        let script_text = script_text.filter(|text| !text.trim().is_empty());
        match (script_text, script_id) {
            (Some(text), _) => {
                self.run_script(session, &text)?;
                Ok(None)
            }
            (None, Some(id)) => {
                let state = self.state_mut(session)?;
                state.telnet()?;
                if state.script.is_some() {
                    return Err(RelayError::AlreadyRunning);
                }
                let tx = self
                    .events
                    .upgrade()
                    .ok_or_else(|| RelayError::ConnectionClosed("Relay is shutting down".to_string()))?;
                let scripts = Arc::clone(&self.scripts);
                tokio::spawn(async move {
                    let result = scripts.script_text(&id).await.map_err(RelayError::from);
                    let _ = tx.send(RegistryEvent::ScriptResolved { session, result });
                });
                Ok(None)
            }
            (None, None) => Err(RelayError::InvalidRequest("No scriptText provided.".to_string())),
        }
    }

    fn run_script(&mut self, session: SessionId, text: &str) -> Result<()> {
        let state = self.state_mut(session)?;
        state.telnet()?;
        if state.script.is_some() {
            log::warn!("Script rejected for {}: one is already running", session);
            return Err(RelayError::AlreadyRunning);
        }

        let mut runner = ScriptRunner::new(text);
        let progress = runner.start();
        state.script = Some(ActiveScript { runner, sleep: None });
        state.notify(ServerNotice::ScriptQueued {
            message: "Script started".to_string(),
        });
        self.apply_script_progress(session, progress);
        Ok(())
    }

    fn stop_script(&mut self, session: SessionId) -> Result<Option<ServerNotice>> {
        let state = self.state_mut(session)?;
        if !state.stop_script() {
            return Err(RelayError::InvalidRequest("No script is running".to_string()));
        }
        Ok(None)
    }

    fn apply_script_progress(&mut self, session: SessionId, progress: ScriptProgress) {
        let events = self.events.clone();
        let generation = self.next_generation();
        let Some(state) = self.sessions.get_mut(&session) else {
            return;
        };

        for line in &progress.sends {
            let written = state
                .telnet()
                .and_then(|telnet| telnet.write(format!("{}\n", line).as_bytes()));
            if let Err(err) = written {
                log::error!("Script aborted, could not send {:?}: {}", line, err);
                state.notify(ServerNotice::from(&err));
                state.stop_script();
                return;
            }
            log::info!("Command sent: {}", line);
        }

        match progress.blocked {
            Blocked::Sleeping(delay) => {
                let timer = Timer::spawn(
                    &events,
                    delay,
                    generation,
                    RegistryEvent::SleepElapsed { session, generation },
                );
                if let Some(active) = state.script.as_mut() {
                    active.sleep = timer;
                }
            }
            Blocked::Waiting(_) => {}
            Blocked::Completed => {
                state.script = None;
                log::info!("Script execution completed");
                state.notify(ServerNotice::ScriptCompleted {
                    message: "Script execution completed".to_string(),
                });
            }
        }
    }

    fn on_sleep_elapsed(&mut self, session: SessionId, generation: u64) {
        let Some(active) = self
            .sessions
            .get_mut(&session)
            .and_then(|state| state.script.as_mut())
        else {
            return;
        };
        if active.sleep.as_ref().map(|timer| timer.generation) != Some(generation) {
            return;
        }
        active.sleep = None;
        if let Some(progress) = active.runner.resume_after_sleep() {
            self.apply_script_progress(session, progress);
        }
    }

    fn on_autocomplete_settled(&mut self, session: SessionId, generation: u64) {
        let Some(state) = self.sessions.get_mut(&session) else {
            return;
        };
        if state.settle.as_ref().map(|timer| timer.generation) == Some(generation) {
            state.clear_autocomplete();
            log::debug!("Autocomplete expectation settled for {}", session);
        }
    }

    fn on_transport_event(&mut self, session: SessionId, generation: u64, event: TransportEvent) {
        let Some(state) = self.sessions.get_mut(&session) else {
            return;
        };
        if state.transport.as_ref().map(|active| active.generation) != Some(generation) {
            log::debug!("Dropping event from replaced transport: {:?}", event);
            return;
        }

        match event {
            TransportEvent::Data(bytes) => {
                let Some(active) = state.transport.as_mut() else {
                    return;
                };
                let text = active.text.decode(&bytes);
                if !text.is_empty() {
                    self.on_telnet_data(session, text);
                }
            }
            TransportEvent::Line(line) => state.notify(ServerNotice::SerialData { data: line }),
            TransportEvent::OptionDo(opt) => log::debug!("Answered DO {} with WONT", opt),
            TransportEvent::OptionWill(opt) => log::debug!("Answered WILL {} with DO", opt),
            TransportEvent::Closed => {
                if state.telnet().is_ok() {
                    state.notify(ServerNotice::TelnetClosed {
                        message: "Telnet connection closed".to_string(),
                    });
                } else {
                    state.notify(ServerNotice::from(RelayError::ConnectionClosed(
                        "Serial port closed".to_string(),
                    )));
                }
                state.release_transport("Connection closed");
            }
            TransportEvent::Error(message) => {
                log::error!("Transport error on {}: {}", session, message);
                state.notify(ServerNotice::from(RelayError::ConnectionClosed(message)));
                state.release_transport("Connection error");
            }
        }
    }

    /// Route one decoded telnet chunk: a pending file read consumes it
    /// entirely; otherwise it goes to the client (subject to autocomplete)
    /// and then to the script runner.
    fn on_telnet_data(&mut self, session: SessionId, text: String) {
        let events = self.events.clone();
        let settle = self.config.autocomplete_settle();
        let generation = self.next_generation();
        let Some(state) = self.sessions.get_mut(&session) else {
            return;
        };

        if let Some(read) = state.pending_read.as_mut() {
            match read.feed(&text) {
                ReadOutcome::Pending => {}
                ReadOutcome::Content(content) => {
                    let file_path = state
                        .editing_path
                        .clone()
                        .unwrap_or_else(|| read.path().to_string());
                    state.pending_read = None;
                    state.notify(ServerNotice::ViContent { file_path, content });
                }
                ReadOutcome::Failed(err) => {
                    state.pending_read = None;
                    state.editing_path = None;
                    state.notify(ServerNotice::from(&err));
                }
            }
            return;
        }

        match state.autocomplete.classify(&text) {
            None => state.notify(ServerNotice::TelnetData { data: text.clone() }),
            Some(class) => {
                match class {
                    Classification::Echo => log::info!("Echoed autocomplete data detected and skipped."),
                    Classification::Ambiguous => {
                        log::info!("Received bell character for autocomplete. Not sending autocompleteData.")
                    }
                    Classification::Completion => {
                        state.notify(ServerNotice::AutocompleteData { data: text.clone() })
                    }
                }
                state.settle = Timer::spawn(
                    &events,
                    settle,
                    generation,
                    RegistryEvent::AutocompleteSettled { session, generation },
                );
            }
        }

        let progress = state
            .script
            .as_mut()
            .and_then(|active| active.runner.on_data(&text));
        if let Some(progress) = progress {
            self.apply_script_progress(session, progress);
        }
    }

    /// Release every resource of `session`. Calling it again is a no-op.
    fn teardown(&mut self, session: SessionId) {
        if let Some(state) = self.sessions.get_mut(&session) {
            state.release_transport("Connection closed");
        }
        if self.sessions.remove(&session).is_some() {
            log::info!("Session {} closed", session);
        }
    }

    fn shutdown(&mut self) {
        log::info!("Shutting down session registry ({} sessions)", self.sessions.len());
        let sessions: Vec<SessionId> = self.sessions.keys().copied().collect();
        for session in sessions {
            self.teardown(session);
        }
    }
}

/// Cloneable entry point handed to whatever accepts client connections.
#[derive(Clone, Debug)]
pub struct RegistryHandle {
    events: mpsc::UnboundedSender<RegistryEvent>,
}

impl RegistryHandle {
    fn post(&self, event: RegistryEvent) {
        if self.events.send(event).is_err() {
            log::warn!("Session registry is not running");
        }
    }

    /// Register a new client channel. Notices for it arrive on the receiver,
    /// which ends once the session is torn down.
    pub fn open_session(&self) -> (SessionId, mpsc::UnboundedReceiver<ServerNotice>) {
        let session = SessionId::new();
        let (notices, rx) = mpsc::unbounded_channel();
        self.post(RegistryEvent::Open { session, notices });
        (session, rx)
    }

    /// Submit one raw JSON frame from the client.
    pub fn submit(&self, session: SessionId, raw: impl Into<String>) {
        self.post(RegistryEvent::Frame {
            session,
            raw: raw.into(),
        });
    }

    pub fn dispatch(&self, session: SessionId, message: ClientMessage) {
        self.post(RegistryEvent::Client { session, message });
    }

    /// The client channel closed or errored.
    pub fn close_session(&self, session: SessionId) {
        self.post(RegistryEvent::Close { session });
    }

    pub fn connect_telnet(&self, session: SessionId, host: &str, port: u16) {
        self.dispatch(
            session,
            ClientMessage::Connect {
                host: host.to_string(),
                port: PortField::Number(u64::from(port)),
            },
        );
    }

    pub fn select_serial_port(&self, session: SessionId, device: &str) {
        self.dispatch(session, ClientMessage::SelectPort { port: device.to_string() });
    }

    pub fn send_input(&self, session: SessionId, data: &str) {
        self.dispatch(session, ClientMessage::SendInput { data: data.to_string() });
    }

    pub fn execute_command(&self, session: SessionId, command: &str) {
        self.dispatch(
            session,
            ClientMessage::ExecuteCommand {
                command: command.to_string(),
            },
        );
    }

    pub fn clear_line(&self, session: SessionId) {
        self.dispatch(session, ClientMessage::ClearTerminal);
    }

    pub fn run_script(&self, session: SessionId, script_text: &str) {
        self.dispatch(
            session,
            ClientMessage::RunScript {
                script_text: Some(script_text.to_string()),
                script_id: None,
            },
        );
    }

    pub fn read_file(&self, session: SessionId, path: &str) {
        self.dispatch(session, ClientMessage::Vi { command: path.to_string() });
    }

    pub fn save_file(&self, session: SessionId, path: &str, content: &str) {
        self.dispatch(
            session,
            ClientMessage::SaveVi {
                command: path.to_string(),
                content: content.to_string(),
            },
        );
    }

    pub fn teardown(&self, session: SessionId) {
        self.close_session(session);
    }

    /// Number of live sessions; 0 once the registry has stopped.
    pub async fn session_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.post(RegistryEvent::Count { reply });
        rx.await.unwrap_or(0)
    }

    /// Tear down every session and stop the actor.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        self.post(RegistryEvent::Shutdown { done });
        let _ = rx.await;
    }
}
