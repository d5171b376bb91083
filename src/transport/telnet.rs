use super::iac::{encode_data, negotiation_reply, IacDecoder, TelnetEvent};
use super::{TransportEvent, TransportSink};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Telnet client connection.
///
/// A reader task decodes IAC sequences and answers negotiation; a writer task
/// drains the outbound queue into the socket. Both report through the sink.
#[derive(Debug)]
pub struct TelnetConnection {
    peer: String,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl TelnetConnection {
    /// Connect to `host:port` and start the connection tasks.
    pub async fn open(
        host: &str,
        port: u16,
        config: &RelayConfig,
        sink: TransportSink,
    ) -> Result<Self> {
        let stream = Self::connect(host, port, config.connect_timeout()).await?;
        Ok(Self::start(
            stream,
            format!("{}:{}", host, port),
            sink,
            config.read_buffer_size,
        ))
    }

    /// Establish the TCP connection only. Failures become `RelayError::Connect`; no retry.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                log::error!("Telnet socket error: {}", e);
                return Err(RelayError::Connect(format!("Telnet connection error: {}", e)));
            }
            Err(_) => {
                log::error!("Telnet connect to {}:{} timed out", host, port);
                return Err(RelayError::Connect(format!(
                    "Telnet connection error: timed out connecting to {}:{}",
                    host, port
                )));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("set_nodelay failed: {}", e);
        }
        log::info!("Connected to Telnet server at {}:{}", host, port);
        Ok(stream)
    }

    /// Spawn the reader and writer tasks over an established stream.
    pub fn start<S>(stream: S, peer: String, sink: TransportSink, buffer_size: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(write_half, rx, sink.clone()));
        let reader = tokio::spawn(read_loop(read_half, tx.clone(), sink, buffer_size.max(1)));
        Self {
            peer,
            outbound: tx,
            reader: Some(reader),
            writer: Some(writer),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        self.reader.is_some() && !self.outbound.is_closed()
    }

    /// Queue data for the peer, escaping literal IAC bytes.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        if self.reader.is_none() {
            return Err(RelayError::telnet_not_open());
        }
        self.outbound
            .send(encode_data(data))
            .map_err(|_| RelayError::Write("Error sending input to Telnet: connection closed".to_string()))
    }

    /// Stop both tasks and drop the socket. Safe to call repeatedly.
    pub fn close(&mut self) {
        let reader = self.reader.take();
        let writer = self.writer.take();
        if reader.is_none() && writer.is_none() {
            return;
        }
        for task in [reader, writer].into_iter().flatten() {
            task.abort();
        }
        log::info!("Telnet connection to {} closed", self.peer);
    }
}

impl Drop for TelnetConnection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut socket: R,
    replies: mpsc::UnboundedSender<Vec<u8>>,
    sink: TransportSink,
    buffer_size: usize,
) {
    let mut decoder = IacDecoder::new();
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) => {
                log::info!("Telnet connection closed");
                sink.emit(TransportEvent::Closed);
                return;
            }
            Ok(n) => n,
            Err(e) => {
                log::error!("Telnet input stream error: {}", e);
                sink.emit(TransportEvent::Error(format!("Telnet input stream error: {}", e)));
                return;
            }
        };

        for event in decoder.decode(&buf[..n]) {
            if let Some(reply) = negotiation_reply(&event) {
                // Negotiation replies are raw IAC sequences, not data.
                let _ = replies.send(reply.to_vec());
            }
            match event {
                TelnetEvent::Data(bytes) => {
                    log::debug!("Data received from Telnet: {}", String::from_utf8_lossy(&bytes));
                    sink.emit(TransportEvent::Data(bytes));
                }
                TelnetEvent::Do(opt) => {
                    log::info!("Telnet server requested DO {}", opt);
                    sink.emit(TransportEvent::OptionDo(opt));
                }
                TelnetEvent::Will(opt) => {
                    log::info!("Telnet server sent WILL {}", opt);
                    sink.emit(TransportEvent::OptionWill(opt));
                }
                TelnetEvent::Dont(opt) | TelnetEvent::Wont(opt) => {
                    log::debug!("Telnet server declined option {}", opt);
                }
            }
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut socket: W,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
    sink: TransportSink,
) {
    while let Some(bytes) = queue.recv().await {
        if let Err(e) = socket.write_all(&bytes).await {
            log::error!("Error writing to Telnet: {}", e);
            sink.emit(TransportEvent::Error(format!("Telnet write error: {}", e)));
            return;
        }
    }
    let _ = socket.shutdown().await;
}
