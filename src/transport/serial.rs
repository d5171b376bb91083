use super::{TransportEvent, TransportSink};
use crate::error::{RelayError, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// List serial devices present on the host.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(|e| {
        log::error!("Error listing serial ports: {}", e);
        RelayError::Connect(format!("Error listing serial ports: {}", e))
    })?;
    log::info!("Available serial ports listed ({})", ports.len());
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// An open serial device. No negotiation, line-delimited reads.
#[derive(Debug)]
pub struct SerialConnection {
    device: String,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl SerialConnection {
    /// Open `device` at `baud_rate` and start the connection tasks.
    pub async fn open(device: &str, baud_rate: u32, sink: TransportSink) -> Result<Self> {
        let stream = Self::connect(device, baud_rate).await?;
        Ok(Self::from_stream(device, stream, sink))
    }

    /// Open the device only. The open and termios setup block, so they run
    /// on the blocking pool.
    pub async fn connect(device: &str, baud_rate: u32) -> Result<SerialStream> {
        let path = device.to_string();
        let opened = tokio::task::spawn_blocking(move || {
            tokio_serial::new(path.as_str(), baud_rate).open_native_async()
        })
        .await;
        match opened {
            Ok(Ok(stream)) => {
                log::info!("Serial port {} opened at {} baud", device, baud_rate);
                Ok(stream)
            }
            Ok(Err(e)) => {
                log::error!("Error opening serial port {}: {}", device, e);
                Err(RelayError::Connect(format!("Error opening serial port {}: {}", device, e)))
            }
            Err(e) => Err(RelayError::Connect(format!("Error opening serial port {}: {}", device, e))),
        }
    }

    /// Wire reader and writer tasks over any duplex byte stream.
    pub(crate) fn from_stream<S>(device: &str, stream: S, sink: TransportSink) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_lines(read_half, sink.clone(), device.to_string()));
        let writer = tokio::spawn(write_loop(write_half, rx, sink));
        Self {
            device: device.to_string(),
            outbound: tx,
            reader: Some(reader),
            writer: Some(writer),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn write(&self, data: &[u8]) -> Result<()> {
        if self.reader.is_none() {
            return Err(RelayError::NotConnected("Serial port is not open".to_string()));
        }
        self.outbound
            .send(data.to_vec())
            .map_err(|_| RelayError::Write("Error writing to serial port: port closed".to_string()))
    }

    /// Idempotent; a no-op on an already closed port.
    pub fn close(&mut self) {
        let reader = self.reader.take();
        let writer = self.writer.take();
        if reader.is_none() && writer.is_none() {
            return;
        }
        for task in [reader, writer].into_iter().flatten() {
            task.abort();
        }
        log::info!("Serial port {} closed", self.device);
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_lines<R>(reader: R, sink: TransportSink, device: String)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => {
                sink.emit(TransportEvent::Closed);
                return;
            }
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                }
                let text = String::from_utf8_lossy(&line).into_owned();
                log::debug!("Data received from serial port {}: {}", device, text);
                sink.emit(TransportEvent::Line(text));
            }
            Err(e) => {
                log::error!("Serial port error on {}: {}", device, e);
                sink.emit(TransportEvent::Error(e.to_string()));
                return;
            }
        }
    }
}

async fn write_loop<W>(mut port: W, mut queue: mpsc::UnboundedReceiver<Vec<u8>>, sink: TransportSink)
where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = queue.recv().await {
        let result = async {
            port.write_all(&bytes).await?;
            port.flush().await
        }
        .await;
        if let Err(e) = result {
            log::error!("Error writing to serial port: {}", e);
            sink.emit(TransportEvent::Error(e.to_string()));
            return;
        }
    }
}
