//! Physical link boundary.
//!
//! A [`Link`] is one opened transport session: write bytes, destroy. Each
//! opened link comes with a [`DisconnectSignal`] that fires at most once,
//! when the underlying transport drops. The link manager consumes the
//! signal; nothing else observes it.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;

use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Single-producer disconnect notification, at most one event per opened
/// link.
pub type DisconnectSignal = mpsc::Receiver<()>;

/// One physical connection attempt/session.
#[async_trait]
pub trait Link: Send {
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;
    async fn destroy(&mut self);
}

/// Opens links on a given port path.
#[async_trait]
pub trait LinkFactory: Send + Sync {
    async fn open(&self, path: &str) -> Result<(Box<dyn Link>, DisconnectSignal)>;
}

/// Serial transport link over tokio-serial.
pub struct SerialLink {
    writer: tokio::io::WriteHalf<tokio_serial::SerialStream>,
    reader_task: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl Link for SerialLink {
    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await.map_err(Error::Write)?;
        self.writer.flush().await.map_err(Error::Write)
    }

    async fn destroy(&mut self) {
        self.reader_task.abort();
        let _ = self.writer.shutdown().await;
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Opens [`SerialLink`]s with a fixed baud rate.
pub struct SerialLinkFactory {
    baud_rate: u32,
}

impl SerialLinkFactory {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

#[async_trait]
impl LinkFactory for SerialLinkFactory {
    async fn open(&self, path: &str) -> Result<(Box<dyn Link>, DisconnectSignal)> {
        let stream = tokio_serial::new(path, self.baud_rate)
            .open_native_async()
            .map_err(|source| Error::Open { port: path.to_string(), source })?;

        let (mut reader, writer) = tokio::io::split(stream);
        let (disconnect_tx, disconnect_rx) = mpsc::channel(1);
        let port = path.to_string();

        // Drain the read side so the OS buffer cannot fill, and report
        // EOF or a read error as the disconnect event. Frame decoding is
        // owned by the packet decoder, not this layer.
        let reader_task = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        debug!(port = %port, "Serial stream reached EOF");
                        break;
                    }
                    Ok(n) => {
                        trace!(port = %port, bytes = n, "Received serial data");
                    }
                    Err(e) => {
                        debug!(port = %port, error = %e, "Serial read failed");
                        break;
                    }
                }
            }
            let _ = disconnect_tx.send(()).await;
        });

        Ok((Box::new(SerialLink { writer, reader_task }), disconnect_rx))
    }
}
