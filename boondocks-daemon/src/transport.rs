//! Newline-delimited JSON framing on top of any async byte stream.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use boondocks_core::{Event, Outbound};

use crate::error::{io_err, DaemonError};

/// Where the event loop reads inbound events from.
///
/// `Ok(None)` means the host went away cleanly.
#[allow(async_fn_in_trait)]
pub trait EventSource {
    async fn next_event(&mut self) -> Result<Option<Event>, DaemonError>;
}

/// One event per line from an async reader. Blank lines are skipped.
pub struct LineSource<R> {
    lines: Lines<BufReader<R>>,
    label: String,
}

impl<R: AsyncRead + Unpin> LineSource<R> {
    /// `label` names the stream in I/O errors.
    pub fn new(reader: R, label: impl Into<String>) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            label: label.into(),
        }
    }
}

impl<R: AsyncRead + Unpin> EventSource for LineSource<R> {
    async fn next_event(&mut self) -> Result<Option<Event>, DaemonError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| io_err(&self.label, e))?;
            let Some(line) = line else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(Event::from_json(&line)?));
        }
    }
}

impl EventSource for UnboundedReceiver<Event> {
    async fn next_event(&mut self) -> Result<Option<Event>, DaemonError> {
        Ok(self.recv().await)
    }
}

/// Drain `rx` onto `writer`, one JSON line per event, flushing each line.
///
/// Finishes once every sender is dropped, then shuts the writer down.
/// Resolves to the number of events written.
pub fn spawn_writer<W>(
    mut writer: W,
    mut rx: UnboundedReceiver<Outbound>,
) -> JoinHandle<Result<u64, DaemonError>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut written = 0u64;
        while let Some(event) = rx.recv().await {
            let line = event.to_json()?;
            write_line(&mut writer, &line).await?;
            tracing::trace!(event = event.kind(), "event written");
            written += 1;
        }
        if let Err(err) = writer.shutdown().await {
            tracing::debug!(error = %err, "outbound stream already closed");
        }
        Ok(written)
    })
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<(), DaemonError> {
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}
