//! Serial frame reader.
//!
//! Splits the raw byte stream into newline-delimited frames. Encoding noise
//! is tolerated (invalid UTF-8 is replaced, never fatal) and blank lines are
//! skipped. A dead link surfaces as [`BridgeError::LinkLost`]; the reader
//! never retries on its own, restart policy belongs to the supervisor.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_util::sync::CancellationToken;

use serelay_common::SerialConfig;

use crate::error::{BridgeError, Result};
use crate::stats::BridgeStats;

/// One newline-delimited unit of input, lossily decoded to text.
pub type RawFrame = String;

const READ_CHUNK: usize = 1024;

/// Upper bound on a single frame. A device streaming bytes with no newline
/// would otherwise grow the buffer without limit; anything this large is not
/// a telemetry record.
const MAX_FRAME_LEN: usize = 64 * 1024;

/// Open the serial port for the configured path and baud rate.
///
/// Failure here at launch is fatal; during a supervised restart it just
/// schedules another attempt.
pub fn open_serial(config: &SerialConfig) -> Result<SerialStream> {
    tokio_serial::new(&config.port, config.baud)
        .open_native_async()
        .map_err(|e| {
            BridgeError::startup(format!("cannot open serial port '{}': {}", config.port, e))
        })
}

/// Incremental frame splitter over any byte source.
///
/// Non-restartable: after the first [`BridgeError::LinkLost`] the reader is
/// finished and a fresh one must be built over a new port handle.
pub struct FrameReader<R> {
    source: R,
    buf: Vec<u8>,
    read_timeout: Duration,
    discarding: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(source: R, read_timeout: Duration) -> Self {
        Self {
            source,
            buf: Vec::with_capacity(READ_CHUNK),
            read_timeout,
            discarding: false,
        }
    }

    /// The next complete, non-blank frame.
    ///
    /// Suspends until a full line arrives. Each underlying read is bounded
    /// by the configured timeout; a quiet link is not an error, the wait
    /// simply continues on the next loop turn. Frames longer than
    /// [`MAX_FRAME_LEN`] are discarded whole. EOF and I/O faults are
    /// terminal.
    pub async fn next_frame(&mut self) -> Result<RawFrame> {
        loop {
            while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.buf.drain(..=pos).collect();
                if self.discarding {
                    // Tail of an oversized frame
                    self.discarding = false;
                    continue;
                }
                let text = String::from_utf8_lossy(&raw);
                let line = text.trim();
                if !line.is_empty() {
                    return Ok(line.to_string());
                }
            }

            if self.buf.len() > MAX_FRAME_LEN {
                if !self.discarding {
                    tracing::warn!(
                        len = self.buf.len(),
                        max = MAX_FRAME_LEN,
                        "frame exceeds maximum length, discarding"
                    );
                    self.discarding = true;
                }
                self.buf.clear();
            }

            let mut chunk = [0u8; READ_CHUNK];
            match timeout(self.read_timeout, self.source.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    return Err(BridgeError::LinkLost(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "serial stream closed",
                    )));
                }
                Ok(Ok(n)) => self.buf.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(BridgeError::LinkLost(e)),
                Err(_) => {
                    tracing::trace!(timeout = ?self.read_timeout, "no serial data within read timeout");
                }
            }
        }
    }
}

/// Reader task: forwards frames toward the normalizer until the link dies
/// or shutdown is requested.
pub async fn run_reader<R: AsyncRead + Unpin>(
    mut reader: FrameReader<R>,
    frames: mpsc::Sender<RawFrame>,
    stats: Arc<BridgeStats>,
    token: CancellationToken,
) -> Result<()> {
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            frame = reader.next_frame() => frame?,
        };
        stats.record_frame();
        if frames.send(frame).await.is_err() {
            // Normalizer is gone; the bridge is shutting down
            return Ok(());
        }
    }
}
