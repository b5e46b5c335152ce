//! Standard I/O transport: newline-delimited JSON frames.
//!
//! Messages are delimited by `\n` and must not contain embedded newlines;
//! [`StdioTransport::send`] rejects frames that would break the framing.
//!
//! Lock discipline follows the usual hybrid pattern: `std::sync::Mutex` for
//! state that never crosses an await, `tokio::sync::Mutex` for the I/O halves
//! that do.

use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error, trace, warn};

use async_trait::async_trait;
use crossmcp_protocol::MAX_MESSAGE_SIZE;

use crate::error::{TransportError, TransportResult};
use crate::traits::{Transport, TransportState};

type BoxedRead = Pin<Box<dyn AsyncRead + Send + Sync + 'static>>;
type BoxedWrite = Pin<Box<dyn AsyncWrite + Send + Sync + 'static>>;
type FrameReader = FramedRead<BufReader<BoxedRead>, LinesCodec>;
type FrameWriter = FramedWrite<BoxedWrite, LinesCodec>;

/// Depth of the inbound frame channel before the reader applies backpressure.
const RECEIVE_CHANNEL_DEPTH: usize = 1024;

/// Where the transport's streams come from.
enum StreamSource {
    /// The current process's stdin/stdout
    ProcessStdio,
    /// Caller-provided streams, consumed on connect
    Raw {
        reader: Option<BoxedRead>,
        writer: Option<BoxedWrite>,
    },
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcessStdio => write!(f, "ProcessStdio"),
            Self::Raw { .. } => write!(f, "Raw"),
        }
    }
}

/// Newline-delimited JSON transport over stdio or arbitrary async streams.
pub struct StdioTransport {
    state: Arc<StdMutex<TransportState>>,
    stream_source: Arc<TokioMutex<StreamSource>>,
    writer: Arc<TokioMutex<Option<FrameWriter>>>,
    receive_channel: Arc<TokioMutex<Option<mpsc::Receiver<Bytes>>>>,
    reader_task: Arc<StdMutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("state", &self.state)
            .field("stream_source", &self.stream_source)
            .finish_non_exhaustive()
    }
}

impl StdioTransport {
    /// Transport over the current process's stdin/stdout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_source(StreamSource::ProcessStdio)
    }

    /// Transport over caller-provided streams.
    ///
    /// `reader` is what we read frames from (a child's stdout, one half of a
    /// duplex); `writer` is what we write frames to.
    pub fn from_raw<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
        W: AsyncWrite + Send + Sync + 'static,
    {
        Self::with_source(StreamSource::Raw {
            reader: Some(Box::pin(reader)),
            writer: Some(Box::pin(writer)),
        })
    }

    fn with_source(source: StreamSource) -> Self {
        Self {
            state: Arc::new(StdMutex::new(TransportState::Disconnected)),
            stream_source: Arc::new(TokioMutex::new(source)),
            writer: Arc::new(TokioMutex::new(None)),
            receive_channel: Arc::new(TokioMutex::new(None)),
            reader_task: Arc::new(StdMutex::new(None)),
        }
    }

    fn set_state(&self, new_state: TransportState) {
        let mut state = self.state.lock().expect("state mutex poisoned");
        if *state != new_state {
            trace!("stdio transport state: {:?} -> {:?}", *state, new_state);
            *state = new_state;
        }
    }

    async fn setup_streams(&self) -> TransportResult<()> {
        let mut source = self.stream_source.lock().await;

        let reader: FrameReader = match &mut *source {
            StreamSource::ProcessStdio => {
                let stdin: BoxedRead = Box::pin(tokio::io::stdin());
                let stdout: BoxedWrite = Box::pin(tokio::io::stdout());
                *self.writer.lock().await = Some(FramedWrite::new(stdout, LinesCodec::new()));
                FramedRead::new(BufReader::new(stdin), LinesCodec::new())
            }
            StreamSource::Raw { reader, writer } => {
                let raw_reader = reader.take().ok_or_else(|| {
                    TransportError::Configuration("reader stream already consumed".to_string())
                })?;
                let raw_writer = writer.take().ok_or_else(|| {
                    TransportError::Configuration("writer stream already consumed".to_string())
                })?;
                *self.writer.lock().await = Some(FramedWrite::new(raw_writer, LinesCodec::new()));
                FramedRead::new(BufReader::new(raw_reader), LinesCodec::new())
            }
        };

        let (tx, rx) = mpsc::channel(RECEIVE_CHANNEL_DEPTH);
        *self.receive_channel.lock().await = Some(rx);

        let handle = tokio::spawn(read_loop(reader, tx));
        *self.reader_task.lock().expect("task mutex poisoned") = Some(handle);

        Ok(())
    }
}

/// Background reader: forwards each line as a frame, in arrival order.
async fn read_loop(mut reader: FrameReader, tx: mpsc::Sender<Bytes>) {
    while let Some(result) = reader.next().await {
        match result {
            Ok(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if line.len() > MAX_MESSAGE_SIZE {
                    warn!(size = line.len(), "dropping oversized inbound frame");
                    continue;
                }
                trace!(size = line.len(), "received frame");
                // Blocking send preserves frame order under backpressure.
                if tx.send(Bytes::from(line)).await.is_err() {
                    debug!("receive channel closed, stopping reader");
                    break;
                }
            }
            Err(e) => {
                error!("stdio read failed: {e}");
                break;
            }
        }
    }
    debug!("stdio reader task finished");
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> TransportResult<()> {
        if self.is_connected().await {
            return Ok(());
        }
        self.set_state(TransportState::Connecting);
        match self.setup_streams().await {
            Ok(()) => {
                self.set_state(TransportState::Connected);
                debug!("stdio transport connected");
                Ok(())
            }
            Err(e) => {
                self.set_state(TransportState::Failed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> TransportResult<()> {
        *self.writer.lock().await = None;
        *self.receive_channel.lock().await = None;
        if let Some(handle) = self
            .reader_task
            .lock()
            .expect("task mutex poisoned")
            .take()
        {
            handle.abort();
        }
        self.set_state(TransportState::Disconnected);
        debug!("stdio transport disconnected");
        Ok(())
    }

    async fn send(&self, frame: Bytes) -> TransportResult<()> {
        if !self.is_connected().await {
            return Err(TransportError::Closed);
        }

        let line = std::str::from_utf8(&frame)
            .map_err(|e| TransportError::Framing(format!("frame is not UTF-8: {e}")))?;

        // Messages are newline-delimited; an embedded newline would split the
        // frame and desynchronize the peer.
        if line.contains('\n') || line.contains('\r') {
            return Err(TransportError::Framing(
                "frame contains embedded newline".to_string(),
            ));
        }

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(TransportError::Closed)?;
        writer
            .send(line.to_string())
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        SinkExt::<String>::flush(writer)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        trace!(size = frame.len(), "sent frame");
        Ok(())
    }

    async fn receive(&self) -> TransportResult<Option<Bytes>> {
        let mut channel = self.receive_channel.lock().await;
        match channel.as_mut() {
            Some(rx) => Ok(rx.recv().await),
            None => Ok(None),
        }
    }

    async fn state(&self) -> TransportState {
        self.state.lock().expect("state mutex poisoned").clone()
    }

    fn endpoint(&self) -> Option<String> {
        Some("stdio://".to_string())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}
