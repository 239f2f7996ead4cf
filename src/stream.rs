use crate::error::ClientError;
use crate::protocol::StreamEvent;
use crate::sse::SseDecoder;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

pub const CLOSE_REASON: &str = "Stream closed";

const HANDLE_BUFFER: usize = 64;

/// One step of a run's event stream.
///
/// A sequence yields any number of `Update`s followed by exactly one `Closed` or
/// `Failed`, and nothing after that.
#[derive(Debug)]
pub enum StreamUpdate {
    Update(StreamEvent),
    Closed(String),
    Failed(ClientError),
}

impl StreamUpdate {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamUpdate::Update(_))
    }
}

pub type UpdateStream = BoxStream<'static, StreamUpdate>;

pub(crate) fn failed(err: ClientError) -> StreamUpdate {
    tracing::error!(error = %err, "stream error");
    StreamUpdate::Failed(err)
}

struct DecodeState<S> {
    bytes: S,
    decoder: SseDecoder,
    ready: VecDeque<StreamEvent>,
    ended: bool,
}

impl<S> DecodeState<S> {
    fn enqueue(&mut self, lines: Vec<crate::sse::DataLine>) {
        for line in lines {
            match line {
                Ok(event) => self.ready.push_back(event),
                Err(malformed) => {
                    tracing::warn!(
                        line = %malformed.line,
                        error = %malformed.source,
                        "skipping malformed stream event"
                    );
                }
            }
        }
    }
}

/// Turn a raw body stream into updates. Read errors end the sequence with `Failed`,
/// the end of the body with `Closed`.
pub fn decode_updates<S, B, E>(bytes: S) -> impl Stream<Item = StreamUpdate>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<ClientError>,
{
    let state = DecodeState {
        bytes,
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        ended: false,
    };

    stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((StreamUpdate::Update(event), Some(state)));
            }
            if state.ended {
                tracing::debug!("stream closed");
                return Some((StreamUpdate::Closed(CLOSE_REASON.to_string()), None));
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let lines = state.decoder.feed(chunk.as_ref());
                    state.enqueue(lines);
                }
                Some(Err(err)) => return Some((failed(err.into()), None)),
                None => {
                    let lines = state.decoder.finish();
                    state.enqueue(lines);
                    state.ended = true;
                }
            }
        }
    })
}

/// A stream consumed by a background task.
///
/// Dropping the handle detaches the task; it stops at its next send.
#[derive(Debug)]
pub struct StreamHandle {
    updates: mpsc::Receiver<StreamUpdate>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    pub fn spawn(updates: UpdateStream) -> Self {
        let (tx, rx) = mpsc::channel(HANDLE_BUFFER);
        let task = tokio::spawn(async move {
            let mut updates = updates;
            while let Some(update) = updates.next().await {
                if tx.send(update).await.is_err() {
                    tracing::debug!("stream receiver dropped, stopping");
                    break;
                }
            }
        });

        Self { updates: rx, task }
    }

    pub async fn next(&mut self) -> Option<StreamUpdate> {
        self.updates.recv().await
    }

    /// Stop reading. No terminal update is delivered after an abort.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn into_stream(self) -> ReceiverStream<StreamUpdate> {
        ReceiverStream::new(self.updates)
    }
}

type UpdateFn = Box<dyn FnMut(StreamEvent) + Send>;
type CloseFn = Box<dyn FnOnce(String) + Send>;
type ErrorFn = Box<dyn FnOnce(ClientError) + Send>;

/// Callback view over an update stream. At most one of `on_close` and `on_error`
/// runs, and only once.
pub struct StreamCallbacks {
    on_update: UpdateFn,
    on_close: CloseFn,
    on_error: ErrorFn,
}

impl StreamCallbacks {
    pub fn new(
        on_update: impl FnMut(StreamEvent) + Send + 'static,
        on_close: impl FnOnce(String) + Send + 'static,
        on_error: impl FnOnce(ClientError) + Send + 'static,
    ) -> Self {
        Self {
            on_update: Box::new(on_update),
            on_close: Box::new(on_close),
            on_error: Box::new(on_error),
        }
    }

    pub(crate) fn fail(self, err: ClientError) {
        (self.on_error)(err);
    }

    pub async fn drive<S>(mut self, updates: S)
    where
        S: Stream<Item = StreamUpdate>,
    {
        let mut updates = std::pin::pin!(updates);
        while let Some(update) = updates.next().await {
            match update {
                StreamUpdate::Update(event) => (self.on_update)(event),
                StreamUpdate::Closed(reason) => return (self.on_close)(reason),
                StreamUpdate::Failed(err) => return (self.on_error)(err),
            }
        }
    }
}
