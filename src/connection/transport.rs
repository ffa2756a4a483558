// src/connection/transport.rs
use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use log::{debug, info, warn};
use reqwest::{
    Client, StatusCode, Url,
    header::{ACCEPT, CACHE_CONTROL},
};
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource, retry::RetryPolicy};
use std::time::Duration;
use thiserror::Error;

/// Reconnection time used until the server sends a `retry:` field.
pub const DEFAULT_RETRY: Duration = Duration::from_millis(3000);

/// One dispatched SSE block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, if the server sent one.
    pub event: Option<String>,
    pub data: String,
    /// Last event id seen on the stream when this frame was dispatched.
    pub id: Option<String>,
}

impl SseFrame {
    /// A plain `message` frame carrying `data`.
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
            id: None,
        }
    }

    /// True when an `EventSource` would deliver this frame to `onmessage`.
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("") | Some("message"))
    }
}

/// Where a transport stands after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// The transport is re-establishing the stream by itself.
    Connecting,
    Open,
    /// The transport gave up; nothing more will arrive on this stream.
    Closed,
}

/// Errors produced by a streaming transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request failed or the body broke off while streaming.
    #[error("stream interrupted: {0}")]
    Network(#[source] reqwest::Error),

    /// The server ended the response body.
    #[error("server closed the stream")]
    Disconnected,

    /// The body was not valid event-stream text.
    #[error("malformed event stream: {0}")]
    Malformed(String),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("unexpected content type {0:?}")]
    ContentType(String),

    /// The server handed out an id that cannot be sent back as a header.
    #[error("invalid last event id {0:?}")]
    LastEventId(String),

    /// The request could not be set up for replay on reconnect.
    #[error("request cannot be replayed")]
    Unreplayable,

    /// The transport stream ended without reporting why.
    #[error("transport stream ended")]
    Exhausted,
}

impl TransportError {
    pub fn ready_state(&self) -> ReadyState {
        match self {
            Self::Network(_) | Self::Disconnected | Self::Malformed(_) => ReadyState::Connecting,
            Self::Status(_)
            | Self::ContentType(_)
            | Self::LastEventId(_)
            | Self::Unreplayable
            | Self::Exhausted => ReadyState::Closed,
        }
    }

    /// True once the transport will not reconnect on its own.
    pub fn is_closed(&self) -> bool {
        self.ready_state() == ReadyState::Closed
    }
}

impl From<EventSourceError> for TransportError {
    fn from(err: EventSourceError) -> Self {
        match err {
            EventSourceError::Transport(e) => Self::Network(e),
            EventSourceError::StreamEnded => Self::Disconnected,
            EventSourceError::InvalidStatusCode(status, _) => Self::Status(status),
            EventSourceError::InvalidContentType(content_type, _) => {
                Self::ContentType(String::from_utf8_lossy(content_type.as_bytes()).into_owned())
            }
            EventSourceError::InvalidLastEventId(id) => Self::LastEventId(id),
            other => Self::Malformed(other.to_string()),
        }
    }
}

/// What a transport reports while a stream is open.
#[derive(Debug)]
pub enum TransportEvent {
    Open,
    Message(SseFrame),
    Error(TransportError),
}

/// Opens event streams. The relay owns one stream per connection attempt and
/// drops it to disconnect.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: &Url) -> BoxStream<'static, TransportEvent>;
}

/// Reconnect timing of a browser `EventSource`: a fixed delay the server may
/// change through `retry:`, and no retry at all after a fatal response.
#[derive(Debug, Clone)]
struct EventSourceRetry {
    delay: Duration,
}

impl RetryPolicy for EventSourceRetry {
    fn retry(
        &self,
        error: &EventSourceError,
        _last_retry: Option<(usize, Duration)>,
    ) -> Option<Duration> {
        match error {
            EventSourceError::InvalidStatusCode(..)
            | EventSourceError::InvalidContentType(..)
            | EventSourceError::InvalidLastEventId(_) => None,
            _ => Some(self.delay),
        }
    }

    fn set_reconnection_time(&mut self, duration: Duration) {
        self.delay = duration;
    }
}

/// SSE over HTTP, behaving like a browser `EventSource`.
///
/// Network failures and a server ending the body are transient: the
/// transport reports the error, waits its reconnection time and tries again.
/// A non-success status or a wrong content type fails the stream for good.
/// Dropping the returned stream closes the HTTP response.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    retry: Duration,
}

impl HttpTransport {
    pub fn new(retry: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self::with_client(client, retry))
    }

    pub fn with_client(client: Client, retry: Duration) -> Self {
        Self { client, retry }
    }
}

impl Transport for HttpTransport {
    fn open(&self, url: &Url) -> BoxStream<'static, TransportEvent> {
        let request = self
            .client
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        let Ok(mut source) = EventSource::new(request) else {
            return stream::iter([TransportEvent::Error(TransportError::Unreplayable)]).boxed();
        };
        source.set_retry_policy(Box::new(EventSourceRetry { delay: self.retry }));

        debug!("Opening event stream at {}", url);
        let url = url.clone();
        source
            .map(move |item| match item {
                Ok(Event::Open) => {
                    info!("Event stream open at {}", url);
                    TransportEvent::Open
                }
                Ok(Event::Message(message)) => TransportEvent::Message(SseFrame {
                    event: Some(message.event),
                    data: message.data,
                    id: Some(message.id).filter(|id| !id.is_empty()),
                }),
                Err(e) => {
                    let err = TransportError::from(e);
                    if !err.is_closed() {
                        warn!("Event stream at {} interrupted: {}; reconnecting", url, err);
                    }
                    TransportEvent::Error(err)
                }
            })
            .boxed()
    }
}
