// tests/helpers.rs
#![allow(dead_code)]

use djr_relay::connection::{SseFrame, Transport, TransportError, TransportEvent};
use djr_relay::EventBus;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{StatusCode, Url};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// One scripted connection attempt
pub struct MockSession {
    events: Vec<TransportEvent>,
    hold_open: bool,
}

impl MockSession {
    /// Deliver `events`, then stay open without sending anything else.
    pub fn hold_open(events: Vec<TransportEvent>) -> Self {
        Self {
            events,
            hold_open: true,
        }
    }

    /// Deliver `events`, then end the stream.
    pub fn then_end(events: Vec<TransportEvent>) -> Self {
        Self {
            events,
            hold_open: false,
        }
    }
}

/// What the mock does once the scripted sessions run out
enum WhenExhausted {
    Hang,
    RejectWithBadGateway,
}

/// A transport that replays scripted sessions and records every open
pub struct MockTransport {
    sessions: Mutex<VecDeque<MockSession>>,
    when_exhausted: WhenExhausted,
    opened: Mutex<Vec<(Instant, Url)>>,
}

impl MockTransport {
    pub fn new(sessions: Vec<MockSession>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            when_exhausted: WhenExhausted::Hang,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Every attempt fails the way a proxy in front of a restarting server would.
    pub fn always_closed() -> Self {
        Self {
            sessions: Mutex::new(VecDeque::new()),
            when_exhausted: WhenExhausted::RejectWithBadGateway,
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn opened_urls(&self) -> Vec<Url> {
        self.opened.lock().unwrap().iter().map(|(_, url)| url.clone()).collect()
    }

    /// Time between consecutive opens, in milliseconds
    pub fn delays_ms(&self) -> Vec<u128> {
        let opened = self.opened.lock().unwrap();
        opened
            .windows(2)
            .map(|pair| (pair[1].0 - pair[0].0).as_millis())
            .collect()
    }
}

impl Transport for MockTransport {
    fn open(&self, url: &Url) -> BoxStream<'static, TransportEvent> {
        self.opened.lock().unwrap().push((Instant::now(), url.clone()));

        match self.sessions.lock().unwrap().pop_front() {
            Some(MockSession { events, hold_open: true }) => {
                stream::iter(events).chain(stream::pending()).boxed()
            }
            Some(MockSession { events, hold_open: false }) => stream::iter(events).boxed(),
            None => match self.when_exhausted {
                WhenExhausted::Hang => stream::pending().boxed(),
                WhenExhausted::RejectWithBadGateway => {
                    stream::iter(vec![bad_gateway()]).chain(stream::pending()).boxed()
                }
            },
        }
    }
}

pub fn base_url() -> Url {
    Url::parse("http://relay.test").unwrap()
}

pub fn message(data: &str) -> TransportEvent {
    TransportEvent::Message(SseFrame::message(data))
}

pub fn named(event: &str, data: &str) -> TransportEvent {
    TransportEvent::Message(SseFrame {
        event: Some(event.to_string()),
        data: data.to_string(),
        id: None,
    })
}

pub fn bad_gateway() -> TransportEvent {
    TransportEvent::Error(TransportError::Status(StatusCode::BAD_GATEWAY))
}

pub fn dropped() -> TransportEvent {
    TransportEvent::Error(TransportError::Disconnected)
}

/// Collects every detail published on one key
#[derive(Clone, Default)]
pub struct Recorder {
    details: Arc<Mutex<Vec<Value>>>,
}

impl Recorder {
    pub fn listen(bus: &EventBus, key: &str) -> Self {
        let recorder = Self::default();
        let details = Arc::clone(&recorder.details);
        bus.add_listener(key, format!("recorder for {key}"), move |detail| {
            details.lock().unwrap().push(detail.clone());
            Ok(())
        });
        recorder
    }

    pub fn details(&self) -> Vec<Value> {
        self.details.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.details.lock().unwrap().len()
    }
}
