//! The event sink: a small synchronous pub/sub adapter over the six
//! lifecycle topics. Each listener is isolated from the others' failures via
//! `catch_unwind` rather than a per-listener spawned task, since handlers
//! are expected to be cheap and synchronous.

use crate::block::Block;
use std::{collections::HashMap, panic::AssertUnwindSafe};
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
  Ready,
  Add,
  Confirm,
  Rollback,
  Live,
  Error,
}

#[derive(Clone)]
pub enum Event {
  Ready,
  Add(Block),
  Confirm(Block),
  Rollback(Block),
  Live,
  Error(String),
}

impl Event {
  pub fn topic(&self) -> Topic {
    match self {
      Event::Ready => Topic::Ready,
      Event::Add(_) => Topic::Add,
      Event::Confirm(_) => Topic::Confirm,
      Event::Rollback(_) => Topic::Rollback,
      Event::Live => Topic::Live,
      Event::Error(_) => Topic::Error,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

struct Listener {
  id: ListenerId,
  once: bool,
  handler: Box<dyn FnMut(&Event) + Send>,
}

/// Per-topic registry of listeners, emitting synchronously in registration
/// order. One listener panicking does not prevent the rest from running.
#[derive(Default)]
pub struct EventSink {
  next_id: u64,
  listeners: HashMap<Topic, Vec<Listener>>,
}

impl EventSink {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn on(&mut self, topic: Topic, handler: impl FnMut(&Event) + Send + 'static) -> ListenerId {
    self.register(topic, false, Box::new(handler))
  }

  pub fn once(&mut self, topic: Topic, handler: impl FnMut(&Event) + Send + 'static) -> ListenerId {
    self.register(topic, true, Box::new(handler))
  }

  fn register(
    &mut self,
    topic: Topic,
    once: bool,
    handler: Box<dyn FnMut(&Event) + Send>,
  ) -> ListenerId {
    self.next_id += 1;
    let id = ListenerId(self.next_id);
    self
      .listeners
      .entry(topic)
      .or_default()
      .push(Listener { id, once, handler });
    id
  }

  pub fn remove_listener(&mut self, topic: Topic, id: ListenerId) {
    if let Some(listeners) = self.listeners.get_mut(&topic) {
      listeners.retain(|l| l.id != id);
    }
  }

  /// Resolves with the next event emitted on `topic`.
  pub fn promise(&mut self, topic: Topic) -> oneshot::Receiver<Event> {
    let (tx, rx) = oneshot::channel();
    let mut tx = Some(tx);
    self.once(topic, move |event| {
      if let Some(tx) = tx.take() {
        let _ = tx.send(event.clone());
      }
    });
    rx
  }

  pub fn emit(&mut self, event: Event) {
    let topic = event.topic();
    let level_is_error = matches!(topic, Topic::Error);
    if level_is_error {
      tracing::warn!(target: "chainwatch::events", ?event, "error event");
    } else {
      tracing::debug!(target: "chainwatch::events", ?topic, "dispatching event");
    }

    let Some(listeners) = self.listeners.get_mut(&topic) else {
      return;
    };
    let mut remaining = Vec::with_capacity(listeners.len());
    for mut listener in listeners.drain(..) {
      let result = std::panic::catch_unwind(AssertUnwindSafe(|| (listener.handler)(&event)));
      if result.is_err() {
        tracing::error!(target: "chainwatch::events", ?topic, "listener panicked");
      }
      if !listener.once {
        remaining.push(listener);
      }
    }
    *listeners = remaining;
  }

  pub fn emit_all(&mut self, events: impl IntoIterator<Item = Event>) {
    for event in events {
      self.emit(event);
    }
  }
}

impl std::fmt::Debug for Event {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Event::Ready => write!(f, "Ready"),
      Event::Add(b) => write!(f, "Add({b})"),
      Event::Confirm(b) => write!(f, "Confirm({b})"),
      Event::Rollback(b) => write!(f, "Rollback({b})"),
      Event::Live => write!(f, "Live"),
      Event::Error(msg) => write!(f, "Error({msg})"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::{Block, NULL_HASH};
  use std::sync::{Arc, Mutex};

  fn block() -> Block {
    Block::new(crate::block::Hash::new([1u8; 32]), NULL_HASH, 0)
  }

  #[test]
  fn on_receives_every_emission() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut sink = EventSink::new();
    let log2 = log.clone();
    sink.on(Topic::Add, move |ev| log2.lock().unwrap().push(ev.clone()));
    sink.emit(Event::Add(block()));
    sink.emit(Event::Add(block()));
    assert_eq!(log.lock().unwrap().len(), 2);
  }

  #[test]
  fn once_fires_a_single_time() {
    let count = Arc::new(Mutex::new(0));
    let mut sink = EventSink::new();
    let count2 = count.clone();
    sink.once(Topic::Live, move |_| *count2.lock().unwrap() += 1);
    sink.emit(Event::Live);
    sink.emit(Event::Live);
    assert_eq!(*count.lock().unwrap(), 1);
  }

  #[test]
  fn remove_listener_stops_delivery() {
    let count = Arc::new(Mutex::new(0));
    let mut sink = EventSink::new();
    let count2 = count.clone();
    let id = sink.on(Topic::Live, move |_| *count2.lock().unwrap() += 1);
    sink.remove_listener(Topic::Live, id);
    sink.emit(Event::Live);
    assert_eq!(*count.lock().unwrap(), 0);
  }

  #[test]
  fn a_panicking_listener_does_not_stop_the_rest() {
    let count = Arc::new(Mutex::new(0));
    let mut sink = EventSink::new();
    sink.on(Topic::Live, |_| panic!("boom"));
    let count2 = count.clone();
    sink.on(Topic::Live, move |_| *count2.lock().unwrap() += 1);
    sink.emit(Event::Live);
    assert_eq!(*count.lock().unwrap(), 1);
  }

  #[tokio::test]
  async fn promise_resolves_on_next_emission() {
    let mut sink = EventSink::new();
    let rx = sink.promise(Topic::Ready);
    sink.emit(Event::Ready);
    assert!(matches!(rx.await.unwrap(), Event::Ready));
  }
}
