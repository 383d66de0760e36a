//! Lifecycle controller: resolves the tree's anchor, then repeatedly polls
//! the chain head, staging new blocks and driving them through the tree
//! engine and backfill coordinator until the queue settles.
//!
//! Any number of external callers may poke this concurrently (`add_block`
//! from application code, the polling loop from its own timer). One mutex
//! guards the tree/queue/event sink together, never held across an
//! `.await`, so `Watcher` is cheap to `Clone` (it's a handle over `Arc`s)
//! and safe to share across tasks.

use crate::{
  backfill::BackfillCoordinator,
  block::Block,
  config::{Anchor, WatcherConfig},
  engine::{DrainStep, TreeEngine},
  error::{Cancelled, ConfigError},
  events::{Event, EventSink, ListenerId, Topic},
  snapshot::Snapshot,
  source::{BlockSource, Scheduler},
};
use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc, Mutex,
};
use tokio::sync::oneshot;

struct Inner {
  engine: TreeEngine,
  events: EventSink,
}

#[derive(Clone)]
pub struct Watcher {
  inner: Arc<Mutex<Inner>>,
  source: Arc<dyn BlockSource>,
  scheduler: Arc<dyn Scheduler>,
  backfill: Arc<BackfillCoordinator>,
  config: WatcherConfig,
  stopped: Arc<AtomicBool>,
  draining: Arc<AtomicBool>,
}

impl Watcher {
  pub fn new(
    source: Arc<dyn BlockSource>,
    scheduler: Arc<dyn Scheduler>,
    config: WatcherConfig,
  ) -> Result<Self, ConfigError> {
    config.validate()?;
    Ok(Self {
      inner: Arc::new(Mutex::new(Inner {
        engine: TreeEngine::new(config.clone()),
        events: EventSink::new(),
      })),
      source,
      scheduler,
      backfill: Arc::new(BackfillCoordinator::new(config.clone())),
      config,
      stopped: Arc::new(AtomicBool::new(true)),
      draining: Arc::new(AtomicBool::new(false)),
    })
  }

  // --- EventSink surface -------------------------------------------------

  pub fn on(&self, topic: Topic, handler: impl FnMut(&Event) + Send + 'static) -> ListenerId {
    self.inner.lock().unwrap().events.on(topic, handler)
  }

  pub fn once(&self, topic: Topic, handler: impl FnMut(&Event) + Send + 'static) -> ListenerId {
    self.inner.lock().unwrap().events.once(topic, handler)
  }

  pub fn remove_listener(&self, topic: Topic, id: ListenerId) {
    self.inner.lock().unwrap().events.remove_listener(topic, id);
  }

  pub fn promise(&self, topic: Topic) -> oneshot::Receiver<Event> {
    self.inner.lock().unwrap().events.promise(topic)
  }

  // --- Snapshot surface ---------------------------------------------------

  pub fn take_snapshot(&self) -> Snapshot {
    self.inner.lock().unwrap().engine.take_snapshot()
  }

  // --- Block ingestion -----------------------------------------------------

  /// Stages `block` and drives the engine until it settles, resolving once
  /// the block has actually been inserted (or rejecting it if it's rolled
  /// back or dropped as an unresolvable orphan first).
  pub async fn add_block(&self, block: Block) -> Result<(), Cancelled> {
    let rx = self.inner.lock().unwrap().engine.add_block(block);
    self.drive_drain().await;
    rx.await.map_err(|_| Cancelled)
  }

  // --- Start/stop ----------------------------------------------------------

  pub fn start(&self) {
    self.stopped.store(false, Ordering::SeqCst);
  }

  pub fn stop(&self) {
    self.stopped.store(true, Ordering::SeqCst);
  }

  pub fn is_stopped(&self) -> bool {
    self.stopped.load(Ordering::SeqCst)
  }

  // --- Driving loop ----------------------------------------------------------

  /// Resolves the tree's anchor (retrying every 3s on failure), emits
  /// `ready`, then polls the chain head forever at `pollDelay` intervals.
  /// `start()`/`stop()` only gate the polling half; anchor resolution
  /// always runs exactly once.
  pub async fn run(&self) {
    self.resolve_anchor().await;
    self.drive_drain().await;
    self.poll_loop().await;
  }

  async fn resolve_anchor(&self) {
    loop {
      if self.try_resolve_anchor_once().await.is_ok() {
        break;
      }
      self.scheduler.sleep(self.backfill.retry_delay()).await;
    }
    self.inner.lock().unwrap().events.emit(Event::Ready);
  }

  async fn try_resolve_anchor_once(&self) -> Result<(), crate::error::FetchError> {
    match self.config.anchor.clone() {
      Anchor::Snapshot(snapshot) => {
        self.inner.lock().unwrap().engine.restore_from_snapshot(snapshot);
        Ok(())
      }
      Anchor::BlockHash(hash) => {
        let block = self.source.get_block_by_hash(hash).await?;
        self.inner.lock().unwrap().engine.stage_anchor(block);
        Ok(())
      }
      Anchor::BlockNumber(number) => {
        let block = self.source.get_block_by_number(number).await?;
        self.inner.lock().unwrap().engine.stage_anchor(block);
        Ok(())
      }
      Anchor::None => {
        let head = self.source.get_block_number().await?;
        let target = head.saturating_sub(self.config.stream_size);
        let block = self.source.get_block_by_number(target).await?;
        self.inner.lock().unwrap().engine.stage_anchor(block);
        Ok(())
      }
    }
  }

  async fn poll_loop(&self) {
    loop {
      self.scheduler.sleep(self.config.poll_delay).await;
      if self.stopped.load(Ordering::SeqCst) {
        continue;
      }
      let fetched = tokio::time::timeout(
        self.config.fetch_timeout,
        self.source.get_latest_block(),
      )
      .await;
      if self.stopped.load(Ordering::SeqCst) {
        // Cooperative cancellation: discard a result that arrived after
        // stop() was called mid-flight.
        continue;
      }
      if let Ok(Ok(block)) = fetched {
        self.inner.lock().unwrap().engine.stage(block);
        self.drive_drain().await;
      }
    }
  }

  /// Runs batch backfill if lagging, then drains the ingestion queue,
  /// chasing down missing parents one at a time until the queue is empty
  /// or paused on an unresolvable gap.
  async fn drive_drain(&self) {
    if self.draining.swap(true, Ordering::SeqCst) {
      return;
    }
    loop {
      loop {
        self.maybe_batch_backfill().await;
        self.drain_until_settled().await;

        let more_staged = !self.inner.lock().unwrap().engine.queue_is_empty();
        if !more_staged {
          break;
        }
      }
      self.draining.store(false, Ordering::SeqCst);

      // A concurrent add_block may have staged a block between the
      // queue_is_empty() check above and the store just now; re-check
      // after releasing the guard so that caller isn't stranded until the
      // next poll picks it up.
      if self.inner.lock().unwrap().engine.queue_is_empty() {
        break;
      }
      if self.draining.swap(true, Ordering::SeqCst) {
        // Another task won the race to re-acquire the guard; it will
        // drain what's left.
        break;
      }
    }
  }

  async fn drain_until_settled(&self) {
    loop {
      let step = self.inner.lock().unwrap().engine.drain_step();
      match step {
        DrainStep::Progressed(events) => self.dispatch(events),
        DrainStep::Empty(events) => {
          self.dispatch(events);
          break;
        }
        DrainStep::Gap {
          orphan,
          missing_parent,
        } => match self.backfill.parent_chase(&*self.source, missing_parent).await {
          Ok(parent) => {
            let mut inner = self.inner.lock().unwrap();
            inner.engine.stage(parent);
            inner.engine.stage(orphan);
          }
          Err(_) => {
            let mut inner = self.inner.lock().unwrap();
            inner.engine.reject(&orphan.hash);
            inner.events.emit(Event::Error(format!(
              "dropping orphan block #{} ({}): parent {} could not be fetched",
              orphan.number, orphan.hash, missing_parent
            )));
          }
        },
      }
    }
  }

  async fn maybe_batch_backfill(&self) {
    let max_block_number = self.inner.lock().unwrap().engine.max_block_number();
    let head = match self.source.get_block_number().await {
      Ok(head) => head,
      Err(_) => return,
    };
    if !self.backfill.needs_batch_backfill(head, max_block_number) {
      return;
    }
    if !self.backfill.try_begin_batch() {
      return;
    }

    loop {
      let max_block_number = self.inner.lock().unwrap().engine.max_block_number();
      let Some((from, to)) = self.backfill.next_batch_range(head, max_block_number) else {
        break;
      };
      match self.backfill.fetch_batch(&*self.source, from, to).await {
        Ok(mut blocks) => {
          blocks.sort_by_key(|b| b.number);
          {
            let mut inner = self.inner.lock().unwrap();
            for block in blocks {
              inner.engine.stage(block);
            }
          }
          self.drain_until_settled().await;
        }
        Err(_) => {
          tracing::warn!(
            target: "chainwatch::backfill",
            from,
            to,
            "batch backfill failed, retrying in 3s"
          );
          self.backfill.end_batch();
          let retry = self.clone();
          let delay = self.backfill.retry_delay();
          let scheduler = self.scheduler.clone();
          tokio::spawn(async move {
            scheduler.sleep(delay).await;
            retry.drive_drain().await;
          });
          return;
        }
      }
    }
    self.backfill.end_batch();
  }

  fn dispatch(&self, events: Vec<Event>) {
    if events.is_empty() {
      return;
    }
    let mut inner = self.inner.lock().unwrap();
    for event in events {
      inner.events.emit(event);
    }
  }
}
