//! Streaming pipeline: chunk channel in, block snapshots out.
//!
//! ```text
//! ChunkSender ──mpsc──▶ worker task ──batch──▶ BlockParser::parse_incremental
//!                                   └──────▶ watch<StreamSnapshot> ──▶ subscribers
//! ```
//!
//! The worker takes the first chunk, keeps collecting until the batch window
//! closes (or the batch grows past `max_batch_bytes`) and parses once per
//! batch. Chunks are applied in delivery order and never reordered.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};

use crate::block::Block;
use crate::config::{Config, StreamConfig};
use crate::error::StreamError;
use crate::parser::{BlockParser, ParseOutput, ParserOptions};
use crate::plugin::PluginRuntime;
use crate::repair::{DefaultRepair, TextRepair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    #[default]
    Idle,
    Streaming,
    Completed,
    Error,
}

impl StreamStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// What a chunk source delivers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk(String),
    Complete,
    Error(String),
}

/// Producer half of a chunk channel
#[derive(Debug, Clone)]
pub struct ChunkSender {
    tx: mpsc::Sender<StreamEvent>,
}

impl ChunkSender {
    pub async fn send(&self, chunk: impl Into<String>) -> Result<(), StreamError> {
        self.deliver(StreamEvent::Chunk(chunk.into())).await
    }

    pub async fn complete(self) -> Result<(), StreamError> {
        self.deliver(StreamEvent::Complete).await
    }

    pub async fn fail(self, reason: impl Into<String>) -> Result<(), StreamError> {
        self.deliver(StreamEvent::Error(reason.into())).await
    }

    async fn deliver(&self, event: StreamEvent) -> Result<(), StreamError> {
        self.tx.send(event).await.map_err(|_| StreamError::Closed)
    }
}

/// A bounded chunk channel; the sender applies backpressure when full.
pub fn chunk_channel(capacity: usize) -> (ChunkSender, mpsc::Receiver<StreamEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChunkSender { tx }, rx)
}

/// What subscribers see after each processed batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamSnapshot {
    /// Bumped by every `start`/`reset`
    pub generation: u64,
    pub status: StreamStatus,
    /// All blocks but the last while streaming; everything once completed
    pub blocks: Vec<Arc<Block>>,
    /// The last block while streaming, possibly still incomplete
    pub current_block: Option<Arc<Block>>,
    pub has_incomplete_block: bool,
    pub error: Option<String>,
}

impl StreamSnapshot {
    /// Stable blocks followed by the current one
    pub fn all_blocks(&self) -> impl Iterator<Item = &Arc<Block>> {
        self.blocks.iter().chain(self.current_block.iter())
    }

    /// The source failure that ended the stream, if it ended in error
    pub fn failure(&self) -> Option<StreamError> {
        if self.status != StreamStatus::Error {
            return None;
        }
        Some(StreamError::Source(self.error.clone().unwrap_or_default()))
    }
}

pub struct StreamingPipeline {
    config: StreamConfig,
    options: ParserOptions,
    runtime: Option<Arc<PluginRuntime>>,
    repair: Arc<dyn TextRepair>,
    state: Arc<watch::Sender<StreamSnapshot>>,
    generation: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl StreamingPipeline {
    pub fn new(config: StreamConfig) -> Self {
        let (state, _) = watch::channel(StreamSnapshot::default());
        Self {
            config,
            options: ParserOptions::default(),
            runtime: None,
            repair: Arc::new(DefaultRepair::default()),
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.stream.clone()).with_parser_options(ParserOptions::from(&config.parser))
    }

    pub fn with_runtime(mut self, runtime: Arc<PluginRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_parser_options(mut self, options: ParserOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_repair(mut self, repair: impl TextRepair + 'static) -> Self {
        self.repair = Arc::new(repair);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> StreamStatus {
        self.state.borrow().status
    }

    /// Reset, then consume `source` on a new task. Must be called from within
    /// a tokio runtime.
    pub fn start(&mut self, source: mpsc::Receiver<StreamEvent>) -> Result<(), StreamError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| StreamError::NoRuntime)?;
        let generation = self.reset();

        self.state.send_modify(|snapshot| snapshot.status = StreamStatus::Streaming);

        let mut parser = BlockParser::new().with_options(self.options.clone());
        if let Some(runtime) = &self.runtime {
            parser = parser.with_runtime(Arc::clone(runtime));
        }
        let worker = Worker {
            generation,
            current_generation: Arc::clone(&self.generation),
            state: Arc::clone(&self.state),
            config: self.config.clone(),
            repair: Arc::clone(&self.repair),
            parser,
            text: String::new(),
        };
        debug!("stream {generation} started");
        self.task = Some(handle.spawn(worker.run(source)));
        Ok(())
    }

    /// Detach from the current source and go back to idle. Buffered chunks of
    /// the abandoned stream are discarded. Returns the new generation.
    pub fn reset(&mut self) -> u64 {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(StreamSnapshot {
            generation,
            ..StreamSnapshot::default()
        });
        generation
    }

    /// Wait for the worker to finish and return the final status
    pub async fn join(&mut self) -> StreamStatus {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!("stream worker failed: {err}");
                }
            }
        }
        self.status()
    }
}

impl Drop for StreamingPipeline {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Terminal {
    Complete,
    Error(String),
}

struct Worker {
    generation: u64,
    current_generation: Arc<AtomicU64>,
    state: Arc<watch::Sender<StreamSnapshot>>,
    config: StreamConfig,
    repair: Arc<dyn TextRepair>,
    parser: BlockParser,
    text: String,
}

impl Worker {
    async fn run(mut self, mut source: mpsc::Receiver<StreamEvent>) {
        loop {
            let (batch, terminal) = self.next_batch(&mut source).await;

            match terminal {
                Some(Terminal::Error(reason)) => {
                    // The failing batch is dropped along with the stream.
                    self.fail(reason);
                    return;
                }
                Some(Terminal::Complete) => {
                    self.text.push_str(&batch);
                    self.complete();
                    return;
                }
                None => self.apply(&batch),
            }
        }
    }

    /// One batch: the first event, then whatever arrives before the window
    /// closes. A closed channel counts as completion.
    async fn next_batch(
        &self,
        source: &mut mpsc::Receiver<StreamEvent>,
    ) -> (String, Option<Terminal>) {
        let mut batch = match source.recv().await {
            Some(StreamEvent::Chunk(chunk)) => chunk,
            Some(StreamEvent::Complete) | None => return (String::new(), Some(Terminal::Complete)),
            Some(StreamEvent::Error(reason)) => return (String::new(), Some(Terminal::Error(reason))),
        };

        let deadline = Instant::now() + self.config.batch_window();
        while batch.len() < self.config.max_batch_bytes {
            match timeout_at(deadline, source.recv()).await {
                Ok(Some(StreamEvent::Chunk(chunk))) => batch.push_str(&chunk),
                Ok(Some(StreamEvent::Complete) | None) => return (batch, Some(Terminal::Complete)),
                Ok(Some(StreamEvent::Error(reason))) => return (batch, Some(Terminal::Error(reason))),
                Err(_) => break,
            }
        }
        (batch, None)
    }

    fn apply(&mut self, batch: &str) {
        if batch.is_empty() {
            return;
        }
        let mut next = String::with_capacity(self.text.len() + batch.len());
        next.push_str(&self.text);
        next.push_str(batch);

        let output = self.parser.parse_incremental(&self.text, &next);
        self.text = next;
        debug!(
            "batch of {} bytes: {} blocks, incomplete={}",
            batch.len(),
            output.blocks.len(),
            output.has_incomplete_block
        );
        self.publish(|snapshot| {
            let (blocks, current) = split_current(output.blocks);
            snapshot.status = StreamStatus::Streaming;
            snapshot.blocks = blocks;
            snapshot.current_block = current;
            snapshot.has_incomplete_block = output.has_incomplete_block;
        });
    }

    fn complete(&mut self) {
        let repaired = self.repair.repair(&self.text);
        let ParseOutput {
            blocks,
            has_incomplete_block,
        } = self.parser.parse(&repaired);
        info!("stream complete: {} bytes, {} blocks", repaired.len(), blocks.len());
        self.publish(|snapshot| {
            snapshot.status = StreamStatus::Completed;
            snapshot.blocks = blocks;
            snapshot.current_block = None;
            snapshot.has_incomplete_block = has_incomplete_block;
        });
    }

    fn fail(&mut self, reason: String) {
        warn!("stream failed: {reason}");
        self.publish(|snapshot| {
            snapshot.status = StreamStatus::Error;
            snapshot.error = Some(reason);
        });
    }

    /// Apply `update` unless a reset has moved on to a newer generation.
    fn publish(&self, update: impl FnOnce(&mut StreamSnapshot)) {
        if self.current_generation.load(Ordering::SeqCst) != self.generation {
            return;
        }
        let generation = self.generation;
        self.state.send_if_modified(|snapshot| {
            if snapshot.generation != generation {
                return false;
            }
            update(snapshot);
            true
        });
    }
}

fn split_current(mut blocks: Vec<Arc<Block>>) -> (Vec<Arc<Block>>, Option<Arc<Block>>) {
    let current = blocks.pop();
    (blocks, current)
}
