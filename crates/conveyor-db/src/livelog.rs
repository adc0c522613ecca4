//! In-memory live log streams.
//!
//! Each open stream keeps a bounded history so late subscribers can catch up,
//! and fans new lines out over a broadcast channel.

use async_trait::async_trait;
use conveyor_core::log::{Line, LogStream, Tail};
use conveyor_core::{Error, Result, StepId};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{Mutex, broadcast};
use tracing::debug;

/// Lines retained per stream for late subscribers.
pub const DEFAULT_HISTORY: usize = 5000;

const CHANNEL_CAPACITY: usize = 256;

struct LiveStream {
    history: VecDeque<Line>,
    sender: broadcast::Sender<Line>,
}

/// Live log streams held in process memory.
pub struct MemoryLogStream {
    streams: Mutex<HashMap<StepId, LiveStream>>,
    history_limit: usize,
}

impl Default for MemoryLogStream {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLogStream {
    pub fn new() -> Self {
        Self::with_history(DEFAULT_HISTORY)
    }

    pub fn with_history(history_limit: usize) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            history_limit,
        }
    }

    /// Whether a stream is open for the step.
    pub async fn is_open(&self, step: StepId) -> bool {
        self.streams.lock().await.contains_key(&step)
    }
}

#[async_trait]
impl LogStream for MemoryLogStream {
    async fn create(&self, step: StepId) -> Result<()> {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let replaced = self
            .streams
            .lock()
            .await
            .insert(
                step,
                LiveStream {
                    history: VecDeque::new(),
                    sender,
                },
            )
            .is_some();
        if replaced {
            debug!(step_id = %step, "Replaced existing log stream");
        }
        Ok(())
    }

    async fn write(&self, step: StepId, line: &Line) -> Result<()> {
        let mut streams = self.streams.lock().await;
        let stream = streams
            .get_mut(&step)
            .ok_or_else(|| Error::NotFound(format!("log stream for step {}", step)))?;

        if self.history_limit > 0 {
            while stream.history.len() >= self.history_limit {
                stream.history.pop_front();
            }
            stream.history.push_back(line.clone());
        }
        // No subscribers is fine; the line is still in the history.
        let _ = stream.sender.send(line.clone());
        Ok(())
    }

    async fn delete(&self, step: StepId) -> Result<()> {
        self.streams
            .lock()
            .await
            .remove(&step)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("log stream for step {}", step)))
    }

    async fn tail(&self, step: StepId) -> Result<Tail> {
        let streams = self.streams.lock().await;
        let stream = streams
            .get(&step)
            .ok_or_else(|| Error::NotFound(format!("log stream for step {}", step)))?;

        let history = stream.history.iter().cloned().collect();
        let receiver = stream.sender.subscribe();
        let live = futures::stream::unfold(receiver, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(line) => return Some((line, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Log subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed();

        Ok(Tail { history, live })
    }
}
