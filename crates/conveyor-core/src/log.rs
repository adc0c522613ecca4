//! Log streaming and archival abstractions.
//!
//! A live stream exists for a step while it runs: it is created before the
//! step starts, receives lines as the agent produces them, and is deleted
//! when the step completes. The complete log is uploaded separately to the
//! archive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::{Result, StepId};

/// A single line of step output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    /// Zero-based position of the line in the step output.
    #[serde(rename = "pos")]
    pub number: u64,
    #[serde(rename = "out")]
    pub message: String,
    /// Seconds since the step started.
    #[serde(rename = "time")]
    pub elapsed: i64,
}

/// Lines already written plus a stream of lines still to come.
pub struct Tail {
    pub history: Vec<Line>,
    pub live: BoxStream<'static, Line>,
}

/// Live, in-flight log streams keyed by step.
#[async_trait]
pub trait LogStream: Send + Sync {
    /// Open a stream for a step.
    async fn create(&self, step: StepId) -> Result<()>;

    /// Append a line to an open stream.
    async fn write(&self, step: StepId, line: &Line) -> Result<()>;

    /// Close a stream. Subscribers see the end of their stream.
    async fn delete(&self, step: StepId) -> Result<()>;

    /// Subscribe to an open stream.
    async fn tail(&self, step: StepId) -> Result<Tail>;
}

/// Durable storage for complete step logs.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Store the full log of a step, replacing any previous upload.
    async fn create(&self, step: StepId, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<()>;

    /// Read the full log of a step.
    async fn find(&self, step: StepId) -> Result<Vec<u8>>;
}

impl Line {
    pub fn new(number: u64, message: impl Into<String>, started: DateTime<Utc>) -> Self {
        Self {
            number,
            message: message.into(),
            elapsed: (Utc::now() - started).num_seconds(),
        }
    }
}
