//! Stage dispatch for Conveyor.
//!
//! Agents register blocking requests for work ("workers") with the [`Queue`].
//! A dispatch loop periodically, or when signalled, matches registered
//! workers against the pending stages in the stage store. Matching passes are
//! serialized across replicas by a distributed lock; the authoritative claim
//! of a stage happens later through the stage store's optimistic update.

pub mod dispatch;
pub mod limits;
pub mod queue;
pub mod worker;

pub use queue::{Queue, Scheduler};
pub use worker::Filter;
