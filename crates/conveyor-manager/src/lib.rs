//! The execution manager: the contract build agents use to pull stages,
//! report progress and stream logs.
//!
//! An agent's stage lifecycle is
//! `request` → `accept` → `details` → `before_all` →
//! (`before` → `write`* → `upload` → `after`)* → `after_all`.

pub mod clone_url;
pub mod context;
pub mod manager;
mod setup;
mod teardown;
mod updater;

#[cfg(test)]
mod testing;

pub use context::{Context, Request};
pub use manager::{ExecutionManager, Manager, Services};
