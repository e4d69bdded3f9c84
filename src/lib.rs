//! Ensemble keeps automation projects in sync with their git repositories
//! and runs their playbooks.
//!
//! - `repository`: clone/pull, metadata discovery, playbook reconciliation
//! - `runner`: playbook launches, locking, interrupts
//! - `catalog`: persistence of projects, playbooks, sync history and runs

pub mod catalog;
pub mod config;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod repository;
pub mod runner;
