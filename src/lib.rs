//! Backup and restore pipelines for heterogeneous database servers.
//!
//! The crate drives the full snapshot lifecycle: dump a logical database
//! through its engine-specific CLI tooling, compress the dump, transfer it to
//! a storage volume and checksum the artifact. Restores run the same pipeline
//! in reverse. Tiered retention (fixed-days and Grandfather-Father-Son) and
//! artifact verification run independently over the persisted [`catalog`].
//!
//! The per-engine adapters live in [`drivers`], the orchestration in
//! [`tasks`].

#![forbid(unsafe_code)]

pub mod catalog;
pub mod cleanup;
pub mod cli;
pub mod compress;
pub mod config;
pub mod drivers;
pub mod exec;
pub mod job;
pub mod notify;
pub mod tasks;
pub mod util;
pub mod verify;
pub mod volume;
