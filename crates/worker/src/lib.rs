//! The voxlane worker process.
//!
//! Runs the event-driven handoff pipeline as a set of independent poll
//! loops over the shared database: handoff (provision room + mint
//! token), claim (redeem the one-time dispatch), launch (deliver the
//! session to a connector) and ingestion (fold terminal events into the
//! call row). Every loop claims its backlog with skip-locked row
//! selection, so any number of worker replicas can run side by side.

pub mod claimer;
pub mod handoff;
pub mod ingest;
pub mod launcher;
pub mod rooms;
pub mod runner;
