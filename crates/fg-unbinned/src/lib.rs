//! # fg-unbinned
//!
//! Event-level (unbinned) datasets for fitgraph.
//!
//! This crate provides a columnar [`EventStore`] (SoA layout) that binds
//! variables from a session's arena to per-event values. Events are built by
//! driving variable values and calling [`EventStore::add_event`], and handed
//! back to the evaluation layer with [`EventStore::load_event`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod event_store;

pub use event_store::EventStore;
