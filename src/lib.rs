//! Episode search and snatch core
//!
//! Finds releases for wanted TV episodes across indexer providers, picks the
//! best one and hands it to a download client, driven by a set of
//! schedulers and serialized job queues.

pub mod api;
pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod indexer;
pub mod jobs;
pub mod services;
