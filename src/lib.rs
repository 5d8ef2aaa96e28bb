//! Fetch and cache resolution core for a wiki renderer.
//!
//! Resource requests (a fetch URL or a markup tag's attributes) are mapped to
//! a fetcher kind, cached on disk under a canonical key, and revalidated
//! against the dependencies recorded when the entry was produced.

pub mod cache;
pub mod config;
pub mod domain;
pub mod fetch;
pub mod infra;
