//! Fleet Backend Library
//!
//! REST API over a relational store that is kept in two-way sync with a
//! hosted realtime document store, plus the licence expiry job.
//! Exposes every module for the `fleet` binary and the integration tests.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod sync;
