//! Shared wire and domain types for GigHive.
//!
//! `models` are the domain shapes returned by the REST API, `api` holds the
//! request/response envelopes, and `events` is the real-time gateway protocol.

pub mod api;
pub mod events;
pub mod models;
