//! Real-time delivery for GigHive.
//!
//! `dispatcher` fans typed events out to per-user subscriptions; `connection`
//! drives one WebSocket for the lifetime of a client view.

pub mod connection;
pub mod dispatcher;
