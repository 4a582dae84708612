//! microrpc client: call multiplexing over one connection.
//!
//! A [`Client`] is one logical caller bound to one connection. It tracks
//! in-flight calls by sequence number, serializes request writes, and runs
//! a single receive task that correlates responses back to callers. See
//! [`Client::call`] for the synchronous form and [`Client::go_call`] for
//! the asynchronous one.
//!
//! Connections are opened with [`dial`], [`dial_http`], or with
//! [`general_dial`] given a `protocol@host:port` endpoint string.

mod client;
mod dial;

pub use client::{Call, Client};
pub use dial::{dial, dial_http, general_dial};
