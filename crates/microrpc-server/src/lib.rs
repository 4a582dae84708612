//! microrpc server: service registry and request pipeline.
//!
//! A [`Server`] holds named [`Service`]s and serves them over raw framed
//! TCP ([`Server::accept`]), an HTTP `CONNECT` tunnel
//! ([`Server::serve_http`]) or any caller-provided transport
//! ([`Server::serve_conn`]).
//!
//! # Example
//!
//! ```no_run
//! use microrpc_server::{Server, ServiceBuilder};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args { num1: i32, num2: i32 }
//!
//! struct Arith;
//!
//! # async fn run() -> microrpc_common::Result<()> {
//! let server = Server::new();
//! server.register(
//!     ServiceBuilder::new("Arith", Arith)
//!         .method("Sum", |_: &Arith, args: Args, reply: &mut i32| {
//!             *reply = args.num1 + args.num2;
//!             Ok(())
//!         })
//!         .build(),
//! )?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
//! server.accept(listener).await;
//! # Ok(())
//! # }
//! ```

mod http;
mod server;
mod service;

pub use server::Server;
pub use service::{MethodEntry, MethodError, Service, ServiceBuilder};
