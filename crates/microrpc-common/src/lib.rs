//! microrpc common types and wire codec
//!
//! This crate provides the protocol definitions shared by every microrpc
//! component:
//!
//! - **Protocol layer**: the [`Header`] exchanged with every request and
//!   response, the [`Options`] handshake preamble, and the [`RpcError`]
//!   error type.
//! - **Codec layer**: length-prefixed framing over a duplex transport with
//!   a pluggable [`codec::Encoding`].
//!
//! # Wire format
//!
//! Each connection starts with a single JSON-encoded [`Options`] line that
//! negotiates the codec, followed by a sequence of `<Header><Body>` frames
//! in the negotiated encoding. Every frame is a 4-byte big-endian length
//! prefix and the encoded payload:
//!
//! ```text
//! {"RPCNumber":3927900,"EncodingType":"application/postcard",...}\n
//! [4-byte length][Header] [4-byte length][Body] ...
//! ```

pub mod codec;
pub mod protocol;

pub use protocol::{
    Header, Options, Result, RpcError, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RPC_PATH,
    HTTP_CONNECTED_STATUS, RPC_NUMBER, SERVERS_HEADER, SERVER_HEADER,
};
