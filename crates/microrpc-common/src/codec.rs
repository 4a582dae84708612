//! Length-prefixed frame codec over a duplex transport.
//!
//! A connection is split into one [`FrameReader`] and one [`FrameWriter`].
//! The reader is single-threaded by construction: exactly one task owns it
//! and alternates [`FrameReader::read_header`] with a body read or discard.
//! Writers must be serialized externally (a mutex around the
//! [`FrameWriter`]); within one [`FrameWriter::write`] call the header and
//! body form a single logical frame that never interleaves with another.
//!
//! Wire format per section: `[4-byte length as u32 big-endian] + [payload]`,
//! with the payload in the negotiated [`Encoding`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf,
};

use crate::protocol::{Header, Result, RpcError};

/// Identifier of the default compact binary encoding.
pub const ENCODING_POSTCARD: &str = "application/postcard";

/// Identifier of the self-describing JSON encoding.
pub const ENCODING_JSON: &str = "application/json";

/// Maximum frame payload size (100 MB).
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Any byte stream a connection can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Transport for T {}

pub type TransportReader = BufReader<ReadHalf<Box<dyn Transport>>>;
pub type TransportWriter = BufWriter<WriteHalf<Box<dyn Transport>>>;

/// Split a transport into buffered read and write halves.
///
/// The read half is handed back as a `BufReader` so the connection setup
/// (preamble line, HTTP head) and the frame loop share one buffer and no
/// bytes are lost between the two phases.
pub fn split_transport(stream: Box<dyn Transport>) -> (TransportReader, TransportWriter) {
    let (reader, writer) = tokio::io::split(stream);
    (BufReader::new(reader), BufWriter::new(writer))
}

/// Payload encoding negotiated through `Options.encoding_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Postcard,
    Json,
}

impl Encoding {
    /// Look up an encoding by its wire identifier. Unknown identifiers are
    /// rejected by both ends of a connection.
    pub fn from_name(name: &str) -> Option<Encoding> {
        match name {
            ENCODING_POSTCARD => Some(Encoding::Postcard),
            ENCODING_JSON => Some(Encoding::Json),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Encoding::Postcard => ENCODING_POSTCARD,
            Encoding::Json => ENCODING_JSON,
        }
    }

    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            Encoding::Postcard => Ok(postcard::to_allocvec(value)?),
            Encoding::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            Encoding::Postcard => Ok(postcard::from_bytes(bytes)?),
            Encoding::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }
}

/// Reading side of a framed connection.
pub struct FrameReader {
    inner: TransportReader,
    encoding: Encoding,
}

impl FrameReader {
    pub fn new(inner: TransportReader, encoding: Encoding) -> Self {
        Self { inner, encoding }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Read and decode the next header frame.
    pub async fn read_header(&mut self) -> Result<Header> {
        let bytes = self.read_frame().await?;
        self.encoding.decode(&bytes)
    }

    /// Read the body frame that follows a successful `read_header`, leaving
    /// it encoded for the caller to decode with the right type.
    pub async fn read_body_raw(&mut self) -> Result<Vec<u8>> {
        self.read_frame().await
    }

    /// Consume and drop the next body frame. Used for orphan responses and
    /// for requests whose method could not be resolved.
    pub async fn discard_body(&mut self) -> Result<()> {
        self.read_frame().await.map(|_| ())
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        self.inner.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(RpcError::FrameTooLarge(len, MAX_FRAME_SIZE));
        }
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

/// Writing side of a framed connection.
///
/// On any write failure the underlying stream is shut down, so a torn frame
/// can never be followed by another.
pub struct FrameWriter {
    inner: TransportWriter,
    encoding: Encoding,
}

impl FrameWriter {
    pub fn new(inner: TransportWriter, encoding: Encoding) -> Self {
        Self { inner, encoding }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Encode and write one header+body frame pair, then flush.
    pub async fn write<T: Serialize>(&mut self, header: &Header, body: &T) -> Result<()> {
        let body = self.encoding.encode(body)?;
        self.write_raw(header, &body).await
    }

    /// Write one header frame followed by an already-encoded body frame.
    pub async fn write_raw(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        let result = self.write_frames(header, body).await;
        if result.is_err() {
            let _ = self.inner.shutdown().await;
        }
        result
    }

    /// Shut the write side down, flushing buffered bytes first.
    pub async fn close(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    async fn write_frames(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        let header = self.encoding.encode(header)?;
        self.write_frame(&header).await?;
        self.write_frame(body).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(RpcError::FrameTooLarge(payload.len(), MAX_FRAME_SIZE));
        }
        self.inner.write_all(&(payload.len() as u32).to_be_bytes()).await?;
        self.inner.write_all(payload).await?;
        Ok(())
    }
}
