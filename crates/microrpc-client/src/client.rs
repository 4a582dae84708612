//! One logical caller bound to one connection.
//!
//! A [`Client`] multiplexes concurrent calls over a single framed
//! connection: requests are serialized by the send lock and tagged with a
//! monotonically increasing sequence number, while a single receive task
//! demultiplexes responses back to their in-flight calls. Two locks guard
//! the client and their order is fixed: send lock before state lock (only
//! `terminate_calls` takes both); the state lock is never held across a
//! suspension point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use microrpc_common::codec::{
    split_transport, Encoding, FrameReader, FrameWriter, Transport,
};
use microrpc_common::{
    Header, Options, Result, RpcError, DEFAULT_RPC_PATH, HTTP_CONNECTED_STATUS,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::debug;

type CallReply = std::result::Result<Vec<u8>, RpcError>;

struct ClientState {
    /// Next sequence number. Starts at 1; 0 is reserved as invalid.
    seq: u64,
    /// In-flight calls by sequence number.
    pending: HashMap<u64, oneshot::Sender<CallReply>>,
    /// Set by `close`: the user hung up.
    closing: bool,
    /// Set by `terminate_calls`: the connection died under us.
    shutdown: bool,
}

struct Shared {
    state: Mutex<ClientState>,
    /// The send lock. Held across the write of one frame pair so requests
    /// hit the wire in sequence order.
    writer: tokio::sync::Mutex<FrameWriter>,
    encoding: Encoding,
}

/// A client handle. Cheap to clone; all clones share the connection.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

/// One in-flight call returned by [`Client::go_call`].
///
/// Await the outcome with [`Call::done`]. Dropping a `Call` (or the future
/// of [`Client::call`]) before completion cancels the caller's wait: the
/// in-flight entry is removed and the eventual server reply is consumed as
/// an orphan. The server keeps working either way; cancellation only bounds
/// the caller's latency.
pub struct Call {
    seq: u64,
    service_method: String,
    encoding: Encoding,
    rx: Option<oneshot::Receiver<CallReply>>,
    client: Client,
}

impl Client {
    /// Build a client over an established transport: sends the JSON options
    /// preamble, then starts the receive task.
    pub async fn new(stream: impl Transport, options: &Options) -> Result<Client> {
        let encoding = Encoding::from_name(&options.encoding_type)
            .ok_or_else(|| RpcError::InvalidEncoding(options.encoding_type.clone()))?;

        let (reader, mut writer) = split_transport(Box::new(stream));

        let mut preamble = serde_json::to_vec(options)?;
        preamble.push(b'\n');
        writer.write_all(&preamble).await?;
        writer.flush().await?;

        let shared = Arc::new(Shared {
            state: Mutex::new(ClientState {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
            writer: tokio::sync::Mutex::new(FrameWriter::new(writer, encoding)),
            encoding,
        });

        tokio::spawn(receive(FrameReader::new(reader, encoding), Arc::clone(&shared)));
        Ok(Client { shared })
    }

    /// Build a client over HTTP: sends the `CONNECT` handshake and verifies
    /// the status line before switching to the framed protocol.
    pub async fn new_http(mut stream: impl Transport, options: &Options) -> Result<Client> {
        stream
            .write_all(format!("CONNECT {DEFAULT_RPC_PATH} HTTP/1.0\n\n").as_bytes())
            .await?;
        stream.flush().await?;

        let head = read_response_head(&mut stream).await?;
        let status = head.lines().next().unwrap_or("").trim();
        if status != HTTP_CONNECTED_STATUS {
            return Err(RpcError::UnexpectedHttpResponse(status.to_string()));
        }
        Self::new(stream, options).await
    }

    /// True until the client is closed or the connection has failed.
    pub fn is_available(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        !state.closing && !state.shutdown
    }

    /// Hang up. Further calls fail with "connection is shut down"; a second
    /// close reports the same error.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.closing {
                return Err(RpcError::Shutdown);
            }
            state.closing = true;
        }
        self.shared.writer.lock().await.close().await
    }

    /// Invoke a method and wait for its reply.
    ///
    /// Cancellation is dropping the returned future, e.g. via
    /// `tokio::time::timeout`: the in-flight entry is removed so the late
    /// reply is dropped as an orphan and no completion is ever observed.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.go_call(service_method, args).await.done().await
    }

    /// Invoke a method asynchronously. The returned [`Call`] carries the
    /// outcome; send-side failures are delivered through it as well.
    pub async fn go_call<A: Serialize>(&self, service_method: &str, args: &A) -> Call {
        let (tx, rx) = oneshot::channel();
        let mut call = Call {
            seq: 0,
            service_method: service_method.to_string(),
            encoding: self.shared.encoding,
            rx: Some(rx),
            client: self.clone(),
        };

        // Send lock first: registration order is wire order.
        let mut writer = self.shared.writer.lock().await;

        let registered = {
            let mut state = self.shared.state.lock().unwrap();
            if state.closing || state.shutdown {
                Err(tx)
            } else {
                let seq = state.seq;
                state.seq += 1;
                state.pending.insert(seq, tx);
                Ok(seq)
            }
        };
        let seq = match registered {
            Ok(seq) => seq,
            Err(tx) => {
                let _ = tx.send(Err(RpcError::Shutdown));
                return call;
            }
        };
        call.seq = seq;

        let header = Header {
            seq,
            service_method: call.service_method.clone(),
            error: String::new(),
        };
        let body = match self.shared.encoding.encode(args) {
            Ok(body) => body,
            Err(err) => {
                self.fail_pending(seq, err);
                return call;
            }
        };
        if let Err(err) = writer.write_raw(&header, &body).await {
            // The receive task may have consumed the call in the meantime;
            // only deliver the write error if it is still ours.
            self.fail_pending(seq, err);
        }
        call
    }

    fn fail_pending(&self, seq: u64, err: RpcError) {
        let tx = self.shared.state.lock().unwrap().pending.remove(&seq);
        if let Some(tx) = tx {
            let _ = tx.send(Err(err));
        }
    }

    fn remove_pending(&self, seq: u64) -> Option<oneshot::Sender<CallReply>> {
        self.shared.state.lock().unwrap().pending.remove(&seq)
    }
}

impl Call {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    /// Wait for the completion and decode the reply.
    pub async fn done<R: DeserializeOwned>(mut self) -> Result<R> {
        let Some(rx) = self.rx.take() else {
            return Err(RpcError::Shutdown);
        };
        match rx.await {
            Ok(Ok(body)) => self
                .encoding
                .decode(&body)
                .map_err(|err| RpcError::ReadingBody(err.to_string())),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(RpcError::Shutdown),
        }
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        // A call dropped before completion must not leave its entry behind:
        // the late reply has to be consumed as an orphan.
        if self.seq != 0 {
            let _ = self.client.remove_pending(self.seq);
        }
    }
}

/// The receive loop: the only reader of this connection. Demultiplexes
/// responses by sequence number until the transport fails, then completes
/// every remaining in-flight call with the failure.
async fn receive(mut reader: FrameReader, shared: Arc<Shared>) {
    let err = loop {
        let header = match reader.read_header().await {
            Ok(header) => header,
            Err(err) => break err,
        };
        let pending = shared.state.lock().unwrap().pending.remove(&header.seq);
        match pending {
            // Orphan: the caller gave up on this seq. Consume the body.
            None => {
                if let Err(err) = reader.discard_body().await {
                    break err;
                }
            }
            Some(tx) if !header.error.is_empty() => {
                let discarded = reader.discard_body().await;
                let _ = tx.send(Err(RpcError::Server(header.error)));
                if let Err(err) = discarded {
                    break err;
                }
            }
            Some(tx) => match reader.read_body_raw().await {
                Ok(body) => {
                    let _ = tx.send(Ok(body));
                }
                Err(err) => {
                    let _ = tx.send(Err(RpcError::ReadingBody(err.to_string())));
                    break err;
                }
            },
        }
    };
    terminate_calls(&shared, err).await;
}

async fn terminate_calls(shared: &Shared, err: RpcError) {
    // Lock order: send lock, then state lock.
    let _writer = shared.writer.lock().await;
    let mut state = shared.state.lock().unwrap();
    state.shutdown = true;
    if !state.pending.is_empty() || !err.is_connection_closed() {
        debug!(error = %err, in_flight = state.pending.len(), "rpc client: terminating calls");
    }
    for (_, tx) in state.pending.drain() {
        let _ = tx.send(Err(RpcError::Connection(err.to_string())));
    }
}

/// Read bytes until the blank line ending an HTTP/1.0 response head.
async fn read_response_head(stream: &mut impl Transport) -> Result<String> {
    const MAX_RESPONSE_HEAD: usize = 8 * 1024;
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if stream.read(&mut byte).await? == 0 {
            return Err(RpcError::Connection(
                "connection closed during CONNECT handshake".to_string(),
            ));
        }
        head.push(byte[0]);
        if head.ends_with(b"\n\n") || head.ends_with(b"\r\n\r\n") {
            break;
        }
        if head.len() > MAX_RESPONSE_HEAD {
            return Err(RpcError::Connection("response head too large".to_string()));
        }
    }
    String::from_utf8(head)
        .map_err(|_| RpcError::Connection("response head is not utf-8".to_string()))
}
