//! HTTP flavor of the server: `CONNECT` tunneling.
//!
//! A client opens a plain TCP connection, sends `CONNECT /micro-rpc
//! HTTP/1.0` and, after the `200` status line, both sides speak the framed
//! protocol on the same socket. The request head is parsed directly off the
//! socket because the stream must be handed over to the codec untouched
//! afterwards.

use std::io;
use std::sync::Arc;

use microrpc_common::{DEFAULT_RPC_PATH, HTTP_CONNECTED_STATUS};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, warn};

use crate::server::Server;

/// Upper bound on an HTTP request head.
const MAX_REQUEST_HEAD: usize = 8 * 1024;

impl Server {
    /// Accept HTTP connections and upgrade `CONNECT` requests to the framed
    /// protocol. Non-`CONNECT` methods get a 405, other paths a 404.
    pub async fn serve_http(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "rpc server: http connection established");
                    let server = Arc::clone(&self);
                    tokio::spawn(server.serve_http_conn(stream));
                }
                Err(err) => {
                    error!(error = %err, "rpc server: accept error");
                    return;
                }
            }
        }
    }

    async fn serve_http_conn(self: Arc<Self>, mut stream: TcpStream) {
        let head = match read_request_head(&mut stream).await {
            Ok(head) => head,
            Err(err) => {
                warn!(error = %err, "rpc server: bad http request head");
                return;
            }
        };
        let request_line = head.lines().next().unwrap_or("");
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or("");
        let path = parts.next().unwrap_or("");

        if method != "CONNECT" {
            let _ = stream.write_all(b"HTTP/1.0 405 must CONNECT\n\n").await;
            return;
        }
        if path != DEFAULT_RPC_PATH {
            let _ = stream.write_all(b"HTTP/1.0 404 not found\n\n").await;
            return;
        }
        if stream
            .write_all(format!("{HTTP_CONNECTED_STATUS}\n\n").as_bytes())
            .await
            .is_err()
        {
            return;
        }
        self.serve_conn(stream).await;
    }
}

/// Read bytes until the blank line ending an HTTP/1.0 request head.
async fn read_request_head(stream: &mut TcpStream) -> io::Result<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if stream.read(&mut byte).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before request head",
            ));
        }
        head.push(byte[0]);
        if head.ends_with(b"\n\n") || head.ends_with(b"\r\n\r\n") {
            break;
        }
        if head.len() > MAX_REQUEST_HEAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request head too large",
            ));
        }
    }
    String::from_utf8(head)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "request head is not utf-8"))
}
