//! Dialers: open a transport, run the handshake, bound both by the
//! connect timeout.

use std::io;
use std::time::Duration;

use microrpc_common::codec::{Encoding, Transport};
use microrpc_common::{Options, Result, RpcError, RPC_NUMBER};
use tokio::net::TcpStream;

use crate::client::Client;

/// Dial a raw framed endpoint. `network` is `tcp` or (on unix) `unix`.
pub async fn dial(network: &str, address: &str, options: Option<Options>) -> Result<Client> {
    dial_with(false, network, address, options).await
}

/// Dial an HTTP endpoint: `CONNECT` handshake first, framed protocol after.
pub async fn dial_http(network: &str, address: &str, options: Option<Options>) -> Result<Client> {
    dial_with(true, network, address, options).await
}

/// Dial a `protocol@addr` endpoint, e.g. `tcp@127.0.0.1:9001` or
/// `http@127.0.0.1:9002`.
pub async fn general_dial(protocol_addr: &str, options: Option<Options>) -> Result<Client> {
    let Some((protocol, address)) = protocol_addr.split_once('@') else {
        return Err(RpcError::InvalidEndpoint(protocol_addr.to_string()));
    };
    match protocol {
        "http" => dial_http("tcp", address, options).await,
        // tcp, unix or other transport protocol
        _ => dial(protocol, address, options).await,
    }
}

fn parse_options(options: Option<Options>) -> Options {
    let mut options = options.unwrap_or_default();
    options.rpc_number = RPC_NUMBER;
    if options.encoding_type.is_empty() {
        options.encoding_type = Encoding::Postcard.name().to_string();
    }
    options
}

async fn dial_with(
    http: bool,
    network: &str,
    address: &str,
    options: Option<Options>,
) -> Result<Client> {
    let options = parse_options(options);
    let stream = open_transport(network, address, options.connect_timeout).await?;

    // The constructor itself (preamble write, CONNECT handshake) races the
    // same timeout; dropping it on expiry closes the connection.
    let construct = async {
        if http {
            Client::new_http(stream, &options).await
        } else {
            Client::new(stream, &options).await
        }
    };
    if options.connect_timeout.is_zero() {
        return construct.await;
    }
    match tokio::time::timeout(options.connect_timeout, construct).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::ConnectTimeout(options.connect_timeout)),
    }
}

async fn open_transport(
    network: &str,
    address: &str,
    connect_timeout: Duration,
) -> Result<Box<dyn Transport>> {
    let connect = async {
        match network {
            "tcp" => TcpStream::connect(address)
                .await
                .map(|stream| Box::new(stream) as Box<dyn Transport>),
            #[cfg(unix)]
            "unix" => tokio::net::UnixStream::connect(address)
                .await
                .map(|stream| Box::new(stream) as Box<dyn Transport>),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported network {network}"),
            )),
        }
    };
    if connect_timeout.is_zero() {
        return Ok(connect.await?);
    }
    match tokio::time::timeout(connect_timeout, connect).await {
        Ok(stream) => Ok(stream?),
        Err(_) => Err(RpcError::ConnectTimeout(connect_timeout)),
    }
}
