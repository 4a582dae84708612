//! Accept loop and per-connection request pipeline.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use microrpc_common::codec::{
    split_transport, Encoding, FrameReader, FrameWriter, Transport,
};
use microrpc_common::{Header, Options, Result, RpcError, RPC_NUMBER};
use serde::Serialize;
use tokio::io::AsyncBufReadExt;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::service::{MethodEntry, Service};

/// An RPC server: a concurrency-safe map of named services plus the
/// connection pipeline. Insertions are rare (startup), lookups happen on
/// every request.
pub struct Server {
    services: RwLock<HashMap<String, Arc<Service>>>,
}

impl Server {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            services: RwLock::new(HashMap::new()),
        })
    }

    /// Publish a service. Registering the same name twice is an error and
    /// leaves the first registration intact.
    pub fn register(&self, service: Service) -> Result<()> {
        let mut services = self.services.write().unwrap();
        if services.contains_key(service.name()) {
            return Err(RpcError::ServiceAlreadyDefined(service.name().to_string()));
        }
        info!(service = %service.name(), "rpc server: register service");
        services.insert(service.name().to_string(), Arc::new(service));
        Ok(())
    }

    /// Look up a registered service by name.
    pub fn service(&self, name: &str) -> Option<Arc<Service>> {
        self.services.read().unwrap().get(name).cloned()
    }

    fn find(&self, service_method: &str) -> Result<(Arc<Service>, Arc<MethodEntry>)> {
        let Some((service_name, method_name)) = service_method.rsplit_once('.') else {
            return Err(RpcError::Server(format!(
                "rpc server: service/method request ill-formed: {service_method}"
            )));
        };
        let service = self.service(service_name).ok_or_else(|| {
            RpcError::Server(format!("rpc server: can't find service {service_name}"))
        })?;
        let method = service.method(method_name).ok_or_else(|| {
            RpcError::Server(format!("rpc server: can't find method {method_name}"))
        })?;
        Ok((service, method))
    }

    /// Accept raw framed connections until the listener fails.
    pub async fn accept(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "rpc server: connection established");
                    let server = Arc::clone(&self);
                    tokio::spawn(server.serve_conn(stream));
                }
                Err(err) => {
                    error!(error = %err, "rpc server: accept error");
                    return;
                }
            }
        }
    }

    /// Run the full pipeline on one established transport: options
    /// preamble, codec selection, then the framed request loop. Public so
    /// callers accepting non-TCP transports (unix sockets, in-memory pipes)
    /// can reuse the pipeline.
    pub async fn serve_conn(self: Arc<Self>, stream: impl Transport) {
        let (mut reader, writer) = split_transport(Box::new(stream));

        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => return,
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "rpc server: options error");
                return;
            }
        }
        let options: Options = match serde_json::from_str(line.trim()) {
            Ok(options) => options,
            Err(err) => {
                warn!(error = %err, "rpc server: options error");
                return;
            }
        };
        if options.rpc_number != RPC_NUMBER {
            warn!(rpc_number = options.rpc_number, "rpc server: invalid rpc number");
            return;
        }
        let Some(encoding) = Encoding::from_name(&options.encoding_type) else {
            warn!(encoding_type = %options.encoding_type, "rpc server: invalid encoding type");
            return;
        };

        self.serve_codec(
            FrameReader::new(reader, encoding),
            FrameWriter::new(writer, encoding),
            options.handle_timeout,
        )
        .await;
    }

    /// The framed loop: read a request, resolve it, hand it to a handler
    /// task. Handlers run concurrently; responses are serialized by the
    /// per-connection write lock.
    async fn serve_codec(
        self: Arc<Self>,
        mut reader: FrameReader,
        writer: FrameWriter,
        handle_timeout: Duration,
    ) {
        let encoding = reader.encoding();
        let writer = Arc::new(Mutex::new(writer));
        let mut handlers = JoinSet::new();

        loop {
            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(err) => {
                    if !err.is_connection_closed() {
                        warn!(error = %err, "rpc server: read header error");
                    }
                    break;
                }
            };

            let (service, method) = match self.find(&header.service_method) {
                Ok(found) => found,
                Err(err) => {
                    // Recoverable: consume the body, report through the
                    // header, keep the connection alive.
                    if reader.discard_body().await.is_err() {
                        break;
                    }
                    let mut header = header;
                    header.error = err.to_string();
                    send_response(&writer, &header, &()).await;
                    continue;
                }
            };

            let argv = match reader.read_body_raw().await {
                Ok(argv) => argv,
                Err(err) => {
                    warn!(error = %err, "rpc server: read body error");
                    break;
                }
            };

            handlers.spawn(handle_request(
                Arc::clone(&writer),
                service,
                method,
                header,
                argv,
                encoding,
                handle_timeout,
            ));
        }

        // Wait for in-flight handlers before tearing the codec down.
        while handlers.join_next().await.is_some() {}
        let _ = writer.lock().await.close().await;
    }
}

/// Run one request to completion and send its response.
///
/// The user method runs on the blocking pool. With a nonzero
/// `handle_timeout` its completion races the deadline; on expiry a timeout
/// error response is sent and the late result is discarded, so at most one
/// response per request reaches the wire. The blocking invocation itself
/// keeps running until the method returns.
async fn handle_request(
    writer: Arc<Mutex<FrameWriter>>,
    service: Arc<Service>,
    method: Arc<MethodEntry>,
    mut header: Header,
    argv: Vec<u8>,
    encoding: Encoding,
    handle_timeout: Duration,
) {
    let invoke =
        tokio::task::spawn_blocking(move || service.call(&method, encoding, &argv));

    if handle_timeout.is_zero() {
        let result = invoke.await;
        finish_request(&writer, &mut header, result).await;
        return;
    }

    tokio::select! {
        result = invoke => finish_request(&writer, &mut header, result).await,
        _ = tokio::time::sleep(handle_timeout) => {
            header.error = format!(
                "rpc server: request handle timeout: expect within {handle_timeout:?}"
            );
            send_response(&writer, &header, &()).await;
        }
    }
}

async fn finish_request(
    writer: &Mutex<FrameWriter>,
    header: &mut Header,
    result: std::result::Result<std::result::Result<Vec<u8>, RpcError>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(reply)) => send_response_raw(writer, header, &reply).await,
        Ok(Err(err)) => {
            header.error = err.to_string();
            send_response(writer, header, &()).await;
        }
        Err(err) => {
            header.error = format!("rpc server: method panicked: {err}");
            send_response(writer, header, &()).await;
        }
    }
}

async fn send_response<T: Serialize>(writer: &Mutex<FrameWriter>, header: &Header, body: &T) {
    let mut writer = writer.lock().await;
    if let Err(err) = writer.write(header, body).await {
        error!(error = %err, "rpc server: write response error");
    }
}

async fn send_response_raw(writer: &Mutex<FrameWriter>, header: &Header, body: &[u8]) {
    let mut writer = writer.lock().await;
    if let Err(err) = writer.write_raw(header, body).await {
        error!(error = %err, "rpc server: write response error");
    }
}
