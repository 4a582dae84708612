//! Named services and their invocable method tables.
//!
//! Rust offers no runtime method enumeration, so a service is assembled at
//! compile time: [`ServiceBuilder::method`] captures each handler together
//! with its argument and reply types and erases them into an invoker that
//! decodes the arguments, allocates a default reply value, runs the handler
//! and encodes the reply. A handler is any
//! `Fn(&Receiver, Args, &mut Reply) -> Result<(), MethodError>` where `Args`
//! deserializes and `Reply` serializes; `Reply: Default` gives the handler a
//! ready-to-write value (empty maps and vectors included) the same way the
//! wire layer allocates a pointed-to zero value.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use microrpc_common::codec::Encoding;
use microrpc_common::RpcError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

/// Error a service method hands back to the caller. Only its message
/// survives the wire: it is carried in `Header.error`.
pub type MethodError = Box<dyn std::error::Error + Send + Sync>;

type Invoker =
    Box<dyn Fn(Encoding, &[u8]) -> std::result::Result<Vec<u8>, RpcError> + Send + Sync>;

/// One registered method: the erased invoker plus a call counter.
pub struct MethodEntry {
    name: String,
    invoke: Invoker,
    num_called: AtomicU64,
}

impl MethodEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How many times this method has been dispatched.
    pub fn num_called(&self) -> u64 {
        self.num_called.load(Ordering::Relaxed)
    }
}

/// An immutable named set of methods built by [`ServiceBuilder`].
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<MethodEntry>>,
}

impl Service {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, name: &str) -> Option<Arc<MethodEntry>> {
        self.methods.get(name).cloned()
    }

    /// Dispatch a method: bump its call counter, decode the arguments,
    /// run the handler and encode the reply.
    pub fn call(
        &self,
        method: &MethodEntry,
        encoding: Encoding,
        argv: &[u8],
    ) -> std::result::Result<Vec<u8>, RpcError> {
        method.num_called.fetch_add(1, Ordering::Relaxed);
        (method.invoke)(encoding, argv)
    }
}

/// Builder collecting the methods of one receiver into a [`Service`].
pub struct ServiceBuilder<S> {
    name: String,
    receiver: Arc<S>,
    methods: HashMap<String, Arc<MethodEntry>>,
}

impl<S: Send + Sync + 'static> ServiceBuilder<S> {
    /// Start a service for `receiver` under `name`.
    ///
    /// # Panics
    ///
    /// Panics when `name` is not an exported identifier (uppercase initial,
    /// alphanumeric/underscore remainder). Like an invalid method table,
    /// this is a static programmer error rather than a runtime condition.
    pub fn new(name: impl Into<String>, receiver: S) -> Self {
        let name = name.into();
        if !is_exported(&name) {
            panic!("rpc server: {name} is not a valid service name");
        }
        Self {
            name,
            receiver: Arc::new(receiver),
            methods: HashMap::new(),
        }
    }

    /// Register one method under `name`.
    pub fn method<A, R, F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Default + Send + 'static,
        F: Fn(&S, A, &mut R) -> std::result::Result<(), MethodError> + Send + Sync + 'static,
    {
        let name = name.into();
        let receiver = Arc::clone(&self.receiver);
        let invoke: Invoker = Box::new(move |encoding, argv| {
            let args: A = encoding.decode(argv)?;
            let mut reply = R::default();
            handler(&receiver, args, &mut reply).map_err(|e| RpcError::Server(e.to_string()))?;
            encoding.encode(&reply)
        });
        info!(service = %self.name, method = %name, "rpc server: register method");
        self.methods.insert(
            name.clone(),
            Arc::new(MethodEntry {
                name,
                invoke,
                num_called: AtomicU64::new(0),
            }),
        );
        self
    }

    pub fn build(self) -> Service {
        Service {
            name: self.name,
            methods: self.methods,
        }
    }
}

fn is_exported(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
