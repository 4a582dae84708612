//! Core protocol types: request/response header, handshake options, errors.

pub mod error;
mod option;

pub use error::{Result, RpcError};
pub use option::{Options, DEFAULT_CONNECT_TIMEOUT, RPC_NUMBER};

use serde::{Deserialize, Serialize};

/// Path the HTTP flavor of the protocol tunnels through via `CONNECT`.
pub const DEFAULT_RPC_PATH: &str = "/micro-rpc";

/// Status line a server answers a successful `CONNECT` with.
pub const HTTP_CONNECTED_STATUS: &str = "HTTP/1.0 200 connected to micro rpc";

/// Response header carrying the comma-separated alive server list.
pub const SERVERS_HEADER: &str = "micro-rpc-servers";

/// Request header carrying a single server endpoint on heartbeat.
pub const SERVER_HEADER: &str = "micro-rpc-server";

/// Frame header preceding every request and response body.
///
/// The client assigns `seq` and the server echoes it verbatim, which is how
/// responses are correlated back to in-flight calls. `error` is empty on
/// success; a non-empty value means the body is a unit sentinel and the call
/// failed with that message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Header {
    /// Sequence number chosen by the client. 0 is reserved as invalid.
    pub seq: u64,
    /// Qualified method name, `"Service.Method"`.
    pub service_method: String,
    /// Error message produced by the server, empty on success.
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_wire_field_names() {
        let header = Header {
            seq: 7,
            service_method: "Arith.Sum".to_string(),
            error: String::new(),
        };
        let json = serde_json::to_string(&header).unwrap();
        assert!(json.contains("\"Seq\":7"));
        assert!(json.contains("\"ServiceMethod\":\"Arith.Sum\""));
        assert!(json.contains("\"Error\":\"\""));
    }

    #[test]
    fn header_round_trip() {
        let header = Header {
            seq: 42,
            service_method: "Arith.Sum".to_string(),
            error: "boom".to_string(),
        };
        let json = serde_json::to_string(&header).unwrap();
        let decoded: Header = serde_json::from_str(&json).unwrap();
        assert_eq!(header, decoded);
    }
}
