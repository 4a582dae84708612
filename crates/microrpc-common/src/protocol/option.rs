use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::ENCODING_POSTCARD;

/// Magic number opening every connection. A mismatch means the peer is not
/// speaking this protocol and the connection is closed without a reply.
pub const RPC_NUMBER: u64 = 0x3bef5c;

/// Default bound on transport connect plus client handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection handshake preamble.
///
/// Sent once per connection as a single JSON line before any framed
/// messages, so the peer can select a codec before the binary stream
/// begins. Durations travel as integer nanoseconds.
///
/// A zero `connect_timeout` waits indefinitely; a zero `handle_timeout`
/// disables the server-side deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    #[serde(rename = "RPCNumber")]
    pub rpc_number: u64,
    #[serde(rename = "EncodingType")]
    pub encoding_type: String,
    #[serde(rename = "ConnectTimeout", with = "duration_nanos")]
    pub connect_timeout: Duration,
    #[serde(rename = "HandleTimeout", with = "duration_nanos")]
    pub handle_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            rpc_number: RPC_NUMBER,
            encoding_type: ENCODING_POSTCARD.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handle_timeout: Duration::ZERO,
        }
    }
}

mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}
