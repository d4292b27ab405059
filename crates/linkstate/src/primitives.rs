//! Identity and metric primitives.
//!
//! `NodeId` and `Cost` are the two value types the topology engine works
//! with. Both are small `Copy` types with structural equality, so they can be
//! used directly as map keys, and both carry a fixed-width wire form through
//! the [`WireCodec`] trait.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::SocketAddr;

/// Errors produced while decoding wire buffers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Buffer ended before the value was complete.
    #[error("truncated {what}: need {needed} bytes, have {available}")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },
    /// Buffer held more bytes than one value.
    #[error("{count} trailing bytes after {what}")]
    TrailingBytes { what: &'static str, count: usize },
}

/// Fixed-width binary form against a byte buffer.
pub trait WireCodec: Sized {
    /// Append the wire form of `self` to `buf`.
    fn encode(&self, buf: &mut BytesMut);

    /// Read one value from the front of `buf`.
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError>;

    /// Encode into a fresh buffer.
    fn to_wire_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.to_vec()
    }

    /// Decode a buffer holding exactly one value.
    fn from_wire_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut buf = bytes;
        let value = Self::decode(&mut buf)?;
        if buf.has_remaining() {
            return Err(WireError::TrailingBytes {
                what: std::any::type_name::<Self>(),
                count: buf.remaining(),
            });
        }
        Ok(value)
    }
}

fn ensure_remaining<B: Buf>(buf: &B, needed: usize, what: &'static str) -> Result<(), WireError> {
    if buf.remaining() < needed {
        return Err(WireError::Truncated {
            what,
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

/// Identity of a mesh participant.
///
/// Derived from the participant's network address: the first 8 bytes of the
/// SHA-256 digest of the address text.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId([u8; NodeId::LEN]);

impl NodeId {
    /// Wire length in bytes.
    pub const LEN: usize = 8;

    /// Create a node id from its raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Derive the node id of a textual network address
    /// (`udp://10.0.0.1:9000`, `serial:/dev/ttyUSB0`, `ws://host:80`, ...).
    #[must_use]
    pub fn from_address(address: &str) -> Self {
        let digest = Sha256::digest(address.as_bytes());
        let mut bytes = [0u8; Self::LEN];
        bytes.copy_from_slice(&digest[..Self::LEN]);
        Self(bytes)
    }

    /// Derive the node id of a socket address.
    #[must_use]
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self::from_address(&addr.to_string())
    }

    /// Raw bytes of this id.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Short display form (first 4 bytes, hex).
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.short())
    }
}

impl From<SocketAddr> for NodeId {
    fn from(addr: SocketAddr) -> Self {
        Self::from_socket_addr(addr)
    }
}

impl WireCodec for NodeId {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        ensure_remaining(buf, Self::LEN, "NodeId")?;
        let mut bytes = [0u8; Self::LEN];
        buf.copy_to_slice(&mut bytes);
        Ok(Self(bytes))
    }
}

/// Non-negative metric attached to a node or a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cost(u32);

impl Cost {
    /// Wire length in bytes.
    pub const LEN: usize = 4;

    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for Cost {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl WireCodec for Cost {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.0);
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<Self, WireError> {
        ensure_remaining(buf, Self::LEN, "Cost")?;
        Ok(Self(buf.get_u32()))
    }
}
