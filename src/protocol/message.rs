use std::fmt;

use bytes::{Bytes, BytesMut};
use tracing::debug;
use zeroize::Zeroizing;

use crate::core::packet::{PacketReader, PacketWriter};
use crate::protocol::handshake::MODULUS_LEN;

/// Opcode of the server's first packet.
pub const INIT_OPCODE: u8 = 0x00;

/// Identity of a live connection, assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Closed set of messages the gateway itself knows how to lay out.
#[derive(Clone)]
pub enum MessageKind {
    /// Handshake sent on accept; encoded with the static key only.
    Init {
        session_id: u32,
        scrambled_modulus: [u8; MODULUS_LEN],
        blowfish_key: Zeroizing<Vec<u8>>,
        protocol_revision: u32,
    },
    /// Any other packet: opcode followed by an opaque body.
    Generic { opcode: u8, body: Bytes },
}

impl fmt::Debug for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Init {
                session_id,
                protocol_revision,
                ..
            } => f
                .debug_struct("Init")
                .field("session_id", session_id)
                .field("protocol_revision", protocol_revision)
                .finish_non_exhaustive(),
            MessageKind::Generic { opcode, body } => f
                .debug_struct("Generic")
                .field("opcode", opcode)
                .field("len", &body.len())
                .finish(),
        }
    }
}

/// A message on its way to a client.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    kind: MessageKind,
    target: Option<ConnectionId>,
}

impl OutgoingMessage {
    pub fn init(
        session_id: u32,
        scrambled_modulus: [u8; MODULUS_LEN],
        blowfish_key: &[u8],
        protocol_revision: u32,
    ) -> Self {
        Self {
            kind: MessageKind::Init {
                session_id,
                scrambled_modulus,
                blowfish_key: Zeroizing::new(blowfish_key.to_vec()),
                protocol_revision,
            },
            target: None,
        }
    }

    pub fn generic(opcode: u8, body: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Generic {
                opcode,
                body: body.into(),
            },
            target: None,
        }
    }

    /// Address the message to a connection.
    pub fn to(mut self, target: ConnectionId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn target(&self) -> Option<ConnectionId> {
        self.target
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    pub fn opcode(&self) -> u8 {
        match &self.kind {
            MessageKind::Init { .. } => INIT_OPCODE,
            MessageKind::Generic { opcode, .. } => *opcode,
        }
    }

    /// Whether the message is obfuscated with the network-wide static key
    /// instead of the session cipher.
    pub fn uses_static_key(&self) -> bool {
        matches!(self.kind, MessageKind::Init { .. })
    }

    /// Cleartext body, before padding or any cipher.
    pub fn serialize(&self) -> BytesMut {
        match &self.kind {
            MessageKind::Init {
                session_id,
                scrambled_modulus,
                blowfish_key,
                protocol_revision,
            } => {
                let mut writer = PacketWriter::with_capacity(
                    1 + 4 + MODULUS_LEN + blowfish_key.len() + 4 + 1,
                );
                writer
                    .write_u8(INIT_OPCODE)
                    .write_u32(*session_id)
                    .write_bytes(scrambled_modulus)
                    .write_bytes(blowfish_key)
                    .write_u32(*protocol_revision)
                    .write_u8(0x00);
                writer.into_inner()
            }
            MessageKind::Generic { opcode, body } => {
                let mut writer = PacketWriter::with_capacity(1 + body.len());
                writer.write_u8(*opcode).write_bytes(body);
                writer.into_inner()
            }
        }
    }
}

/// A decrypted, checksum-stripped packet handed to a handler.
///
/// The body stays owned by the message until [`IncomingMessage::release`].
#[derive(Debug)]
pub struct IncomingMessage {
    connection: ConnectionId,
    opcode: u8,
    reader: PacketReader,
}

impl IncomingMessage {
    pub fn new(connection: ConnectionId, opcode: u8, body: impl Into<Bytes>) -> Self {
        Self {
            connection,
            opcode,
            reader: PacketReader::new(body),
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    pub fn reader(&mut self) -> &mut PacketReader {
        &mut self.reader
    }

    /// Unread part of the body. Includes any cipher padding.
    pub fn body(&self) -> &[u8] {
        self.reader.remaining()
    }

    /// End of the message's lifetime. Unread bytes are logged, since they
    /// usually mean a handler and the client disagree on a layout (or the
    /// remainder is block padding).
    pub fn release(self) {
        let left = self.reader.remaining();
        if !left.is_empty() {
            debug!(
                connection = %self.connection,
                opcode = self.opcode,
                left = left.len(),
                bytes = %hex(left),
                "Bytes left in packet buffer"
            );
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3 + 3);
    out.push('[');
    for b in bytes {
        out.push_str(&format!(" {b:02X}"));
    }
    out.push_str(" ]");
    out
}
