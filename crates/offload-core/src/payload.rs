//! Task payload format: the bytes carried inside every `TaskEnvelope`.
//!
//! A payload is a fixed 40-byte header followed by a kind-specific body.
//! The header names the task kind and carries a BLAKE3 hash of the body so
//! a receiver can reject a payload before any runner sees it. The grid
//! never reconstructs arbitrary types from these bytes: the kind tag selects
//! a registered runner and only that runner interprets the body.
//!
//! Multi-byte integers are little-endian on the wire. There is no unsafe
//! code in this module.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Header ───────────────────────────────────────────────────────────────────

/// Wire size: 40 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct PayloadHeader {
    /// BLAKE3 hash of the body bytes.
    pub content_hash: [u8; 32],

    /// Task kind tag. Selects the runner on both server and client.
    pub kind: U16<LittleEndian>,

    /// Length of the body in bytes, not including this header.
    pub length: U32<LittleEndian>,

    /// Payload format version. Currently 0x01.
    pub version: u8,

    /// Reserved, must be zero.
    pub flags: u8,
}

assert_eq_size!(PayloadHeader, [u8; 40]);

pub const HEADER_LEN: usize = 40;

/// Current payload format version.
pub const PAYLOAD_VERSION: u8 = 0x01;

/// Maximum body size in bytes (16 MiB).
pub const MAX_BODY: usize = 16 * 1024 * 1024;

// ── Task kinds ───────────────────────────────────────────────────────────────

/// Task kind tag. Values are part of the wire format and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKind(pub u16);

impl TaskKind {
    /// Returns the body unchanged.
    pub const ECHO: TaskKind = TaskKind(0x0001);
    /// Explicit 1-D heat diffusion over a lattice of cells.
    pub const DIFFUSION: TaskKind = TaskKind(0x0002);

    /// Short name used in task ids and logs.
    pub fn name(&self) -> String {
        match *self {
            TaskKind::ECHO => "echo".to_string(),
            TaskKind::DIFFUSION => "diffusion".to_string(),
            TaskKind(other) => format!("kind{other}"),
        }
    }

    /// Inverse of [`TaskKind::name`] for the built-in kinds.
    pub fn from_name(name: &str) -> Option<TaskKind> {
        match name {
            "echo" => Some(TaskKind::ECHO),
            "diffusion" => Some(TaskKind::DIFFUSION),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

// ── Payload ──────────────────────────────────────────────────────────────────

/// A decoded task payload: kind tag plus the raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPayload {
    pub kind: TaskKind,
    pub body: Vec<u8>,
}

impl TaskPayload {
    pub fn new(kind: TaskKind, body: Vec<u8>) -> Self {
        Self { kind, body }
    }

    /// Encode header + body.
    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        if self.body.len() > MAX_BODY {
            return Err(PayloadError::BodyTooLarge(self.body.len()));
        }
        let header = PayloadHeader {
            content_hash: *blake3::hash(&self.body).as_bytes(),
            kind: U16::new(self.kind.0),
            length: U32::new(self.body.len() as u32),
            version: PAYLOAD_VERSION,
            flags: 0,
        };
        let mut out = Vec::with_capacity(HEADER_LEN + self.body.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    /// Decode and verify. Rejects unknown versions, reserved flags, length
    /// mismatches and hash mismatches.
    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        let header =
            PayloadHeader::read_from_prefix(bytes).ok_or(PayloadError::Truncated(bytes.len()))?;

        let version = header.version;
        if version != PAYLOAD_VERSION {
            return Err(PayloadError::UnknownVersion(version));
        }
        let flags = header.flags;
        if flags != 0 {
            return Err(PayloadError::ReservedFlagsSet(flags));
        }

        let length = header.length;
        let declared = length.get() as usize;
        if declared > MAX_BODY {
            return Err(PayloadError::BodyTooLarge(declared));
        }
        let body = &bytes[HEADER_LEN..];
        if body.len() != declared {
            return Err(PayloadError::LengthMismatch {
                declared,
                actual: body.len(),
            });
        }

        let expected = header.content_hash;
        if *blake3::hash(body).as_bytes() != expected {
            return Err(PayloadError::HashMismatch);
        }

        let kind = header.kind;
        Ok(Self {
            kind: TaskKind(kind.get()),
            body: body.to_vec(),
        })
    }

    /// Peek at the kind tag without verifying the body.
    pub fn peek_kind(bytes: &[u8]) -> Option<TaskKind> {
        PayloadHeader::read_from_prefix(bytes).map(|h| {
            let kind = h.kind;
            TaskKind(kind.get())
        })
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload truncated: {0} bytes is shorter than the {HEADER_LEN}-byte header")]
    Truncated(usize),

    #[error("unknown payload version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("reserved flags are non-zero: 0x{0:02x}")]
    ReservedFlagsSet(u8),

    #[error("body length {actual} does not match declared length {declared}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("body length {0} exceeds maximum {MAX_BODY}")]
    BodyTooLarge(usize),

    #[error("body hash does not match header")]
    HashMismatch,

    #[error("no runner registered for task kind 0x{0:04x}")]
    UnknownKind(u16),
}

// ── Tests ────────────────────────────────────────────────────────────────────
