//! Wire packets exchanged between clients and storage nodes.
//!
//! ## Framing
//! Every packet is a fixed size big-endian header followed by a variable length payload.
//!
//! ```text
//! magic | opcode | crc | size | partition_id | file_id | object_id | req_id | payload_len | payload
//! u8    | u8     | u32 | u32  | u64          | u64     | u64       | i64    | u32         | [u8]
//! ```
//!
//! `size` is the logical size of the operation (bytes written, or bytes requested by a read),
//! while `payload_len` is the number of payload bytes which follow on the wire. The CRC always
//! covers `data[..size]` of a packet which carries data.

use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The magic byte which starts every packet.
pub const PROTO_MAGIC: u8 = 0xFF;
/// The number of bytes in an encoded packet header.
pub const PACKET_HEADER_SIZE: usize = 46;
/// The largest payload a packet may carry.
pub const MAX_PACKET_DATA_SIZE: u32 = 64 * 1024 * 1024;

pub const OP_WRITE: u8 = 0x01;
pub const OP_READ: u8 = 0x02;
pub const OP_MARK_DELETE: u8 = 0x03;
pub const OP_DATA_NODE_HEARTBEAT: u8 = 0x10;
pub const OP_INTRA_GROUP_NET_ERR: u8 = 0xF3;
pub const OP_NOT_EXIST: u8 = 0xF5;
pub const OP_ERR: u8 = 0xF6;
/// The success sentinel of every reply.
pub const OP_OK: u8 = 0xF0;

static REQ_ID_GEN: AtomicI64 = AtomicI64::new(1);

/// Generate a new process-wide unique request ID.
pub fn next_req_id() -> i64 {
    REQ_ID_GEN.fetch_add(1, Ordering::Relaxed)
}

/// Compute the CRC-32 (IEEE) of the given bytes.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// A human readable name for the given opcode.
pub fn opcode_name(opcode: u8) -> &'static str {
    match opcode {
        OP_WRITE => "OpWrite",
        OP_READ => "OpRead",
        OP_MARK_DELETE => "OpMarkDelete",
        OP_DATA_NODE_HEARTBEAT => "OpDataNodeHeartbeat",
        OP_INTRA_GROUP_NET_ERR => "OpIntraGroupNetErr",
        OP_NOT_EXIST => "OpNotExist",
        OP_ERR => "OpErr",
        OP_OK => "OpOk",
        _ => "OpUnknown",
    }
}

/// A request or reply packet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packet {
    pub opcode: u8,
    pub crc: u32,
    pub size: u32,
    pub partition_id: u64,
    pub file_id: u64,
    pub object_id: u64,
    pub req_id: i64,
    pub data: Vec<u8>,
}

impl Packet {
    /// Create a write request for the given partition carrying the given payload.
    pub fn new_write(partition_id: u64, data: Vec<u8>) -> Self {
        Self {
            opcode: OP_WRITE,
            partition_id,
            req_id: next_req_id(),
            ..Default::default()
        }
        .with_data(data)
    }

    /// Create a read request for `size` bytes of the given object.
    pub fn new_read(partition_id: u64, file_id: u64, object_id: u64, size: u32) -> Self {
        Self {
            opcode: OP_READ,
            size,
            partition_id,
            file_id,
            object_id,
            req_id: next_req_id(),
            ..Default::default()
        }
    }

    /// Create a mark-delete request for the given object.
    pub fn new_mark_delete(partition_id: u64, file_id: u64, object_id: u64) -> Self {
        Self {
            opcode: OP_MARK_DELETE,
            partition_id,
            file_id,
            object_id,
            req_id: next_req_id(),
            ..Default::default()
        }
    }

    /// Create a successful reply to the given request, carrying no data.
    pub fn new_reply(request: &Packet) -> Self {
        Self {
            opcode: OP_OK,
            crc: 0,
            size: 0,
            partition_id: request.partition_id,
            file_id: request.file_id,
            object_id: request.object_id,
            req_id: request.req_id,
            data: Vec::new(),
        }
    }

    /// Replace this packet's payload, updating its size and CRC.
    ///
    /// A payload longer than `u32::MAX` saturates `size`, and is rejected when the packet is
    /// encoded.
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.size = u32::try_from(data.len()).unwrap_or(u32::MAX);
        self.crc = crc32(&data);
        self.data = data;
        self
    }

    /// Replace this packet's opcode.
    pub fn with_opcode(mut self, opcode: u8) -> Self {
        self.opcode = opcode;
        self
    }

    /// The logical payload of this packet, `data[..size]`, clamped to the data present.
    pub fn payload(&self) -> &[u8] {
        let end = (self.size as usize).min(self.data.len());
        &self.data[..end]
    }

    /// The CRC-32 of this packet's logical payload.
    pub fn payload_crc(&self) -> u32 {
        crc32(self.payload())
    }

    /// The error text carried by a failed reply.
    pub fn error_message(&self) -> String {
        String::from_utf8_lossy(self.payload()).into_owned()
    }

    /// An ID used to correlate log lines of a single request.
    pub fn unique_log_id(&self) -> String {
        format!(
            "Req({})_Partition({})_File({})_Object({})_{}",
            self.req_id,
            self.partition_id,
            self.file_id,
            self.object_id,
            opcode_name(self.opcode)
        )
    }

    /// Encode this packet's header.
    fn encode_header(&self) -> Result<[u8; PACKET_HEADER_SIZE]> {
        let payload_len = u32::try_from(self.data.len()).context("packet payload does not fit a u32 length")?;
        if payload_len > MAX_PACKET_DATA_SIZE {
            bail!("packet payload of {} bytes exceeds max of {}", payload_len, MAX_PACKET_DATA_SIZE);
        }
        let mut header = [0u8; PACKET_HEADER_SIZE];
        header[0] = PROTO_MAGIC;
        header[1] = self.opcode;
        header[2..6].copy_from_slice(&self.crc.to_be_bytes());
        header[6..10].copy_from_slice(&self.size.to_be_bytes());
        header[10..18].copy_from_slice(&self.partition_id.to_be_bytes());
        header[18..26].copy_from_slice(&self.file_id.to_be_bytes());
        header[26..34].copy_from_slice(&self.object_id.to_be_bytes());
        header[34..42].copy_from_slice(&self.req_id.to_be_bytes());
        header[42..46].copy_from_slice(&payload_len.to_be_bytes());
        Ok(header)
    }

    /// Write this packet to the given stream.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let header = self.encode_header()?;
        let mut buf = Vec::with_capacity(PACKET_HEADER_SIZE + self.data.len());
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&self.data);
        writer.write_all(&buf).await.context("error writing packet to stream")?;
        writer.flush().await.context("error flushing packet to stream")?;
        Ok(())
    }

    /// Read a packet from the given stream.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; PACKET_HEADER_SIZE];
        reader.read_exact(&mut header).await.context("error reading packet header from stream")?;
        if header[0] != PROTO_MAGIC {
            bail!("invalid packet magic {:#04x}", header[0]);
        }
        let payload_len = be_u32(&header[42..46]);
        if payload_len > MAX_PACKET_DATA_SIZE {
            bail!("packet payload of {} bytes exceeds max of {}", payload_len, MAX_PACKET_DATA_SIZE);
        }
        let mut data = vec![0u8; payload_len as usize];
        reader.read_exact(&mut data).await.context("error reading packet payload from stream")?;
        Ok(Self {
            opcode: header[1],
            crc: be_u32(&header[2..6]),
            size: be_u32(&header[6..10]),
            partition_id: be_u64(&header[10..18]),
            file_id: be_u64(&header[18..26]),
            object_id: be_u64(&header[26..34]),
            req_id: be_u64(&header[34..42]) as i64,
            data,
        })
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_be_bytes(buf)
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}
