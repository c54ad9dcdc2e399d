//! Packet framing carried over the modem byte stream.
//!
//! Wire layout (all multi-byte fields little-endian):
//!
//! ```text
//! +----+---------+--------+----------+------------------------+
//! | id | control | length | checksum | payload ...            |
//! | u8 |   u8    |  u16   |   u16    | length - 6 bytes       |
//! +----+---------+--------+----------+------------------------+
//! ```
//!
//! `length` counts the whole packet, header included. `checksum` is the
//! Internet one's-complement sum over the whole packet with the checksum
//! field itself taken as zero. A file payload starts with a [`FileHeader`].

use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::error::{ModemError, Result};

pub const HEADER_SIZE: usize = 6;
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize;
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

/// Bytes reserved for the NUL-padded file name.
pub const FILE_NAME_LEN: usize = 256;
pub const FILE_HEADER_SIZE: usize = FILE_NAME_LEN + 4;
pub const MAX_FILE_SIZE: usize = MAX_PAYLOAD_SIZE - FILE_HEADER_SIZE;

const CHECKSUM_OFFSET: usize = 4;

/// Independent control bits of a packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ControlFlags(u8);

impl ControlFlags {
    pub const NONE: ControlFlags = ControlFlags(0);
    pub const TEXT: ControlFlags = ControlFlags(0b01);
    pub const FILE: ControlFlags = ControlFlags(0b10);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: ControlFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub id: u8,
    pub control: ControlFlags,
    /// Total packet length, header included.
    pub len: u16,
    pub checksum: u16,
}

impl PacketHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let len = self.len.to_le_bytes();
        let checksum = self.checksum.to_le_bytes();
        [self.id, self.control.bits(), len[0], len[1], checksum[0], checksum[1]]
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(ModemError::InvalidHeader);
        }
        Ok(Self {
            id: data[0],
            control: ControlFlags::from_bits(data[1]),
            len: u16::from_le_bytes([data[2], data[3]]),
            checksum: u16::from_le_bytes([data[4], data[5]]),
        })
    }
}

/// Metadata preceding the content of a file transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub name: String,
    pub data_len: u32,
}

impl FileHeader {
    pub fn new(name: &str, data_len: u32) -> Self {
        // Keep room for the terminating NUL and never split a UTF-8 sequence.
        let mut end = name.len().min(FILE_NAME_LEN - 1);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            name: name[..end].to_string(),
            data_len,
        }
    }

    pub fn to_bytes(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut out = [0u8; FILE_HEADER_SIZE];
        let name = self.name.as_bytes();
        let n = name.len().min(FILE_NAME_LEN - 1);
        out[..n].copy_from_slice(&name[..n]);
        out[FILE_NAME_LEN..].copy_from_slice(&self.data_len.to_le_bytes());
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < FILE_HEADER_SIZE {
            return Err(ModemError::CorruptedPayload(format!(
                "file header needs {FILE_HEADER_SIZE} bytes, got {}",
                data.len()
            )));
        }
        let name_field = &data[..FILE_NAME_LEN];
        let name_len = name_field.iter().position(|&b| b == 0).unwrap_or(FILE_NAME_LEN);
        let len_field = &data[FILE_NAME_LEN..FILE_HEADER_SIZE];
        Ok(Self {
            name: String::from_utf8_lossy(&name_field[..name_len]).into_owned(),
            data_len: u32::from_le_bytes([len_field[0], len_field[1], len_field[2], len_field[3]]),
        })
    }
}

/// Interpreted packet content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    File { name: String, data: Vec<u8> },
}

/// 16-bit one's-complement sum (RFC 1071) over little-endian words, the
/// word at `skip` treated as zero.
fn ones_complement_checksum(data: &[u8], skip: Option<usize>) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);
    for (i, word) in (&mut words).enumerate() {
        if Some(i * 2) == skip {
            continue;
        }
        sum += u16::from_le_bytes([word[0], word[1]]) as u32;
    }
    if let [last] = words.remainder() {
        sum += *last as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// A packet, possibly still being assembled from received bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    data: Vec<u8>,
}

impl Packet {
    /// An empty packet ready to be fed with [`Packet::push`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A complete packet with length and checksum filled in.
    pub fn build(id: u8, control: ControlFlags, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ModemError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let header = PacketHeader {
            id,
            control,
            len: (HEADER_SIZE + payload.len()) as u16,
            checksum: 0,
        };
        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len());
        data.extend_from_slice(&header.to_bytes());
        data.extend_from_slice(payload);

        let mut packet = Self { data };
        let checksum = packet.checksum();
        packet.data[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_le_bytes());
        Ok(packet)
    }

    /// A text message; the payload is NUL-terminated on the wire.
    pub fn text(id: u8, text: &str) -> Result<Self> {
        let mut payload = Vec::with_capacity(text.len() + 1);
        payload.extend_from_slice(text.as_bytes());
        payload.push(0);
        Self::build(id, ControlFlags::TEXT, &payload)
    }

    pub fn file(id: u8, name: &str, contents: &[u8]) -> Result<Self> {
        if contents.len() > MAX_FILE_SIZE {
            return Err(ModemError::PayloadTooLarge {
                size: contents.len(),
                max: MAX_FILE_SIZE,
            });
        }
        let header = FileHeader::new(name, contents.len() as u32);
        let mut payload = Vec::with_capacity(FILE_HEADER_SIZE + contents.len());
        payload.extend_from_slice(&header.to_bytes());
        payload.extend_from_slice(contents);
        Self::build(id, ControlFlags::FILE, &payload)
    }

    /// Move received bytes from the front of `bytes` into the packet.
    ///
    /// An empty packet only starts once a whole header is available.
    /// After that, at most the bytes still missing per the header are
    /// taken; anything beyond stays in `bytes` for the next packet.
    pub fn push(&mut self, bytes: &mut Vec<u8>) {
        if self.data.is_empty() {
            if bytes.len() < HEADER_SIZE {
                return;
            }
            self.data.extend(bytes.drain(..HEADER_SIZE));
        }

        let missing = self.declared_len().saturating_sub(self.data.len());
        let take = missing.min(bytes.len());
        self.data.extend(bytes.drain(..take));
    }

    pub fn header(&self) -> Option<PacketHeader> {
        PacketHeader::from_bytes(&self.data).ok()
    }

    /// Total length announced by the header, or 0 before it arrived.
    pub fn declared_len(&self) -> usize {
        self.header().map_or(0, |h| h.len as usize)
    }

    /// The header announces a length that cannot even hold itself.
    pub fn is_malformed(&self) -> bool {
        self.header().is_some_and(|h| (h.len as usize) < HEADER_SIZE)
    }

    pub fn finished(&self) -> bool {
        !self.data.is_empty() && self.declared_len() == self.data.len()
    }

    pub fn valid(&self) -> bool {
        match self.header() {
            Some(header) => header.checksum == self.checksum(),
            None => false,
        }
    }

    /// Recompute the checksum over the current buffer.
    pub fn checksum(&self) -> u16 {
        let skip = (self.data.len() >= HEADER_SIZE).then_some(CHECKSUM_OFFSET);
        ones_complement_checksum(&self.data, skip)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Bytes following the header.
    pub fn body(&self) -> &[u8] {
        self.data.get(HEADER_SIZE..).unwrap_or(&[])
    }

    /// Interpret the body according to the control flags.
    pub fn payload(&self) -> Result<Payload> {
        let header = self.header().ok_or(ModemError::InvalidHeader)?;
        let body = self.body();

        match header.control {
            ControlFlags::TEXT => {
                let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
                Ok(Payload::Text(String::from_utf8_lossy(&body[..end]).into_owned()))
            }
            ControlFlags::FILE => {
                let file = FileHeader::from_bytes(body)?;
                let expected = file.data_len as usize + FILE_HEADER_SIZE + HEADER_SIZE;
                if expected != self.data.len() {
                    return Err(ModemError::CorruptedPayload(format!(
                        "file '{}' declares {} bytes but packet holds {}",
                        file.name,
                        file.data_len,
                        self.data.len().saturating_sub(FILE_HEADER_SIZE + HEADER_SIZE)
                    )));
                }
                Ok(Payload::File {
                    name: file.name,
                    data: body[FILE_HEADER_SIZE..].to_vec(),
                })
            }
            _ => Err(ModemError::InvalidHeader),
        }
    }
}

/// Completed packets awaiting the application, oldest first.
#[derive(Default)]
pub struct PacketQueue {
    packets: Mutex<VecDeque<Packet>>,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, packet: Packet) {
        self.packets.lock().push_back(packet);
    }

    pub fn pop(&self) -> Option<Packet> {
        self.packets.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.packets.lock().len()
    }

    pub fn clear(&self) {
        self.packets.lock().clear();
    }
}
