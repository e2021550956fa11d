//! Paged message encoding.
//!
//! # Entry Format
//!
//! ```text
//! | len (4) | crc32 (4) | message_id (8) | flags (1) | [tx_id (8)] | body_len (4) | body |
//! ```
//!
//! `len` counts the bytes after the CRC, and the CRC covers exactly those
//! bytes. Flag bit 0 marks a durable message, bit 1 the presence of
//! `tx_id`.

use bytes::{Buf, BufMut};

const FLAG_DURABLE: u8 = 0b01;
const FLAG_TRANSACTIONAL: u8 = 0b10;

/// Bytes before the checksummed part.
const ENTRY_PREFIX_SIZE: usize = 4 + 4;

/// A message spilled to a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedMessage {
    /// Broker-assigned message ID.
    pub message_id: u64,
    /// Whether the message survives restarts once depaged.
    pub durable: bool,
    /// The producer transaction that paged the message, if any.
    pub transaction_id: Option<u64>,
    /// Encoded message.
    pub body: Vec<u8>,
}

/// Result of decoding one page entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEntry {
    /// A complete entry of `size` bytes.
    Message {
        /// The message.
        message: PagedMessage,
        /// Encoded size.
        size: usize,
    },
    /// No more entries.
    End,
    /// A partial or damaged entry.
    Torn(&'static str),
}

impl PagedMessage {
    /// Creates a non-transactional message.
    #[must_use]
    pub fn new(message_id: u64, durable: bool, body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id,
            durable,
            transaction_id: None,
            body: body.into(),
        }
    }

    /// Marks the message as paged by transaction `tx_id`.
    #[must_use]
    pub fn with_transaction(mut self, tx_id: u64) -> Self {
        self.transaction_id = Some(tx_id);
        self
    }

    fn payload_size(&self) -> usize {
        8 + 1 + if self.transaction_id.is_some() { 8 } else { 0 } + 4 + self.body.len()
    }

    /// Returns the exact encoded size.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        ENTRY_PREFIX_SIZE + self.payload_size()
    }

    /// Encodes the message as a page entry.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.payload_size());
        payload.put_u64_le(self.message_id);
        let mut flags = 0;
        if self.durable {
            flags |= FLAG_DURABLE;
        }
        if self.transaction_id.is_some() {
            flags |= FLAG_TRANSACTIONAL;
        }
        payload.put_u8(flags);
        if let Some(tx_id) = self.transaction_id {
            payload.put_u64_le(tx_id);
        }
        payload.put_u32_le(self.body.len() as u32);
        payload.put_slice(&self.body);

        let mut buf = Vec::with_capacity(ENTRY_PREFIX_SIZE + payload.len());
        buf.put_u32_le(payload.len() as u32);
        buf.put_u32_le(crc32fast::hash(&payload));
        buf.extend_from_slice(&payload);
        buf
    }

    /// Decodes the entry at the start of `data`.
    #[must_use]
    pub fn decode(data: &[u8]) -> PageEntry {
        if data.len() < ENTRY_PREFIX_SIZE {
            return if data.iter().all(|&b| b == 0) {
                PageEntry::End
            } else {
                PageEntry::Torn("short entry header")
            };
        }
        let mut header = &data[..ENTRY_PREFIX_SIZE];
        let len = header.get_u32_le() as usize;
        let crc = header.get_u32_le();
        if len == 0 {
            return PageEntry::End;
        }
        let Some(payload) = data.get(ENTRY_PREFIX_SIZE..ENTRY_PREFIX_SIZE + len) else {
            return PageEntry::Torn("entry extends past end of page");
        };
        if crc32fast::hash(payload) != crc {
            return PageEntry::Torn("checksum mismatch");
        }
        match Self::decode_payload(payload) {
            Some(message) => PageEntry::Message {
                message,
                size: ENTRY_PREFIX_SIZE + len,
            },
            None => PageEntry::Torn("malformed entry"),
        }
    }

    fn decode_payload(mut payload: &[u8]) -> Option<Self> {
        if payload.remaining() < 9 {
            return None;
        }
        let message_id = payload.get_u64_le();
        let flags = payload.get_u8();
        let transaction_id = if flags & FLAG_TRANSACTIONAL != 0 {
            if payload.remaining() < 8 {
                return None;
            }
            Some(payload.get_u64_le())
        } else {
            None
        };
        if payload.remaining() < 4 {
            return None;
        }
        let body_len = payload.get_u32_le() as usize;
        if payload.remaining() != body_len {
            return None;
        }
        Some(Self {
            message_id,
            durable: flags & FLAG_DURABLE != 0,
            transaction_id,
            body: payload.to_vec(),
        })
    }
}

/// Decodes entries until the end of `data` or the first damaged entry.
///
/// Returns the messages, the offset after the last good entry and, if the
/// scan stopped early, why.
#[must_use]
pub fn decode_entries(data: &[u8]) -> (Vec<PagedMessage>, usize, Option<&'static str>) {
    let mut messages = Vec::new();
    let mut offset = 0;
    loop {
        match PagedMessage::decode(&data[offset..]) {
            PageEntry::Message { message, size } => {
                messages.push(message);
                offset += size;
            }
            PageEntry::End => return (messages, offset, None),
            PageEntry::Torn(reason) => return (messages, offset, Some(reason)),
        }
    }
}
