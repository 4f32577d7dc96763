// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{WatcherError, WatcherResult};
use crate::types::{BlockHeader, Byte32, Event, MessagePublication};
use primitive_types::U256;
use std::time::{Duration, UNIX_EPOCH};

pub const TRANSFER_PAYLOAD_ID: u8 = 1;

// Fields appended by the Alephium token bridge after the generic transfer body:
// local-token flag (1 byte) + sender id (32 bytes)
pub const TRANSFER_TRAILER_LENGTH: usize = 33;

// Encoded transfer payload consists of the following fields:
// 1. Payload id (1 byte, always 1)
// 2. Amount (32 bytes, big endian)
// 3. Token id (32 bytes)
// 4. Token chain id (2 bytes, big endian)
// 5. Recipient (32 bytes)
// 6. Recipient chain id (2 bytes, big endian)
// 7. Fee (32 bytes, big endian)
// 8. Local token flag (1 byte)
// 9. Sender id (32 bytes)
pub const TRANSFER_PAYLOAD_LENGTH: usize = 1 + 32 + 32 + 2 + 32 + 2 + 32 + 1 + 32;

/// Message envelope decoded from a governance contract event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WormholeMessage {
    pub emitter: Byte32,
    pub nonce: u32,
    pub sequence: u64,
    pub consistency_level: u8,
    pub payload: Vec<u8>,
    pub event: Event,
}

impl WormholeMessage {
    /// Decode the four event fields: emitter, sequence, data (nonce + payload)
    /// and consistency level.
    pub fn from_event(event: &Event) -> WatcherResult<Self> {
        if event.fields.len() != 4 {
            return Err(WatcherError::MalformedEvent(format!(
                "governance event in tx {} has {} fields, expected 4",
                event.tx_id,
                event.fields.len()
            )));
        }
        let emitter = event.fields[0].to_byte32()?;
        let sequence = event.fields[1].to_u64()?;
        let data = event.fields[2].to_byte_vec()?;
        let consistency_level = event.fields[3].to_u8()?;

        if data.len() < 4 {
            return Err(WatcherError::MalformedEvent(format!(
                "message data of {} bytes has no nonce",
                data.len()
            )));
        }
        let nonce = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);

        Ok(Self {
            emitter,
            nonce,
            sequence,
            consistency_level,
            payload: data[4..].to_vec(),
            event: event.clone(),
        })
    }

    pub fn is_transfer_message(&self) -> bool {
        self.payload.first() == Some(&TRANSFER_PAYLOAD_ID)
    }

    pub fn to_message_publication(
        &self,
        header: &BlockHeader,
        emitter_chain: u16,
    ) -> WatcherResult<MessagePublication> {
        let tx_bytes = hex::decode(&self.event.tx_id)
            .map_err(|e| WatcherError::MalformedEvent(format!("tx id {}: {}", self.event.tx_id, e)))?;
        let tx_hash = Byte32::from_slice(&tx_bytes).ok_or_else(|| {
            WatcherError::MalformedEvent(format!("tx id {} is not 32 bytes", self.event.tx_id))
        })?;

        let timestamp = UNIX_EPOCH
            + Duration::from_secs(header.timestamp / 1000)
            + Duration::from_millis(header.timestamp % 1000);

        let payload = if self.is_transfer_message() {
            if self.payload.len() < TRANSFER_TRAILER_LENGTH {
                return Err(WatcherError::MalformedPayload(format!(
                    "transfer payload of {} bytes is shorter than its trailer",
                    self.payload.len()
                )));
            }
            self.payload[..self.payload.len() - TRANSFER_TRAILER_LENGTH].to_vec()
        } else {
            self.payload.clone()
        };

        Ok(MessagePublication {
            tx_hash,
            timestamp,
            nonce: self.nonce,
            sequence: self.sequence,
            consistency_level: self.consistency_level,
            emitter_chain,
            emitter_address: self.emitter,
            payload,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMessage {
    pub amount: U256,
    pub token_id: Byte32,
    pub token_chain_id: u16,
    pub to_address: Byte32,
    pub to_chain_id: u16,
    pub fee: U256,
    pub is_local_token: bool,
    pub sender_id: Byte32,
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> WatcherResult<&'a [u8]> {
        let end = self.offset + n;
        if end > self.bytes.len() {
            return Err(WatcherError::MalformedPayload(format!(
                "need {} bytes at offset {}, have {}",
                n,
                self.offset,
                self.bytes.len()
            )));
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> WatcherResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> WatcherResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u256(&mut self) -> WatcherResult<U256> {
        Ok(U256::from_big_endian(self.take(32)?))
    }

    fn byte32(&mut self) -> WatcherResult<Byte32> {
        let b = self.take(32)?;
        Byte32::from_slice(b)
            .ok_or_else(|| WatcherError::MalformedPayload("short 32-byte field".to_string()))
    }
}

impl TransferMessage {
    pub fn decode(payload: &[u8]) -> WatcherResult<Self> {
        let mut reader = Reader {
            bytes: payload,
            offset: 0,
        };
        let id = reader.u8()?;
        if id != TRANSFER_PAYLOAD_ID {
            return Err(WatcherError::MalformedPayload(format!(
                "unexpected payload id {}",
                id
            )));
        }
        let message = Self {
            amount: reader.u256()?,
            token_id: reader.byte32()?,
            token_chain_id: reader.u16()?,
            to_address: reader.byte32()?,
            to_chain_id: reader.u16()?,
            fee: reader.u256()?,
            is_local_token: reader.u8()? == 1,
            sender_id: reader.byte32()?,
        };
        if reader.offset != payload.len() {
            return Err(WatcherError::MalformedPayload(format!(
                "{} trailing bytes after transfer payload",
                payload.len() - reader.offset
            )));
        }
        Ok(message)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(TRANSFER_PAYLOAD_LENGTH);
        let mut word = [0u8; 32];

        bytes.push(TRANSFER_PAYLOAD_ID);
        self.amount.to_big_endian(&mut word);
        bytes.extend_from_slice(&word);
        bytes.extend_from_slice(self.token_id.as_bytes());
        bytes.extend_from_slice(&self.token_chain_id.to_be_bytes());
        bytes.extend_from_slice(self.to_address.as_bytes());
        bytes.extend_from_slice(&self.to_chain_id.to_be_bytes());
        self.fee.to_big_endian(&mut word);
        bytes.extend_from_slice(&word);
        bytes.push(self.is_local_token as u8);
        bytes.extend_from_slice(self.sender_id.as_bytes());

        bytes
    }
}
