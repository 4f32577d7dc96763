// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain data model shared by the poller, tracker, validator and registry.

use crate::error::{WatcherError, WatcherResult};
use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::SystemTime;

/// Prefix byte of a base58 contract address (`0x03 || contract id`).
pub const CONTRACT_ADDRESS_PREFIX: u8 = 0x03;

/// Fixed 32-byte identifier: contract id, token id or emitter.
///
/// Compared by exact byte equality.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Byte32(pub [u8; 32]);

impl Byte32 {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    pub fn from_hex(s: &str) -> WatcherResult<Self> {
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| WatcherError::InvalidResponse(format!("invalid hex {}: {}", s, e)))?;
        Self::from_slice(&bytes).ok_or_else(|| {
            WatcherError::InvalidResponse(format!("expected 32 bytes, got {}", bytes.len()))
        })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Byte32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Byte32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Byte32({})", self.to_hex())
    }
}

impl Serialize for Byte32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Byte32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Byte32::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Decode a base58 contract address into its 32-byte contract id.
pub fn contract_id_from_address(address: &str) -> WatcherResult<Byte32> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| WatcherError::InvalidAddress(format!("{}: {}", address, e)))?;
    if bytes.len() != 33 || bytes[0] != CONTRACT_ADDRESS_PREFIX {
        return Err(WatcherError::InvalidAddress(format!(
            "{}: not a contract address",
            address
        )));
    }
    Byte32::from_slice(&bytes[1..])
        .ok_or_else(|| WatcherError::InvalidAddress(address.to_string()))
}

/// Inverse of [`contract_id_from_address`].
pub fn address_from_contract_id(id: &Byte32) -> String {
    let mut bytes = Vec::with_capacity(33);
    bytes.push(CONTRACT_ADDRESS_PREFIX);
    bytes.extend_from_slice(id.as_bytes());
    bs58::encode(bytes).into_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    ByteVec,
    U256,
    I256,
    Bool,
    Address,
}

/// A typed value as returned by the node: `{"type": "U256", "value": "42"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    #[serde(rename = "type")]
    pub type_: FieldType,
    pub value: String,
}

impl Field {
    pub fn new(type_: FieldType, value: impl Into<String>) -> Self {
        Self {
            type_,
            value: value.into(),
        }
    }

    fn expect_type(&self, expected: FieldType) -> WatcherResult<()> {
        if self.type_ != expected {
            return Err(WatcherError::MalformedEvent(format!(
                "expected {:?} field, got {:?}",
                expected, self.type_
            )));
        }
        Ok(())
    }

    pub fn to_byte_vec(&self) -> WatcherResult<Vec<u8>> {
        self.expect_type(FieldType::ByteVec)?;
        hex::decode(&self.value)
            .map_err(|e| WatcherError::MalformedEvent(format!("invalid ByteVec: {}", e)))
    }

    pub fn to_byte32(&self) -> WatcherResult<Byte32> {
        let bytes = self.to_byte_vec()?;
        Byte32::from_slice(&bytes).ok_or_else(|| {
            WatcherError::MalformedEvent(format!("expected 32 bytes, got {}", bytes.len()))
        })
    }

    pub fn to_u256(&self) -> WatcherResult<U256> {
        self.expect_type(FieldType::U256)?;
        U256::from_dec_str(&self.value)
            .map_err(|e| WatcherError::MalformedEvent(format!("invalid U256 {}: {:?}", self.value, e)))
    }

    pub fn to_u64(&self) -> WatcherResult<u64> {
        let value = self.to_u256()?;
        if value > U256::from(u64::MAX) {
            return Err(WatcherError::MalformedEvent(format!(
                "{} does not fit in u64",
                value
            )));
        }
        Ok(value.as_u64())
    }

    pub fn to_u16(&self) -> WatcherResult<u16> {
        let value = self.to_u64()?;
        u16::try_from(value)
            .map_err(|_| WatcherError::MalformedEvent(format!("{} does not fit in u16", value)))
    }

    pub fn to_u8(&self) -> WatcherResult<u8> {
        let value = self.to_u64()?;
        u8::try_from(value)
            .map_err(|_| WatcherError::MalformedEvent(format!("{} does not fit in u8", value)))
    }

    pub fn to_bool(&self) -> WatcherResult<bool> {
        self.expect_type(FieldType::Bool)?;
        match self.value.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(WatcherError::MalformedEvent(format!("invalid Bool {}", other))),
        }
    }

    pub fn to_address(&self) -> WatcherResult<String> {
        self.expect_type(FieldType::Address)?;
        Ok(self.value.clone())
    }
}

/// Raw contract event as returned by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub block_hash: String,
    pub contract_address: String,
    pub tx_id: String,
    /// Event kind declared by the contract (not the stream position)
    #[serde(rename = "eventIndex")]
    pub index: u32,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub hash: String,
    /// Milliseconds since the unix epoch
    pub timestamp: u64,
    pub chain_from: u32,
    pub chain_to: u32,
    pub height: u64,
}

/// An event paired with its block and the depth it must reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconfirmedEvent {
    pub event: Event,
    pub header: BlockHeader,
    /// 1-based position in the contract's event stream
    pub event_index: u64,
    pub confirmations: u64,
}

impl UnconfirmedEvent {
    pub fn block_height(&self) -> u64 {
        self.header.height
    }
}

/// Logical contract a poller instance watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContractRole {
    /// Emits wormhole messages
    Governance,
    /// Announces new bridge-for-chain and token wrapper contracts
    TokenBridge,
}

impl ContractRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractRole::Governance => "governance",
            ContractRole::TokenBridge => "token-bridge",
        }
    }
}

impl fmt::Display for ContractRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOrigin {
    Poll,
    Reobservation,
}

/// A finalized batch of events, all emitted by one contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedEvents {
    pub contract_address: String,
    pub events: Vec<UnconfirmedEvent>,
    pub origin: BatchOrigin,
    // Last stream position covered, including events dropped before batching.
    covered_through: Option<u64>,
}

impl ConfirmedEvents {
    /// Build a batch ordered by event index. Events from any other contract
    /// are rejected.
    pub fn new(
        contract_address: impl Into<String>,
        mut events: Vec<UnconfirmedEvent>,
        origin: BatchOrigin,
    ) -> WatcherResult<Self> {
        let contract_address = contract_address.into();
        if let Some(stray) = events
            .iter()
            .find(|e| e.event.contract_address != contract_address)
        {
            return Err(WatcherError::MalformedEvent(format!(
                "event from {} in batch for {}",
                stray.event.contract_address, contract_address
            )));
        }
        events.sort_by_key(|e| e.event_index);
        Ok(Self {
            contract_address,
            events,
            origin,
            covered_through: None,
        })
    }

    /// Mark every position up to `position` as handled by this batch, so the
    /// checkpoint moves past events that were dropped before batching.
    pub fn covering_through(mut self, position: u64) -> Self {
        self.covered_through = Some(self.covered_through.map_or(position, |p| p.max(position)));
        self
    }

    /// Highest position the batch accounts for, used as the checkpoint.
    pub fn max_event_index(&self) -> Option<u64> {
        self.events
            .iter()
            .map(|e| e.event_index)
            .chain(self.covered_through)
            .max()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Contract state as returned by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractState {
    pub address: String,
    pub fields: Vec<Field>,
}

impl ContractState {
    pub fn field(&self, index: usize) -> WatcherResult<&Field> {
        self.fields.get(index).ok_or_else(|| {
            WatcherError::MalformedEvent(format!(
                "contract {} state has {} fields, wanted index {}",
                self.address,
                self.fields.len(),
                index
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TxStatus {
    #[serde(rename_all = "camelCase")]
    Confirmed {
        block_hash: String,
        chain_confirmations: u64,
    },
    MemPooled,
    TxNotFound,
}

/// Request to re-process a transaction that may have been missed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationRequest {
    pub chain_id: u32,
    pub tx_hash: Vec<u8>,
}

/// Canonical cross-chain message handed to the downstream relayer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePublication {
    pub tx_hash: Byte32,
    pub timestamp: SystemTime,
    pub nonce: u32,
    pub sequence: u64,
    pub consistency_level: u8,
    pub emitter_chain: u16,
    pub emitter_address: Byte32,
    pub payload: Vec<u8>,
}
