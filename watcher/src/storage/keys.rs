// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Key layout of the registry database. Every key starts with a namespace
//! prefix so namespaces never collide.

use crate::types::{Byte32, ContractRole};

pub const LOCAL_TOKEN_WRAPPER_PREFIX: &[u8] = b"local-token-wrapper";
pub const REMOTE_TOKEN_WRAPPER_PREFIX: &[u8] = b"remote-token-wrapper";
pub const TOKEN_BRIDGE_FOR_CHAIN_PREFIX: &[u8] = b"token-bridge-for-chain";
pub const CHECKPOINT_PREFIX: &[u8] = b"checkpoint/";

pub fn remote_chain_key(chain_id: u16) -> Vec<u8> {
    let mut key = TOKEN_BRIDGE_FOR_CHAIN_PREFIX.to_vec();
    key.extend_from_slice(&chain_id.to_be_bytes());
    key
}

/// `Some(chain)` addresses the wrapper of a local token for that destination
/// chain, `None` the wrapper of a remote token.
pub fn token_wrapper_key(token_id: &Byte32, remote_chain_id: Option<u16>) -> Vec<u8> {
    match remote_chain_id {
        Some(chain_id) => {
            let mut key = LOCAL_TOKEN_WRAPPER_PREFIX.to_vec();
            key.extend_from_slice(token_id.as_bytes());
            key.extend_from_slice(&chain_id.to_be_bytes());
            key
        }
        None => {
            let mut key = REMOTE_TOKEN_WRAPPER_PREFIX.to_vec();
            key.extend_from_slice(token_id.as_bytes());
            key
        }
    }
}

pub fn checkpoint_key(role: ContractRole) -> Vec<u8> {
    let mut key = CHECKPOINT_PREFIX.to_vec();
    key.extend_from_slice(role.as_str().as_bytes());
    key
}
