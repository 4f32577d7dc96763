// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::WatcherError;
use crate::registry_cache::Registry;
use crate::types::Byte32;
use async_trait::async_trait;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAddressResponse {
    pub address: String,
}

/// Error returned by the query service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<WatcherError> for QueryError {
    fn from(e: WatcherError) -> Self {
        match e {
            WatcherError::NotFound(msg) => QueryError::NotFound(msg),
            other => QueryError::Internal(other.to_string()),
        }
    }
}

#[async_trait]
pub trait RegistryQueryHandlerTrait {
    // Address of the wrapper for a token. `chain` selects the local-token
    // namespace, without it the remote-token namespace is searched.
    async fn handle_token_wrapper(
        &self,
        token_id_hex: String,
        chain: Option<u16>,
    ) -> Result<Json<ContractAddressResponse>, QueryError>;

    async fn handle_remote_chain(
        &self,
        chain_id: u16,
    ) -> Result<Json<ContractAddressResponse>, QueryError>;
}

pub struct RegistryQueryHandler {
    registry: Registry,
}

impl RegistryQueryHandler {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl RegistryQueryHandlerTrait for RegistryQueryHandler {
    async fn handle_token_wrapper(
        &self,
        token_id_hex: String,
        chain: Option<u16>,
    ) -> Result<Json<ContractAddressResponse>, QueryError> {
        let token_id = Byte32::from_hex(token_id_hex.trim_start_matches("0x"))
            .map_err(|_| QueryError::BadRequest(format!("invalid token id {}", token_id_hex)))?;
        let address = self.registry.db().get_token_wrapper(&token_id, chain)?;
        Ok(Json(ContractAddressResponse { address }))
    }

    async fn handle_remote_chain(
        &self,
        chain_id: u16,
    ) -> Result<Json<ContractAddressResponse>, QueryError> {
        let address = self.registry.db().get_remote_chain(chain_id)?;
        Ok(Json(ContractAddressResponse { address }))
    }
}
