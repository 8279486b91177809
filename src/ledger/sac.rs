//! Stellar Asset Contract resolution.
//!
//! Contract `transfer` invocations only name a contract id. For Stellar Asset Contracts the
//! classic asset is recorded in the instance storage under `METADATA.name` as a SEP-11 string
//! (`native` or `CODE:ISSUER`). Resolved ids are cached since the mapping never changes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use stellar_xdr::curr::{ScMap, ScVal};
use tokio::sync::RwLock;
use tracing::debug;

use super::rpc::StellarRpcClient;
use super::types::{Asset, InvokeHostFunctionOperation, LedgerError};

/// Source of contract instance storage.
#[async_trait]
pub trait ContractStorageSource: Send + Sync {
    async fn instance_storage(&self, contract_id: &str) -> Result<Option<ScMap>, LedgerError>;
}

#[async_trait]
impl ContractStorageSource for StellarRpcClient {
    async fn instance_storage(&self, contract_id: &str) -> Result<Option<ScMap>, LedgerError> {
        self.get_contract_instance_storage(contract_id).await
    }
}

fn symbol_is(value: &ScVal, name: &str) -> bool {
    match value {
        ScVal::Symbol(symbol) => {
            let bytes: &[u8] = symbol.0.as_ref();
            bytes == name.as_bytes()
        }
        _ => false,
    }
}

/// Read `METADATA.name` out of a contract's instance storage.
pub fn metadata_asset_name(storage: &ScMap) -> Option<String> {
    let metadata = storage
        .0
        .iter()
        .find(|entry| symbol_is(&entry.key, "METADATA"))?;
    let ScVal::Map(Some(fields)) = &metadata.val else {
        return None;
    };
    let name = fields.0.iter().find(|entry| symbol_is(&entry.key, "name"))?;
    match &name.val {
        ScVal::String(name) => {
            let bytes: &[u8] = name.0.as_ref();
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
        _ => None,
    }
}

/// Maps contract ids to classic assets, with a cache.
pub struct SacAssetResolver {
    source: Arc<dyn ContractStorageSource>,
    cache: RwLock<HashMap<String, Option<Asset>>>,
}

impl SacAssetResolver {
    pub fn new(source: Arc<dyn ContractStorageSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Classic asset behind `contract_id`, or `None` if the contract is not an asset contract.
    pub async fn asset_for_contract(&self, contract_id: &str) -> Result<Option<Asset>, LedgerError> {
        if let Some(cached) = self.cache.read().await.get(contract_id) {
            return Ok(cached.clone());
        }

        let asset = match self.source.instance_storage(contract_id).await? {
            Some(storage) => metadata_asset_name(&storage)
                .map(|name| Asset::from_canonical(&name))
                .filter(Asset::is_supported),
            None => None,
        };
        debug!("Contract {} resolved to {:?}", contract_id, asset);

        self.cache
            .write()
            .await
            .insert(contract_id.to_string(), asset.clone());
        Ok(asset)
    }

    /// Resolve the asset of a contract transfer in place.
    ///
    /// Returns `false` when the contract is not a Stellar Asset Contract.
    pub async fn resolve(&self, operation: &mut InvokeHostFunctionOperation) -> Result<bool, LedgerError> {
        if operation.is_resolved() {
            return Ok(true);
        }
        match self.asset_for_contract(&operation.contract_id).await? {
            Some(asset) => {
                operation.resolve_asset(asset);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
