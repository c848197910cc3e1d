/// Ethereum calldata anchor.
///
/// The batch root travels as calldata in a self-send transaction:
/// calldata is stored permanently on-chain and is far cheaper than
/// contract storage slots. Verification reads the transaction back and
/// compares its input bytes against the locally recomputed root.
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{AnchorBackend, Confirmation};
use crate::error::{AuditError, Result};

/// Configuration for Ethereum anchoring.
#[derive(Debug, Clone)]
pub struct EthereumConfig {
    /// JSON-RPC endpoint (e.g., Infura, Alchemy, local node).
    pub rpc_url: String,
    /// Network label recorded on anchor records ("mainnet", "sepolia", ...).
    pub network: String,
    /// Private key (hex, without 0x prefix) for signing transactions.
    /// In production this would come from a KMS.
    pub private_key_hex: String,
    /// Chain ID (1 for mainnet, 11155111 for Sepolia).
    pub chain_id: u64,
}

/// Ethereum anchor over raw JSON-RPC for maximum node compatibility.
pub struct EthereumAnchor {
    config: EthereumConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxReceipt {
    block_number: Option<String>,
    gas_used: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TxByHash {
    input: String,
}

fn parse_hex_u64(raw: &str) -> Result<u64> {
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| AuditError::Serialization(format!("invalid hex quantity {raw}: {e}")))
}

impl EthereumAnchor {
    pub fn new(config: EthereumConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Send a JSON-RPC request to the node.
    async fn rpc_call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp: JsonRpcResponse<T> = self
            .client
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuditError::AnchorUnavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuditError::Serialization(format!("RPC response parse error: {e}")))?;

        if let Some(err) = resp.error {
            return Err(AuditError::AnchorRejected(err.message));
        }

        resp.result
            .ok_or_else(|| AuditError::AnchorRejected("empty RPC response".into()))
    }

    /// Like `rpc_call` but a `null` result is legitimate (unknown tx).
    async fn rpc_call_optional<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp: JsonRpcResponse<T> = self
            .client
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuditError::AnchorUnavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuditError::Serialization(format!("RPC response parse error: {e}")))?;

        if let Some(err) = resp.error {
            return Err(AuditError::AnchorRejected(err.message));
        }

        Ok(resp.result)
    }

    /// Build, sign, and send a transaction with the root as calldata.
    async fn send_anchor_tx(&self, root: &[u8; 32]) -> Result<String> {
        use alloy::consensus::SignableTransaction;
        use alloy::primitives::{Bytes, U256};
        use alloy::signers::local::PrivateKeySigner;
        use alloy::signers::Signer;

        let signer: PrivateKeySigner = self
            .config
            .private_key_hex
            .parse()
            .map_err(|e| AuditError::AnchorRejected(format!("invalid private key: {e}")))?;

        let from_address = signer.address();

        let nonce_hex: String = self
            .rpc_call(
                "eth_getTransactionCount",
                serde_json::json!([format!("{from_address:?}"), "pending"]),
            )
            .await?;
        let nonce = parse_hex_u64(&nonce_hex)?;

        let gas_price_hex: String = self.rpc_call("eth_gasPrice", serde_json::json!([])).await?;
        let gas_price = parse_hex_u64(&gas_price_hex)? as u128;

        // Self-send with the 32-byte root as calldata.
        let tx = alloy::consensus::TxLegacy {
            chain_id: Some(self.config.chain_id),
            nonce,
            gas_price,
            gas_limit: 25_000,
            to: alloy::primitives::TxKind::Call(from_address),
            value: U256::ZERO,
            input: Bytes::copy_from_slice(root),
        };

        let sig_hash = tx.signature_hash();
        let sig = signer
            .sign_hash(&sig_hash)
            .await
            .map_err(|e| AuditError::AnchorRejected(format!("signing failed: {e}")))?;

        let signed = alloy::consensus::TxEnvelope::Legacy(tx.into_signed(sig));

        let mut raw_tx = Vec::new();
        alloy::eips::eip2718::Encodable2718::encode_2718(&signed, &mut raw_tx);
        let raw_hex = format!("0x{}", hex::encode(&raw_tx));

        let tx_hash: String = self
            .rpc_call("eth_sendRawTransaction", serde_json::json!([raw_hex]))
            .await?;

        Ok(tx_hash)
    }
}

#[async_trait]
impl AnchorBackend for EthereumAnchor {
    fn network(&self) -> &str {
        &self.config.network
    }

    async fn submit_root(&self, root: &[u8; 32]) -> Result<String> {
        self.send_anchor_tx(root).await
    }

    async fn confirmation(&self, reference: &str) -> Result<Option<Confirmation>> {
        let receipt: Option<TxReceipt> = self
            .rpc_call_optional("eth_getTransactionReceipt", serde_json::json!([reference]))
            .await?;

        let Some(receipt) = receipt else {
            return Ok(None);
        };
        let Some(block_hex) = receipt.block_number else {
            return Ok(None);
        };

        if let Some(status) = &receipt.status {
            if parse_hex_u64(status)? == 0 {
                return Err(AuditError::AnchorRejected(format!(
                    "transaction {reference} reverted"
                )));
            }
        }

        Ok(Some(Confirmation {
            block_number: Some(parse_hex_u64(&block_hex)? as i64),
            gas_used: receipt
                .gas_used
                .as_deref()
                .map(parse_hex_u64)
                .transpose()?
                .map(|g| g as i64),
        }))
    }

    async fn fetch_root(&self, reference: &str) -> Result<[u8; 32]> {
        let tx: Option<TxByHash> = self
            .rpc_call_optional("eth_getTransactionByHash", serde_json::json!([reference]))
            .await?;

        let tx = tx.ok_or_else(|| {
            AuditError::NotFound(format!("transaction {reference} not found on-chain"))
        })?;

        let raw = hex::decode(tx.input.trim_start_matches("0x"))
            .map_err(|e| AuditError::Serialization(format!("invalid calldata hex: {e}")))?;

        raw.as_slice().try_into().map_err(|_| {
            AuditError::Serialization(format!(
                "anchored calldata is {} bytes, expected 32",
                raw.len()
            ))
        })
    }
}
