/// IPFS content store via HTTP API.
///
/// IPFS gives each published blob a CID derived from its content, which
/// pairs naturally with the audit guarantee: the CID recorded on a batch
/// commits to the exact payload bytes that were published.
///
/// Note: IPFS does not guarantee persistence. Data must stay pinned on
/// the node (or be replicated elsewhere) for durability.
///
/// Uses the IPFS HTTP API (typically Kubo at localhost:5001).
use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;

use super::ContentStore;
use crate::error::{AuditError, Result};

#[derive(Debug, Clone)]
pub struct IpfsConfig {
    /// IPFS API endpoint (e.g., "http://localhost:5001").
    pub api_url: String,
}

pub struct IpfsStore {
    client: Client,
    config: IpfsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IpfsAddResponse {
    hash: String,
}

impl IpfsStore {
    pub fn new(config: IpfsConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ContentStore for IpfsStore {
    fn name(&self) -> &str {
        "IPFS"
    }

    async fn put(&self, data: &[u8]) -> Result<String> {
        let part = multipart::Part::bytes(data.to_vec()).file_name("data");
        let form = multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(format!("{}/api/v0/add", self.config.api_url))
            .query(&[("pin", "true"), ("cid-version", "1")])
            .multipart(form)
            .send()
            .await
            .map_err(|e| AuditError::AnchorUnavailable(format!("IPFS unreachable: {e}")))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuditError::Serialization(format!("IPFS add failed: {body}")));
        }

        let add_resp: IpfsAddResponse = resp
            .json()
            .await
            .map_err(|e| AuditError::Serialization(format!("IPFS response parse error: {e}")))?;

        Ok(add_resp.hash)
    }

    async fn get(&self, cid: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .post(format!("{}/api/v0/cat", self.config.api_url))
            .query(&[("arg", cid)])
            .send()
            .await
            .map_err(|e| AuditError::AnchorUnavailable(format!("IPFS unreachable: {e}")))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuditError::NotFound(format!("IPFS cat failed: {body}")));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| AuditError::Serialization(format!("IPFS read error: {e}")))?;

        Ok(bytes.to_vec())
    }

    async fn exists(&self, cid: &str) -> Result<bool> {
        let resp = self
            .client
            .post(format!("{}/api/v0/pin/ls", self.config.api_url))
            .query(&[("arg", cid)])
            .send()
            .await
            .map_err(|e| AuditError::AnchorUnavailable(format!("IPFS unreachable: {e}")))?;

        Ok(resp.status().is_success())
    }
}
