//! Node transport: the wire shapes of the three endpoints the core consumes
//! and an HTTP client implementing them.
//!
//! Field names are fixed by wire compatibility with existing nodes; several
//! fields accept two spellings (`items`/`newBlocks`, `coinbaseTX`/
//! `coinbaseTransaction`, ...) because deployed servers disagree.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::Hash;
use crate::wallet_state::{BlockData, InputData, OutputData, TxData};
use crate::WalletError;

/// Node connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub address: String,
    pub timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(address: impl Into<String>) -> Self {
        ConnectionConfig {
            address: address.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// `GET /info` response. Servers report the NEXT expected height, so the
/// current top block is one below.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InfoResponse {
    #[serde(default)]
    pub height: u64,
    #[serde(default, alias = "networkHeight")]
    pub network_height: Option<u64>,
    #[serde(default)]
    pub synced: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
}

impl InfoResponse {
    /// Height of the network's current top block.
    pub fn top_height(&self) -> u64 {
        self.network_height.unwrap_or(self.height).saturating_sub(1)
    }
}

/// `POST /getwalletsyncdata` request body.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDataRequest {
    /// Newest-first (height, hash) pairs for fork resolution.
    pub block_hash_checkpoints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopBlock {
    pub hash: String,
    pub height: u64,
}

/// `POST /getwalletsyncdata` response body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncDataResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub items: Option<Vec<WireBlock>>,
    #[serde(default, rename = "newBlocks")]
    pub new_blocks: Option<Vec<WireBlock>>,
    #[serde(default)]
    pub synced: Option<bool>,
    #[serde(default, rename = "topBlock")]
    pub top_block: Option<TopBlock>,
}

impl SyncDataResponse {
    /// The block array under either of its accepted names.
    pub fn into_blocks(self) -> Vec<WireBlock> {
        self.items.or(self.new_blocks).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireBlock {
    #[serde(rename = "blockHeight")]
    pub height: u64,
    #[serde(rename = "blockHash")]
    pub hash: String,
    #[serde(rename = "blockTimestamp", default)]
    pub timestamp: u64,
    #[serde(default, rename = "coinbaseTX", alias = "coinbaseTransaction")]
    pub coinbase: Option<WireTransaction>,
    #[serde(default)]
    pub transactions: Vec<WireTransaction>,
    #[serde(default, rename = "stakingTX")]
    pub staking_transactions: Vec<WireTransaction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireTransaction {
    pub hash: String,
    #[serde(default, alias = "keyOutputs")]
    pub outputs: Vec<WireOutput>,
    #[serde(default, alias = "keyInputs")]
    pub inputs: Vec<WireInput>,
    #[serde(default, rename = "txPublicKey", alias = "transactionPublicKey")]
    pub tx_public_key: Option<String>,
    #[serde(default, rename = "unlockTime")]
    pub unlock_time: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireOutput {
    pub key: String,
    pub amount: u64,
    #[serde(default, rename = "globalOutputIndex")]
    pub global_output_index: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireInput {
    #[serde(default)]
    pub amount: u64,
    #[serde(default, rename = "keyOffsets")]
    pub key_offsets: Vec<u64>,
    /// Some servers nest the offsets one level down.
    #[serde(default)]
    pub value: Option<WireInputValue>,
    #[serde(default, rename = "transactionHash")]
    pub transaction_hash: Option<String>,
    #[serde(default, rename = "outputIndex")]
    pub output_index: Option<u32>,
    #[serde(default, rename = "keyImage")]
    pub key_image: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireInputValue {
    #[serde(default, rename = "keyOffsets")]
    pub key_offsets: Vec<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendRawTransactionRequest {
    pub tx_as_hex: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendRawTransactionResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "transactionHash")]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

fn decode_hash(field: &str, hex_str: &str) -> Result<Hash, WalletError> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| WalletError::Transport(format!("bad {} hex from server: {}", field, e)))?;
    bytes
        .try_into()
        .map_err(|_| WalletError::Transport(format!("{} is not 32 bytes", field)))
}

impl WireBlock {
    /// Decodes server hex into the tracker's block form.
    pub fn into_block_data(self) -> Result<BlockData, WalletError> {
        Ok(BlockData {
            height: self.height,
            hash: decode_hash("block hash", &self.hash)?,
            timestamp: self.timestamp,
            coinbase: self
                .coinbase
                .map(WireTransaction::into_tx_data)
                .transpose()?,
            transactions: self
                .transactions
                .into_iter()
                .map(WireTransaction::into_tx_data)
                .collect::<Result<_, _>>()?,
            staking_transactions: self
                .staking_transactions
                .into_iter()
                .map(WireTransaction::into_tx_data)
                .collect::<Result<_, _>>()?,
        })
    }
}

impl WireTransaction {
    pub fn into_tx_data(self) -> Result<TxData, WalletError> {
        let tx_pubkey = self
            .tx_public_key
            .as_deref()
            .map(|s| decode_hash("tx public key", s))
            .transpose()?;
        Ok(TxData {
            hash: decode_hash("tx hash", &self.hash)?,
            unlock_time: self.unlock_time,
            tx_pubkey,
            outputs: self
                .outputs
                .into_iter()
                .map(|o| {
                    Ok(OutputData {
                        key: decode_hash("output key", &o.key)?,
                        amount: o.amount,
                        global_index: o.global_output_index,
                    })
                })
                .collect::<Result<_, WalletError>>()?,
            inputs: self
                .inputs
                .into_iter()
                .map(WireInput::into_input_data)
                .collect::<Result<_, _>>()?,
        })
    }
}

impl WireInput {
    pub fn into_input_data(self) -> Result<InputData, WalletError> {
        let key_offsets = if self.key_offsets.is_empty() {
            self.value.map(|v| v.key_offsets).unwrap_or_default()
        } else {
            self.key_offsets
        };
        Ok(InputData {
            amount: self.amount,
            key_offsets,
            parent_tx_hash: self
                .transaction_hash
                .as_deref()
                .map(|s| decode_hash("input tx hash", s))
                .transpose()?,
            parent_out_index: self.output_index,
            key_image: self
                .key_image
                .as_deref()
                .map(|s| decode_hash("key image", s))
                .transpose()?,
        })
    }
}

/// The narrow transport facade the sync driver and wallet drive.
///
/// Implementations must translate HTTP failures and non-OK statuses into
/// [`WalletError::Transport`]; transaction rejection is left to the caller,
/// which inspects the submit response's status.
#[allow(async_fn_in_trait)]
pub trait NodeRpc {
    async fn get_info(&self) -> Result<InfoResponse, WalletError>;

    async fn get_wallet_sync_data(
        &self,
        request: &SyncDataRequest,
    ) -> Result<SyncDataResponse, WalletError>;

    async fn send_raw_transaction(
        &self,
        request: &SendRawTransactionRequest,
    ) -> Result<SendRawTransactionResponse, WalletError>;
}

/// JSON-over-HTTP implementation of [`NodeRpc`].
#[derive(Clone)]
pub struct HttpRpc {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRpc {
    pub fn new(config: ConnectionConfig) -> Result<Self, WalletError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| WalletError::Transport(format!("building HTTP client: {}", e)))?;
        let base_url = config.address.trim_end_matches('/').to_string();
        Ok(HttpRpc { client, base_url })
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.base_url, route)
    }

    async fn post_json<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        route: &str,
        body: &B,
    ) -> Result<T, WalletError> {
        let response = self
            .client
            .post(self.url(route))
            .json(body)
            .send()
            .await
            .map_err(|e| WalletError::Transport(format!("{}: {}", route, e)))?;
        if !response.status().is_success() {
            return Err(WalletError::Transport(format!(
                "{}: HTTP {}",
                route,
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| WalletError::Transport(format!("{}: bad response body: {}", route, e)))
    }
}

impl NodeRpc for HttpRpc {
    async fn get_info(&self) -> Result<InfoResponse, WalletError> {
        let response = self
            .client
            .get(self.url("info"))
            .send()
            .await
            .map_err(|e| WalletError::Transport(format!("info: {}", e)))?;
        if !response.status().is_success() {
            return Err(WalletError::Transport(format!(
                "info: HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| WalletError::Transport(format!("info: bad response body: {}", e)))
    }

    async fn get_wallet_sync_data(
        &self,
        request: &SyncDataRequest,
    ) -> Result<SyncDataResponse, WalletError> {
        let response: SyncDataResponse = self.post_json("getwalletsyncdata", request).await?;
        if let Some(status) = &response.status {
            if status != "OK" {
                return Err(WalletError::Transport(format!(
                    "getwalletsyncdata: server status {}",
                    status
                )));
            }
        }
        Ok(response)
    }

    async fn send_raw_transaction(
        &self,
        request: &SendRawTransactionRequest,
    ) -> Result<SendRawTransactionResponse, WalletError> {
        self.post_json("sendrawtransaction", request).await
    }
}
