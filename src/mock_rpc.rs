//! Mock node transport for deterministic testing.
//!
//! Replays queued typed responses per route and records every request so
//! tests can assert on checkpoints, batch sizes and submitted transactions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::rpc::{
    InfoResponse, NodeRpc, SendRawTransactionRequest, SendRawTransactionResponse,
    SyncDataRequest, SyncDataResponse,
};
use crate::WalletError;

#[derive(Default)]
struct MockQueues {
    infos: VecDeque<Result<InfoResponse, String>>,
    sync_batches: VecDeque<Result<SyncDataResponse, String>>,
    send_results: VecDeque<SendRawTransactionResponse>,
    sync_requests: Vec<SyncDataRequest>,
    sent_transactions: Vec<String>,
}

/// Mock [`NodeRpc`] that replays queued responses in order.
///
/// An exhausted queue yields a transport error, so a test that issues more
/// calls than it scripted fails loudly instead of hanging.
#[derive(Clone, Default)]
pub struct MockRpc {
    queues: Arc<Mutex<MockQueues>>,
}

impl MockRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_info(&self, info: InfoResponse) {
        self.queues.lock().unwrap().infos.push_back(Ok(info));
    }

    pub fn push_info_error(&self, message: impl Into<String>) {
        self.queues
            .lock()
            .unwrap()
            .infos
            .push_back(Err(message.into()));
    }

    pub fn push_sync_batch(&self, response: SyncDataResponse) {
        self.queues
            .lock()
            .unwrap()
            .sync_batches
            .push_back(Ok(response));
    }

    pub fn push_sync_error(&self, message: impl Into<String>) {
        self.queues
            .lock()
            .unwrap()
            .sync_batches
            .push_back(Err(message.into()));
    }

    pub fn push_send_result(&self, response: SendRawTransactionResponse) {
        self.queues.lock().unwrap().send_results.push_back(response);
    }

    /// Every `/getwalletsyncdata` request observed, in order.
    pub fn sync_requests(&self) -> Vec<SyncDataRequest> {
        self.queues.lock().unwrap().sync_requests.clone()
    }

    /// Every raw transaction hex submitted, in order.
    pub fn sent_transactions(&self) -> Vec<String> {
        self.queues.lock().unwrap().sent_transactions.clone()
    }

    pub fn pending_sync_batches(&self) -> usize {
        self.queues.lock().unwrap().sync_batches.len()
    }
}

impl NodeRpc for MockRpc {
    async fn get_info(&self) -> Result<InfoResponse, WalletError> {
        let next = self.queues.lock().unwrap().infos.pop_front();
        match next {
            Some(Ok(info)) => Ok(info),
            Some(Err(message)) => Err(WalletError::Transport(message)),
            None => Err(WalletError::Transport("mock info queue exhausted".to_string())),
        }
    }

    async fn get_wallet_sync_data(
        &self,
        request: &SyncDataRequest,
    ) -> Result<SyncDataResponse, WalletError> {
        let next = {
            let mut queues = self.queues.lock().unwrap();
            queues.sync_requests.push(request.clone());
            queues.sync_batches.pop_front()
        };
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(WalletError::Transport(message)),
            None => Err(WalletError::Transport(
                "mock sync queue exhausted".to_string(),
            )),
        }
    }

    async fn send_raw_transaction(
        &self,
        request: &SendRawTransactionRequest,
    ) -> Result<SendRawTransactionResponse, WalletError> {
        let next = {
            let mut queues = self.queues.lock().unwrap();
            queues.sent_transactions.push(request.tx_as_hex.clone());
            queues.send_results.pop_front()
        };
        match next {
            Some(response) => Ok(response),
            None => Ok(SendRawTransactionResponse {
                status: Some("OK".to_string()),
                transaction_hash: None,
                error: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order() {
        let mock = MockRpc::new();
        mock.push_info(InfoResponse {
            height: 101,
            ..Default::default()
        });
        mock.push_info(InfoResponse {
            height: 102,
            ..Default::default()
        });

        assert_eq!(mock.get_info().await.unwrap().height, 101);
        assert_eq!(mock.get_info().await.unwrap().height, 102);
        assert!(mock.get_info().await.is_err());
    }

    #[tokio::test]
    async fn test_records_requests() {
        let mock = MockRpc::new();
        mock.push_sync_batch(SyncDataResponse::default());

        let request = SyncDataRequest {
            start_height: Some(42),
            ..Default::default()
        };
        mock.get_wallet_sync_data(&request).await.unwrap();

        let seen = mock.sync_requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].start_height, Some(42));
    }

    #[tokio::test]
    async fn test_send_defaults_to_ok() {
        let mock = MockRpc::new();
        let response = mock
            .send_raw_transaction(&SendRawTransactionRequest {
                tx_as_hex: "abcd".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(response.status.as_deref(), Some("OK"));
        assert_eq!(mock.sent_transactions(), vec!["abcd".to_string()]);
    }
}
