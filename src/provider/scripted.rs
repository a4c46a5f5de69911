// Scripted provider for tests: replays a queue of pages/errors and records
// every cursor it was asked for.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::{
    ProviderError, RemovedTransaction, SyncPage, TransactionProvider, UpstreamTransaction,
};
use crate::entities::LinkedAccount;

/// Bank account the scripted transactions belong to
pub const CHECKING: &str = "acc-checking";

/// Holds the first `fetch_next_page` call until released; later calls pass
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<SyncPage, ProviderError>>>,
    seen_cursors: Mutex<Vec<Option<String>>>,
    gate: Mutex<Option<Gate>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<SyncPage, ProviderError>>) -> Self {
        ScriptedProvider {
            script: Mutex::new(script.into()),
            seen_cursors: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    pub fn with_gate(self, gate: Gate) -> Self {
        *self.gate.lock().unwrap() = Some(gate);
        self
    }

    pub fn seen_cursors(&self) -> Vec<Option<String>> {
        self.seen_cursors.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen_cursors.lock().unwrap().len()
    }
}

#[async_trait]
impl TransactionProvider for ScriptedProvider {
    async fn fetch_next_page(
        &self,
        _account: &LinkedAccount,
        cursor: Option<&str>,
    ) -> Result<SyncPage, ProviderError> {
        self.seen_cursors
            .lock()
            .unwrap()
            .push(cursor.map(|c| c.to_string()));

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(response) => response,
            // Exhausted script: nothing new upstream
            None => Ok(SyncPage {
                next_cursor: cursor.unwrap_or_default().to_string(),
                ..SyncPage::default()
            }),
        }
    }
}

pub fn upstream_tx(id: &str, amount: f64, category: &[&str]) -> UpstreamTransaction {
    UpstreamTransaction {
        transaction_id: id.to_string(),
        provider_account_id: CHECKING.to_string(),
        amount,
        currency: "USD".to_string(),
        date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
        name: format!("Merchant {}", id),
        category: category.iter().map(|c| c.to_string()).collect(),
        pending: false,
    }
}

pub fn page(
    added: Vec<UpstreamTransaction>,
    modified: Vec<UpstreamTransaction>,
    removed: &[&str],
    has_more: bool,
    next_cursor: &str,
) -> SyncPage {
    SyncPage {
        added,
        modified,
        removed: removed
            .iter()
            .map(|id| RemovedTransaction {
                transaction_id: id.to_string(),
                provider_account_id: Some(CHECKING.to_string()),
            })
            .collect(),
        has_more,
        next_cursor: next_cursor.to_string(),
    }
}
