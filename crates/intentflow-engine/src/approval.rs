//! Approval tokens and the executions waiting on them.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ring::rand::{SecureRandom, SystemRandom};
use uuid::Uuid;

use intentflow_core::{Intent, UserContext, Workflow};

use crate::error::{EngineError, Result};

const TOKEN_BYTES: usize = 32;

/// Everything needed to resume a suspended execution.
#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub execution_id: Uuid,
    pub workflow: Arc<Workflow>,
    pub intent: Intent,
    pub context: UserContext,
    pub requested_at: DateTime<Utc>,
}

/// Outstanding approval tokens.  Each token can be redeemed once.
pub struct ApprovalRegistry {
    pending: DashMap<String, PendingApproval>,
    rng: SystemRandom,
}

impl std::fmt::Debug for ApprovalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalRegistry")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl Default for ApprovalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalRegistry {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            rng: SystemRandom::new(),
        }
    }

    /// A fresh unguessable token: 32 random bytes, URL-safe base64.
    pub fn generate_token(&self) -> Result<String> {
        let mut bytes = [0u8; TOKEN_BYTES];
        self.rng.fill(&mut bytes).map_err(|_| EngineError::TokenGeneration)?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn insert(&self, token: String, pending: PendingApproval) {
        self.pending.insert(token, pending);
    }

    /// Redeem a token.  Of concurrent callers with the same token exactly one
    /// receives the pending approval.
    pub fn take(&self, token: &str) -> Option<PendingApproval> {
        self.pending.remove(token).map(|(_, pending)| pending)
    }

    /// Remove and return every approval requested at or before `cutoff`.
    /// A token redeemed concurrently is returned by exactly one side.
    pub fn take_expired(&self, cutoff: DateTime<Utc>) -> Vec<PendingApproval> {
        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().requested_at <= cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        stale.iter().filter_map(|token| self.take(token)).collect()
    }

    /// Drop the token of an execution that no longer waits.
    pub fn forget_execution(&self, execution_id: Uuid) {
        self.pending.retain(|_, p| p.execution_id != execution_id);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
