//! Recovery of in-doubt distributed transactions
//!
//! Reads the pending 2PC metadata of a metadata manager and drives every
//! record to its terminal outcome. A record still in PREPARE never reached
//! its commit decision and is rolled back.

use crate::coordinator::Coordinator;
use crate::error::{CoordinatorError, Result};
use shardgate_common::{Dtid, Target, TransactionMetadata, TransactionState};
use std::time::Duration;

impl Coordinator {
    /// Resolve every pending distributed transaction owned by `mm_target`
    ///
    /// One bad record never stops the scan; failures are counted and
    /// reported together at the end.
    pub async fn resolve_transactions(&self, mm_target: &Target) -> Result<()> {
        let transactions = self
            .service
            .unresolved_transactions(mm_target, Duration::ZERO)
            .await
            .map_err(|e| CoordinatorError::shard(mm_target, e))?;

        let total = transactions.len();
        let mut failed = 0;
        for metadata in &transactions {
            tracing::info!("Resolving transaction ID: {}", metadata.dtid);
            match self.resolve_transaction(mm_target, metadata).await {
                Ok(()) => self.metrics.record_resolved(),
                Err(e) => {
                    failed += 1;
                    self.metrics.record_unresolved();
                    tracing::error!(
                        "Failed to resolve transaction ID: {} with error: {}",
                        metadata.dtid,
                        e
                    );
                }
            }
        }

        if failed > 0 {
            return Err(CoordinatorError::Unresolved { failed, total });
        }
        Ok(())
    }

    /// Drive one pending distributed transaction to its terminal outcome
    pub async fn resolve_transaction(
        &self,
        mm_target: &Target,
        metadata: &TransactionMetadata,
    ) -> Result<()> {
        let dtid = Dtid::parse(&metadata.dtid)?;

        match metadata.state {
            TransactionState::Prepare => {
                self.service
                    .set_rollback(mm_target, &metadata.dtid, dtid.transaction_id())
                    .await
                    .map_err(|e| CoordinatorError::shard(mm_target, e))?;
                self.rollback_prepared_on(&metadata.participants, &metadata.dtid)
                    .await?;
            }
            TransactionState::Rollback => {
                self.rollback_prepared_on(&metadata.participants, &metadata.dtid)
                    .await?;
            }
            TransactionState::Commit => {
                self.commit_prepared_on(&metadata.participants, &metadata.dtid)
                    .await?;
            }
            TransactionState::Unknown => {
                return Err(CoordinatorError::InvalidTransactionState(metadata.state));
            }
        }

        self.service
            .conclude_transaction(mm_target, &metadata.dtid)
            .await
            .map_err(|e| CoordinatorError::shard(mm_target, e))
    }
}
