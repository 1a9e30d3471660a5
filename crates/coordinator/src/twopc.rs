//! Two-phase commit across the `normal` class
//!
//! The first open transaction in the class is the metadata manager (MM) and
//! holds the durable record of the outcome; every other one is a resource
//! manager (RM). Roles are fixed once in a [`CommitPlan`] before any RPC is
//! issued.
//!
//! ```text
//! CreateTransaction(MM) -> Prepare(RMs) -> StartCommit(MM) -> CommitPrepared(RMs) -> Conclude(MM)
//! ```

use crate::coordinator::Coordinator;
use crate::error::{CoordinatorError, Result};
use crate::fanout;
use crate::session::{CommitOrder, Session, ShardSession};
use shardgate_common::{Dtid, Target};

/// Part a shard plays in one distributed commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Metadata manager
    Mm,
    /// Resource manager
    Rm,
}

/// One shard taking part in a distributed commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub role: Role,
    /// Position of the shard session in the `normal` class
    pub index: usize,
    pub target: Target,
    pub transaction_id: u64,
}

/// Roles and dtid for one distributed commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitPlan {
    pub dtid: Dtid,
    pub mm: Participant,
    pub rms: Vec<Participant>,
}

impl CommitPlan {
    /// Assign roles over the open transactions of `records`
    ///
    /// Returns `None` when fewer than two shards have an open transaction;
    /// there is nothing to coordinate then.
    pub fn new(records: &[ShardSession]) -> Option<Self> {
        let mut open = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.transaction_id != 0);

        let (mm_index, mm_record) = open.next()?;
        let mm = Participant {
            role: Role::Mm,
            index: mm_index,
            target: mm_record.target.clone(),
            transaction_id: mm_record.transaction_id,
        };

        let rms: Vec<Participant> = open
            .map(|(index, r)| Participant {
                role: Role::Rm,
                index,
                target: r.target.clone(),
                transaction_id: r.transaction_id,
            })
            .collect();
        if rms.is_empty() {
            return None;
        }

        Some(Self {
            dtid: Dtid::new(&mm.target, mm.transaction_id),
            mm,
            rms,
        })
    }

    pub fn rm_targets(&self) -> Vec<Target> {
        self.rms.iter().map(|p| p.target.clone()).collect()
    }
}

impl Coordinator {
    /// Commit the `normal` class atomically
    pub(crate) async fn commit_2pc(&self, session: &mut Session) -> Result<()> {
        let Some(plan) = CommitPlan::new(&session.shard_sessions) else {
            return self.commit_normal(session).await;
        };
        let dtid = plan.dtid.to_string();
        tracing::debug!(
            "Starting two-phase commit {} with {} resource managers",
            dtid,
            plan.rms.len()
        );

        // Nothing is durable yet, so a plain rollback undoes everything
        if let Err(e) = self
            .service
            .create_transaction(&plan.mm.target, &dtid, &plan.rm_targets())
            .await
        {
            let err = CoordinatorError::shard(&plan.mm.target, e);
            if let Err(rollback_err) = self
                .rollback_classes(session, &[CommitOrder::Normal])
                .await
            {
                tracing::warn!(
                    "Rollback failed after CreateTransaction failure for {}: {}",
                    dtid,
                    rollback_err
                );
            }
            return Err(err);
        }

        let prepared = match self.prepare_all(session, &plan, &dtid).await {
            Ok(prepared) => prepared,
            Err((prepared, err)) => {
                self.unwind(session, &plan, &prepared, &dtid).await;
                return Err(err);
            }
        };

        if let Err(e) = self
            .service
            .start_commit(&plan.mm.target, plan.mm.transaction_id, &dtid)
            .await
        {
            let err = CoordinatorError::shard(&plan.mm.target, e);
            if err.is_uncertain(&self.config.uncertain_start_commit_codes) {
                session.shard_sessions[plan.mm.index].transaction_id = 0;
                self.metrics.record_commit_unresolved();
                tracing::warn!(
                    "StartCommit outcome unknown for {}, leaving it to the resolver: {}",
                    dtid,
                    err
                );
                return Err(err);
            }
            self.unwind(session, &plan, &prepared, &dtid).await;
            return Err(err);
        }
        session.shard_sessions[plan.mm.index].transaction_id = 0;

        // The decision is durable: from here on only roll forward
        if let Err(err) = self.commit_prepared_on(&plan.rm_targets(), &dtid).await {
            self.metrics.record_commit_unresolved();
            tracing::warn!(
                "CommitPrepared failed for {}, leaving it to the resolver: {}",
                dtid,
                err
            );
            return Err(err);
        }

        if let Err(e) = self
            .service
            .conclude_transaction(&plan.mm.target, &dtid)
            .await
        {
            tracing::warn!(
                "ConcludeTransaction failed for {}: {}",
                dtid,
                CoordinatorError::shard(&plan.mm.target, e)
            );
        }
        Ok(())
    }

    /// Prepare every RM concurrently
    ///
    /// Prepared RMs no longer own a local transaction, so their handles are
    /// cleared in the session. On failure the RMs that did prepare are
    /// returned alongside the error.
    async fn prepare_all(
        &self,
        session: &mut Session,
        plan: &CommitPlan,
        dtid: &str,
    ) -> std::result::Result<Vec<Participant>, (Vec<Participant>, CoordinatorError)> {
        let service = self.service.clone();
        let dtid_owned = dtid.to_string();
        let results = fanout::run(plan.rms.clone(), move |participant| {
            let service = service.clone();
            let dtid = dtid_owned.clone();
            async move {
                match service
                    .prepare(&participant.target, participant.transaction_id, &dtid)
                    .await
                {
                    Ok(()) => Ok(participant),
                    Err(e) => Err(CoordinatorError::shard(&participant.target, e)),
                }
            }
        })
        .await;

        let mut prepared = Vec::new();
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(participant) => {
                    session.shard_sessions[participant.index].transaction_id = 0;
                    prepared.push(participant);
                }
                Err(e) => errors.push(e),
            }
        }

        match CoordinatorError::aggregate(errors) {
            Some(err) => Err((prepared, err)),
            None => Ok(prepared),
        }
    }

    /// Undo a distributed commit that never reached its commit decision
    ///
    /// Stops at the first failed step; whatever is left is picked up by the
    /// resolver from the MM's metadata.
    async fn unwind(
        &self,
        session: &mut Session,
        plan: &CommitPlan,
        prepared: &[Participant],
        dtid: &str,
    ) {
        if let Err(e) = self
            .service
            .set_rollback(&plan.mm.target, dtid, plan.mm.transaction_id)
            .await
        {
            self.metrics.record_commit_unresolved();
            tracing::error!(
                "SetRollback failed for {}, leaving it to the resolver: {}",
                dtid,
                CoordinatorError::shard(&plan.mm.target, e)
            );
            return;
        }
        session.shard_sessions[plan.mm.index].transaction_id = 0;

        let targets: Vec<Target> = prepared.iter().map(|p| p.target.clone()).collect();
        if let Err(err) = self.rollback_prepared_on(&targets, dtid).await {
            self.metrics.record_commit_unresolved();
            tracing::error!(
                "RollbackPrepared failed for {}, leaving it to the resolver: {}",
                dtid,
                err
            );
            return;
        }

        if let Err(e) = self.service.conclude_transaction(&plan.mm.target, dtid).await {
            tracing::warn!(
                "ConcludeTransaction failed for {}: {}",
                dtid,
                CoordinatorError::shard(&plan.mm.target, e)
            );
        }
    }

    /// CommitPrepared on every target concurrently
    pub(crate) async fn commit_prepared_on(&self, targets: &[Target], dtid: &str) -> Result<()> {
        let service = self.service.clone();
        let dtid = dtid.to_string();
        fanout::run_targets(targets, move |target| {
            let service = service.clone();
            let dtid = dtid.clone();
            async move {
                service
                    .commit_prepared(&target, &dtid)
                    .await
                    .map_err(|e| CoordinatorError::shard(&target, e))
            }
        })
        .await
    }

    /// RollbackPrepared on every target concurrently
    pub(crate) async fn rollback_prepared_on(&self, targets: &[Target], dtid: &str) -> Result<()> {
        let service = self.service.clone();
        let dtid = dtid.to_string();
        fanout::run_targets(targets, move |target| {
            let service = service.clone();
            let dtid = dtid.clone();
            async move {
                service
                    .rollback_prepared(&target, &dtid, 0)
                    .await
                    .map_err(|e| CoordinatorError::shard(&target, e))
            }
        })
        .await
    }
}
