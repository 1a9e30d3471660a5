//! Ordered record of every backend call the sandbox served

use parking_lot::Mutex;
use shardgate_common::Target;
use std::fmt;

/// Backend verbs served by the sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Begin,
    Commit,
    Rollback,
    Prepare,
    CommitPrepared,
    RollbackPrepared,
    CreateTransaction,
    StartCommit,
    SetRollback,
    ConcludeTransaction,
    UnresolvedTransactions,
    Release,
}

impl Verb {
    pub const COUNT: usize = 12;

    pub const ALL: [Verb; Verb::COUNT] = [
        Verb::Begin,
        Verb::Commit,
        Verb::Rollback,
        Verb::Prepare,
        Verb::CommitPrepared,
        Verb::RollbackPrepared,
        Verb::CreateTransaction,
        Verb::StartCommit,
        Verb::SetRollback,
        Verb::ConcludeTransaction,
        Verb::UnresolvedTransactions,
        Verb::Release,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Whether an event marks the start or the end of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Start,
    End,
}

/// One entry in the call log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    pub target: Target,
    pub verb: Verb,
    pub phase: CallPhase,
}

/// Append-only call log shared by every shard of a cluster
#[derive(Default)]
pub struct CallLog {
    events: Mutex<Vec<CallEvent>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, target: &Target, verb: Verb, phase: CallPhase) {
        self.events.lock().push(CallEvent {
            target: target.clone(),
            verb,
            phase,
        });
    }

    /// Snapshot of all events so far, in the order they happened
    pub fn events(&self) -> Vec<CallEvent> {
        self.events.lock().clone()
    }

    /// Position of every event matching `verb` and `phase`
    pub fn positions(&self, verb: Verb, phase: CallPhase) -> Vec<usize> {
        self.events
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.verb == verb && e.phase == phase)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}
