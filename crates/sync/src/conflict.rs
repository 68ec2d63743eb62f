//! Multi-device conflict resolution.
//!
//! When the remote reports a version clash between two copies of the same
//! entity, the resolver reconciles them under a named strategy. Resolution
//! is a pure function: inputs are never mutated, no hidden randomness, so
//! identical inputs always produce identical output. That determinism is
//! required for reproducible recovery after a process restart.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::request::SyncPayload;

/// Named policies for reconciling two divergent entity versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Offline-first: the local copy always wins.
    ClientWins,
    /// The copy with the newer `last_modified` wins; ties favor local.
    LatestTimestampWins,
    /// Field-level union with remote precedence on overlapping keys.
    Merge,
    /// Surface the conflict as unresolved instead of picking a winner.
    RejectOnConflict,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientWins => write!(f, "client_wins"),
            Self::LatestTimestampWins => write!(f, "latest_timestamp_wins"),
            Self::Merge => write!(f, "merge"),
            Self::RejectOnConflict => write!(f, "reject_on_conflict"),
        }
    }
}

/// Which side's data survived resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictWinner {
    Local,
    Remote,
    Merged,
}

/// Whether resolution discarded divergent data from the losing side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataIntegrity {
    Preserved,
    Lost,
}

/// Outcome of a resolution attempt.
///
/// `resolution`, when present, supersedes both inputs: its version is
/// strictly greater than either side so a resubmission cannot clash with
/// the versions it reconciled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub resolved: bool,
    pub strategy: ConflictStrategy,
    pub winner: Option<ConflictWinner>,
    pub resolution: Option<SyncPayload>,
    pub data_integrity: DataIntegrity,
}

/// Audit entry for a resolved (or rejected) conflict.
///
/// Carries identifiers and version numbers only; payload content never
/// appears in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub entity_id: String,
    pub entity_type: String,
    pub strategy: ConflictStrategy,
    pub resolved: bool,
    pub winner: Option<ConflictWinner>,
    pub local_version: u64,
    pub remote_version: u64,
    pub resolved_at: u64,
}

impl ConflictRecord {
    /// Build an audit record from a resolution outcome.
    pub fn from_resolution(
        local: &SyncPayload,
        remote: &SyncPayload,
        outcome: &ConflictResolution,
        resolved_at: u64,
    ) -> Self {
        Self {
            entity_id: local.entity_id.clone(),
            entity_type: local.entity_type.clone(),
            strategy: outcome.strategy,
            resolved: outcome.resolved,
            winner: outcome.winner,
            local_version: local.version,
            remote_version: remote.version,
            resolved_at,
        }
    }
}

/// Stateless conflict resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Reconcile `local` and `remote` under `strategy`.
    pub fn resolve(
        &self,
        local: &SyncPayload,
        remote: &SyncPayload,
        strategy: ConflictStrategy,
    ) -> ConflictResolution {
        match strategy {
            ConflictStrategy::ClientWins => {
                self.pick_winner(local, remote, ConflictWinner::Local, strategy)
            }
            ConflictStrategy::LatestTimestampWins => {
                // Ties favor local: offline-first devices should not lose
                // edits to an equally-old server copy.
                let winner = if remote.last_modified > local.last_modified {
                    ConflictWinner::Remote
                } else {
                    ConflictWinner::Local
                };
                self.pick_winner(local, remote, winner, strategy)
            }
            ConflictStrategy::Merge => self.merge(local, remote),
            ConflictStrategy::RejectOnConflict => ConflictResolution {
                resolved: false,
                strategy,
                winner: None,
                resolution: None,
                data_integrity: DataIntegrity::Preserved,
            },
        }
    }

    fn pick_winner(
        &self,
        local: &SyncPayload,
        remote: &SyncPayload,
        winner: ConflictWinner,
        strategy: ConflictStrategy,
    ) -> ConflictResolution {
        let (kept, discarded) = match winner {
            ConflictWinner::Remote => (remote, local),
            _ => (local, remote),
        };
        let data_integrity = if kept.data == discarded.data {
            DataIntegrity::Preserved
        } else {
            DataIntegrity::Lost
        };

        ConflictResolution {
            resolved: true,
            strategy,
            winner: Some(winner),
            resolution: Some(Self::superseding(local, remote, kept.data.clone())),
            data_integrity,
        }
    }

    fn merge(&self, local: &SyncPayload, remote: &SyncPayload) -> ConflictResolution {
        match (&local.data, &remote.data) {
            (Value::Object(local_map), Value::Object(remote_map)) => {
                let mut merged = local_map.clone();
                for (key, value) in remote_map {
                    merged.insert(key.clone(), value.clone());
                }

                ConflictResolution {
                    resolved: true,
                    strategy: ConflictStrategy::Merge,
                    winner: Some(ConflictWinner::Merged),
                    resolution: Some(Self::superseding(local, remote, Value::Object(merged))),
                    data_integrity: DataIntegrity::Preserved,
                }
            }
            // Non-object payloads cannot be unioned; remote precedence.
            _ => {
                let data_integrity = if local.data == remote.data {
                    DataIntegrity::Preserved
                } else {
                    DataIntegrity::Lost
                };
                ConflictResolution {
                    resolved: true,
                    strategy: ConflictStrategy::Merge,
                    winner: Some(ConflictWinner::Remote),
                    resolution: Some(Self::superseding(local, remote, remote.data.clone())),
                    data_integrity,
                }
            }
        }
    }

    /// Build the resolution payload that supersedes both inputs.
    fn superseding(local: &SyncPayload, remote: &SyncPayload, data: Value) -> SyncPayload {
        SyncPayload::new(
            local.entity_id.clone(),
            local.entity_type.clone(),
            local.version.max(remote.version) + 1,
            local.last_modified.max(remote.last_modified),
            data,
        )
    }
}
