//! Local/remote conflict resolution.
//!
//! Picks the canonical snapshot from a local and a remote candidate. The
//! comparison is pure; pushing the winner back to the loser is left to the
//! caller (see [`Decision::should_push_local`] and
//! [`Decision::should_cache_remote`]).

use std::cmp::Ordering;

use tracing::{debug, warn};

use crate::snapshot::{SourceTag, StateSnapshot};

/// Which candidate became canonical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// The local snapshot.
    Local,
    /// The remote snapshot.
    Remote,
    /// Neither was usable; a default was synthesized.
    Default,
}

/// A candidate excluded from consideration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityIssue {
    /// Which candidate.
    pub source: SourceTag,
    /// Why it was excluded.
    pub reason: String,
}

/// Outcome of [`ConflictResolver::compare`].
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Which candidate won.
    pub winner: Winner,
    /// Local snapshot is canonical.
    pub use_local: bool,
    /// Remote snapshot is canonical.
    pub use_remote: bool,
    /// Both candidates were valid and local is strictly newer.
    pub local_newer: bool,
    /// Excluded candidates.
    pub integrity_errors: Vec<IntegrityIssue>,
    /// Whether a valid remote candidate existed.
    pub remote_present: bool,
    /// The canonical snapshot.
    pub canonical: StateSnapshot,
}

impl Decision {
    /// Local won while the remote holds a (different or older) copy, so the
    /// remote should be healed with the local snapshot.
    pub fn should_push_local(&self) -> bool {
        self.use_local && self.remote_present && self.local_newer
    }

    /// Remote won and should be cached locally.
    pub fn should_cache_remote(&self) -> bool {
        self.use_remote
    }
}

/// Deterministic local-vs-remote comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Create a resolver.
    pub fn new() -> Self {
        Self
    }

    /// Decide which of `local` and `remote` is canonical for `user_id`.
    ///
    /// Invalid candidates (structural problems, failed or missing integrity
    /// hash, wrong owner) are excluded and listed in `integrity_errors`. Among
    /// valid ones the higher version wins, then the later `last_saved_at`,
    /// then local. With no valid candidate a default snapshot at `now_ms` is
    /// returned.
    pub fn compare(
        &self,
        user_id: &str,
        local: Option<&StateSnapshot>,
        remote: Option<&StateSnapshot>,
        now_ms: u64,
    ) -> Decision {
        let mut integrity_errors = Vec::new();
        let local = Self::admit(user_id, local, SourceTag::Local, &mut integrity_errors);
        let remote = Self::admit(user_id, remote, SourceTag::Remote, &mut integrity_errors);
        let remote_present = remote.is_some();

        let (winner, local_newer, canonical) = match (local, remote) {
            (Some(l), Some(r)) => match Self::order(l, r) {
                Ordering::Less => (Winner::Remote, false, r.clone()),
                Ordering::Greater => (Winner::Local, true, l.clone()),
                Ordering::Equal => (Winner::Local, false, l.clone()),
            },
            (Some(l), None) => (Winner::Local, false, l.clone()),
            (None, Some(r)) => (Winner::Remote, false, r.clone()),
            (None, None) => {
                warn!(user_id, errors = integrity_errors.len(), "no valid snapshot, synthesizing default");
                (Winner::Default, false, StateSnapshot::default_for(user_id, now_ms))
            }
        };

        let canonical = match winner {
            Winner::Local => canonical.with_source(SourceTag::Local),
            Winner::Remote => canonical.with_source(SourceTag::Remote),
            Winner::Default => canonical,
        };
        debug!(user_id, ?winner, version = canonical.version, "conflict resolved");

        Decision {
            winner,
            use_local: winner == Winner::Local,
            use_remote: winner == Winner::Remote,
            local_newer,
            integrity_errors,
            remote_present,
            canonical,
        }
    }

    /// Total order used between two valid candidates; `Equal` prefers local.
    pub fn order(local: &StateSnapshot, remote: &StateSnapshot) -> Ordering {
        local
            .version
            .cmp(&remote.version)
            .then(local.last_saved_at.cmp(&remote.last_saved_at))
    }

    fn admit<'a>(
        user_id: &str,
        candidate: Option<&'a StateSnapshot>,
        source: SourceTag,
        errors: &mut Vec<IntegrityIssue>,
    ) -> Option<&'a StateSnapshot> {
        let snapshot = candidate?;
        let reason = if snapshot.user_id != user_id {
            Some(format!("belongs to {}", snapshot.user_id))
        } else if snapshot.integrity_failed || !snapshot.verify() {
            Some("integrity hash mismatch".to_string())
        } else {
            let problems = snapshot.problems();
            (!problems.is_empty()).then(|| problems.join("; "))
        };
        match reason {
            Some(reason) => {
                warn!(user_id, ?source, %reason, "snapshot excluded from resolution");
                errors.push(IntegrityIssue { source, reason });
                None
            }
            None => Some(snapshot),
        }
    }
}
