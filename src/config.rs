use std::path::PathBuf;
use std::time::Duration;

use ulid::Ulid;

/// Which office edits send an approved office back to review.
/// Location and daily rate always do; the discount is a policy choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReviewPolicy {
    pub discount_triggers_review: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    /// A lease lapses after this long even if never released.
    pub lock_hold: Duration,
    /// How long a booking waits for a busy office before giving up.
    pub lock_wait: Duration,
    /// Journal appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub review: ReviewPolicy,
    /// Users told when an office goes back to pending approval.
    pub reviewers: Vec<Ulid>,
    pub metrics_port: Option<u16>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            lock_hold: Duration::from_secs(10),
            lock_wait: Duration::from_secs(3),
            compact_threshold: 1000,
            review: ReviewPolicy::default(),
            reviewers: Vec::new(),
            metrics_port: None,
        }
    }
}

impl EngineConfig {
    /// Read `DESKBOOK_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let data_dir = lookup("DESKBOOK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let lock_hold = lookup("DESKBOOK_LOCK_HOLD_MS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.lock_hold);
        let lock_wait = lookup("DESKBOOK_LOCK_WAIT_MS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.lock_wait);
        let compact_threshold: u64 = lookup("DESKBOOK_COMPACT_THRESHOLD")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.compact_threshold);
        let discount_triggers_review = lookup("DESKBOOK_REVIEW_ON_DISCOUNT_CHANGE")
            .map(|s| matches!(s.trim(), "1" | "true" | "yes"))
            .unwrap_or(defaults.review.discount_triggers_review);
        let reviewers = lookup("DESKBOOK_REVIEWERS")
            .map(|s| {
                s.split(',')
                    .filter_map(|id| {
                        let id = id.trim();
                        match Ulid::from_string(id) {
                            Ok(ulid) => Some(ulid),
                            Err(_) => {
                                if !id.is_empty() {
                                    tracing::warn!("ignoring malformed reviewer id {id:?}");
                                }
                                None
                            }
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        let metrics_port: Option<u16> = lookup("DESKBOOK_METRICS_PORT").and_then(|s| s.parse().ok());

        if lock_wait >= lock_hold {
            tracing::warn!(
                "lock wait ({lock_wait:?}) is not below lock hold ({lock_hold:?}); a busy office will queue instead of shedding load"
            );
        }

        Self {
            data_dir,
            lock_hold,
            lock_wait,
            compact_threshold,
            review: ReviewPolicy { discount_triggers_review },
            reviewers,
            metrics_port,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("deskbook.wal")
    }
}
