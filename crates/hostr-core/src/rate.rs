//! Write spacing and daily quotas.
//!
//! A [`RateGate`] is owned by the worker of one direction. The Hive gate
//! enforces the node's minimum spacing between writes plus per-category
//! daily quotas, and persists its state so a restart does not reset them.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BridgeSettings;
use crate::error::{BridgeError, BridgeResult};
use crate::ledger::write_atomic;
use crate::types::Category;

/// Persisted rate state for the Hive direction.
pub const RATE_STATE_FILE: &str = "rate_state.json";

/// Mutable gate state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateState {
    /// Last confirmed write
    pub last_post_at: Option<DateTime<Utc>>,
    /// Writes per category on `day_key`
    pub daily_counts: BTreeMap<Category, u32>,
    /// Calendar day the counts belong to
    pub day_key: Option<NaiveDate>,
}

/// Why a write has to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Too soon after the previous write
    Spacing,
    /// The category's daily quota is used up
    Quota,
}

/// Outcome of [`RateGate::can_post_now`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Write now
    Allowed,
    /// Try again after `wait`
    Blocked {
        /// Time until the gate opens
        wait: Duration,
        /// Which rule blocked
        reason: BlockReason,
    },
}

impl GateDecision {
    /// Whether the write may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed)
    }

    /// Wait before retrying; zero when allowed.
    pub fn wait(&self) -> Duration {
        match self {
            GateDecision::Allowed => Duration::ZERO,
            GateDecision::Blocked { wait, .. } => *wait,
        }
    }
}

/// Minimum-spacing and daily-quota gate.
#[derive(Debug)]
pub struct RateGate {
    min_spacing: Duration,
    quotas: BTreeMap<Category, u32>,
    utc_offset: Option<FixedOffset>,
    state: RateState,
    path: Option<PathBuf>,
}

impl RateGate {
    /// An in-memory gate with no quotas.
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            quotas: BTreeMap::new(),
            utc_offset: None,
            state: RateState::default(),
            path: None,
        }
    }

    /// Cap `category` at `quota` writes per day.
    pub fn with_quota(mut self, category: Category, quota: u32) -> Self {
        self.quotas.insert(category, quota);
        self
    }

    /// Roll days over at midnight in a fixed offset instead of local time.
    pub fn with_utc_offset(mut self, minutes: i32) -> Self {
        self.utc_offset = FixedOffset::east_opt(minutes * 60);
        if self.utc_offset.is_none() {
            warn!(minutes, "Ignoring out-of-range UTC offset, using local time");
        }
        self
    }

    /// Persist state to `path`, loading whatever is already there.
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> BridgeResult<Self> {
        let path = path.into();
        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                self.state =
                    serde_json::from_str(&raw).map_err(|e| BridgeError::CorruptState {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    })?;
                debug!(path = %path.display(), "Loaded rate state");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(BridgeError::Persistence {
                    path: path.display().to_string(),
                    source,
                })
            }
        }
        self.path = Some(path);
        Ok(self)
    }

    /// The Hive gate: node spacing, snap/longform quotas, persisted.
    pub fn for_platform(settings: &BridgeSettings, state_dir: &std::path::Path) -> BridgeResult<Self> {
        let mut gate = Self::new(settings.min_post_spacing())
            .with_quota(Category::Snap, settings.snap_quota)
            .with_quota(Category::Longform, settings.longform_quota);
        if let Some(minutes) = settings.quota_utc_offset_minutes {
            gate = gate.with_utc_offset(minutes);
        }
        gate.with_persistence(state_dir.join(RATE_STATE_FILE))
    }

    /// The relay gate: optional spacing only.
    pub fn for_relay(settings: &BridgeSettings) -> Self {
        Self::new(settings.min_publish_spacing())
    }

    /// Calendar day of `now` in the gate's timezone.
    pub fn day_key(&self, now: DateTime<Utc>) -> NaiveDate {
        match self.utc_offset {
            Some(offset) => now.with_timezone(&offset).date_naive(),
            None => now.with_timezone(&Local).date_naive(),
        }
    }

    /// Start of the day after `now`, in UTC.
    fn next_day_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let fallback = now + chrono::Duration::hours(1);
        let Some(midnight) = self
            .day_key(now)
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
        else {
            return fallback;
        };
        let start = match self.utc_offset {
            Some(offset) => offset
                .from_local_datetime(&midnight)
                .earliest()
                .map(|t| t.with_timezone(&Utc)),
            None => Local
                .from_local_datetime(&midnight)
                .earliest()
                .map(|t| t.with_timezone(&Utc)),
        };
        start.unwrap_or(fallback)
    }

    /// Writes recorded for `category` on the day of `now`.
    pub fn daily_count(&self, category: Category, now: DateTime<Utc>) -> u32 {
        if self.state.day_key == Some(self.day_key(now)) {
            self.state.daily_counts.get(&category).copied().unwrap_or(0)
        } else {
            0
        }
    }

    /// Whether a `category` write may go out at `now`.
    pub fn can_post_now(&self, category: Category, now: DateTime<Utc>) -> GateDecision {
        if let Some(&quota) = self.quotas.get(&category) {
            if self.daily_count(category, now) >= quota {
                let wait = (self.next_day_start(now) - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                return GateDecision::Blocked {
                    wait,
                    reason: BlockReason::Quota,
                };
            }
        }

        if let Some(last) = self.state.last_post_at {
            let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
            if elapsed < self.min_spacing {
                return GateDecision::Blocked {
                    wait: self.min_spacing - elapsed,
                    reason: BlockReason::Spacing,
                };
            }
        }

        GateDecision::Allowed
    }

    /// Count a confirmed write.
    pub fn record_post(&mut self, category: Category, now: DateTime<Utc>) -> BridgeResult<()> {
        let today = self.day_key(now);
        if self.state.day_key != Some(today) {
            self.state.daily_counts.clear();
            self.state.day_key = Some(today);
        }
        *self.state.daily_counts.entry(category).or_insert(0) += 1;
        self.state.last_post_at = Some(now);

        if let Some(path) = &self.path {
            write_atomic(path, &serde_json::to_vec_pretty(&self.state)?)?;
        }
        Ok(())
    }

    /// Current state.
    pub fn state(&self) -> &RateState {
        &self.state
    }

    /// Configured quota for `category`, if any.
    pub fn quota(&self, category: Category) -> Option<u32> {
        self.quotas.get(&category).copied()
    }
}

/// Read a persisted rate state without building a gate.
pub fn read_rate_state(path: &std::path::Path) -> BridgeResult<Option<RateState>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| BridgeError::CorruptState {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(BridgeError::Persistence {
            path: path.display().to_string(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, 0).unwrap()
    }

    fn gate() -> RateGate {
        RateGate::new(Duration::from_secs(300))
            .with_quota(Category::Snap, 2)
            .with_utc_offset(0)
    }

    #[test]
    fn test_spacing_blocks_until_elapsed() {
        let mut gate = gate();
        assert!(gate.can_post_now(Category::Snap, at(10, 0)).is_allowed());
        gate.record_post(Category::Snap, at(10, 0)).unwrap();

        let decision = gate.can_post_now(Category::Longform, at(10, 2));
        assert_eq!(
            decision,
            GateDecision::Blocked {
                wait: Duration::from_secs(180),
                reason: BlockReason::Spacing
            }
        );
        assert!(gate.can_post_now(Category::Longform, at(10, 5)).is_allowed());
    }

    #[test]
    fn test_quota_waits_for_next_day() {
        let mut gate = gate();
        gate.record_post(Category::Snap, at(10, 0)).unwrap();
        gate.record_post(Category::Snap, at(11, 0)).unwrap();

        let decision = gate.can_post_now(Category::Snap, at(12, 0));
        assert_eq!(
            decision,
            GateDecision::Blocked {
                wait: Duration::from_secs(12 * 3600),
                reason: BlockReason::Quota
            }
        );
        // Other categories are unaffected once spacing has passed
        assert!(gate.can_post_now(Category::Longform, at(12, 0)).is_allowed());
    }

    #[test]
    fn test_quota_resets_on_day_rollover() {
        let mut gate = gate();
        gate.record_post(Category::Snap, at(22, 0)).unwrap();
        gate.record_post(Category::Snap, at(23, 0)).unwrap();
        assert_eq!(gate.daily_count(Category::Snap, at(23, 30)), 2);

        let next_day = at(23, 0) + chrono::Duration::hours(2);
        assert_eq!(gate.daily_count(Category::Snap, next_day), 0);
        assert!(gate.can_post_now(Category::Snap, next_day).is_allowed());
        gate.record_post(Category::Snap, next_day).unwrap();
        assert_eq!(gate.daily_count(Category::Snap, next_day), 1);
    }

    #[test]
    fn test_offset_moves_day_boundary() {
        let gate = RateGate::new(Duration::ZERO).with_utc_offset(-300);
        // 03:00 UTC is still the previous day at UTC-5
        assert_eq!(
            gate.day_key(at(3, 0)),
            NaiveDate::from_ymd_opt(2025, 2, 28).unwrap()
        );
    }

    #[test]
    fn test_state_persists_across_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(RATE_STATE_FILE);
        let mut gate = gate().with_persistence(&path).unwrap();
        gate.record_post(Category::Snap, at(10, 0)).unwrap();

        let restored = RateGate::new(Duration::from_secs(300))
            .with_utc_offset(0)
            .with_persistence(&path)
            .unwrap();
        assert_eq!(restored.state().last_post_at, Some(at(10, 0)));
        assert_eq!(restored.daily_count(Category::Snap, at(10, 1)), 1);
        assert!(!restored.can_post_now(Category::Snap, at(10, 1)).is_allowed());
        assert_eq!(read_rate_state(&path).unwrap(), Some(restored.state().clone()));
    }
}
