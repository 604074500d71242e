use crate::geo::PoiMatch;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Lower bound on how long an idle entity keeps its dedup watermark (ms)
const MIN_ENTITY_IDLE_MS: i64 = 10 * 60 * 1000;

/// Entry/exit radii and the debounce window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityPolicy {
    pub radius_m: f64,
    /// Must be >= `radius_m`; equal disables hysteresis
    pub exit_radius_m: f64,
    pub cooldown_ms: i64,
}

impl ProximityPolicy {
    pub fn new(radius_m: f64, exit_radius_m: f64, cooldown: Duration) -> Self {
        Self {
            radius_m,
            exit_radius_m: exit_radius_m.max(radius_m),
            cooldown_ms: i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityState {
    NotNotified,
    Notified,
    Cooldown,
}

/// State of one (entity, POI) pair.
///
/// `last_notified_at` is event time (ms) and survives a reset to
/// `NotNotified`, so a quick exit and re-entry stays silent until the
/// cooldown window has passed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityRecord {
    pub state: ProximityState,
    pub last_notified_at: Option<i64>,
}

impl Default for ProximityRecord {
    fn default() -> Self {
        Self {
            state: ProximityState::NotNotified,
            last_notified_at: None,
        }
    }
}

impl ProximityRecord {
    fn cooldown_elapsed(&self, now: i64, policy: &ProximityPolicy) -> bool {
        self.last_notified_at
            .map_or(true, |at| now.saturating_sub(at) >= policy.cooldown_ms)
    }

    /// Exit hysteresis and cooldown expiry.
    fn relax(&mut self, distance_m: f64, now: i64, policy: &ProximityPolicy) {
        match self.state {
            ProximityState::Notified | ProximityState::Cooldown if distance_m > policy.exit_radius_m => {
                self.state = ProximityState::NotNotified;
            }
            ProximityState::Cooldown if self.cooldown_elapsed(now, policy) => {
                self.state = ProximityState::NotNotified;
            }
            _ => {}
        }
    }

    /// `NotNotified -> Notified` when inside the entry radius and out of cooldown.
    fn try_enter(&mut self, distance_m: f64, now: i64, policy: &ProximityPolicy) -> bool {
        if self.state == ProximityState::NotNotified
            && distance_m <= policy.radius_m
            && self.cooldown_elapsed(now, policy)
        {
            self.state = ProximityState::Notified;
            return true;
        }
        false
    }

    fn confirm(&mut self, now: i64) {
        if self.state == ProximityState::Notified {
            self.state = ProximityState::Cooldown;
            self.last_notified_at = Some(now);
        }
    }

    /// Records that can still influence a future decision.
    fn is_live(&self, now: i64, policy: &ProximityPolicy) -> bool {
        self.state != ProximityState::NotNotified || !self.cooldown_elapsed(now, policy)
    }
}

/// Per-entity slice of the partition arena.
#[derive(Debug, Default)]
pub struct EntityTrack {
    pub last_sequence: Option<u64>,
    /// Latest event time seen for the entity (ms)
    pub last_seen_at: i64,
    records: HashMap<u64, ProximityRecord>,
}

impl EntityTrack {
    pub fn record(&self, poi_id: u64) -> Option<&ProximityRecord> {
        self.records.get(&poi_id)
    }

    pub fn tracked_pois(&self) -> usize {
        self.records.len()
    }
}

/// Partition-local proximity state. Owned by exactly one worker, never shared.
#[derive(Debug)]
pub struct ProximityTracker {
    policy: ProximityPolicy,
    entities: HashMap<String, EntityTrack>,
    next_sweep_at: i64,
}

impl ProximityTracker {
    pub fn new(policy: ProximityPolicy) -> Self {
        Self {
            policy,
            entities: HashMap::new(),
            next_sweep_at: i64::MIN,
        }
    }

    pub fn policy(&self) -> &ProximityPolicy {
        &self.policy
    }

    /// Event time after which an entity with no live records is forgotten,
    /// dedup watermark included.
    pub fn idle_horizon_ms(&self) -> i64 {
        self.policy.cooldown_ms.max(MIN_ENTITY_IDLE_MS)
    }

    /// Record `sequence_no` for the entity. Returns false for a duplicate or
    /// out-of-order event, which the caller must discard.
    pub fn accept_sequence(&mut self, entity_id: &str, sequence_no: u64, now: i64) -> bool {
        let track = self.entities.entry(entity_id.to_string()).or_default();
        match track.last_sequence {
            Some(last) if sequence_no <= last => false,
            _ => {
                track.last_sequence = Some(sequence_no);
                track.last_seen_at = track.last_seen_at.max(now);
                true
            }
        }
    }

    /// Drop entities idle past the horizon. The horizon is at least the
    /// cooldown, so their records can no longer influence a decision.
    /// Returns how many were removed.
    pub fn prune_idle(&mut self, now: i64) -> usize {
        let horizon = self.idle_horizon_ms();
        let before = self.entities.len();
        self.entities
            .retain(|_, track| now.saturating_sub(track.last_seen_at) <= horizon);
        before - self.entities.len()
    }

    /// `prune_idle` at most once per horizon of event time.
    pub fn sweep_if_due(&mut self, now: i64) -> Option<usize> {
        if now < self.next_sweep_at {
            return None;
        }
        self.next_sweep_at = now.saturating_add(self.idle_horizon_ms());
        Some(self.prune_idle(now))
    }

    /// Apply one observation and report whether `nearest` should notify.
    ///
    /// `nearby` holds every POI within the exit radius (used to relax tracked
    /// pairs); `nearest` is the chosen match within the entry radius. A pair
    /// missing from `nearby` is beyond the exit radius.
    pub fn advance(
        &mut self,
        entity_id: &str,
        now: i64,
        nearby: &[PoiMatch],
        nearest: Option<&PoiMatch>,
    ) -> bool {
        let policy = self.policy;
        let track = self.entities.entry(entity_id.to_string()).or_default();
        track.last_seen_at = track.last_seen_at.max(now);

        for (poi_id, record) in track.records.iter_mut() {
            let distance = nearby
                .iter()
                .find(|m| m.poi.poi_id == *poi_id)
                .map_or(f64::INFINITY, |m| m.distance_m);
            record.relax(distance, now, &policy);
        }

        let fires = match nearest {
            Some(matched) => track
                .records
                .entry(matched.poi.poi_id)
                .or_default()
                .try_enter(matched.distance_m, now, &policy),
            None => false,
        };

        track.records.retain(|_, record| record.is_live(now, &policy));
        fires
    }

    /// `Notified -> Cooldown` once the message was resolved (any source).
    pub fn confirm(&mut self, entity_id: &str, poi_id: u64, now: i64) {
        if let Some(record) = self
            .entities
            .get_mut(entity_id)
            .and_then(|track| track.records.get_mut(&poi_id))
        {
            record.confirm(now);
        }
    }

    pub fn state(&self, entity_id: &str, poi_id: u64) -> Option<ProximityState> {
        self.entities
            .get(entity_id)
            .and_then(|track| track.record(poi_id))
            .map(|record| record.state)
    }

    pub fn track(&self, entity_id: &str) -> Option<&EntityTrack> {
        self.entities.get(entity_id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{GeoPoint, PointOfInterest};

    const T0: i64 = 1_700_000_000_000;
    const SEC: i64 = 1_000;

    fn shop(poi_id: u64) -> PointOfInterest {
        PointOfInterest {
            poi_id,
            name: format!("Shop {}", poi_id),
            category: "bar".to_string(),
            location: GeoPoint::new(45.4642, 9.19),
        }
    }

    fn at(poi_id: u64, distance_m: f64) -> PoiMatch {
        PoiMatch {
            poi: shop(poi_id),
            distance_m,
        }
    }

    /// Drive the tracker the way the worker does: nearby within exit radius,
    /// nearest within entry radius, confirm on fire.
    fn step(tracker: &mut ProximityTracker, now: i64, distance_m: Option<f64>) -> bool {
        let nearby: Vec<PoiMatch> = distance_m
            .filter(|d| *d <= tracker.policy().exit_radius_m)
            .map(|d| vec![at(1, d)])
            .unwrap_or_default();
        let radius = tracker.policy().radius_m;
        let nearest = nearby.iter().find(|m| m.distance_m <= radius).cloned();
        let fires = tracker.advance("user_1", now, &nearby, nearest.as_ref());
        if fires {
            tracker.confirm("user_1", 1, now);
        }
        fires
    }

    #[test]
    fn test_first_entry_notifies_then_cools_down() {
        let mut tracker = ProximityTracker::new(ProximityPolicy::new(200.0, 250.0, Duration::from_secs(300)));
        assert!(step(&mut tracker, T0, Some(120.0)));
        assert_eq!(tracker.state("user_1", 1), Some(ProximityState::Cooldown));
        assert!(!step(&mut tracker, T0 + SEC, Some(110.0)));
    }

    #[test]
    fn test_reentry_inside_cooldown_is_silent() {
        let mut tracker = ProximityTracker::new(ProximityPolicy::new(50.0, 70.0, Duration::from_secs(300)));

        assert!(step(&mut tracker, T0, Some(30.0)));
        assert!(!step(&mut tracker, T0 + 60 * SEC, Some(500.0)));
        assert!(!step(&mut tracker, T0 + 120 * SEC, Some(30.0)));
        assert!(!step(&mut tracker, T0 + 200 * SEC, Some(500.0)));
        assert!(step(&mut tracker, T0 + 310 * SEC, Some(30.0)));
    }

    #[test]
    fn test_hysteresis_band_stays_latched() {
        let mut tracker = ProximityTracker::new(ProximityPolicy::new(50.0, 70.0, Duration::from_secs(300)));
        assert!(step(&mut tracker, T0, Some(45.0)));

        for (i, d) in [55.0, 65.0, 55.0, 65.0, 49.0, 65.0].iter().enumerate() {
            assert!(!step(&mut tracker, T0 + (i as i64 + 1) * SEC, Some(*d)));
            assert_eq!(tracker.state("user_1", 1), Some(ProximityState::Cooldown));
        }

        // Beyond the exit radius resets the state but keeps the timestamp
        assert!(!step(&mut tracker, T0 + 10 * SEC, Some(75.0)));
        assert_eq!(tracker.state("user_1", 1), Some(ProximityState::NotNotified));
        assert_eq!(
            tracker.track("user_1").unwrap().record(1).unwrap().last_notified_at,
            Some(T0)
        );
    }

    #[test]
    fn test_reset_then_reentry_after_cooldown_notifies() {
        let mut tracker = ProximityTracker::new(ProximityPolicy::new(50.0, 70.0, Duration::from_secs(300)));
        assert!(step(&mut tracker, T0, Some(45.0)));
        assert!(!step(&mut tracker, T0 + 10 * SEC, Some(90.0)));
        assert!(step(&mut tracker, T0 + 301 * SEC, Some(45.0)));
    }

    #[test]
    fn test_cooldown_expiry_inside_radius_renotifies() {
        let mut tracker = ProximityTracker::new(ProximityPolicy::new(50.0, 70.0, Duration::from_secs(300)));
        assert!(step(&mut tracker, T0, Some(20.0)));
        assert!(!step(&mut tracker, T0 + 299 * SEC, Some(20.0)));
        assert!(step(&mut tracker, T0 + 300 * SEC, Some(20.0)));
    }

    #[test]
    fn test_equal_radii_disable_hysteresis() {
        let mut tracker = ProximityTracker::new(ProximityPolicy::new(50.0, 50.0, Duration::from_secs(0)));
        assert!(step(&mut tracker, T0, Some(45.0)));
        assert!(!step(&mut tracker, T0 + SEC, Some(55.0)));
        assert_eq!(tracker.state("user_1", 1), None);
        assert!(step(&mut tracker, T0 + 2 * SEC, Some(45.0)));
    }

    #[test]
    fn test_exit_radius_never_below_entry() {
        let policy = ProximityPolicy::new(100.0, 40.0, Duration::from_secs(1));
        assert_eq!(policy.exit_radius_m, 100.0);
    }

    #[test]
    fn test_sequence_dedup() {
        let mut tracker = ProximityTracker::new(ProximityPolicy::new(50.0, 70.0, Duration::from_secs(300)));
        assert!(tracker.accept_sequence("user_1", 10, T0));
        assert!(!tracker.accept_sequence("user_1", 10, T0));
        assert!(!tracker.accept_sequence("user_1", 9, T0));
        assert!(tracker.accept_sequence("user_1", 11, T0 + SEC));
        assert!(tracker.accept_sequence("user_2", 1, T0));
        assert_eq!(tracker.entity_count(), 2);
    }

    #[test]
    fn test_nearest_switch_tracks_each_pair() {
        let mut tracker = ProximityTracker::new(ProximityPolicy::new(50.0, 70.0, Duration::from_secs(300)));

        let nearby = vec![at(1, 20.0), at(2, 40.0)];
        assert!(tracker.advance("user_1", T0, &nearby, Some(&nearby[0])));
        tracker.confirm("user_1", 1, T0);

        // POI 2 becomes nearest: first entry for that pair
        let nearby = vec![at(1, 45.0), at(2, 10.0)];
        assert!(tracker.advance("user_1", T0 + SEC, &nearby, Some(&nearby[1])));
        tracker.confirm("user_1", 2, T0 + SEC);

        assert_eq!(tracker.state("user_1", 1), Some(ProximityState::Cooldown));
        assert_eq!(tracker.state("user_1", 2), Some(ProximityState::Cooldown));
        assert_eq!(tracker.track("user_1").unwrap().tracked_pois(), 2);
    }

    #[test]
    fn test_stale_records_are_pruned() {
        let mut tracker = ProximityTracker::new(ProximityPolicy::new(50.0, 70.0, Duration::from_secs(60)));
        assert!(step(&mut tracker, T0, Some(10.0)));
        assert!(!step(&mut tracker, T0 + SEC, None));
        assert_eq!(tracker.track("user_1").unwrap().tracked_pois(), 1);

        // Outside and past the cooldown: record carries no information anymore
        assert!(!step(&mut tracker, T0 + 61 * SEC, None));
        assert_eq!(tracker.track("user_1").unwrap().tracked_pois(), 0);
    }

    #[test]
    fn test_idle_entities_are_forgotten() {
        const MIN: i64 = 60 * SEC;
        let mut tracker = ProximityTracker::new(ProximityPolicy::new(50.0, 70.0, Duration::from_secs(300)));
        assert_eq!(tracker.idle_horizon_ms(), 10 * MIN);

        assert!(tracker.accept_sequence("user_1", 1, T0));
        assert!(step(&mut tracker, T0, Some(10.0)));
        assert!(tracker.accept_sequence("user_2", 1, T0 + 8 * MIN));

        assert_eq!(tracker.prune_idle(T0 + 9 * MIN), 0);
        assert_eq!(tracker.prune_idle(T0 + 11 * MIN), 1);
        assert!(tracker.track("user_1").is_none());
        assert!(tracker.track("user_2").is_some());

        // Coming back starts from a clean slate
        assert!(tracker.accept_sequence("user_1", 2, T0 + 12 * MIN));
        assert!(step(&mut tracker, T0 + 12 * MIN, Some(10.0)));
    }

    #[test]
    fn test_long_cooldown_extends_idle_horizon() {
        let tracker = ProximityTracker::new(ProximityPolicy::new(50.0, 70.0, Duration::from_secs(3600)));
        assert_eq!(tracker.idle_horizon_ms(), 3600 * SEC);
    }

    #[test]
    fn test_sweep_runs_once_per_horizon() {
        let mut tracker = ProximityTracker::new(ProximityPolicy::new(50.0, 70.0, Duration::from_secs(0)));
        assert!(tracker.accept_sequence("user_1", 1, T0));

        assert_eq!(tracker.sweep_if_due(T0), Some(0));
        assert_eq!(tracker.sweep_if_due(T0 + 60 * SEC), None);
        assert_eq!(tracker.sweep_if_due(T0 + 11 * 60 * SEC), Some(1));
        assert_eq!(tracker.entity_count(), 0);
    }
}
