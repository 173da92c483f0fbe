//! Identity registry: the fixed authorized set plus a time-bounded memory of
//! unknown faces used to avoid raising the same stranger twice.

use crate::matcher::IdentityMetric;
use std::time::{Duration, Instant};

/// Default idle time after which an unknown identity is forgotten.
pub const DEFAULT_UNKNOWN_TTL: Duration = Duration::from_secs(60);
/// Default cap on simultaneously remembered unknown identities.
pub const DEFAULT_MAX_UNKNOWN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    pub unknown_ttl: Duration,
    pub max_unknown: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            unknown_ttl: DEFAULT_UNKNOWN_TTL,
            max_unknown: DEFAULT_MAX_UNKNOWN,
        }
    }
}

/// A face seen at runtime that matched nothing authorized.
#[derive(Debug, Clone)]
pub struct UnknownRecord<D> {
    pub descriptor: D,
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub sightings: u32,
    pub alerted: bool,
}

/// Result of resolving an unauthorized descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Same person as the live record at this index; its `last_seen` was refreshed.
    Matched(usize),
    /// Nobody like this was remembered; a new record was appended.
    New,
}

/// Owns the authorized descriptors and the unknown-identity records.
#[derive(Debug)]
pub struct IdentityRegistry<D> {
    authorized: Vec<D>,
    unknown: Vec<UnknownRecord<D>>,
    config: RegistryConfig,
}

impl<D> IdentityRegistry<D> {
    pub fn new(authorized: Vec<D>, config: RegistryConfig) -> Self {
        if authorized.is_empty() {
            tracing::warn!("authorized set is empty; every face will be unauthorized");
        }
        Self {
            authorized,
            unknown: Vec::new(),
            config,
        }
    }

    pub fn authorized(&self) -> &[D] {
        &self.authorized
    }

    pub fn unknown(&self) -> &[UnknownRecord<D>] {
        &self.unknown
    }

    pub fn unknown_count(&self) -> usize {
        self.unknown.len()
    }

    pub fn is_authorized<M>(&self, metric: &M, descriptor: &D) -> bool
    where
        M: IdentityMetric<Descriptor = D>,
    {
        metric.is_authorized(descriptor, &self.authorized)
    }

    /// Match `descriptor` against the live unknown records, refreshing the
    /// first match or remembering it as a new unknown.
    pub fn resolve_unknown<M>(&mut self, metric: &M, descriptor: D, now: Instant) -> Resolution
    where
        M: IdentityMetric<Descriptor = D>,
    {
        if let Some(idx) = self
            .unknown
            .iter()
            .position(|record| metric.same_identity(&descriptor, &record.descriptor))
        {
            let record = &mut self.unknown[idx];
            record.last_seen = now;
            record.sightings += 1;
            return Resolution::Matched(idx);
        }

        if self.config.max_unknown == 0 {
            return Resolution::New;
        }
        if self.unknown.len() >= self.config.max_unknown {
            self.evict_stalest();
        }
        self.unknown.push(UnknownRecord {
            descriptor,
            first_seen: now,
            last_seen: now,
            sightings: 1,
            alerted: false,
        });
        tracing::debug!(live = self.unknown.len(), "new unknown identity");
        Resolution::New
    }

    /// Forget unknown records idle for longer than the TTL. Returns how many were dropped.
    pub fn expire(&mut self, now: Instant) -> usize {
        let ttl = self.config.unknown_ttl;
        let before = self.unknown.len();
        self.unknown
            .retain(|record| now.saturating_duration_since(record.last_seen) <= ttl);
        let evicted = before - self.unknown.len();
        if evicted > 0 {
            tracing::debug!(evicted, live = self.unknown.len(), "expired unknown identities");
        }
        evicted
    }

    /// Flag every record seen at `now` as covered by an alert.
    pub fn mark_alerted(&mut self, now: Instant) {
        for record in self.unknown.iter_mut().filter(|r| r.last_seen == now) {
            record.alerted = true;
        }
    }

    fn evict_stalest(&mut self) {
        if let Some((idx, _)) = self
            .unknown
            .iter()
            .enumerate()
            .min_by_key(|(_, record)| record.last_seen)
        {
            self.unknown.remove(idx);
            tracing::warn!(cap = self.config.max_unknown, "unknown identity cap reached; evicted stalest record");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// One-dimensional descriptors: authorized within 0.5, same person within 1.0.
    pub(crate) struct LineMetric;

    impl IdentityMetric for LineMetric {
        type Descriptor = f32;

        fn is_authorized(&self, probe: &f32, authorized: &[f32]) -> bool {
            authorized.iter().any(|a| (a - probe).abs() < 0.5)
        }

        fn same_identity(&self, probe: &f32, known: &f32) -> bool {
            (known - probe).abs() < 1.0
        }
    }

    fn registry(authorized: Vec<f32>) -> IdentityRegistry<f32> {
        IdentityRegistry::new(authorized, RegistryConfig::default())
    }

    #[test]
    fn test_is_authorized_uses_fixed_set() {
        let reg = registry(vec![0.0]);
        assert!(reg.is_authorized(&LineMetric, &0.2));
        assert!(!reg.is_authorized(&LineMetric, &3.0));
        assert!(!registry(vec![]).is_authorized(&LineMetric, &0.0));
    }

    #[test]
    fn test_dedup_counts_distinct_clusters() {
        let mut reg = registry(vec![]);
        let now = Instant::now();

        // Two clusters around 10 and 20, seen repeatedly.
        let sightings = [10.0, 10.3, 20.0, 9.8, 20.4, 10.1, 19.9];
        let resolutions: Vec<Resolution> = sightings
            .iter()
            .map(|&d| reg.resolve_unknown(&LineMetric, d, now))
            .collect();

        assert_eq!(reg.unknown_count(), 2);
        assert_eq!(resolutions.iter().filter(|r| **r == Resolution::New).count(), 2);
        assert_eq!(resolutions[1], Resolution::Matched(0));
        assert_eq!(resolutions[4], Resolution::Matched(1));
        assert_eq!(reg.unknown()[0].sightings, 4);
        assert!(reg.unknown().iter().all(|r| !r.alerted));
    }

    #[test]
    fn test_repeat_sighting_refreshes_last_seen() {
        let mut reg = registry(vec![]);
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(30);

        reg.resolve_unknown(&LineMetric, 5.0, t0);
        let r = reg.resolve_unknown(&LineMetric, 5.2, t1);

        assert_eq!(r, Resolution::Matched(0));
        assert_eq!(reg.unknown()[0].first_seen, t0);
        assert_eq!(reg.unknown()[0].last_seen, t1);
    }

    #[test]
    fn test_expire_then_reappear_is_new() {
        let mut reg = registry(vec![]);
        let t0 = Instant::now();

        reg.resolve_unknown(&LineMetric, 5.0, t0);
        reg.resolve_unknown(&LineMetric, 50.0, t0 + Duration::from_secs(30));

        // At exactly the TTL nothing is evicted.
        assert_eq!(reg.expire(t0 + DEFAULT_UNKNOWN_TTL), 0);

        let later = t0 + DEFAULT_UNKNOWN_TTL + Duration::from_secs(1);
        assert_eq!(reg.expire(later), 1);
        assert_eq!(reg.unknown_count(), 1);

        let r = reg.resolve_unknown(&LineMetric, 5.0, later);
        assert_eq!(r, Resolution::New);
        assert_eq!(reg.unknown_count(), 2);
    }

    #[test]
    fn test_cap_evicts_stalest() {
        let config = RegistryConfig { max_unknown: 2, ..RegistryConfig::default() };
        let mut reg = IdentityRegistry::new(vec![], config);
        let t0 = Instant::now();

        reg.resolve_unknown(&LineMetric, 0.0, t0);
        reg.resolve_unknown(&LineMetric, 10.0, t0 + Duration::from_secs(1));
        // Refresh the first so the second becomes the stalest.
        reg.resolve_unknown(&LineMetric, 0.1, t0 + Duration::from_secs(2));
        reg.resolve_unknown(&LineMetric, 20.0, t0 + Duration::from_secs(3));

        let kept: Vec<f32> = reg.unknown().iter().map(|r| r.descriptor).collect();
        assert_eq!(kept, vec![0.0, 20.0]);
    }

    #[test]
    fn test_mark_alerted_only_current_sightings() {
        let mut reg = registry(vec![]);
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(1);

        reg.resolve_unknown(&LineMetric, 0.0, t0);
        reg.resolve_unknown(&LineMetric, 10.0, t1);
        reg.mark_alerted(t1);

        assert!(!reg.unknown()[0].alerted);
        assert!(reg.unknown()[1].alerted);
    }
}
