//! Timestamp -> frame ordinal translation
//!
//! A `TimeMap` is an ascending table with one experiment-defined timestamp
//! per decoded frame. Lookups are right-biased binary searches:
//! `clip(searchsorted_right(times, ts) - 1, 0, n - 1)`.

use std::sync::{Arc, RwLock};

use crate::error::{EngineError, Result};

/// Immutable, non-empty, non-decreasing timestamp table
#[derive(Debug, Clone, PartialEq)]
pub struct TimeMap {
    times: Arc<[f64]>,
}

impl TimeMap {
    /// Caller-supplied table. Must be non-empty, finite and non-decreasing.
    pub fn new(times: Vec<f64>) -> Result<Self> {
        if times.is_empty() {
            return Err(EngineError::InvalidTimeMap("empty time table".into()));
        }
        if let Some(i) = times.iter().position(|t| !t.is_finite()) {
            return Err(EngineError::InvalidTimeMap(format!(
                "non-finite timestamp at index {}",
                i
            )));
        }
        if let Some(i) = times.windows(2).position(|w| w[1] < w[0]) {
            return Err(EngineError::InvalidTimeMap(format!(
                "timestamps decrease at index {} ({} -> {})",
                i + 1,
                times[i],
                times[i + 1]
            )));
        }
        Ok(Self {
            times: times.into(),
        })
    }

    /// `times[i] = i / fps` for `count` frames (at least one entry).
    pub fn synthesize(count: usize, fps: f64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 1.0 };
        let times: Vec<f64> = (0..count.max(1)).map(|i| i as f64 / fps).collect();
        Self {
            times: times.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Always false: construction rejects empty tables
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.times
    }

    /// Ordinal of the last entry `<= ts`, clipped to `[0, n-1]`. O(log n), total.
    pub fn to_ordinal(&self, ts: f64) -> usize {
        // NaN sorts before everything and clips to 0
        let right = self.times.partition_point(|&t| t <= ts);
        right.saturating_sub(1).min(self.times.len() - 1)
    }

    /// Timestamp of an ordinal, clipped to the last entry
    pub fn timestamp(&self, ordinal: usize) -> f64 {
        self.times[ordinal.min(self.times.len() - 1)]
    }
}

/// Handle to a time map that its owner may replace; readers see the
/// replacement on their next `load`
#[derive(Debug, Clone)]
pub struct SharedTimeMap(Arc<RwLock<TimeMap>>);

impl SharedTimeMap {
    pub fn new(map: TimeMap) -> Self {
        Self(Arc::new(RwLock::new(map)))
    }

    /// Current map (clones share the timestamp table)
    pub fn load(&self) -> TimeMap {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn store(&self, map: TimeMap) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = map;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_map(n: usize) -> TimeMap {
        TimeMap::new((0..n).map(|i| i as f64).collect()).unwrap()
    }

    /// Test: 100-frame map at 1 frame per time unit
    /// Validates: right-biased lookup and clipping at both ends
    #[test]
    fn test_lookup_scenario() {
        let map = unit_map(100);
        assert_eq!(map.to_ordinal(0.0), 0);
        assert_eq!(map.to_ordinal(0.1), 0);
        assert_eq!(map.to_ordinal(1.0), 1);
        assert_eq!(map.to_ordinal(1.6), 1);
        assert_eq!(map.to_ordinal(99.6), 99);
        assert_eq!(map.to_ordinal(111.0), 99);
        assert_eq!(map.to_ordinal(-5.0), 0);
        assert_eq!(map.to_ordinal(f64::NAN), 0);
    }

    /// Test: lookup is monotonic over the map's range
    #[test]
    fn test_monotonic() {
        let map = TimeMap::new(vec![0.0, 0.5, 0.5, 0.9, 2.0, 2.0, 7.5]).unwrap();
        let mut prev = 0;
        let mut ts = -1.0;
        while ts < 9.0 {
            let o = map.to_ordinal(ts);
            assert!(o >= prev, "ordinal went backwards at ts={}", ts);
            prev = o;
            ts += 0.05;
        }
        // duplicate timestamps resolve to the last duplicate
        assert_eq!(map.to_ordinal(0.5), 2);
        assert_eq!(map.to_ordinal(2.0), 5);
    }

    /// Test: invalid tables are rejected
    #[test]
    fn test_validation() {
        assert!(TimeMap::new(vec![]).is_err());
        assert!(TimeMap::new(vec![0.0, 2.0, 1.0]).is_err());
        assert!(TimeMap::new(vec![0.0, f64::INFINITY]).is_err());
    }

    /// Test: synthesized map from frame rate
    #[test]
    fn test_synthesize() {
        let map = TimeMap::synthesize(50, 25.0);
        assert_eq!(map.len(), 50);
        assert_eq!(map.timestamp(25), 1.0);
        assert_eq!(map.to_ordinal(1.02), 25);
        assert_eq!(map.timestamp(1000), map.timestamp(49));
        // zero count still yields a usable map
        assert_eq!(TimeMap::synthesize(0, 30.0).len(), 1);
    }

    /// Test: replacement is visible through every clone of the handle
    #[test]
    fn test_shared_replace() {
        let shared = SharedTimeMap::new(TimeMap::synthesize(10, 10.0));
        let reader = shared.clone();
        assert_eq!(reader.load().timestamp(50), 0.9);
        shared.store(TimeMap::synthesize(60, 10.0));
        assert_eq!(reader.load().timestamp(50), 5.0);
    }
}
