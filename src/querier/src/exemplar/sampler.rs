use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};

use super::Exemplar;
use crate::query::align_time_range;

/// Bounds the exemplars kept for one response.
///
/// Exemplars are fed one at a time with [`Sampler::add`]; [`Sampler::sample`]
/// drains the kept set, ordered by timestamp, and leaves the sampler empty.
pub trait Sampler: Send {
    fn set_step(&mut self, step: TimeDelta);
    fn add(&mut self, exemplar: Exemplar);
    fn sample(&mut self) -> Vec<Exemplar>;
}

/// Keeps every exemplar.
#[derive(Debug, Default)]
pub struct NoOpSampler {
    exemplars: Vec<Exemplar>,
}

impl NoOpSampler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Sampler for NoOpSampler {
    fn set_step(&mut self, _step: TimeDelta) {}

    fn add(&mut self, exemplar: Exemplar) {
        self.exemplars.push(exemplar);
    }

    fn sample(&mut self) -> Vec<Exemplar> {
        let mut exemplars = std::mem::take(&mut self.exemplars);
        exemplars.sort_by_key(|exemplar| exemplar.timestamp);
        exemplars
    }
}

/// Keeps the outliers of each step-sized time bucket.
///
/// Within a bucket exemplars are visited from the highest value down. The
/// first one is always kept; every following one is kept only when it sits
/// more than two standard deviations below the last kept value. Mean and
/// variance run over everything added (Welford's online algorithm).
#[derive(Debug)]
pub struct StdDevSampler {
    step: TimeDelta,
    buckets: BTreeMap<DateTime<Utc>, Vec<Exemplar>>,
    count: u64,
    mean: f64,
    m2: f64,
}

impl Default for StdDevSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl StdDevSampler {
    pub fn new() -> Self {
        Self {
            step: TimeDelta::zero(),
            buckets: BTreeMap::new(),
            count: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Sample standard deviation, zero below two values.
    pub fn standard_deviation(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / (self.count - 1) as f64).sqrt()
    }

    fn reset(&mut self) {
        self.buckets.clear();
        self.count = 0;
        self.mean = 0.0;
        self.m2 = 0.0;
    }
}

impl Sampler for StdDevSampler {
    fn set_step(&mut self, step: TimeDelta) {
        self.step = step;
    }

    fn add(&mut self, exemplar: Exemplar) {
        self.update(exemplar.value);
        let bucket = align_time_range(exemplar.timestamp, self.step, 0);
        self.buckets.entry(bucket).or_default().push(exemplar);
    }

    fn sample(&mut self) -> Vec<Exemplar> {
        let threshold = self.standard_deviation() * 2.0;
        let buckets = std::mem::take(&mut self.buckets);

        let mut sampled = Vec::new();
        for (_, mut bucket) in buckets {
            bucket.sort_by(|a, b| b.value.total_cmp(&a.value));

            let mut kept: Vec<Exemplar> = Vec::with_capacity(bucket.len());
            for exemplar in bucket {
                let keep = match kept.last() {
                    None => true,
                    Some(prev) => threshold != 0.0 && prev.value - exemplar.value > threshold,
                };
                if keep {
                    kept.push(exemplar);
                }
            }
            sampled.extend(kept);
        }

        self.reset();
        sampled.sort_by_key(|exemplar| exemplar.timestamp);
        sampled
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::frame::Labels;

    fn exemplar(secs: i64, value: f64) -> Exemplar {
        Exemplar {
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            value,
            series_labels: Labels::new(),
            labels: Labels::new(),
        }
    }

    #[test]
    fn test_noop_keeps_everything_in_time_order() {
        let mut sampler = NoOpSampler::new();
        sampler.add(exemplar(30, 1.0));
        sampler.add(exemplar(10, 2.0));
        sampler.add(exemplar(20, 3.0));

        let sampled = sampler.sample();
        let times: Vec<_> = sampled.iter().map(|e| e.timestamp.timestamp()).collect();
        assert_eq!(times, [10, 20, 30]);
        assert!(sampler.sample().is_empty());
    }

    #[test]
    fn test_standard_deviation() {
        let mut sampler = StdDevSampler::new();
        assert_eq!(sampler.standard_deviation(), 0.0);
        for value in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            sampler.update(value);
        }
        let expected = (32.0_f64 / 7.0).sqrt();
        assert!((sampler.standard_deviation() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_identical_values_keep_one_per_bucket() {
        let mut sampler = StdDevSampler::new();
        sampler.set_step(TimeDelta::seconds(60));
        for secs in [0, 10, 20, 60, 70] {
            sampler.add(exemplar(secs, 5.0));
        }

        let sampled = sampler.sample();
        assert_eq!(sampled.len(), 2);
        assert_eq!(sampled[0].timestamp.timestamp(), 0);
        assert_eq!(sampled[1].timestamp.timestamp(), 60);
    }

    #[test]
    fn test_outliers_survive() {
        let mut sampler = StdDevSampler::new();
        sampler.set_step(TimeDelta::seconds(60));
        for (secs, value) in [(1, 10.0), (2, 10.5), (3, 11.0), (4, 1000.0), (5, 10.2)] {
            sampler.add(exemplar(secs, value));
        }
        for secs in 61..70 {
            sampler.add(exemplar(secs, 10.0));
        }

        let sampled = sampler.sample();
        let values: Vec<_> = sampled.iter().map(|e| e.value).collect();
        // The first bucket keeps the spike and the top of the cluster below it.
        assert_eq!(values, [11.0, 1000.0, 10.0]);
    }

    #[test]
    fn test_sample_resets_state() {
        let mut sampler = StdDevSampler::new();
        sampler.add(exemplar(0, 1.0));
        sampler.add(exemplar(1, 2.0));
        assert_eq!(sampler.sample().len(), 2);
        assert_eq!(sampler.standard_deviation(), 0.0);
        assert!(sampler.sample().is_empty());
    }
}
