use std::fmt::Display;

/// Summary of integer samples (tree depths, leaf sizes).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stats {
    pub count: usize,
    pub min: usize,
    pub max: usize,
    pub sum: usize,
}

impl Stats {
    pub fn new_single(v: usize) -> Self {
        Stats {
            count: 1,
            min: v,
            max: v,
            sum: v,
        }
    }

    pub fn add_sample(&mut self, value: usize) {
        *self = self.merge(&Stats::new_single(value));
    }

    pub fn merge(&self, other: &Self) -> Self {
        Stats {
            count: self.count + other.count,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            sum: self.sum + other.sum,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Mean of the samples, zero if there are none.
    pub fn avg(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.sum as f32 / self.count as f32
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            count: 0,
            min: usize::MAX,
            max: 0,
            sum: 0,
        }
    }
}

impl Extend<usize> for Stats {
    fn extend<I: IntoIterator<Item = usize>>(&mut self, samples: I) {
        for sample in samples {
            self.add_sample(sample);
        }
    }
}

impl FromIterator<usize> for Stats {
    fn from_iter<I: IntoIterator<Item = usize>>(samples: I) -> Self {
        let mut stats = Stats::default();
        stats.extend(samples);
        stats
    }
}

impl Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "no samples");
        }
        write!(
            f,
            "{} - {}; avg {:.1}; {} samples",
            self.min,
            self.max,
            self.avg(),
            self.count
        )
    }
}
