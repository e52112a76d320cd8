//! Occupancy histograms over integrated counts.
//!
//! Bins are half-open `[e_i, e_{i+1})` except the last, which also includes
//! its right edge. Values outside the edge range are ignored. The adaptive
//! bin count grows with the number of shots and with the relative spread of
//! the data, so it is a pure function of the input series.
mod minimum;
mod peaks;

pub use minimum::minimum_threshold;
pub use peaks::{find_peaks, locate, separation_increment, PeakCandidate};

use serde::{Deserialize, Serialize};

/// Lower bound on the number of bins of an adaptive histogram.
pub const MIN_BINS: usize = 2;

/// Binned counts. `edges.len() == occupancy.len() + 1`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub edges: Vec<f64>,
    pub occupancy: Vec<u64>,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            edges: vec![0.0, 1.0],
            occupancy: vec![0],
        }
    }
}

impl Histogram {
    /// Build a histogram of `counts`.
    ///
    /// With `fixed_bins` the edges are used verbatim (at least two strictly
    /// increasing values are required, otherwise the adaptive layout is used).
    /// An empty series yields a single empty default bin.
    pub fn build(counts: &[f64], fixed_bins: Option<&[f64]>) -> Self {
        if let Some(edges) = fixed_bins.filter(|e| valid_edges(e)) {
            return Self::with_edges(counts, edges.to_vec());
        }
        let finite: Vec<f64> = counts.iter().copied().filter(|c| c.is_finite()).collect();
        if finite.is_empty() {
            return Self::default();
        }
        let (lo, hi) = adaptive_bounds(&finite);
        let bins = adaptive_bin_count(finite.len(), lo, hi);
        Self::uniform(&finite, lo, hi, bins)
    }

    /// `bins` equal-width bins spanning `[lo, hi]`.
    pub fn uniform(counts: &[f64], lo: f64, hi: f64, bins: usize) -> Self {
        let bins = bins.max(1);
        let step = (hi - lo) / bins as f64;
        let edges: Vec<f64> = (0..=bins)
            .map(|i| if i == bins { hi } else { lo + step * i as f64 })
            .collect();
        let mut occupancy = vec![0u64; bins];
        if step > 0.0 {
            for &c in counts {
                if !(lo..=hi).contains(&c) {
                    continue;
                }
                let idx = (((c - lo) / step) as usize).min(bins - 1);
                occupancy[idx] += 1;
            }
        }
        Self { edges, occupancy }
    }

    fn with_edges(counts: &[f64], edges: Vec<f64>) -> Self {
        let mut occupancy = vec![0u64; edges.len() - 1];
        for &c in counts {
            if let Some(idx) = bin_index(&edges, c) {
                occupancy[idx] += 1;
            }
        }
        Self { edges, occupancy }
    }

    pub fn bin_count(&self) -> usize {
        self.occupancy.len()
    }

    /// Width of the first bin; all adaptive bins share it.
    pub fn bin_width(&self) -> f64 {
        match self.edges.as_slice() {
            [a, b, ..] => b - a,
            _ => 1.0,
        }
    }

    pub fn centers(&self) -> Vec<f64> {
        self.edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
    }

    pub fn total(&self) -> u64 {
        self.occupancy.iter().sum()
    }

    pub fn min_edge(&self) -> f64 {
        self.edges.first().copied().unwrap_or(0.0)
    }

    pub fn max_edge(&self) -> f64 {
        self.edges.last().copied().unwrap_or(1.0)
    }

    /// Index of the bin containing `value`, clamped to the histogram range.
    pub fn clamped_index(&self, value: f64) -> usize {
        if value <= self.min_edge() {
            return 0;
        }
        bin_index(&self.edges, value).unwrap_or(self.bin_count().saturating_sub(1))
    }

    /// Mean of the bin edges; seeds the threshold before any peaks are known.
    pub fn mid_threshold(&self) -> f64 {
        self.edges.iter().sum::<f64>() / self.edges.len().max(1) as f64
    }
}

fn valid_edges(edges: &[f64]) -> bool {
    edges.len() >= 2
        && edges.iter().all(|e| e.is_finite())
        && edges.windows(2).all(|w| w[1] > w[0])
}

fn bin_index(edges: &[f64], value: f64) -> Option<usize> {
    let (first, last) = (*edges.first()?, *edges.last()?);
    if !(first..=last).contains(&value) {
        return None;
    }
    let bins = edges.len() - 1;
    let upper = edges.partition_point(|&e| e <= value);
    Some(upper.saturating_sub(1).min(bins - 1))
}

/// `[0.97·min, 1.02·max]`, with the margins taken on magnitudes so that
/// negative data stays inside, widened to `±0.5` around a degenerate spread.
pub fn adaptive_bounds(counts: &[f64]) -> (f64, f64) {
    let min = counts.iter().copied().fold(f64::INFINITY, f64::min);
    let max = counts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(min.is_finite() && max.is_finite()) {
        return (0.0, 1.0);
    }
    let lo = min - 0.03 * min.abs();
    let hi = max + 0.02 * max.abs();
    if hi - lo > f64::EPSILON * hi.abs().max(1.0) {
        (lo, hi)
    } else {
        (lo - 0.5, hi + 0.5)
    }
}

/// `round(15 + n/100 + 15·min(((hi − lo)/hi)², 1))`, at least [`MIN_BINS`].
pub fn adaptive_bin_count(samples: usize, lo: f64, hi: f64) -> usize {
    let spread = if hi.abs() > f64::EPSILON {
        ((hi - lo) / hi).powi(2).min(1.0)
    } else {
        1.0
    };
    let raw = 15.0 + samples as f64 / 100.0 + 15.0 * spread;
    (raw.round() as usize).max(MIN_BINS)
}
