//! Histogram-minimum thresholding for bimodal count distributions.
use super::Histogram;
use log::debug;

const MAX_SMOOTHING_PASSES: usize = 10_000;

/// Threshold at the valley between the two modes of `counts`.
///
/// The counts are binned into `bins` equal bins over `[min, max]` and the
/// histogram is smoothed with a three-bin running mean until exactly two
/// maxima remain. The threshold is the centre of the lowest bin between them.
/// Returns `None` for empty or constant data, or when no bimodal shape emerges.
pub fn minimum_threshold(counts: &[f64], bins: usize) -> Option<f64> {
    let finite: Vec<f64> = counts.iter().copied().filter(|c| c.is_finite()).collect();
    let lo = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if finite.is_empty() || hi <= lo || bins < 3 {
        return None;
    }
    let hist = Histogram::uniform(&finite, lo, hi, bins);
    let centers = hist.centers();
    let mut smooth: Vec<f64> = hist.occupancy.iter().map(|&c| c as f64).collect();

    for pass in 0..MAX_SMOOTHING_PASSES {
        let maxima = maxima_indices(&smooth);
        if maxima.len() == 2 {
            let (a, b) = (maxima[0], maxima[1]);
            let valley = (a..=b).min_by(|&i, &j| smooth[i].total_cmp(&smooth[j]))?;
            debug!("minimum_threshold: bimodal after {pass} smoothing passes");
            return Some(centers[valley]);
        }
        if maxima.len() < 2 {
            return None;
        }
        smooth = running_mean3(&smooth);
    }
    debug!("minimum_threshold: no bimodal shape after {MAX_SMOOTHING_PASSES} passes");
    None
}

/// Three-wide mean with reflected edges.
fn running_mean3(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    (0..n)
        .map(|i| {
            let left = x[i.saturating_sub(1)];
            let right = x[(i + 1).min(n - 1)];
            (left + x[i] + right) / 3.0
        })
        .collect()
}

/// Indices where a rise turns into a fall; a plateau counts once at its start.
fn maxima_indices(x: &[f64]) -> Vec<usize> {
    let mut out = Vec::new();
    let mut rising = true;
    for i in 0..x.len().saturating_sub(1) {
        if rising {
            if x[i + 1] < x[i] {
                rising = false;
                out.push(i);
            }
        } else if x[i + 1] > x[i] {
            rising = true;
        }
    }
    out
}
