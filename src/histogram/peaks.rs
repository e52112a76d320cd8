//! Local-maximum peak finding on occupancy histograms.
//!
//! The candidate search mirrors the usual signal-processing definition:
//! plateau-aware local maxima, thinned by a minimum index separation with the
//! tallest peaks taking priority, then characterised by topographic
//! prominence and width at half prominence. Edge bins never qualify.
use super::Histogram;
use crate::fit::{Peak, PeakRole};

/// One local maximum in bin-index units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeakCandidate {
    pub index: usize,
    pub height: f64,
    pub prominence: f64,
    /// Width at half prominence, in bins.
    pub width: f64,
}

/// Separation step used by [`locate`] for a histogram with `bins` bins.
pub fn separation_increment(bins: usize) -> usize {
    5 * (bins / 500) + 1
}

/// Local maxima of `values` at least `distance` bins apart.
pub fn find_peaks(values: &[f64], distance: usize) -> Vec<PeakCandidate> {
    let maxima = local_maxima(values);
    let kept = select_by_distance(&maxima, values, distance.max(1));
    kept.into_iter()
        .filter_map(|index| {
            let (prominence, left_base, right_base) = prominence(values, index);
            if prominence <= 0.0 {
                return None;
            }
            let width = width_at_half_prominence(values, index, prominence, left_base, right_base);
            Some(PeakCandidate {
                index,
                height: values[index],
                prominence,
                width,
            })
        })
        .collect()
}

/// At most two dominant peaks of `hist`, ordered by position.
///
/// The minimum separation starts at one bin and grows by
/// [`separation_increment`] until no more than two maxima remain. Once the
/// separation exceeds the bin count only a single maximum can survive, so the
/// loop always terminates.
pub fn locate(hist: &Histogram) -> Vec<Peak> {
    let values: Vec<f64> = hist.occupancy.iter().map(|&c| c as f64).collect();
    let bins = values.len();
    let step = separation_increment(bins);
    let mut distance = 1;
    let mut found = find_peaks(&values, distance);
    while found.len() > 2 && distance <= bins {
        distance += step;
        found = find_peaks(&values, distance);
    }
    found.truncate(2);

    let bw = hist.bin_width();
    let roles = [PeakRole::Background, PeakRole::Signal];
    found
        .iter()
        .zip(roles)
        .map(|(c, role)| Peak {
            index: Some(c.index),
            amplitude: c.height,
            center: hist.edges[c.index] + 0.5 * bw,
            width: bw * c.width / 2.0,
            role,
        })
        .collect()
}

fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut out = Vec::new();
    if x.len() < 3 {
        return out;
    }
    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                // plateau midpoint, rounded down
                out.push((i + ahead - 1) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    out
}

fn select_by_distance(peaks: &[usize], x: &[f64], distance: usize) -> Vec<usize> {
    if distance <= 1 || peaks.len() < 2 {
        return peaks.to_vec();
    }
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| x[peaks[a]].total_cmp(&x[peaks[b]]).then(a.cmp(&b)));
    let mut keep = vec![true; peaks.len()];
    for &j in order.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }
    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&p, k)| k.then_some(p))
        .collect()
}

/// `(prominence, left_base, right_base)` of the maximum at `peak`.
fn prominence(x: &[f64], peak: usize) -> (f64, usize, usize) {
    let h = x[peak];
    let mut left_base = peak;
    let mut left_min = h;
    let mut i = peak;
    loop {
        if x[i] > h {
            break;
        }
        if x[i] < left_min {
            left_min = x[i];
            left_base = i;
        }
        if i == 0 {
            break;
        }
        i -= 1;
    }
    let mut right_base = peak;
    let mut right_min = h;
    for (j, &v) in x.iter().enumerate().skip(peak) {
        if v > h {
            break;
        }
        if v < right_min {
            right_min = v;
            right_base = j;
        }
    }
    (h - left_min.max(right_min), left_base, right_base)
}

fn width_at_half_prominence(
    x: &[f64],
    peak: usize,
    prominence: f64,
    left_base: usize,
    right_base: usize,
) -> f64 {
    let height = x[peak] - 0.5 * prominence;

    let mut i = peak;
    while left_base < i && height < x[i] {
        i -= 1;
    }
    let mut left = i as f64;
    if x[i] < height && i + 1 < x.len() {
        left += (height - x[i]) / (x[i + 1] - x[i]);
    }

    let mut i = peak;
    while i < right_base && height < x[i] {
        i += 1;
    }
    let mut right = i as f64;
    if x[i] < height && i > 0 {
        right -= (height - x[i]) / (x[i - 1] - x[i]);
    }
    (right - left).max(0.0)
}
