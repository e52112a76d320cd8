//! Rectangular and Gaussian weighting masks.
//!
//! Masks are `rows × cols` matrices aligned with the frame: row index is the
//! image y coordinate, column index the image x coordinate.
use crate::error::{DetectionError, Result};
use crate::fit::lm::{optimize, LmConfig};
use crate::fit::models::OffsetGaussian;
use log::{debug, warn};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Half-open `[start, end)` span of `size` pixels around `center`.
fn span(center: usize, size: usize) -> Option<(usize, usize)> {
    let start = center.checked_sub(size / 2)?;
    Some((start, center + size / 2 + size % 2))
}

/// Unit weights inside the `width × height` box centred on
/// `(center_x, center_y)`, zero elsewhere.
///
/// Fails with [`DetectionError::RoiBounds`] when any part of the box would
/// fall outside `image_shape`.
pub fn create_rect_mask(
    image_shape: (usize, usize),
    center: (usize, usize),
    size: (usize, usize),
) -> Result<DMatrix<f64>> {
    let (rows, cols) = image_shape;
    let (cx, cy) = center;
    let (width, height) = size;
    let bounds = DetectionError::RoiBounds {
        cx,
        cy,
        width,
        height,
        rows,
        cols,
    };
    if width == 0 || height == 0 {
        return Err(bounds);
    }
    let (Some((c0, c1)), Some((r0, r1))) = (span(cx, width), span(cy, height)) else {
        return Err(bounds);
    };
    if c1 > cols || r1 > rows {
        return Err(bounds);
    }
    let mut mask = DMatrix::<f64>::zeros(rows, cols);
    mask.view_mut((r0, c0), (r1 - r0, c1 - c0)).fill(1.0);
    Ok(mask)
}

/// Separable Gaussian weights `exp(−(x−x0)²/2σx² − (y−y0)²/2σy²)` normalised
/// to unit sum. Returns `None` for degenerate widths.
pub fn gaussian_weights(
    image_shape: (usize, usize),
    center: (f64, f64),
    sigma: (f64, f64),
) -> Option<DMatrix<f64>> {
    let (rows, cols) = image_shape;
    let (x0, y0) = center;
    let (sx, sy) = sigma;
    let usable = |v: f64| v.is_finite() && v > 0.0;
    if !(x0.is_finite() && y0.is_finite() && usable(sx) && usable(sy)) || rows == 0 || cols == 0 {
        return None;
    }
    let gx: Vec<f64> = (0..cols)
        .map(|c| (-(c as f64 - x0).powi(2) / (2.0 * sx * sx)).exp())
        .collect();
    let gy: Vec<f64> = (0..rows)
        .map(|r| (-(r as f64 - y0).powi(2) / (2.0 * sy * sy)).exp())
        .collect();
    let mask = DMatrix::from_fn(rows, cols, |r, c| gy[r] * gx[c]);
    let total = mask.sum();
    (total.is_finite() && total > 0.0).then(|| mask / total)
}

/// Fitted Gaussian aperture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GaussianFit {
    /// Fitted centre `(x, y)` in pixels.
    pub center: (f64, f64),
    /// Fitted widths `(σx, σy)` in pixels.
    pub sigma: (f64, f64),
}

/// Outcome of [`create_gaussian_mask`].
#[derive(Clone, Debug)]
pub enum GaussianMask {
    Fitted { mask: DMatrix<f64>, fit: GaussianFit },
    /// Non-finite fit: a single pixel at `center`.
    Fallback {
        mask: DMatrix<f64>,
        center: (usize, usize),
    },
}

impl GaussianMask {
    pub fn mask(&self) -> &DMatrix<f64> {
        match self {
            GaussianMask::Fitted { mask, .. } | GaussianMask::Fallback { mask, .. } => mask,
        }
    }
}

/// Build a Gaussian aperture from a calibration frame.
///
/// The brightest pixel within `window` pixels of `center_guess` seeds two
/// independent offset-Gaussian fits, one along the row and one along the
/// column through that pixel. A fit that does not converge or yields any
/// non-finite parameter degrades to a 1×1 mask at the fitted (or brightest)
/// pixel.
pub fn create_gaussian_mask(
    frame: &DMatrix<f64>,
    center_guess: (usize, usize),
    window: usize,
) -> Result<GaussianMask> {
    let (rows, cols) = frame.shape();
    let (gx, gy) = center_guess;
    if gx >= cols || gy >= rows {
        return Err(DetectionError::RoiBounds {
            cx: gx,
            cy: gy,
            width: 2 * window + 1,
            height: 2 * window + 1,
            rows,
            cols,
        });
    }
    let (r0, r1) = (gy.saturating_sub(window), (gy + window + 1).min(rows));
    let (c0, c1) = (gx.saturating_sub(window), (gx + window + 1).min(cols));
    let mut brightest = (gx, gy);
    let mut best = f64::NEG_INFINITY;
    for r in r0..r1 {
        for c in c0..c1 {
            let v = frame[(r, c)];
            if v > best {
                best = v;
                brightest = (c, r);
            }
        }
    }
    let (bx, by) = brightest;

    let xs: Vec<f64> = (c0..c1).map(|c| c as f64).collect();
    let row_profile: Vec<f64> = (c0..c1).map(|c| frame[(by, c)]).collect();
    let ys: Vec<f64> = (r0..r1).map(|r| r as f64).collect();
    let col_profile: Vec<f64> = (r0..r1).map(|r| frame[(r, bx)]).collect();

    let fit_x = fit_profile(&xs, &row_profile);
    let fit_y = fit_profile(&ys, &col_profile);

    if let (Some((x0, sx)), Some((y0, sy))) = (fit_x, fit_y) {
        if let Some(mask) = gaussian_weights((rows, cols), (x0, y0), (sx, sy)) {
            debug!("create_gaussian_mask: centre=({x0:.2}, {y0:.2}) sigma=({sx:.2}, {sy:.2})");
            return Ok(GaussianMask::Fitted {
                mask,
                fit: GaussianFit {
                    center: (x0, y0),
                    sigma: (sx, sy),
                },
            });
        }
    }

    let pick = |fit: Option<(f64, f64)>, fallback: usize, limit: usize| {
        fit.map(|(c, _)| c)
            .filter(|c| c.is_finite() && *c >= 0.0)
            .map_or(fallback, |c| (c.round() as usize).min(limit - 1))
    };
    let center = (pick(fit_x, bx, cols), pick(fit_y, by, rows));
    warn!(
        "create_gaussian_mask: fit failed near ({bx}, {by}); using 1x1 mask at {:?}",
        center
    );
    let mask = create_rect_mask((rows, cols), center, (1, 1))?;
    Ok(GaussianMask::Fallback { mask, center })
}

/// Starting `[amplitude, centre, σ, offset]` for a profile fit: peak height
/// above the floor, position of the maximum, half-width over √2, floor.
fn profile_seed(x: &[f64], y: &[f64]) -> Option<[f64; 4]> {
    let (imax, &ymax) = y.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1))?;
    let ymin = y.iter().copied().fold(f64::INFINITY, f64::min);
    let amplitude = ymax - ymin;
    if !(amplitude > 0.0) {
        return None;
    }
    let half = ymin + 0.5 * amplitude;
    let right = y[imax..].iter().position(|&v| v < half);
    let left = y[..=imax].iter().rev().position(|&v| v < half);
    let half_width = match (left, right) {
        (Some(l), Some(r)) => 0.5 * (l + r) as f64,
        (Some(d), None) | (None, Some(d)) => d as f64,
        (None, None) => 0.25 * x.len() as f64,
    };
    let sigma0 = (half_width / std::f64::consts::SQRT_2).max(0.5);
    Some([amplitude, x[imax], sigma0, ymin])
}

/// `(centre, σ)` of an offset Gaussian fitted to `(x, y)`.
fn fit_profile(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    if x.len() < 4 {
        return None;
    }
    let init = profile_seed(x, y)?;
    let res = optimize(&OffsetGaussian, x, y, init, &LmConfig::default());
    let [fitted_amplitude, center, sigma, _] = res.params;
    let finite = res.params.iter().all(|p| p.is_finite());
    (res.converged && finite && fitted_amplitude > 0.0).then_some((center, sigma))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spot(rows: usize, cols: usize, x0: f64, y0: f64, sigma: f64) -> DMatrix<f64> {
        DMatrix::from_fn(rows, cols, |r, c| {
            let d2 = (c as f64 - x0).powi(2) + (r as f64 - y0).powi(2);
            10.0 + 500.0 * (-d2 / (2.0 * sigma * sigma)).exp()
        })
    }

    #[test]
    fn profile_seed_scales_half_width() {
        let x: Vec<f64> = (10..17).map(f64::from).collect();
        let y = [3.0, 3.0, 4.0, 5.0, 4.0, 3.0, 3.0];
        let [amplitude, centre, sigma, offset] = profile_seed(&x, &y).expect("has a peak");
        assert_eq!(amplitude, 2.0);
        assert_eq!(centre, 13.0);
        assert!((sigma - std::f64::consts::SQRT_2).abs() < 1e-12);
        assert_eq!(offset, 3.0);
        assert!(profile_seed(&x, &[1.0; 7]).is_none());
    }

    #[test]
    fn rect_mask_covers_box() {
        let mask = create_rect_mask((10, 12), (5, 4), (3, 2)).expect("in bounds");
        assert_eq!(mask.sum(), 6.0);
        assert_eq!(mask[(3, 4)], 1.0);
        assert_eq!(mask[(4, 6)], 1.0);
        assert_eq!(mask[(5, 5)], 0.0);
        assert_eq!(mask[(4, 3)], 0.0);
    }

    #[test]
    fn rect_mask_rejects_out_of_bounds() {
        assert!(matches!(
            create_rect_mask((10, 10), (0, 5), (3, 3)),
            Err(DetectionError::RoiBounds { .. })
        ));
        assert!(create_rect_mask((10, 10), (9, 9), (3, 3)).is_err());
        assert!(create_rect_mask((10, 10), (9, 9), (2, 2)).is_ok());
        assert!(create_rect_mask((10, 10), (9, 9), (1, 1)).is_ok());
    }

    #[test]
    fn gaussian_mask_recovers_spot() {
        let frame = spot(32, 40, 21.3, 14.6, 2.0);
        let out = create_gaussian_mask(&frame, (19, 13), 8).expect("guess in image");
        let GaussianMask::Fitted { mask, fit } = out else {
            panic!("expected a fitted mask");
        };
        assert!((mask.sum() - 1.0).abs() < 1e-9);
        assert!((fit.center.0 - 21.3).abs() < 0.1);
        assert!((fit.center.1 - 14.6).abs() < 0.1);
        assert!((fit.sigma.0 - 2.0).abs() < 0.1);
    }

    #[test]
    fn flat_frame_falls_back_to_single_pixel() {
        let frame = DMatrix::from_element(16, 16, 3.0);
        let out = create_gaussian_mask(&frame, (8, 8), 4).expect("guess in image");
        assert!(matches!(out, GaussianMask::Fallback { .. }));
        assert_eq!(out.mask().sum(), 1.0);
    }
}
