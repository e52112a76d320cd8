//! Regions of interest: geometry, weighting mask and detection threshold.
//!
//! A [`Roi`] owns its mask exclusively. Geometry changes that would push the
//! box outside the image are rejected with [`DetectionError::RoiBounds`] and
//! leave the ROI exactly as it was.
mod mask;

pub use mask::{
    create_gaussian_mask, create_rect_mask, gaussian_weights, GaussianFit, GaussianMask,
};

use crate::config::RoiConfig;
use crate::error::{DetectionError, Result};
use crate::histogram::{adaptive_bin_count, adaptive_bounds, minimum_threshold};
use log::debug;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Shape of the weighting mask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MaskKind {
    #[default]
    Rect,
    Gaussian { sigma_x: f64, sigma_y: f64 },
}

#[derive(Clone, Debug)]
pub struct Roi {
    id: usize,
    center_x: usize,
    center_y: usize,
    width: usize,
    height: usize,
    kind: MaskKind,
    mask: DMatrix<f64>,
    threshold: f64,
    auto_threshold: bool,
}

impl Roi {
    /// Rectangular ROI on an image of `image_shape = (rows, cols)`.
    pub fn rect(
        id: usize,
        image_shape: (usize, usize),
        center: (usize, usize),
        size: (usize, usize),
    ) -> Result<Self> {
        let mask = create_rect_mask(image_shape, center, size)?;
        Ok(Self {
            id,
            center_x: center.0,
            center_y: center.1,
            width: size.0,
            height: size.1,
            kind: MaskKind::Rect,
            mask,
            threshold: 1.0,
            auto_threshold: true,
        })
    }

    pub fn from_config(id: usize, image_shape: (usize, usize), config: &RoiConfig) -> Result<Self> {
        let mut roi = Self::rect(
            id,
            image_shape,
            (config.center_x, config.center_y),
            (config.width, config.height),
        )?;
        if let MaskKind::Gaussian { sigma_x, sigma_y } = config.mask {
            roi.apply_gaussian((config.center_x as f64, config.center_y as f64), (sigma_x, sigma_y))?;
        }
        roi.threshold = config.threshold;
        roi.auto_threshold = config.auto_threshold;
        Ok(roi)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// `(center_x, center_y)` in pixels.
    pub fn center(&self) -> (usize, usize) {
        (self.center_x, self.center_y)
    }

    /// `(width, height)` in pixels.
    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn kind(&self) -> MaskKind {
        self.kind
    }

    pub fn mask(&self) -> &DMatrix<f64> {
        &self.mask
    }

    /// `(rows, cols)` of the image the mask was built for.
    pub fn image_shape(&self) -> (usize, usize) {
        self.mask.shape()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_auto_threshold(&self) -> bool {
        self.auto_threshold
    }

    /// Number of pixels the mask integrates over. A rectangle counts its
    /// pixels; a Gaussian aperture reports its effective size `(Σm)² / Σm²`.
    pub fn pixel_count(&self) -> f64 {
        match self.kind {
            MaskKind::Rect => self.mask.sum(),
            MaskKind::Gaussian { .. } => {
                let sq = self.mask.norm_squared();
                if sq > 0.0 {
                    self.mask.sum().powi(2) / sq
                } else {
                    0.0
                }
            }
        }
    }

    /// `"xc ; yc ; size"` descriptor used in record tables.
    pub fn descriptor(&self) -> String {
        format!("{} ; {} ; {}", self.center_x, self.center_y, self.width.max(self.height))
    }

    /// Replace the mask with a Gaussian aperture fitted on `frame`.
    pub fn fit_gaussian(
        &mut self,
        frame: &DMatrix<f64>,
        center_guess: (usize, usize),
        window: usize,
    ) -> Result<()> {
        match create_gaussian_mask(frame, center_guess, window)? {
            GaussianMask::Fitted { mask, fit } => {
                self.center_x = fit.center.0.round().max(0.0) as usize;
                self.center_y = fit.center.1.round().max(0.0) as usize;
                self.kind = MaskKind::Gaussian {
                    sigma_x: fit.sigma.0,
                    sigma_y: fit.sigma.1,
                };
                self.mask = mask;
            }
            GaussianMask::Fallback { mask, center } => {
                self.center_x = center.0;
                self.center_y = center.1;
                self.width = 1;
                self.height = 1;
                self.kind = MaskKind::Rect;
                self.mask = mask;
            }
        }
        Ok(())
    }

    fn apply_gaussian(&mut self, center: (f64, f64), sigma: (f64, f64)) -> Result<()> {
        let shape = self.image_shape();
        let mask = gaussian_weights(shape, center, sigma).ok_or_else(|| {
            DetectionError::Parse(format!("invalid gaussian widths {sigma:?}"))
        })?;
        self.kind = MaskKind::Gaussian {
            sigma_x: sigma.0,
            sigma_y: sigma.1,
        };
        self.mask = mask;
        Ok(())
    }

    /// Move the ROI. A rectangular mask is rebuilt from the stored size; a
    /// Gaussian mask keeps its fitted widths and is only re-centred.
    pub fn translate(&mut self, center_x: usize, center_y: usize) -> Result<()> {
        let shape = self.image_shape();
        let mask = match self.kind {
            MaskKind::Rect => {
                create_rect_mask(shape, (center_x, center_y), (self.width, self.height))?
            }
            MaskKind::Gaussian { sigma_x, sigma_y } => {
                if center_x >= shape.1 || center_y >= shape.0 {
                    return Err(self.bounds_error(center_x, center_y, shape));
                }
                gaussian_weights(
                    shape,
                    (center_x as f64, center_y as f64),
                    (sigma_x, sigma_y),
                )
                .ok_or_else(|| self.bounds_error(center_x, center_y, shape))?
            }
        };
        self.center_x = center_x;
        self.center_y = center_y;
        self.mask = mask;
        Ok(())
    }

    /// Change the box size. Only rectangular masks depend on it.
    pub fn resize(&mut self, width: usize, height: usize) -> Result<()> {
        if self.kind == MaskKind::Rect {
            let shape = self.image_shape();
            self.mask = create_rect_mask(shape, (self.center_x, self.center_y), (width, height))?;
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    pub fn set_auto_threshold(&mut self, auto: bool) {
        self.auto_threshold = auto;
    }

    /// Recompute the threshold from `counts` when automatic thresholding is
    /// on, and return the threshold now in force.
    pub fn auto_threshold(&mut self, counts: &[f64]) -> f64 {
        if self.auto_threshold {
            self.threshold = auto_threshold(counts);
            debug!("Roi[{}]::auto_threshold -> {:.2}", self.id, self.threshold);
        }
        self.threshold
    }

    fn bounds_error(&self, cx: usize, cy: usize, shape: (usize, usize)) -> DetectionError {
        DetectionError::RoiBounds {
            cx,
            cy,
            width: self.width,
            height: self.height,
            rows: shape.0,
            cols: shape.1,
        }
    }
}

/// Histogram-minimum threshold over the adaptive bin count; the mean of the
/// counts when that fails or is not positive; 1 with no counts.
pub fn auto_threshold(counts: &[f64]) -> f64 {
    let finite: Vec<f64> = counts.iter().copied().filter(|c| c.is_finite()).collect();
    if finite.is_empty() {
        return 1.0;
    }
    let (lo, hi) = adaptive_bounds(&finite);
    let bins = adaptive_bin_count(finite.len(), lo, hi);
    match minimum_threshold(&finite, bins) {
        Some(t) if t > 0.0 => t,
        _ => finite.iter().sum::<f64>() / finite.len() as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_rejection_leaves_roi_unchanged() {
        let mut roi = Roi::rect(0, (20, 20), (10, 10), (4, 4)).expect("in bounds");
        let before = roi.mask().clone();
        assert!(roi.translate(19, 10).is_err());
        assert_eq!(roi.center(), (10, 10));
        assert_eq!(roi.mask(), &before);
        roi.translate(5, 6).expect("in bounds");
        assert_eq!(roi.center(), (5, 6));
        assert_eq!(roi.mask()[(6, 5)], 1.0);
        assert_eq!(roi.mask().sum(), 16.0);
        assert_eq!(roi.pixel_count(), 16.0);
    }

    #[test]
    fn gaussian_translate_keeps_widths() {
        let mut roi = Roi::rect(1, (30, 30), (15, 15), (5, 5)).expect("in bounds");
        roi.apply_gaussian((15.0, 15.0), (2.0, 3.0)).expect("valid widths");
        roi.translate(10, 12).expect("in image");
        assert_eq!(
            roi.kind(),
            MaskKind::Gaussian {
                sigma_x: 2.0,
                sigma_y: 3.0
            }
        );
        let (r, c) = roi.mask().iamax_full();
        assert_eq!((c, r), (10, 12));
        assert!((roi.mask().sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn resize_is_validated() {
        let mut roi = Roi::rect(0, (10, 10), (5, 5), (2, 2)).expect("in bounds");
        assert!(roi.resize(12, 2).is_err());
        assert_eq!(roi.size(), (2, 2));
        roi.resize(3, 3).expect("in bounds");
        assert_eq!(roi.mask().sum(), 9.0);
    }

    #[test]
    fn auto_threshold_fallbacks() {
        assert_eq!(auto_threshold(&[]), 1.0);
        assert_eq!(auto_threshold(&[4.0, 4.0, 4.0]), 4.0);

        let mut counts: Vec<f64> = (0..300).map(|i| 100.0 + (i % 15) as f64).collect();
        counts.extend((0..150).map(|i| 400.0 + (i % 15) as f64));
        let t = auto_threshold(&counts);
        assert!(t > 115.0 && t < 400.0, "t={t}");
    }

    #[test]
    fn manual_threshold_is_kept() {
        let mut roi = Roi::rect(0, (10, 10), (5, 5), (2, 2)).expect("in bounds");
        roi.set_auto_threshold(false);
        roi.set_threshold(42.0);
        assert_eq!(roi.auto_threshold(&[1.0, 2.0, 300.0]), 42.0);
    }
}
