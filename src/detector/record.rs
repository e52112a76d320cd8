//! Per-epoch detection records and their persisted column schema.
//!
//! Column order and types are fixed by [`Column::ALL`]; the table writer and
//! loader both go through it, so reordering the enum changes the file layout.
use super::params::NoiseModel;
use crate::confidence::interval;
use crate::error::{DetectionError, Result};
use crate::fit::PeakPair;
use crate::persist::{Cell, ColumnType, TableRow};
use crate::shots::ShotSeries;
use crate::threshold::Fidelity;
use serde::{Deserialize, Serialize};

/// One column of the record table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Column {
    FileId,
    StartFile,
    EndFile,
    RoiDescriptor,
    CountsAboveBelow,
    UserVariable,
    ImagesProcessed,
    LoadingProbability,
    LoadingError,
    LoadingLowerError,
    LoadingUpperError,
    BackgroundPeakCount,
    BackgroundPeakCountError,
    BackgroundPeakWidth,
    BackgroundNoiseBudget,
    BackgroundMean,
    BackgroundStdev,
    SignalPeakCount,
    SignalPeakCountError,
    SignalPeakWidth,
    SignalNoiseBudget,
    SignalMean,
    SignalStdev,
    Separation,
    SeparationError,
    Fidelity,
    FidelityError,
    SignalToNoise,
    SignalToNoiseError,
    Threshold,
    Include,
}

const SCHEMA: [(&str, ColumnType); 31] = [
    ("File ID", ColumnType::Int),
    ("Start file #", ColumnType::Int),
    ("End file #", ColumnType::Int),
    ("ROI xc ; yc ; size", ColumnType::Text),
    ("Counts above : below threshold", ColumnType::Text),
    ("User variable", ColumnType::Float),
    ("Number of images processed", ColumnType::Int),
    ("Loading probability", ColumnType::Float),
    ("Error in Loading probability", ColumnType::Float),
    ("Lower Error in Loading probability", ColumnType::Float),
    ("Upper Error in Loading probability", ColumnType::Float),
    ("Background peak count", ColumnType::Int),
    ("Error in Background peak count", ColumnType::Float),
    ("Background peak width", ColumnType::Float),
    ("sqrt(Nr^2 + Nbg*fg/A)", ColumnType::Float),
    ("Background mean", ColumnType::Float),
    ("Background standard deviation", ColumnType::Float),
    ("Signal peak count", ColumnType::Int),
    ("Error in Signal peak count", ColumnType::Float),
    ("Signal peak width", ColumnType::Float),
    ("sqrt(Nr^2 + Ns*fg/A)", ColumnType::Float),
    ("Signal mean", ColumnType::Float),
    ("Signal standard deviation", ColumnType::Float),
    ("Separation", ColumnType::Float),
    ("Error in Separation", ColumnType::Float),
    ("Fidelity", ColumnType::Float),
    ("Error in Fidelity", ColumnType::Float),
    ("S/N", ColumnType::Float),
    ("Error in S/N", ColumnType::Float),
    ("Threshold", ColumnType::Float),
    ("Include", ColumnType::Bool),
];

impl Column {
    /// Every column in file order.
    pub const ALL: [Column; 31] = [
        Column::FileId,
        Column::StartFile,
        Column::EndFile,
        Column::RoiDescriptor,
        Column::CountsAboveBelow,
        Column::UserVariable,
        Column::ImagesProcessed,
        Column::LoadingProbability,
        Column::LoadingError,
        Column::LoadingLowerError,
        Column::LoadingUpperError,
        Column::BackgroundPeakCount,
        Column::BackgroundPeakCountError,
        Column::BackgroundPeakWidth,
        Column::BackgroundNoiseBudget,
        Column::BackgroundMean,
        Column::BackgroundStdev,
        Column::SignalPeakCount,
        Column::SignalPeakCountError,
        Column::SignalPeakWidth,
        Column::SignalNoiseBudget,
        Column::SignalMean,
        Column::SignalStdev,
        Column::Separation,
        Column::SeparationError,
        Column::Fidelity,
        Column::FidelityError,
        Column::SignalToNoise,
        Column::SignalToNoiseError,
        Column::Threshold,
        Column::Include,
    ];

    /// Header text in the third header row.
    pub fn name(self) -> &'static str {
        SCHEMA[self as usize].0
    }

    pub fn ty(self) -> ColumnType {
        SCHEMA[self as usize].1
    }
}

/// Statistics of one population (below or above threshold).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulationStats {
    /// Fitted centre, floored to whole counts.
    pub peak_count: i64,
    /// `σ / √N` of the fitted centre.
    pub peak_count_error: f64,
    pub peak_width: f64,
    /// Expected noise from read-out and shot noise at the peak centre.
    pub noise_budget: f64,
    /// Mean of the counts in this population.
    pub mean: f64,
    /// Sample standard deviation (N − 1) of the counts in this population.
    pub stdev: f64,
}

/// Aggregate statistics of one accumulation epoch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRecord {
    /// Position of the record in its detector's log.
    pub file_id: u64,
    pub start_file: u64,
    pub end_file: u64,
    pub roi: String,
    pub above: usize,
    pub below: usize,
    pub user_variable: f64,
    /// Every shot of the epoch, excluded ones included.
    pub processed: usize,
    pub loading_probability: f64,
    pub loading_error: f64,
    pub loading_lower_error: f64,
    pub loading_upper_error: f64,
    pub background: PopulationStats,
    pub signal: PopulationStats,
    pub separation: f64,
    pub separation_error: f64,
    pub fidelity: f64,
    pub fidelity_error: f64,
    pub signal_to_noise: f64,
    pub signal_to_noise_error: f64,
    pub threshold: f64,
    pub include: bool,
}

/// Everything a record is derived from.
#[derive(Clone, Debug)]
pub struct RecordInputs<'a> {
    pub file_id: u64,
    pub series: &'a ShotSeries,
    pub roi_descriptor: String,
    /// Pixels integrated by the mask, for the noise budget.
    pub pixels: f64,
    pub user_variable: f64,
    pub threshold: f64,
    /// Populations of a successful analysis; `None` zeroes the peak columns.
    pub peaks: Option<PeakPair>,
    pub fidelity: Fidelity,
    pub include: bool,
    pub noise: NoiseModel,
}

impl DetectionRecord {
    /// Derive the record columns from an epoch's shots and its analysis.
    ///
    /// A shot is occupied when its count is strictly above the threshold;
    /// only included shots are classified. When the analysis failed or either
    /// population has fewer than two shots the peak-derived columns are zero
    /// and the record is excluded.
    pub fn derive(inputs: &RecordInputs<'_>) -> Result<Self> {
        let series = inputs.series;
        let ids = series.shots.iter().map(|s| s.id);
        let (Some(start_file), Some(end_file)) = (ids.clone().min(), ids.max()) else {
            return Err(DetectionError::InsufficientData {
                stage: "detection record",
                found: 0,
                minimum: 1,
            });
        };

        let (above, below): (Vec<f64>, Vec<f64>) = series
            .counts()
            .into_iter()
            .partition(|&c| c > inputs.threshold);
        let loading = interval(above.len(), above.len() + below.len());

        let mut record = Self {
            file_id: inputs.file_id,
            start_file,
            end_file,
            roi: inputs.roi_descriptor.clone(),
            above: above.len(),
            below: below.len(),
            user_variable: inputs.user_variable,
            processed: series.len(),
            loading_probability: loading.probability,
            loading_error: loading.error,
            loading_lower_error: loading.lower_error,
            loading_upper_error: loading.upper_error,
            threshold: inputs.threshold,
            ..Self::default()
        };
        let (bg_mean, bg_sd) = sample_moments(&below);
        let (sig_mean, sig_sd) = sample_moments(&above);
        record.background.mean = bg_mean;
        record.background.stdev = bg_sd;
        record.signal.mean = sig_mean;
        record.signal.stdev = sig_sd;

        let Some(peaks) = inputs.peaks.filter(|_| above.len() >= 2 && below.len() >= 2) else {
            return Ok(record);
        };
        let (n0, n1) = (below.len() as f64, above.len() as f64);
        let (mu0, sig0) = (peaks.background.center, peaks.background.width);
        let (mu1, sig1) = (peaks.signal.center, peaks.signal.width);

        record.background.peak_count = mu0.floor() as i64;
        record.background.peak_count_error = sig0 / n0.sqrt();
        record.background.peak_width = sig0;
        record.background.noise_budget = inputs.noise.budget(inputs.pixels, mu0);
        record.signal.peak_count = mu1.floor() as i64;
        record.signal.peak_count_error = sig1 / n1.sqrt();
        record.signal.peak_width = sig1;
        record.signal.noise_budget = inputs.noise.budget(inputs.pixels, mu1);

        let sep = mu1 - mu0;
        let sep_err = (sig0.powi(2) / n0 + sig1.powi(2) / n1).sqrt();
        let width_sq = sig0.powi(2) + sig1.powi(2);
        let snr = finite_or_zero(sep / width_sq.sqrt());
        let snr_err = finite_or_zero(
            snr * ((sep_err / sep).powi(2)
                + (sig0.powi(2) / (2.0 * n0 - 2.0) + sig1.powi(2) / (2.0 * n1 - 2.0)) / width_sq)
                .sqrt(),
        );
        record.separation = sep;
        record.separation_error = sep_err;
        record.fidelity = inputs.fidelity.value;
        record.fidelity_error = inputs.fidelity.error;
        record.signal_to_noise = snr;
        record.signal_to_noise_error = snr_err;
        record.include = inputs.include;
        Ok(record)
    }

    /// Value of one column.
    pub fn cell(&self, column: Column) -> Cell {
        use Column::*;
        let (bg, sig) = (&self.background, &self.signal);
        match column {
            FileId => Cell::Int(self.file_id as i64),
            StartFile => Cell::Int(self.start_file as i64),
            EndFile => Cell::Int(self.end_file as i64),
            RoiDescriptor => Cell::Text(self.roi.clone()),
            CountsAboveBelow => Cell::Text(format!("{} : {}", self.above, self.below)),
            UserVariable => Cell::Float(self.user_variable),
            ImagesProcessed => Cell::Int(self.processed as i64),
            LoadingProbability => Cell::Float(self.loading_probability),
            LoadingError => Cell::Float(self.loading_error),
            LoadingLowerError => Cell::Float(self.loading_lower_error),
            LoadingUpperError => Cell::Float(self.loading_upper_error),
            BackgroundPeakCount => Cell::Int(bg.peak_count),
            BackgroundPeakCountError => Cell::Float(bg.peak_count_error),
            BackgroundPeakWidth => Cell::Float(bg.peak_width),
            BackgroundNoiseBudget => Cell::Float(bg.noise_budget),
            BackgroundMean => Cell::Float(bg.mean),
            BackgroundStdev => Cell::Float(bg.stdev),
            SignalPeakCount => Cell::Int(sig.peak_count),
            SignalPeakCountError => Cell::Float(sig.peak_count_error),
            SignalPeakWidth => Cell::Float(sig.peak_width),
            SignalNoiseBudget => Cell::Float(sig.noise_budget),
            SignalMean => Cell::Float(sig.mean),
            SignalStdev => Cell::Float(sig.stdev),
            Separation => Cell::Float(self.separation),
            SeparationError => Cell::Float(self.separation_error),
            Fidelity => Cell::Float(self.fidelity),
            FidelityError => Cell::Float(self.fidelity_error),
            SignalToNoise => Cell::Float(self.signal_to_noise),
            SignalToNoiseError => Cell::Float(self.signal_to_noise_error),
            Threshold => Cell::Float(self.threshold),
            Include => Cell::Bool(self.include),
        }
    }

    /// Overwrite one column from a table cell.
    pub fn set(&mut self, column: Column, value: &Cell) {
        use Column::*;
        let to_u64 = |c: &Cell| c.as_i64().max(0) as u64;
        match column {
            FileId => self.file_id = to_u64(value),
            StartFile => self.start_file = to_u64(value),
            EndFile => self.end_file = to_u64(value),
            RoiDescriptor => self.roi = value.as_text(),
            CountsAboveBelow => {
                let text = value.as_text();
                let mut parts = text.split(':').map(|p| p.trim().parse::<usize>().unwrap_or(0));
                self.above = parts.next().unwrap_or(0);
                self.below = parts.next().unwrap_or(0);
            }
            UserVariable => self.user_variable = value.as_f64(),
            ImagesProcessed => self.processed = to_u64(value) as usize,
            LoadingProbability => self.loading_probability = value.as_f64(),
            LoadingError => self.loading_error = value.as_f64(),
            LoadingLowerError => self.loading_lower_error = value.as_f64(),
            LoadingUpperError => self.loading_upper_error = value.as_f64(),
            BackgroundPeakCount => self.background.peak_count = value.as_i64(),
            BackgroundPeakCountError => self.background.peak_count_error = value.as_f64(),
            BackgroundPeakWidth => self.background.peak_width = value.as_f64(),
            BackgroundNoiseBudget => self.background.noise_budget = value.as_f64(),
            BackgroundMean => self.background.mean = value.as_f64(),
            BackgroundStdev => self.background.stdev = value.as_f64(),
            SignalPeakCount => self.signal.peak_count = value.as_i64(),
            SignalPeakCountError => self.signal.peak_count_error = value.as_f64(),
            SignalPeakWidth => self.signal.peak_width = value.as_f64(),
            SignalNoiseBudget => self.signal.noise_budget = value.as_f64(),
            SignalMean => self.signal.mean = value.as_f64(),
            SignalStdev => self.signal.stdev = value.as_f64(),
            Separation => self.separation = value.as_f64(),
            SeparationError => self.separation_error = value.as_f64(),
            Fidelity => self.fidelity = value.as_f64(),
            FidelityError => self.fidelity_error = value.as_f64(),
            SignalToNoise => self.signal_to_noise = value.as_f64(),
            SignalToNoiseError => self.signal_to_noise_error = value.as_f64(),
            Threshold => self.threshold = value.as_f64(),
            Include => self.include = value.as_bool(),
        }
    }
}

impl TableRow for DetectionRecord {
    fn columns() -> &'static [(&'static str, ColumnType)] {
        &SCHEMA
    }

    fn cells(&self) -> Vec<Cell> {
        Column::ALL.iter().map(|&c| self.cell(c)).collect()
    }

    fn from_cells(cells: &[Cell]) -> Self {
        let mut record = Self::default();
        for (&column, cell) in Column::ALL.iter().zip(cells) {
            record.set(column, cell);
        }
        record
    }
}

/// Stable sort of a record log by ascending user variable.
pub fn sort_by_user_variable(records: &mut [DetectionRecord]) {
    records.sort_by(|a, b| a.user_variable.total_cmp(&b.user_variable));
}

/// Mean and sample standard deviation; zeros where undefined.
fn sample_moments(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (mean, (ss / (n - 1.0)).sqrt())
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::{Peak, PeakRole};
    use crate::shots::Shot;

    fn shot(id: u64, count: f64) -> Shot {
        Shot {
            count,
            include: true,
            ..Shot::excluded(id)
        }
    }

    fn series(counts: &[f64]) -> ShotSeries {
        ShotSeries {
            epoch: 0,
            shots: counts
                .iter()
                .enumerate()
                .map(|(i, &c)| shot(10 + i as u64, c))
                .collect(),
        }
    }

    fn peaks() -> PeakPair {
        PeakPair {
            background: Peak::new(PeakRole::Background, 10.0, 100.5, 4.0),
            signal: Peak::new(PeakRole::Signal, 10.0, 300.0, 6.0),
        }
    }

    fn inputs(series: &ShotSeries, peaks: Option<PeakPair>) -> RecordInputs<'_> {
        RecordInputs {
            file_id: 3,
            series,
            roi_descriptor: "5 ; 6 ; 3".into(),
            pixels: 9.0,
            user_variable: 1.25,
            threshold: 200.0,
            peaks,
            fidelity: Fidelity {
                value: 0.99,
                error: 0.01,
            },
            include: true,
            noise: NoiseModel::default(),
        }
    }

    #[test]
    fn schema_order_is_fixed() {
        assert_eq!(Column::ALL.len(), SCHEMA.len());
        for (i, c) in Column::ALL.iter().enumerate() {
            assert_eq!(*c as usize, i);
        }
        assert_eq!(Column::FileId.name(), "File ID");
        assert_eq!(Column::Include.ty(), ColumnType::Bool);
        assert_eq!(Column::CountsAboveBelow.name(), "Counts above : below threshold");
    }

    #[test]
    fn derives_populations_and_loading() {
        let s = series(&[98.0, 102.0, 100.0, 298.0, 302.0]);
        let rec = DetectionRecord::derive(&inputs(&s, Some(peaks()))).expect("non-empty");
        assert_eq!((rec.above, rec.below), (2, 3));
        assert_eq!((rec.start_file, rec.end_file), (10, 14));
        assert_eq!(rec.processed, 5);
        assert!((rec.loading_probability - 0.4).abs() < 1e-12);
        assert!(rec.loading_probability - rec.loading_lower_error >= 0.0);
        assert_eq!(rec.background.peak_count, 100);
        assert_eq!(rec.signal.peak_count, 300);
        assert_eq!(rec.background.mean, 100.0);
        assert_eq!(rec.signal.stdev, 8.0f64.sqrt());
        assert!((rec.separation - 199.5).abs() < 1e-12);
        let snr = 199.5 / 52.0f64.sqrt();
        assert!((rec.signal_to_noise - snr).abs() < 1e-12);
        assert!(rec.include);
        assert_eq!(rec.fidelity, 0.99);
    }

    #[test]
    fn small_population_zeroes_peak_columns() {
        let s = series(&[98.0, 102.0, 100.0, 298.0]);
        let rec = DetectionRecord::derive(&inputs(&s, Some(peaks()))).expect("non-empty");
        assert_eq!(rec.background.peak_count, 0);
        assert_eq!(rec.separation, 0.0);
        assert_eq!(rec.fidelity, 0.0);
        assert!(!rec.include);
        assert_eq!(rec.above, 1);

        let failed = DetectionRecord::derive(&inputs(&series(&[1.0, 2.0, 300.0, 301.0]), None))
            .expect("non-empty");
        assert!(!failed.include);
        assert_eq!(failed.signal.peak_width, 0.0);
    }

    #[test]
    fn empty_series_has_no_record() {
        let s = ShotSeries::default();
        assert!(matches!(
            DetectionRecord::derive(&inputs(&s, None)),
            Err(DetectionError::InsufficientData { .. })
        ));
    }

    #[test]
    fn cells_round_trip_through_columns() {
        let s = series(&[98.0, 102.0, 100.0, 298.0, 302.0]);
        let rec = DetectionRecord::derive(&inputs(&s, Some(peaks()))).expect("non-empty");
        let back = DetectionRecord::from_cells(&rec.cells());
        assert_eq!(back, rec);
    }

    #[test]
    fn sort_is_stable() {
        let mut log: Vec<DetectionRecord> = [(2.0, 0), (1.0, 1), (2.0, 2), (1.0, 3)]
            .iter()
            .map(|&(u, id)| DetectionRecord {
                user_variable: u,
                file_id: id,
                ..DetectionRecord::default()
            })
            .collect();
        sort_by_user_variable(&mut log);
        let ids: Vec<u64> = log.iter().map(|r| r.file_id).collect();
        assert_eq!(ids, vec![1, 3, 0, 2]);
    }
}
