use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Stages of one analysis call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Histogram,
    Seed,
    Fit,
    Threshold,
}

/// Milliseconds spent per stage of one analysis call. Fit and threshold
/// accumulate over every round of the iteration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingBreakdown {
    pub total_ms: f64,
    pub histogram_ms: f64,
    pub seed_ms: f64,
    pub fit_ms: f64,
    pub threshold_ms: f64,
    /// Number of strategy fits run, settle pass included.
    pub fit_calls: usize,
}

impl TimingBreakdown {
    fn slot(&mut self, stage: Stage) -> &mut f64 {
        match stage {
            Stage::Histogram => &mut self.histogram_ms,
            Stage::Seed => &mut self.seed_ms,
            Stage::Fit => &mut self.fit_ms,
            Stage::Threshold => &mut self.threshold_ms,
        }
    }

    pub fn add(&mut self, stage: Stage, elapsed_ms: f64) {
        *self.slot(stage) += elapsed_ms;
        if stage == Stage::Fit {
            self.fit_calls += 1;
        }
    }

    /// Run `f` and charge its wall time to `stage`.
    pub fn time<R>(&mut self, stage: Stage, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let out = f();
        self.add(stage, elapsed_ms(start));
        out
    }

    pub fn stage_ms(&self, stage: Stage) -> f64 {
        match stage {
            Stage::Histogram => self.histogram_ms,
            Stage::Seed => self.seed_ms,
            Stage::Fit => self.fit_ms,
            Stage::Threshold => self.threshold_ms,
        }
    }

    /// Time not attributed to any stage.
    pub fn overhead_ms(&self) -> f64 {
        let staged = self.histogram_ms + self.seed_ms + self.fit_ms + self.threshold_ms;
        (self.total_ms - staged).max(0.0)
    }
}

/// Milliseconds since `start`.
pub fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_fits_accumulate() {
        let mut t = TimingBreakdown::default();
        let a = t.time(Stage::Fit, || 2);
        let b = t.time(Stage::Fit, || 3);
        t.time(Stage::Threshold, || ());
        assert_eq!(a + b, 5);
        assert_eq!(t.fit_calls, 2);
        assert!(t.stage_ms(Stage::Fit) >= 0.0);
        assert_eq!(t.stage_ms(Stage::Seed), 0.0);

        t.fit_ms = 1.5;
        t.total_ms = 4.0;
        t.threshold_ms = 0.5;
        assert_eq!(t.overhead_ms(), 2.0);
        let json = serde_json::to_value(&t).expect("serializable");
        assert_eq!(json["fitMs"], 1.5);
        assert_eq!(json["fitCalls"], 2);
    }
}
