//! Joint statistics across several detectors.
//!
//! Streams are joined by shot id, never by position: a shot that one detector
//! excluded is simply missing from that stream and drops out of every joint
//! quantity of its group.
//!
//! Streams are organised as ROI groups; each group holds one stream per
//! `(image, roi)` pair. Queries are evaluated independently for every group.
//!
//! ```
//! use occupancy_detector::correlate::{Correlator, OccupancyQuery, OccupancyStream, RoiGroup};
//!
//! let a = OccupancyStream::from_labels((1..=5).map(|id| (id, id != 4)));
//! let b = OccupancyStream::from_labels((1..=5).map(|id| (id, id != 1)));
//! let correlator = Correlator::new(vec![RoiGroup::new(vec![vec![a, b]])]);
//! let both = correlator.post_select(&OccupancyQuery::parse("11").unwrap()).unwrap();
//! assert_eq!(both[0].ids.iter().copied().collect::<Vec<_>>(), vec![2, 3, 5]);
//! ```
pub mod query;
pub mod stream;

pub use query::{ImagePattern, OccupancyQuery, QueryError, Requirement};
pub use stream::OccupancyStream;

use crate::confidence::{interval, BinomialInterval};
use crate::detector::DetectorSnapshot;
use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// A set of shot ids with its fraction of some reference population.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Selection {
    pub ids: BTreeSet<u64>,
    pub interval: BinomialInterval,
}

impl Selection {
    fn of(ids: BTreeSet<u64>, total: usize) -> Self {
        let interval = interval(ids.len(), total);
        Self { ids, interval }
    }
}

/// Streams of one group of ROIs, indexed `[image][roi]`.
#[derive(Clone, Debug, Default)]
pub struct RoiGroup {
    images: Vec<Vec<OccupancyStream>>,
}

impl RoiGroup {
    pub fn new(images: Vec<Vec<OccupancyStream>>) -> Self {
        Self { images }
    }

    /// Build from finalized detector snapshots laid out `[image][roi]`.
    pub fn from_snapshots(images: &[Vec<DetectorSnapshot>]) -> Self {
        Self::new(
            images
                .iter()
                .map(|rois| rois.iter().map(DetectorSnapshot::occupancy).collect())
                .collect(),
        )
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Smallest ROI count over the group's images.
    pub fn roi_count(&self) -> usize {
        self.images.iter().map(Vec::len).min().unwrap_or(0)
    }

    pub fn stream(&self, image: usize, roi: usize) -> Option<&OccupancyStream> {
        self.images.get(image).and_then(|rois| rois.get(roi))
    }

    /// Shots labelled by every stream in the group.
    pub fn universe(&self) -> BTreeSet<u64> {
        let mut streams = self.images.iter().flatten();
        let Some(first) = streams.next() else {
            return BTreeSet::new();
        };
        streams.fold(first.ids(), |acc, s| {
            acc.into_iter().filter(|&id| s.label(id).is_some()).collect()
        })
    }

    fn satisfies(&self, id: u64, permutation: &[ImagePattern]) -> bool {
        permutation.iter().enumerate().all(|(image, pattern)| {
            pattern.iter().enumerate().all(|(roi, req)| {
                *req == Requirement::Any
                    || self
                        .stream(image, roi)
                        .and_then(|s| s.label(id))
                        .is_some_and(|occupied| req.accepts(occupied))
            })
        })
    }

    /// Members of `within` that satisfy any permutation of `query`.
    pub fn select(
        &self,
        query: &OccupancyQuery,
        within: &BTreeSet<u64>,
    ) -> Result<BTreeSet<u64>, QueryError> {
        query.validate(self.image_count(), self.roi_count())?;
        let permutations = query.permutations();
        Ok(within
            .iter()
            .copied()
            .filter(|&id| permutations.iter().any(|p| self.satisfies(id, p)))
            .collect())
    }
}

/// Outcome of a re-imaging comparison.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    /// Shots occupied in every "before" stream and labelled in every "after".
    pub total: usize,
    pub all: Selection,
    pub some: Selection,
    pub none: Selection,
    /// Empty in the first after-stream, occupied in the last.
    pub first_empty_last_occupied: Selection,
    /// Occupied in the first after-stream, empty in the last.
    pub first_occupied_last_empty: Selection,
}

/// Multi-group correlator over finalized occupancy streams.
#[derive(Clone, Debug, Default)]
pub struct Correlator {
    groups: Vec<RoiGroup>,
}

impl Correlator {
    pub fn new(groups: Vec<RoiGroup>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[RoiGroup] {
        &self.groups
    }

    pub fn group(&self, index: usize) -> Result<&RoiGroup, QueryError> {
        self.groups.get(index).ok_or(QueryError::GroupOutOfRange {
            group: index,
            groups: self.groups.len(),
        })
    }

    /// Per group, the shots satisfying `query` and their fraction of the
    /// group's universe.
    pub fn post_select(&self, query: &OccupancyQuery) -> Result<Vec<Selection>, QueryError> {
        self.groups
            .iter()
            .enumerate()
            .map(|(index, group)| {
                let universe = group.universe();
                let ids = group.select(query, &universe)?;
                debug!(
                    "Correlator::post_select group={index} query={query} kept {}/{}",
                    ids.len(),
                    universe.len()
                );
                Ok(Selection::of(ids, universe.len()))
            })
            .collect()
    }

    /// Per group, the fraction of the post-selected shots that also satisfy
    /// `condition`. `selected` holds one selection per group.
    pub fn condition_met(
        &self,
        condition: &OccupancyQuery,
        selected: &[Selection],
    ) -> Result<Vec<Selection>, QueryError> {
        if selected.len() != self.groups.len() {
            return Err(QueryError::SelectionMismatch {
                expected: self.groups.len(),
                found: selected.len(),
            });
        }
        self.groups
            .iter()
            .zip(selected)
            .map(|(group, sel)| {
                let met = group.select(condition, &sel.ids)?;
                Ok(Selection::of(met, sel.ids.len()))
            })
            .collect()
    }

    /// Pool condition-met results over `groups` (all of them when `None`).
    pub fn average_condition_met(met: &[Selection], groups: Option<&[usize]>) -> BinomialInterval {
        let chosen: Vec<&Selection> = match groups {
            Some(indices) => indices.iter().filter_map(|&i| met.get(i)).collect(),
            None => met.iter().collect(),
        };
        let successes = chosen.iter().map(|s| s.ids.len()).sum();
        let total = chosen.iter().map(|s| s.interval.total).sum();
        interval(successes, total)
    }

    /// Split `selected` by how many ROIs of `image` are occupied.
    ///
    /// Keys run from 0 to the group's ROI count; shots missing from any
    /// stream of the image are skipped.
    pub fn occupancy_histogram(
        &self,
        group: usize,
        image: usize,
        selected: &BTreeSet<u64>,
    ) -> Result<BTreeMap<usize, Selection>, QueryError> {
        let g = self.group(group)?;
        let rois = g.roi_count();
        if image >= g.image_count() {
            return Err(QueryError::ImageOutOfRange {
                image,
                images: g.image_count(),
            });
        }
        let mut buckets: BTreeMap<usize, BTreeSet<u64>> =
            (0..=rois).map(|k| (k, BTreeSet::new())).collect();
        let mut counted = 0;
        for &id in selected {
            let labels: Option<Vec<bool>> = (0..rois)
                .map(|roi| g.stream(image, roi).and_then(|s| s.label(id)))
                .collect();
            let Some(labels) = labels else { continue };
            counted += 1;
            let k = labels.iter().filter(|&&o| o).count();
            buckets.entry(k).or_default().insert(id);
        }
        Ok(buckets
            .into_iter()
            .map(|(k, ids)| (k, Selection::of(ids, counted)))
            .collect())
    }

    /// Retention of one ROI between two images of a group.
    ///
    /// Only shots labelled in both images take part.
    pub fn survival(
        &self,
        group: usize,
        roi: usize,
        before_image: usize,
        after_image: usize,
    ) -> Result<BinomialInterval, QueryError> {
        let g = self.group(group)?;
        let stream = |image: usize| {
            g.stream(image, roi).ok_or(QueryError::RoiOutOfRange {
                image,
                roi,
                rois: g.images.get(image).map_or(0, Vec::len),
            })
        };
        let before = stream(before_image)?;
        let after = stream(after_image)?;
        let labelled = after.ids();
        let loaded: BTreeSet<u64> = before.occupied().intersection(&labelled).copied().collect();
        Ok(survival(&loaded, &after.occupied()))
    }
}

/// Fraction of `before` that is also in `after`.
pub fn survival(before: &BTreeSet<u64>, after: &BTreeSet<u64>) -> BinomialInterval {
    interval(before.intersection(after).count(), before.len())
}

/// Re-imaging comparison between "before" and "after" streams.
///
/// The reference set is the shots occupied in every before-stream and labelled
/// in every after-stream. Empty `afters` leaves every category empty.
pub fn compare(befores: &[&OccupancyStream], afters: &[&OccupancyStream]) -> Comparison {
    let mut reference: BTreeSet<u64> = match befores.split_first() {
        Some((first, rest)) => rest.iter().fold(first.occupied(), |acc, s| {
            acc.into_iter().filter(|&id| s.label(id) == Some(true)).collect()
        }),
        None => BTreeSet::new(),
    };
    reference.retain(|&id| afters.iter().all(|s| s.label(id).is_some()));
    let total = reference.len();

    let mut all = BTreeSet::new();
    let mut some = BTreeSet::new();
    let mut none = BTreeSet::new();
    let mut gained = BTreeSet::new();
    let mut lost = BTreeSet::new();
    if let (Some(first), Some(last)) = (afters.first(), afters.last()) {
        for &id in &reference {
            let occupied = afters.iter().filter(|s| s.label(id) == Some(true)).count();
            match occupied {
                0 => none.insert(id),
                n if n == afters.len() => all.insert(id),
                _ => some.insert(id),
            };
            match (first.label(id), last.label(id)) {
                (Some(false), Some(true)) => gained.insert(id),
                (Some(true), Some(false)) => lost.insert(id),
                _ => false,
            };
        }
    }
    debug!(
        "compare total={total} all={} some={} none={}",
        all.len(),
        some.len(),
        none.len()
    );
    Comparison {
        total,
        all: Selection::of(all, total),
        some: Selection::of(some, total),
        none: Selection::of(none, total),
        first_empty_last_occupied: Selection::of(gained, total),
        first_occupied_last_empty: Selection::of(lost, total),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(occupied: &[u64], empty: &[u64]) -> OccupancyStream {
        occupied
            .iter()
            .map(|&id| (id, true))
            .chain(empty.iter().map(|&id| (id, false)))
            .collect()
    }

    fn single_image(a: OccupancyStream, b: OccupancyStream) -> Correlator {
        Correlator::new(vec![RoiGroup::new(vec![vec![a, b]])])
    }

    fn q(text: &str) -> OccupancyQuery {
        OccupancyQuery::parse(text).expect("valid query")
    }

    #[test]
    fn post_select_joins_by_identity() {
        let c = single_image(stream(&[1, 2, 3, 5], &[4]), stream(&[2, 3, 4, 5], &[1]));
        let sel = c.post_select(&q("11")).expect("in range");
        assert_eq!(sel[0].ids, BTreeSet::from([2, 3, 5]));
        assert_eq!(sel[0].interval.total, 5);
    }

    #[test]
    fn misaligned_streams_use_common_universe() {
        // Shot 9 exists only in the first stream.
        let c = single_image(stream(&[1, 9], &[2]), stream(&[1], &[2, 3]));
        let sel = c.post_select(&q("")).expect("in range");
        assert_eq!(sel[0].ids, BTreeSet::from([1, 2]));
        assert_eq!(sel[0].interval.probability, 1.0);
    }

    #[test]
    fn alternatives_are_or_of_permutations() {
        let c = single_image(stream(&[1, 2], &[3, 4]), stream(&[1, 3], &[2, 4]));
        let sel = c.post_select(&q("{[10][01]}")).expect("in range");
        assert_eq!(sel[0].ids, BTreeSet::from([2, 3]));
    }

    #[test]
    fn condition_met_is_relative_to_selection() {
        let c = single_image(stream(&[1, 2, 3], &[4]), stream(&[1], &[2, 3, 4]));
        let selected = c.post_select(&q("1x")).expect("in range");
        let met = c.condition_met(&q("x1"), &selected).expect("in range");
        assert_eq!(met[0].ids, BTreeSet::from([1]));
        assert_eq!(met[0].interval.successes, 1);
        assert_eq!(met[0].interval.total, 3);
    }

    #[test]
    fn condition_met_needs_one_selection_per_group() {
        let group = |a, b| RoiGroup::new(vec![vec![a, b]]);
        let c = Correlator::new(vec![
            group(stream(&[1, 2], &[3]), stream(&[1], &[2, 3])),
            group(stream(&[4], &[5]), stream(&[4, 5], &[])),
        ]);
        let selected = c.post_select(&q("1x")).expect("in range");
        assert_eq!(selected.len(), 2);
        assert_eq!(
            c.condition_met(&q("x1"), &selected[..1]),
            Err(QueryError::SelectionMismatch {
                expected: 2,
                found: 1
            })
        );
        let met = c.condition_met(&q("x1"), &selected).expect("one per group");
        assert_eq!(met.len(), 2);
        assert_eq!(met[1].ids, BTreeSet::from([4]));
    }

    #[test]
    fn average_pools_chosen_groups() {
        let met = vec![
            Selection::of(BTreeSet::from([1, 2]), 4),
            Selection::of(BTreeSet::from([7]), 1),
            Selection::of(BTreeSet::new(), 5),
        ];
        let pooled = Correlator::average_condition_met(&met, Some(&[0, 1]));
        assert_eq!((pooled.successes, pooled.total), (3, 5));
        let all = Correlator::average_condition_met(&met, None);
        assert_eq!((all.successes, all.total), (3, 10));
    }

    #[test]
    fn out_of_range_query_is_an_error() {
        let c = single_image(stream(&[1], &[]), stream(&[1], &[]));
        assert!(matches!(
            c.post_select(&q("111")),
            Err(QueryError::RoiOutOfRange { roi: 2, .. })
        ));
        assert!(matches!(
            c.post_select(&q("xx,1")),
            Err(QueryError::ImageOutOfRange { image: 1, .. })
        ));
    }

    #[test]
    fn occupancy_histogram_counts_rois() {
        let c = single_image(stream(&[1, 2], &[3, 4]), stream(&[1, 3], &[2, 4]));
        let all = BTreeSet::from([1, 2, 3, 4]);
        let hist = c.occupancy_histogram(0, 0, &all).expect("in range");
        assert_eq!(hist[&0].ids, BTreeSet::from([4]));
        assert_eq!(hist[&1].ids, BTreeSet::from([2, 3]));
        assert_eq!(hist[&2].ids, BTreeSet::from([1]));
        assert_eq!(hist[&1].interval.total, 4);
        assert!(c.occupancy_histogram(1, 0, &all).is_err());
    }

    #[test]
    fn survival_between_images() {
        let before = stream(&[1, 2, 3, 4], &[5]);
        let after = stream(&[1, 3], &[2, 5]);
        let c = Correlator::new(vec![RoiGroup::new(vec![vec![before], vec![after]])]);
        // Shot 4 has no label after and is left out.
        let s = c.survival(0, 0, 0, 1).expect("in range");
        assert_eq!((s.successes, s.total), (2, 3));
        let direct = survival(&BTreeSet::from([1, 2]), &BTreeSet::from([2, 9]));
        assert_eq!(direct.probability, 0.5);
    }

    #[test]
    fn compare_counts_categories() {
        let before = stream(&[1, 2, 3, 4, 5], &[6]);
        let first = stream(&[1, 2, 6], &[3, 4, 5]);
        let last = stream(&[1, 3, 6], &[2, 4, 5]);
        let out = compare(&[&before], &[&first, &last]);
        assert_eq!(out.total, 5);
        assert_eq!(out.all.ids, BTreeSet::from([1]));
        assert_eq!(out.some.ids, BTreeSet::from([2, 3]));
        assert_eq!(out.none.ids, BTreeSet::from([4, 5]));
        assert_eq!(out.first_empty_last_occupied.ids, BTreeSet::from([3]));
        assert_eq!(out.first_occupied_last_empty.ids, BTreeSet::from([2]));
        assert_eq!(out.none.interval.successes, 2);
    }
}
