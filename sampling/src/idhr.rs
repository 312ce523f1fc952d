//! IDHR density histogram.
//!
//! Prices are first spread over `primary_bins` coarse bins covering the
//! range, the densest primaries are subdivided into `secondary_bins` fine bins,
//! and the heaviest bins of both levels become the nuclei handed downstream.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::types::Point;

/// Mass contributed by one point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Weighting {
    #[default]
    Count,
    /// Bid plus ask volume of the point's book.
    Volume,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdhrConfig {
    pub primary_bins: usize,
    pub secondary_bins: usize,
    pub selected_bins: usize,
    /// How many of the densest primaries get subdivided.
    pub refine_primaries: usize,
    pub weighting: Weighting,
}

impl Default for IdhrConfig {
    fn default() -> Self {
        Self {
            primary_bins: 16,
            secondary_bins: 16,
            selected_bins: 16,
            refine_primaries: 1,
            weighting: Weighting::Count,
        }
    }
}

/// Where the histogram's outer bounds come from.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum RangeMode {
    /// Min/max of the supplied prices.
    Observed,
    /// `reference * (1 ± band_pct / 100)`, widened to cover every observed price.
    /// Bin edges stay put while prices remain inside the band.
    Anchored { reference: f64, band_pct: f64 },
    /// Caller-chosen bounds; the only mode that clamps out-of-range prices.
    Fixed { min: f64, max: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

impl PriceRange {
    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    pub fn center(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    /// Widens a zero-width range around its center so bins get a positive width.
    fn non_degenerate(self) -> Self {
        let c = self.center();
        let tiny = (c.abs() * 1e-9).max(1e-12);
        if self.width() > tiny {
            return self;
        }
        let half = (c.abs() * 1e-6).max(1e-9);
        Self {
            min: c - half,
            max: c + half,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "camelCase")]
pub enum BinRef {
    Primary { index: usize },
    Secondary { primary: usize, index: usize },
}

impl BinRef {
    fn rank(&self) -> (u8, usize, usize) {
        match *self {
            BinRef::Primary { index } => (0, index, 0),
            BinRef::Secondary { primary, index } => (1, primary, index),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Nucleus {
    pub bin: BinRef,
    pub low: f64,
    pub high: f64,
    pub mass: f64,
    /// Share of the selected mass; nuclei weights sum to 1.
    pub weight: f64,
}

/// Fine subdivision of one primary bin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinedRegion {
    pub primary: usize,
    pub range: PriceRange,
    pub width: f64,
    pub mass: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdhrBins {
    pub range: PriceRange,
    pub primary_width: f64,
    pub primary_mass: Vec<f64>,
    pub refined: Vec<RefinedRegion>,
    pub selected_primaries: Vec<usize>,
    pub selected_secondaries: Vec<BinRef>,
    pub nuclei: Vec<Nucleus>,
    pub total_mass: f64,
    pub weighting: Weighting,
    pub points_used: usize,
    /// Points whose price was not finite.
    pub points_skipped: usize,
    /// Points outside the range, folded into an edge bin.
    pub clamped: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum IdhrOutcome {
    NoData,
    Ready(IdhrBins),
}

impl IdhrOutcome {
    pub fn bins(&self) -> Option<&IdhrBins> {
        match self {
            IdhrOutcome::Ready(b) => Some(b),
            IdhrOutcome::NoData => None,
        }
    }
}

struct Sample {
    price: f64,
    mass: f64,
    primary: usize,
}

struct Candidate {
    bin: BinRef,
    low: f64,
    high: f64,
    mass: f64,
    distance: f64,
}

/// Builds the two-level histogram for `points` and selects its nuclei.
pub fn build(points: &[Point], mode: RangeMode, cfg: &IdhrConfig) -> IdhrOutcome {
    let primary_bins = cfg.primary_bins.max(1);
    let secondary_bins = cfg.secondary_bins.max(1);

    let priced: Vec<&Point> = points.iter().filter(|p| p.mid.is_finite()).collect();
    let points_skipped = points.len() - priced.len();
    if priced.is_empty() {
        return IdhrOutcome::NoData;
    }

    let mut weighting = cfg.weighting;
    if weighting == Weighting::Volume && priced.iter().all(|p| p.traded_volume().is_none()) {
        weighting = Weighting::Count;
    }

    let range = resolve_range(&priced, mode).non_degenerate();
    let primary_width = range.width() / primary_bins as f64;

    let mut clamped = 0;
    let mut primary_mass = vec![0.0; primary_bins];
    let samples: Vec<Sample> = priced
        .iter()
        .map(|p| {
            let mass = match weighting {
                Weighting::Count => 1.0,
                Weighting::Volume => p.traded_volume().unwrap_or(0.0),
            };
            let (primary, was_clamped) = bin_index(p.mid, range.min, range.max, primary_bins);
            if was_clamped {
                clamped += 1;
            }
            primary_mass[primary] += mass;
            Sample {
                price: p.mid,
                mass,
                primary,
            }
        })
        .collect();

    let center = range.center();
    let primary_range = |i: usize| PriceRange {
        min: range.min + i as f64 * primary_width,
        max: range.min + (i + 1) as f64 * primary_width,
    };

    // Densest primaries first; equal masses prefer the middle of the range.
    let mut by_density: Vec<usize> = (0..primary_bins).filter(|&i| primary_mass[i] > 0.0).collect();
    by_density.sort_by(|&a, &b| {
        primary_mass[b]
            .total_cmp(&primary_mass[a])
            .then_with(|| {
                let da = (primary_range(a).center() - center).abs();
                let db = (primary_range(b).center() - center).abs();
                da.total_cmp(&db)
            })
            .then_with(|| a.cmp(&b))
    });

    // Every primary tied at the top mass is refined, even past `refine_primaries`.
    let top_ties = by_density.first().map_or(0, |&top| {
        by_density
            .iter()
            .take_while(|&&i| primary_mass[i] == primary_mass[top])
            .count()
    });

    let refined: Vec<RefinedRegion> = by_density
        .iter()
        .take(cfg.refine_primaries.max(1).max(top_ties))
        .map(|&primary| {
            let sub = primary_range(primary);
            let width = sub.width() / secondary_bins as f64;
            let mut mass = vec![0.0; secondary_bins];
            for s in samples.iter().filter(|s| s.primary == primary) {
                let (fine, _) = bin_index(s.price, sub.min, sub.max, secondary_bins);
                mass[fine] += s.mass;
            }
            RefinedRegion {
                primary,
                range: sub,
                width,
                mass,
            }
        })
        .collect();

    let mut candidates: Vec<Candidate> = Vec::new();
    for (index, &mass) in primary_mass.iter().enumerate() {
        if mass > 0.0 {
            let r = primary_range(index);
            candidates.push(Candidate {
                bin: BinRef::Primary { index },
                low: r.min,
                high: r.max,
                mass,
                distance: (r.center() - center).abs(),
            });
        }
    }
    for region in &refined {
        for (index, &mass) in region.mass.iter().enumerate() {
            if mass > 0.0 {
                let low = region.range.min + index as f64 * region.width;
                let high = low + region.width;
                candidates.push(Candidate {
                    bin: BinRef::Secondary {
                        primary: region.primary,
                        index,
                    },
                    low,
                    high,
                    mass,
                    distance: ((low + high) / 2.0 - center).abs(),
                });
            }
        }
    }

    candidates.sort_by(rank_candidates);
    candidates.truncate(cfg.selected_bins);

    let selected_mass: f64 = candidates.iter().map(|c| c.mass).sum();
    let nuclei: Vec<Nucleus> = candidates
        .iter()
        .map(|c| Nucleus {
            bin: c.bin,
            low: c.low,
            high: c.high,
            mass: c.mass,
            weight: if selected_mass > 0.0 {
                c.mass / selected_mass
            } else {
                0.0
            },
        })
        .collect();

    let selected_primaries = nuclei
        .iter()
        .filter_map(|n| match n.bin {
            BinRef::Primary { index } => Some(index),
            BinRef::Secondary { .. } => None,
        })
        .collect();
    let selected_secondaries = nuclei
        .iter()
        .map(|n| n.bin)
        .filter(|b| matches!(b, BinRef::Secondary { .. }))
        .collect();

    IdhrOutcome::Ready(IdhrBins {
        range,
        primary_width,
        total_mass: primary_mass.iter().sum(),
        primary_mass,
        refined,
        selected_primaries,
        selected_secondaries,
        nuclei,
        weighting,
        points_used: samples.len(),
        points_skipped,
        clamped,
    })
}

fn rank_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.mass
        .total_cmp(&a.mass)
        .then_with(|| a.distance.total_cmp(&b.distance))
        .then_with(|| a.bin.rank().cmp(&b.bin.rank()))
}

fn resolve_range(priced: &[&Point], mode: RangeMode) -> PriceRange {
    let observed = || {
        let (min, max) = priced
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.mid), hi.max(p.mid))
            });
        PriceRange { min, max }
    };

    match mode {
        RangeMode::Observed => observed(),
        RangeMode::Anchored {
            reference,
            band_pct,
        } => {
            if reference.is_finite() && reference > 0.0 && band_pct.is_finite() && band_pct > 0.0 {
                let half = reference * band_pct / 100.0;
                let seen = observed();
                PriceRange {
                    min: (reference - half).min(seen.min),
                    max: (reference + half).max(seen.max),
                }
            } else {
                observed()
            }
        }
        RangeMode::Fixed { min, max } => {
            if min.is_finite() && max.is_finite() && min < max {
                PriceRange { min, max }
            } else {
                observed()
            }
        }
    }
}

/// Bin of `price` in `bins` equal slices of `[min, max]`. The last bin is
/// closed so `max` itself lands inside; anything outside is clamped.
fn bin_index(price: f64, min: f64, max: f64, bins: usize) -> (usize, bool) {
    if price < min {
        return (0, true);
    }
    if price > max {
        return (bins - 1, true);
    }
    let width = (max - min) / bins as f64;
    let idx = ((price - min) / width).floor() as usize;
    (idx.min(bins - 1), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pts(prices: &[f64]) -> Vec<Point> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Point::new(i as u64 * 5_000, p))
            .collect()
    }

    fn ready(outcome: IdhrOutcome) -> IdhrBins {
        match outcome {
            IdhrOutcome::Ready(b) => b,
            IdhrOutcome::NoData => panic!("expected bins"),
        }
    }

    fn weight_sum(b: &IdhrBins) -> f64 {
        b.nuclei.iter().map(|n| n.weight).sum()
    }

    #[test]
    fn empty_history_is_no_data() {
        let out = build(&[], RangeMode::Observed, &IdhrConfig::default());
        assert_eq!(out, IdhrOutcome::NoData);
        assert!(out.bins().is_none());
    }

    #[test]
    fn non_finite_prices_only_is_no_data() {
        let out = build(
            &pts(&[f64::NAN, f64::INFINITY]),
            RangeMode::Observed,
            &IdhrConfig::default(),
        );
        assert_eq!(out, IdhrOutcome::NoData);
    }

    #[test]
    fn densest_primary_is_refined_and_ranked_first() {
        // 0..=100 spread, heavy cluster near 50.
        let mut prices: Vec<f64> = (0..=100).map(|i| i as f64).collect();
        prices.extend(std::iter::repeat_n(50.5, 40));

        let cfg = IdhrConfig {
            primary_bins: 10,
            secondary_bins: 10,
            selected_bins: 4,
            ..Default::default()
        };
        let b = ready(build(&pts(&prices), RangeMode::Observed, &cfg));

        assert_eq!(b.range, PriceRange { min: 0.0, max: 100.0 });
        assert_eq!(b.refined.len(), 1);
        assert_eq!(b.refined[0].primary, 5);
        assert_eq!(b.nuclei[0].bin, BinRef::Primary { index: 5 });
        // 50.5 lies in the first fine slice [50, 51) of primary 5.
        assert_eq!(b.nuclei[1].bin, BinRef::Secondary { primary: 5, index: 0 });
        assert!(b.nuclei.len() <= 4);
        assert!((weight_sum(&b) - 1.0).abs() < 1e-9);
        assert_eq!(b.points_used, 141);
    }

    #[test]
    fn equal_masses_prefer_central_bins() {
        // One point per primary bin, so all four tie at the top mass.
        let cfg = IdhrConfig {
            primary_bins: 4,
            secondary_bins: 2,
            selected_bins: 2,
            refine_primaries: 1,
            weighting: Weighting::Count,
        };
        let b = ready(build(
            &pts(&[5.0, 15.0, 25.0, 40.0]),
            RangeMode::Observed,
            &cfg,
        ));

        // Range is [5, 40]; bins 1 and 2 straddle the center equally, index breaks the tie.
        let order: Vec<usize> = b.refined.iter().map(|r| r.primary).collect();
        assert_eq!(order, vec![1, 2, 0, 3]);
        // 25 sits in the fine slice nearest the center.
        assert_eq!(b.nuclei[0].bin, BinRef::Secondary { primary: 2, index: 0 });
        assert_eq!(b.nuclei[1].bin, BinRef::Primary { index: 1 });
        assert_eq!(b.selected_primaries, vec![1]);
    }

    #[test]
    fn tied_densest_primaries_are_all_refined() {
        let cfg = IdhrConfig {
            primary_bins: 10,
            secondary_bins: 4,
            refine_primaries: 1,
            ..Default::default()
        };
        // Two equally heavy clusters at opposite ends, one stray point between.
        let mut prices = vec![1.0; 5];
        prices.extend(vec![9.5; 5]);
        prices.push(5.0);
        let b = ready(build(&pts(&prices), RangeMode::Observed, &cfg));

        let mut refined: Vec<usize> = b.refined.iter().map(|r| r.primary).collect();
        refined.sort_unstable();
        assert_eq!(refined, vec![0, 9]);
        assert!(b.refined.iter().all(|r| r.mass.iter().sum::<f64>() == 5.0));
    }

    #[test]
    fn single_densest_primary_respects_refine_count() {
        let cfg = IdhrConfig {
            primary_bins: 10,
            refine_primaries: 1,
            ..Default::default()
        };
        let b = ready(build(&pts(&[1.0, 1.0, 1.0, 5.0, 9.5, 9.5]), RangeMode::Observed, &cfg));

        assert_eq!(b.refined.len(), 1);
        assert_eq!(b.refined[0].primary, 0);
    }

    #[test]
    fn single_price_widens_the_range() {
        let b = ready(build(
            &pts(&[100.0, 100.0, 100.0]),
            RangeMode::Observed,
            &IdhrConfig::default(),
        ));

        assert!(b.range.width() > 0.0);
        assert!(b.range.min < 100.0 && b.range.max > 100.0);
        assert!((weight_sum(&b) - 1.0).abs() < 1e-9);
        assert_eq!(b.total_mass, 3.0);
    }

    #[test]
    fn anchored_range_keeps_band_while_prices_stay_inside() {
        let b = ready(build(
            &pts(&[99.0, 100.0, 101.0]),
            RangeMode::Anchored {
                reference: 100.0,
                band_pct: 5.0,
            },
            &IdhrConfig::default(),
        ));

        assert_eq!(b.range, PriceRange { min: 95.0, max: 105.0 });
        assert_eq!(b.clamped, 0);
    }

    #[test]
    fn anchored_range_widens_to_cover_prices_outside_the_band() {
        // Price has run 10-13.5% above the opening reference.
        let prices: Vec<f64> = (0..24).map(|i| 110.0 + i as f64 * 0.15).collect();
        let b = ready(build(
            &pts(&prices),
            RangeMode::Anchored {
                reference: 100.0,
                band_pct: 5.0,
            },
            &IdhrConfig::default(),
        ));

        assert_eq!(b.range.min, 95.0);
        assert!((b.range.max - 113.45).abs() < 1e-9);
        assert_eq!(b.clamped, 0);
        let occupied = b.primary_mass.iter().filter(|&&m| m > 0.0).count();
        assert!(occupied > 1, "mass spread over {occupied} primaries");
        assert_eq!(b.primary_mass[0], 0.0);

        let low_side = ready(build(
            &pts(&[80.0, 101.0]),
            RangeMode::Anchored {
                reference: 100.0,
                band_pct: 5.0,
            },
            &IdhrConfig::default(),
        ));
        assert_eq!(low_side.range, PriceRange { min: 80.0, max: 105.0 });
    }

    #[test]
    fn fixed_range_clamps_out_of_range_points() {
        let b = ready(build(
            &pts(&[100.0, 101.0, 120.0, 80.0]),
            RangeMode::Fixed {
                min: 95.0,
                max: 105.0,
            },
            &IdhrConfig::default(),
        ));

        assert_eq!(b.range, PriceRange { min: 95.0, max: 105.0 });
        assert_eq!(b.clamped, 2);
        assert_eq!(b.primary_mass[0], 1.0);
        assert_eq!(b.primary_mass[15], 1.0);
    }

    #[test]
    fn invalid_anchor_falls_back_to_observed() {
        let b = ready(build(
            &pts(&[10.0, 20.0]),
            RangeMode::Anchored {
                reference: f64::NAN,
                band_pct: 5.0,
            },
            &IdhrConfig::default(),
        ));
        assert_eq!(b.range, PriceRange { min: 10.0, max: 20.0 });
    }

    #[test]
    fn volume_weighting_without_volume_falls_back_to_count() {
        let cfg = IdhrConfig {
            weighting: Weighting::Volume,
            ..Default::default()
        };
        let b = ready(build(&pts(&[1.0, 2.0, 3.0]), RangeMode::Observed, &cfg));
        assert_eq!(b.weighting, Weighting::Count);
        assert!((weight_sum(&b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn volume_weighting_moves_the_densest_bin() {
        let points = vec![
            Point::new(0, 10.0).with_volumes(1.0, 1.0),
            Point::new(1, 10.0).with_volumes(1.0, 1.0),
            Point::new(2, 20.0).with_volumes(50.0, 50.0),
        ];
        let cfg = IdhrConfig {
            primary_bins: 2,
            weighting: Weighting::Volume,
            ..Default::default()
        };
        let b = ready(build(&points, RangeMode::Observed, &cfg));

        assert_eq!(b.weighting, Weighting::Volume);
        assert_eq!(b.refined[0].primary, 1);
        assert_eq!(b.nuclei[0].mass, 100.0);
    }

    proptest! {
        #[test]
        fn selection_respects_configured_bounds(
            prices in proptest::collection::vec(-1_000.0f64..1_000.0, 1..300),
            primary in 1usize..24,
            secondary in 1usize..24,
            selected in 1usize..40,
        ) {
            let cfg = IdhrConfig {
                primary_bins: primary,
                secondary_bins: secondary,
                selected_bins: selected,
                ..Default::default()
            };
            let b = ready(build(&pts(&prices), RangeMode::Observed, &cfg));

            prop_assert!(b.selected_primaries.len() <= primary);
            prop_assert!(b.nuclei.len() <= selected);
            prop_assert!(!b.nuclei.is_empty());
            prop_assert!((weight_sum(&b) - 1.0).abs() < 1e-9);
            prop_assert_eq!(b.points_used, prices.len());
        }
    }
}
