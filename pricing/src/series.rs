use serde::{Deserialize, Serialize};
use shared::block::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: Timestamp,
    pub price_usd: f64,
}

/// Price history of one asset, sorted by timestamp with one point per
/// timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn from_points(points: Vec<PricePoint>) -> Self {
        let mut series = Self::default();
        series.merge(points);
        series
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Adds `incoming`, the incoming point replacing an existing one with the
    /// same timestamp. Returns how many timestamps were not present before.
    pub fn merge(&mut self, incoming: Vec<PricePoint>) -> usize {
        let before = self.points.len();

        self.points.extend(
            incoming.into_iter().filter(|point| point.price_usd.is_finite()),
        );
        // Stable, so among equal timestamps the newest write comes last.
        self.points.sort_by_key(|point| point.timestamp);

        let mut deduped: Vec<PricePoint> = Vec::with_capacity(self.points.len());
        for point in self.points.drain(..) {
            match deduped.last_mut() {
                Some(last) if last.timestamp == point.timestamp => *last = point,
                _ => deduped.push(point),
            }
        }
        self.points = deduped;

        self.points.len() - before
    }

    /// Latest point at or before `at`, no older than `tolerance` seconds.
    pub fn asof(&self, at: Timestamp, tolerance: i64) -> Option<PricePoint> {
        let index = self.points.partition_point(|point| point.timestamp <= at);
        let candidate = self.points.get(index.checked_sub(1)?)?;

        (at - candidate.timestamp <= tolerance).then_some(*candidate)
    }
}

/// Successively wider tolerances tried by an as-of lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToleranceTiers(Vec<i64>);

impl Default for ToleranceTiers {
    fn default() -> Self {
        Self(vec![3600, 3 * 3600, 34 * 3600])
    }
}

impl ToleranceTiers {
    /// Later tiers narrower than an earlier one are widened to it.
    pub fn new(tiers: impl IntoIterator<Item = i64>) -> Self {
        let mut widest = 0;
        Self(
            tiers
                .into_iter()
                .map(|tier| {
                    widest = widest.max(tier);
                    widest
                })
                .collect(),
        )
    }

    pub fn primary(&self) -> i64 {
        self.0.first().copied().unwrap_or_default()
    }

    pub fn tiers(&self) -> &[i64] {
        &self.0
    }

    pub fn lookup(
        &self,
        series: &PriceSeries,
        at: Timestamp,
    ) -> Option<PricePoint> {
        self.0.iter().find_map(|tolerance| series.asof(at, *tolerance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(timestamp: Timestamp, price_usd: f64) -> PricePoint {
        PricePoint {
            timestamp,
            price_usd,
        }
    }

    fn sample() -> PriceSeries {
        PriceSeries::from_points(vec![point(500, 2.0), point(100, 1.0)])
    }

    #[test]
    fn merge_keeps_the_newest_write() {
        let mut series = sample();
        let added = series.merge(vec![point(100, 1.5), point(300, 3.0)]);

        assert_eq!(added, 1);
        assert_eq!(
            series.points(),
            [point(100, 1.5), point(300, 3.0), point(500, 2.0)]
        );
    }

    #[test]
    fn lookups_only_look_backwards() {
        let series = sample();

        assert_eq!(series.asof(100, 0), Some(point(100, 1.0)));
        assert_eq!(series.asof(99, 1_000_000), None);
        assert_eq!(series.asof(499, 1_000), Some(point(100, 1.0)));
    }

    #[test]
    fn tiers_widen_until_a_match() {
        let series = sample();

        assert_eq!(ToleranceTiers::new([40, 40, 40]).lookup(&series, 150), None);
        assert_eq!(
            ToleranceTiers::new([60, 60, 60]).lookup(&series, 150),
            Some(point(100, 1.0))
        );
        assert_eq!(
            ToleranceTiers::new([10, 20, 60]).lookup(&series, 150),
            Some(point(100, 1.0))
        );
        assert_eq!(ToleranceTiers::new([60, 180, 2040]).lookup(&series, 5000), None);
    }

    #[test]
    fn tiers_never_narrow() {
        assert_eq!(ToleranceTiers::new([3600, 60, 7200]).tiers(), [3600, 3600, 7200]);
    }
}
