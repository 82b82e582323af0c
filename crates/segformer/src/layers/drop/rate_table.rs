//! # Progressive drop-path rates.

use crate::compat::ops::float_vec_linspace;

/// Linearly increasing drop-path rates, one per block.
///
/// # Arguments
///
/// * `drop_path_rate`: The rate of the last block.
/// * `depth`: The total number of blocks.
///
/// # Returns
///
/// `depth` rates from `0.0` to `drop_path_rate`; empty for `depth == 0`.
#[inline(always)]
#[must_use]
pub fn progressive_dpr(
    drop_path_rate: f64,
    depth: usize,
) -> Vec<f64> {
    if depth == 0 {
        return Vec::new();
    }
    float_vec_linspace(0.0, drop_path_rate, depth)
}

/// Progressive drop-path rates, split by stage.
///
/// The rates increase across the whole encoder, not per stage:
/// the first block of stage `i + 1` continues where stage `i` stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct DropPathRateDepthTable {
    progressive_dpr: Vec<f64>,
    stage_depths: Vec<usize>,
}

impl DropPathRateDepthTable {
    /// Build a table for the given stage depths.
    #[must_use]
    pub fn new(
        drop_path_rate: f64,
        stage_depths: &[usize],
    ) -> Self {
        let stage_depths = stage_depths.to_vec();
        let progressive_dpr = progressive_dpr(drop_path_rate, stage_depths.iter().sum());
        Self {
            progressive_dpr,
            stage_depths,
        }
    }

    /// The depth of each stage.
    pub fn stage_depths(&self) -> &[usize] {
        &self.stage_depths
    }

    /// The total number of blocks.
    pub fn total_depth(&self) -> usize {
        self.stage_depths.iter().sum()
    }

    /// The number of stages.
    #[must_use]
    pub fn num_stages(&self) -> usize {
        self.stage_depths.len()
    }

    /// The drop-path rates of the blocks of one stage.
    ///
    /// # Panics
    ///
    /// If `stage_i` is out of bounds.
    #[must_use]
    pub fn stage_dprs(
        &self,
        stage_i: usize,
    ) -> Vec<f64> {
        if stage_i >= self.num_stages() {
            panic!(
                "Stage index {} out of bounds for {} stages",
                stage_i,
                self.num_stages()
            );
        }
        let start = self.stage_depths[..stage_i].iter().sum::<usize>();
        let end = start + self.stage_depths[stage_i];

        self.progressive_dpr[start..end].to_vec()
    }

    /// The `stage_dprs` of every stage.
    #[inline(always)]
    #[must_use]
    pub fn stage_rates(&self) -> Vec<Vec<f64>> {
        (0..self.num_stages()).map(|i| self.stage_dprs(i)).collect()
    }

    /// Shorthand for `DropPathRateDepthTable::new(..).stage_rates()`.
    #[must_use]
    pub fn dpr_stage_rates(
        drop_path_rate: f64,
        stage_depths: &[usize],
    ) -> Vec<Vec<f64>> {
        DropPathRateDepthTable::new(drop_path_rate, stage_depths).stage_rates()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::assert_close_to_vec;

    #[test]
    fn test_progressive_dpr() {
        assert_close_to_vec(
            &progressive_dpr(0.1, 9),
            &[0.0, 0.0125, 0.025, 0.0375, 0.05, 0.0625, 0.075, 0.0875, 0.1],
            0.001,
        );
        assert!(progressive_dpr(0.1, 0).is_empty());
    }

    #[test]
    fn test_table() {
        let depths = vec![2, 3, 4];
        let table = DropPathRateDepthTable::new(0.1, &depths);

        assert_eq!(table.stage_depths(), depths.as_slice());
        assert_eq!(table.total_depth(), 9);
        assert_eq!(table.num_stages(), 3);

        assert_close_to_vec(&table.stage_dprs(0), &[0.0, 0.0125], 0.001);
        assert_close_to_vec(&table.stage_dprs(1), &[0.025, 0.0375, 0.05], 0.001);

        let rates = table.stage_rates();
        assert_eq!(rates.len(), 3);
        assert_close_to_vec(&rates[2], &[0.0625, 0.075, 0.0875, 0.1], 0.001);
    }

    #[test]
    fn test_dpr_stage_rates_b0() {
        let rates = DropPathRateDepthTable::dpr_stage_rates(0.1, &[2, 2, 2, 2]);
        assert_eq!(rates.len(), 4);
        assert_eq!(rates[0][0], 0.0);
        assert_eq!(rates[3][1], 0.1);
        assert_close_to_vec(&rates[1], &[2.0 / 70.0, 3.0 / 70.0], 1e-9);
    }

    #[test]
    #[should_panic(expected = "Stage index 3 out of bounds for 3 stages")]
    fn test_stage_out_of_bounds() {
        let _ = DropPathRateDepthTable::new(0.1, &[1, 1, 1]).stage_dprs(3);
    }
}
