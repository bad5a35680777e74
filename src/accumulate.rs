//! Per-shard accumulation of BMU statistics, the map body of the batch trainer.
//!
//! For every training vector the accumulator finds the Best-Matching-Unit and spreads
//! the vector over the whole grid through a Gaussian neighbourhood kernel centred at
//! the BMU: node (r, c) at grid distance gd of the BMU receives mass
//! h = exp(-gd^2 / R^2). The numerator tensor sums h * n\[d\] per weight component,
//! the denominator sums h per node. Their reduced quotient is the batch update.

use std::path::Path;

use anyhow::Result;
use ndarray::{Array2, Array3};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::codebook::Codebook;
use crate::codec::{PartialSum, WeightKey};
use crate::mapreduce::KeyValue;
use crate::params::SomParams;
use crate::shard;
use crate::vecops::{self, Distance};

/// Partial sums of one map task. Lives for one shard, emitted then dropped.
pub struct BmuAccumulator {
    /// (som_y, som_x, ndimen)
    numer: Array3<f32>,
    /// (som_y, som_x); the kernel mass does not depend on the component index, it is
    /// duplicated per component only on the wire
    denom: Array2<f32>,
}

impl BmuAccumulator {
    pub fn new(som_x: usize, som_y: usize, ndimen: usize) -> Self {
        BmuAccumulator {
            numer: Array3::zeros((som_y, som_x, ndimen)),
            denom: Array2::zeros((som_y, som_x)),
        }
    }

    /// Folds one normalized training vector into the sums.
    pub fn absorb(&mut self, codebook: &Codebook, normalized: &[f32], radius: f32, metric: Distance) {
        let (som_y, som_x, ndimen) = self.numer.dim();
        let (bmu_row, bmu_col) = codebook.find_bmu(normalized, metric);
        for row in 0..som_y {
            for col in 0..som_x {
                // the grid is 2-D whatever the feature dimensionality
                let dy = bmu_row as f32 - row as f32;
                let dx = bmu_col as f32 - col as f32;
                let gd = (dy * dy + dx * dx).sqrt();
                let neighbor_fuct = (-(gd * gd) / (radius * radius)).exp();
                for dim in 0..ndimen {
                    self.numer[[row, col, dim]] += neighbor_fuct * normalized[dim];
                }
                self.denom[[row, col]] += neighbor_fuct;
            }
        }
    } // end of absorb

    /// Emits one pair per codebook weight. The denominator is replicated across the
    /// component axis so the wire carries a value for every (row, col, dim) triple.
    pub fn emit(&self, out: &mut Vec<KeyValue>) {
        let (som_y, som_x, ndimen) = self.numer.dim();
        out.reserve(som_y * som_x * ndimen);
        for row in 0..som_y {
            for col in 0..som_x {
                let denom = self.denom[[row, col]];
                for dim in 0..ndimen {
                    let key = WeightKey::new(row, col, dim);
                    let value = PartialSum::new(self.numer[[row, col, dim]], denom);
                    out.push(KeyValue::new(key.to_string(), value.to_string()));
                }
            }
        }
    } // end of emit

    #[cfg(test)]
    pub(crate) fn get_denom(&self, row: usize, col: usize) -> f32 {
        self.denom[[row, col]]
    }

    #[cfg(test)]
    pub(crate) fn get_numer(&self, row: usize, col: usize, dim: usize) -> f32 {
        self.numer[[row, col, dim]]
    }
} // end of impl BmuAccumulator

/// The batch map task: loads one shard, accumulates its vectors against the current
/// codebook replica and emits the keyed partial sums.
///
/// Rows are visited in a uniformly shuffled order. The batch update sums every
/// contribution before touching any weight, so the permutation does not change the
/// epoch's result; it only decorrelates shard order from emission order.
pub fn train_batch_shard(
    itask: usize,
    path: &Path,
    codebook: &Codebook,
    radius: f32,
    params: &SomParams,
    out: &mut Vec<KeyValue>,
) -> Result<()> {
    let data = shard::load_shard(path, params.get_nvecs_per_file(), params.get_ndimen())?;
    let mut order: Vec<usize> = (0..data.nrows()).collect();
    if params.get_shuffle() {
        let mut rng = match params.get_seed() {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed.wrapping_add(itask as u64 + 1)),
            None => Xoshiro256PlusPlus::from_os_rng(),
        };
        order.shuffle(&mut rng);
    }
    let mut accumulator =
        BmuAccumulator::new(params.get_som_x(), params.get_som_y(), params.get_ndimen());
    for &row in &order {
        let fvec = data.row(row).to_vec();
        let normalized = vecops::normalize(&fvec, params.get_normalization());
        accumulator.absorb(codebook, &normalized, radius, params.get_metric());
    }
    accumulator.emit(out);
    log::trace!("task {} absorbed {} vectors from {}", itask, order.len(), path.display());
    Ok(())
} // end of train_batch_shard

//===========================================================================

// end of mod tests
