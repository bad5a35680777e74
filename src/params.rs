//! Run configuration for a training job.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use crate::vecops::{Distance, Normalization};

/// Default grid width when the command line does not give one.
pub const DEFAULT_SOM_X: usize = 50;
/// Default grid height when the command line does not give one.
pub const DEFAULT_SOM_Y: usize = 50;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrainMode {
    Batch,
    Online,
}

impl TrainMode {
    /// decode the numeric command line convention. 0 is batch, 1 is online.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(TrainMode::Batch),
            1 => Ok(TrainMode::Online),
            _ => bail!("unknown train mode code {}", code),
        }
    }
} // end of TrainMode

/// Parameters of one training run.
///
/// The grid and data dimensions come from the command line; everything else has the
/// defaults of the batch trainer and can be overridden with the setters.
#[derive(Clone, Debug)]
pub struct SomParams {
    /// grid width
    som_x: usize,
    /// grid height
    som_y: usize,
    /// feature vector dimensionality
    ndimen: usize,
    /// number of feature vectors in each shard file
    nvecs_per_file: usize,
    /// maximum number of epochs
    nepochs: u32,
    mode: TrainMode,
    normalization: Normalization,
    metric: Distance,
    /// initial neighbourhood radius. By default som_x / 2.
    initial_radius: Option<f32>,
    /// seed of the random streams (codebook init, shard shuffle). None draws from the OS.
    seed: Option<u64>,
    /// shuffle shard rows before accumulation
    shuffle: bool,
    /// directory receiving result.map.txt and result.umat.txt
    output_dir: PathBuf,
} // end of SomParams

impl SomParams {
    pub fn new(
        som_x: usize,
        som_y: usize,
        ndimen: usize,
        nvecs_per_file: usize,
        nepochs: u32,
    ) -> Self {
        SomParams {
            som_x,
            som_y,
            ndimen,
            nvecs_per_file,
            nepochs,
            mode: TrainMode::Batch,
            normalization: Normalization::None,
            metric: Distance::Euclidean,
            initial_radius: None,
            seed: None,
            shuffle: true,
            output_dir: PathBuf::from("."),
        }
    }

    pub fn set_mode(&mut self, mode: TrainMode) {
        self.mode = mode;
    }

    pub fn set_normalization(&mut self, normalization: Normalization) {
        self.normalization = normalization;
    }

    pub fn set_metric(&mut self, metric: Distance) {
        self.metric = metric;
    }

    /// override the default initial radius som_x / 2
    pub fn set_initial_radius(&mut self, r0: f32) {
        if r0 <= 0. {
            log::warn!("not changing initial radius, radius must be positive");
            return;
        }
        self.initial_radius = Some(r0);
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.seed = Some(seed);
    }

    pub fn set_shuffle(&mut self, shuffle: bool) {
        self.shuffle = shuffle;
    }

    pub fn set_output_dir<P: AsRef<Path>>(&mut self, dir: P) {
        self.output_dir = dir.as_ref().to_path_buf();
    }

    pub fn get_som_x(&self) -> usize {
        self.som_x
    }

    pub fn get_som_y(&self) -> usize {
        self.som_y
    }

    pub fn get_ndimen(&self) -> usize {
        self.ndimen
    }

    pub fn get_nvecs_per_file(&self) -> usize {
        self.nvecs_per_file
    }

    pub fn get_nepochs(&self) -> u32 {
        self.nepochs
    }

    pub fn get_nnodes(&self) -> usize {
        self.som_x * self.som_y
    }

    pub fn get_mode(&self) -> TrainMode {
        self.mode
    }

    pub fn get_normalization(&self) -> Normalization {
        self.normalization
    }

    pub fn get_metric(&self) -> Distance {
        self.metric
    }

    pub fn get_initial_radius(&self) -> f32 {
        self.initial_radius
            .unwrap_or(self.som_x as f32 / 2.)
    }

    pub fn get_seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn get_shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn get_output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Rejects dimensions and options the trainer cannot honour.
    /// Declared-only normalizations and metrics are screened out here so the
    /// numeric kernels never see them.
    pub fn validate(&self) -> Result<()> {
        if self.som_x == 0 || self.som_y == 0 {
            bail!("som grid must have positive dimensions, got {} x {}", self.som_x, self.som_y);
        }
        if self.ndimen == 0 {
            bail!("feature dimensionality must be positive");
        }
        if self.nvecs_per_file == 0 {
            bail!("shards must hold at least one feature vector");
        }
        if !self.normalization.is_implemented() {
            bail!("normalization {:?} is declared but not implemented", self.normalization);
        }
        if !self.metric.is_implemented() {
            bail!("distance metric {:?} is declared but not implemented", self.metric);
        }
        Ok(())
    } // end of validate
} // end of impl SomParams

//===========================================================================

// end of mod tests
