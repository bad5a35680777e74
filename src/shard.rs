//! Shard and master file readers.
//!
//! The master file lists one shard path per line; a shard holds a fixed block of
//! whitespace-separated feature vectors. Both readers fail fast: a missing file, a bad
//! token or a wrong value count aborts the rank rather than training on garbage.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use ndarray::Array2;

/// Reads the shard listing. Blank lines are ignored.
pub fn read_master(path: &Path) -> Result<Vec<PathBuf>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read master file {}", path.display()))?;
    let shards: Vec<PathBuf> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect();
    if shards.is_empty() {
        bail!("master file {} lists no shards", path.display());
    }
    log::debug!("master file {} lists {} shards", path.display(), shards.len());
    Ok(shards)
} // end of read_master

/// Materializes one shard into a dense (nvecs, ndimen) matrix.
pub fn load_shard(path: &Path, nvecs: usize, ndimen: usize) -> Result<Array2<f32>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read shard {}", path.display()))?;
    let mut values = Vec::<f32>::with_capacity(nvecs * ndimen);
    for token in text.split_whitespace() {
        let value: f32 = token
            .parse()
            .with_context(|| format!("bad float {:?} in shard {}", token, path.display()))?;
        values.push(value);
    }
    if values.len() != nvecs * ndimen {
        bail!(
            "shard {} holds {} values, expected {} ({} vectors of dimension {})",
            path.display(),
            values.len(),
            nvecs * ndimen,
            nvecs,
            ndimen
        );
    }
    Ok(Array2::from_shape_vec((nvecs, ndimen), values)?)
} // end of load_shard

//===========================================================================

// end of mod tests
