//! Result writers for the root rank: the trained map and its U-matrix.
//!
//! The map file follows the umat tool layout: a `NDIMEN rect SOM_X SOM_Y` header,
//! then one weight vector per line, grid cells in row-major order. The U-matrix holds,
//! per grid node, the mean feature-space distance to its grid neighbours; large values
//! draw the boundaries between clusters on the map.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::codebook::Codebook;
use crate::vecops::{self, Distance};

/// Grid radius bounding the neighbourhood of a node in the U-matrix.
/// 1.5 takes in the 8 surrounding cells of the rectangular grid.
const UMAT_NEIGHBOUR_RADIUS: f32 = 1.5;

/// Writes the codebook in map-file form.
pub fn save_map(codebook: &Codebook, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("cannot create map file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(
        writer,
        "{} rect {} {}",
        codebook.get_ndimen(),
        codebook.get_som_x(),
        codebook.get_som_y()
    )?;
    for row in 0..codebook.get_som_y() {
        for col in 0..codebook.get_som_x() {
            for weight in codebook.get_wvec(row, col)? {
                write!(writer, "{} ", weight)?;
            }
            writeln!(writer)?;
        }
    }
    writer.flush()?;
    Ok(())
} // end of save_map

/// Reads a map file back into a codebook. Inverse of [`save_map`].
pub fn load_map(path: &Path) -> Result<Codebook> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read map file {}", path.display()))?;
    let mut lines = text.lines();
    let header = lines.next().unwrap_or("");
    let fields: Vec<&str> = header.split_whitespace().collect();
    if fields.len() != 4 || fields[1] != "rect" {
        bail!("malformed map header {:?} in {}", header, path.display());
    }
    let ndimen: usize = fields[0]
        .parse()
        .with_context(|| format!("bad dimension in map header {:?}", header))?;
    let som_x: usize = fields[2]
        .parse()
        .with_context(|| format!("bad width in map header {:?}", header))?;
    let som_y: usize = fields[3]
        .parse()
        .with_context(|| format!("bad height in map header {:?}", header))?;
    let mut codebook = Codebook::new(som_x, som_y, ndimen)?;
    for row in 0..som_y {
        for col in 0..som_x {
            let line = match lines.next() {
                Some(line) => line,
                None => bail!("map file {} truncated at cell ({},{})", path.display(), row, col),
            };
            let weights: Vec<&str> = line.split_whitespace().collect();
            if weights.len() != ndimen {
                bail!(
                    "cell ({},{}) of {} holds {} weights, expected {}",
                    row,
                    col,
                    path.display(),
                    weights.len(),
                    ndimen
                );
            }
            for (dim, token) in weights.iter().enumerate() {
                let weight: f32 = token
                    .parse()
                    .with_context(|| format!("bad weight {:?} in {}", token, path.display()))?;
                codebook.set_component(row, col, dim, weight)?;
            }
        }
    }
    Ok(codebook)
} // end of load_map

/// Writes the unified distance matrix: per grid node, the mean Euclidean distance in
/// feature space to the grid neighbours within [`UMAT_NEIGHBOUR_RADIUS`], one grid row
/// per line.
pub fn save_umat(codebook: &Codebook, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("cannot create umat file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let som_x = codebook.get_som_x();
    let som_y = codebook.get_som_y();
    for row in 0..som_y {
        for col in 0..som_x {
            let mut dist = 0.0f32;
            let mut nneighbours = 0u32;
            for nrow in 0..som_y {
                for ncol in 0..som_x {
                    if (nrow, ncol) == (row, col) {
                        continue;
                    }
                    let dy = row as f32 - nrow as f32;
                    let dx = col as f32 - ncol as f32;
                    if (dy * dy + dx * dx).sqrt() <= UMAT_NEIGHBOUR_RADIUS {
                        dist += vecops::distance(
                            codebook.get_wvec(row, col)?,
                            codebook.get_wvec(nrow, ncol)?,
                            Distance::Euclidean,
                        );
                        nneighbours += 1;
                    }
                }
            }
            if nneighbours > 0 {
                dist /= nneighbours as f32;
            }
            write!(writer, "{:.6} ", dist)?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
} // end of save_umat

//===========================================================================

// end of mod tests
