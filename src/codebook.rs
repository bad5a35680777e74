//! The codebook: a dense grid of weight vectors.
//!
//! The grid is stored as one contiguous row-major matrix of shape
//! (som_y, som_x * ndimen); the cell at grid position (row, col) occupies columns
//! col * ndimen .. (col + 1) * ndimen of its row. The backing buffer can therefore be
//! broadcast as a single flat message and rebuilt identically on every rank.

use std::fmt;

use anyhow::{Result, bail};
use ndarray::Array2;
use rand::Rng;

use crate::vecops::{self, Distance};

#[derive(Clone, Debug, PartialEq)]
pub struct Codebook {
    /// (som_y, som_x * ndimen), standard layout
    weights: Array2<f32>,
    som_x: usize,
    som_y: usize,
    ndimen: usize,
}

impl Codebook {
    /// Allocates a zero-filled codebook, rejecting degenerate dimensions.
    pub fn new(som_x: usize, som_y: usize, ndimen: usize) -> Result<Self> {
        if som_x == 0 || som_y == 0 || ndimen == 0 {
            bail!(
                "not a valid codebook matrix: {} x {} cells of dimension {}",
                som_x,
                som_y,
                ndimen
            );
        }
        Ok(Codebook {
            weights: Array2::zeros((som_y, som_x * ndimen)),
            som_x,
            som_y,
            ndimen,
        })
    } // end of new

    /// Fills every weight with a uniform draw in [-0.5, 0.5).
    pub fn randomize<R: Rng>(&mut self, rng: &mut R) {
        for w in self.weights.iter_mut() {
            *w = rng.random_range(-0.5f32..0.5);
        }
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

    fn data(&self) -> &[f32] {
        // arrays built by new() stay in standard layout for their whole life
        self.weights.as_slice().expect("codebook buffer is contiguous")
    }

    /// The weight vector of the cell at grid position (row, col).
    pub fn get_wvec(&self, row: usize, col: usize) -> Result<&[f32]> {
        if row >= self.som_y || col >= self.som_x {
            bail!(
                "cell ({},{}) outside a {} x {} codebook",
                row,
                col,
                self.som_y,
                self.som_x
            );
        }
        let start = row * self.som_x * self.ndimen + col * self.ndimen;
        Ok(&self.data()[start..start + self.ndimen])
    } // end of get_wvec

    /// Writes one component of one weight vector; the address mirrors [`Self::get_wvec`]
    /// so the update stage and the BMU search agree on the layout.
    pub fn set_component(&mut self, row: usize, col: usize, dim: usize, weight: f32) -> Result<()> {
        if row >= self.som_y || col >= self.som_x || dim >= self.ndimen {
            bail!(
                "weight ({},{},{}) outside a {} x {} x {} codebook",
                row,
                col,
                dim,
                self.som_y,
                self.som_x,
                self.ndimen
            );
        }
        self.weights[[row, col * self.ndimen + dim]] = weight;
        Ok(())
    } // end of set_component

    /// Grid coordinates of the Best-Matching-Unit for fvec: the cell whose weight
    /// vector minimizes the distance. Scans every cell in row-major order; strict
    /// comparison keeps the first minimum seen.
    pub fn find_bmu(&self, fvec: &[f32], metric: Distance) -> (usize, usize) {
        let wvec = |row, col| self.get_wvec(row, col).expect("scan stays inside the grid");
        let mut coords = (0usize, 0usize);
        let mut mindist = vecops::distance(wvec(0, 0), fvec, metric);
        for row in 0..self.som_y {
            for col in 0..self.som_x {
                let dist = vecops::distance(wvec(row, col), fvec, metric);
                if dist < mindist {
                    mindist = dist;
                    coords = (row, col);
                }
            }
        }
        coords
    } // end of find_bmu

    /// The flat broadcast buffer, row-major.
    pub fn as_slice(&self) -> &[f32] {
        self.data()
    }

    /// Overwrites the whole grid from a broadcast buffer.
    pub fn copy_weights_from(&mut self, buffer: &[f32]) -> Result<()> {
        if buffer.len() != self.weights.len() {
            bail!(
                "codebook buffer length mismatch: got {}, expected {}",
                buffer.len(),
                self.weights.len()
            );
        }
        self.weights
            .as_slice_mut()
            .expect("codebook buffer is contiguous")
            .copy_from_slice(buffer);
        Ok(())
    } // end of copy_weights_from

    pub(crate) fn as_mut_slice(&mut self) -> &mut [f32] {
        self.weights
            .as_slice_mut()
            .expect("codebook buffer is contiguous")
    }

    pub fn is_finite(&self) -> bool {
        self.weights.iter().all(|w| w.is_finite())
    }
} // end of impl Codebook

impl fmt::Display for Codebook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..self.som_y {
            for value in self.weights.row(row).iter() {
                write!(f, "{:7.3} ", value)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

//===========================================================================

#[cfg(test)]
mod tests {

    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn rejects_degenerate_dimensions() {
        log_init_test();
        assert!(Codebook::new(0, 2, 2).is_err());
        assert!(Codebook::new(2, 0, 2).is_err());
        assert!(Codebook::new(2, 2, 0).is_err());
    }

    #[test]
    fn write_read_same_address() {
        log_init_test();
        // the update stage writes through set_component, the BMU search reads through
        // get_wvec; both must resolve (row, col, dim) to the same scalar
        let mut codebook = Codebook::new(3, 2, 4).unwrap();
        codebook.set_component(1, 2, 3, 42.0).unwrap();
        assert_eq!(codebook.get_wvec(1, 2).unwrap()[3], 42.0);
        assert_eq!(codebook.as_slice()[1 * 3 * 4 + 2 * 4 + 3], 42.0);
        assert!(codebook.set_component(2, 0, 0, 1.0).is_err());
        assert!(codebook.set_component(0, 3, 0, 1.0).is_err());
        assert!(codebook.set_component(0, 0, 4, 1.0).is_err());
        assert!(codebook.get_wvec(2, 0).is_err());
        assert!(codebook.get_wvec(0, 3).is_err());
    }

    #[test]
    fn bmu_scans_full_non_square_grid() {
        log_init_test();
        // 4 wide, 2 high; place the matching weight in a column the buggy
        // col < som_y bound would never reach
        let mut codebook = Codebook::new(4, 2, 2).unwrap();
        codebook.set_component(1, 3, 0, 5.0).unwrap();
        codebook.set_component(1, 3, 1, 5.0).unwrap();
        let bmu = codebook.find_bmu(&[5.0, 5.0], Distance::Euclidean);
        assert_eq!(bmu, (1, 3));
    }

    #[test]
    fn bmu_tie_break_is_first_seen() {
        log_init_test();
        // all cells are zero, every distance ties; row-major first wins
        let codebook = Codebook::new(3, 3, 2).unwrap();
        let bmu = codebook.find_bmu(&[1.0, 1.0], Distance::Euclidean);
        assert_eq!(bmu, (0, 0));
    }

    #[test]
    fn broadcast_buffer_round_trip() {
        log_init_test();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(17);
        let mut source = Codebook::new(5, 3, 2).unwrap();
        source.randomize(&mut rng);
        let mut replica = Codebook::new(5, 3, 2).unwrap();
        replica.copy_weights_from(source.as_slice()).unwrap();
        assert_eq!(replica, source);
        assert!(replica.copy_weights_from(&[0.0; 4]).is_err());
    }

    #[test]
    fn randomize_stays_in_range() {
        log_init_test();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let mut codebook = Codebook::new(10, 10, 3).unwrap();
        codebook.randomize(&mut rng);
        assert!(codebook.as_slice().iter().all(|w| (-0.5..0.5).contains(w)));
        assert!(codebook.is_finite());
    }
} // end of mod tests
