//! Feature vector kernels: normalization and distance.
//!
//! The kernels are generic over [`num_traits::Float`] as everywhere in the crate numeric
//! code; the trainer instantiates them at f32.

use num_traits::Float;

/// Normalization applied to every feature vector before BMU search and accumulation.
///
/// Only `None` and `Energy` are implemented; the remaining variants are part of the
/// configuration surface and rejected by [`crate::params::SomParams::validate`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Normalization {
    None,
    MinMax,
    Zscore,
    Sigmoid,
    Energy,
}

impl Normalization {
    pub fn is_implemented(&self) -> bool {
        matches!(self, Normalization::None | Normalization::Energy)
    }
}

/// Distance between a feature vector and a codebook weight vector.
///
/// Only `Euclidean` is implemented, see [`Normalization`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Distance {
    Euclidean,
    SumOfSquares,
    Taxicab,
    Angle,
    Mahalanobis,
}

impl Distance {
    pub fn is_implemented(&self) -> bool {
        matches!(self, Distance::Euclidean)
    }
}

/// Returns a newly owned normalized copy of fvec.
/// Energy divides every component by the L2 norm; a null vector is returned unchanged.
pub fn normalize<F: Float>(fvec: &[F], mode: Normalization) -> Vec<F> {
    match mode {
        Normalization::Energy => {
            let energy = fvec
                .iter()
                .fold(F::zero(), |acc, x| acc + *x * *x)
                .sqrt();
            if energy == F::zero() {
                return fvec.to_vec();
            }
            fvec.iter().map(|x| *x / energy).collect()
        }
        // MinMax, Zscore and Sigmoid are screened out by SomParams::validate
        _ => fvec.to_vec(),
    }
} // end of normalize

/// Distance between vec1 and vec2, default Euclidean.
pub fn distance<F: Float>(vec1: &[F], vec2: &[F], metric: Distance) -> F {
    debug_assert_eq!(vec1.len(), vec2.len());
    match metric {
        Distance::Euclidean => euclidean(vec1, vec2),
        // SumOfSquares, Taxicab, Angle and Mahalanobis are screened out by
        // SomParams::validate
        _ => euclidean(vec1, vec2),
    }
} // end of distance

fn euclidean<F: Float>(vec1: &[F], vec2: &[F]) -> F {
    let mut dist = F::zero();
    for (w1, w2) in vec1.iter().zip(vec2.iter()) {
        dist = dist + (*w1 - *w2) * (*w1 - *w2);
    }
    dist.sqrt()
}

//===========================================================================

// end of mod tests
