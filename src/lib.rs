//! Distributed batch training of Self-Organizing Maps.
//!
//! A SOM is a two-dimensional grid of weight vectors (the *codebook*) trained so that
//! nearby grid cells come to represent nearby regions of the feature space.
//! This crate trains the codebook in batch mode over a cluster of worker ranks with a
//! bulk-synchronous map-reduce loop: every epoch the root rank broadcasts the decaying
//! neighbourhood radius and the full codebook, each rank accumulates Best-Matching-Unit
//! statistics over its shards, the partial sums are collated and reduced across the
//! cluster, and the root rank applies the reduced sums to the codebook.
//!
//! Bibliography
//!   - *Self-Organizing Maps*. Kohonen. Springer Series in Information Sciences 2001
//!   - *The self-organizing map*. Kohonen. Proceedings of the IEEE 78(9) 1990
//!   - *MapReduce: Simplified Data Processing on Large Clusters*. Dean Ghemawat OSDI 2004

pub mod accumulate;
pub mod cluster;
pub mod codebook;
pub mod codec;
pub mod driver;
pub mod mapreduce;
pub mod output;
pub mod params;
pub mod shard;
pub mod vecops;
