//! The distributed batch training loop.
//!
//! Every rank runs the same program: create a codebook replica, then per epoch
//! barrier, receive the radius and the root's codebook, map its shards to keyed
//! partial sums, collate and reduce them across the cluster, gather everything on the
//! root and let the root fold the reduced sums into its codebook. The next epoch's
//! broadcast carries the updated weights, so every map of epoch e + 1 observes every
//! update of epoch e.
//!
//! The neighbourhood radius follows R = R0 * exp(-10 x^2 / N^2) and the loop stops
//! when either the epoch budget is exhausted or R has decayed to 1, whichever comes
//! first.

use std::path::Path;

use anyhow::{Result, bail};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::accumulate;
use crate::cluster::{Communicator, ROOT};
use crate::codebook::Codebook;
use crate::codec::{PartialSum, WeightKey};
use crate::mapreduce::{KeyValue, MapReduce};
use crate::output;
use crate::params::{SomParams, TrainMode};
use crate::shard;

/// Macro states of a rank, in order. Every rank reaches Finalized before the
/// substrate is torn down.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunState {
    Initializing,
    Training,
    Persisting,
    Finalized,
}

fn transition(rank: usize, from: RunState, to: RunState) -> RunState {
    log::debug!("rank {} state {:?} -> {:?}", rank, from, to);
    to
}

/// What one rank hands back after the run. The root rank's codebook is the trained
/// one; other replicas lag by the last epoch's update.
pub struct TrainingSummary {
    pub codebook: Codebook,
    pub epochs_run: u32,
    pub final_radius: f32,
}

/// Runs the whole training job on one rank, from initialization to persisted outputs.
pub fn run(comm: &Communicator, params: &SomParams, master: &Path) -> Result<TrainingSummary> {
    params.validate()?;
    if params.get_mode() == TrainMode::Online {
        bail!("online training mode is not implemented");
    }
    let rank = comm.get_rank();
    let mut state = RunState::Initializing;

    let mut codebook = Codebook::new(params.get_som_x(), params.get_som_y(), params.get_ndimen())?;
    if rank == ROOT {
        let mut rng = match params.get_seed() {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_os_rng(),
        };
        codebook.randomize(&mut rng);
    }
    let shards = shard::read_master(master)?;
    log::info!(
        "rank {} of {} initialized: {} x {} map, {} dims, {} shards",
        rank,
        comm.get_size(),
        params.get_som_x(),
        params.get_som_y(),
        params.get_ndimen(),
        shards.len()
    );

    comm.barrier()?;
    state = transition(rank, state, RunState::Training);

    let n = params.get_nepochs() as f32;
    let r0 = params.get_initial_radius();
    let mut radius = r0;
    let mut remaining = params.get_nepochs();
    let mut x = 0u32;
    let mut epochs_run = 0u32;

    while remaining > 0 && radius > 1.0 {
        if rank == ROOT {
            x += 1;
            let xf = x as f32;
            radius = r0 * (-10.0 * xf * xf / (n * n)).exp();
            log::info!("batch epoch {}  R {:.2}", remaining - 1, radius);
        }
        comm.barrier()?;
        radius = comm.broadcast_scalar(radius, ROOT)?;
        comm.broadcast_buffer(codebook.as_mut_slice(), ROOT)?;

        let mut mr = MapReduce::new(comm);
        let nemitted = mr.map_shards(&shards, |itask, path, out| {
            accumulate::train_batch_shard(itask, path, &codebook, radius, params, out)
        })?;
        let nkeys = mr.collate()?;
        mr.reduce(sum_partials)?;
        mr.gather(ROOT)?;
        let nupdates = mr.map_pairs(|pair| apply_update(pair, &mut codebook))?;
        log::debug!(
            "rank {} epoch done: {} pairs mapped, {} keys reduced, {} updates",
            rank,
            nemitted,
            nkeys,
            nupdates
        );

        comm.barrier()?;
        remaining -= 1;
        epochs_run += 1;
    }

    state = transition(rank, state, RunState::Persisting);
    if rank == ROOT {
        if !codebook.is_finite() {
            bail!("codebook left non finite after {} epochs", epochs_run);
        }
        let umat_path = params.get_output_dir().join("result.umat.txt");
        output::save_umat(&codebook, &umat_path)?;
        let map_path = params.get_output_dir().join("result.map.txt");
        output::save_map(&codebook, &map_path)?;
        log::info!(
            "rank 0 persisted {} and {} after {} epochs, final radius {:.3}",
            umat_path.display(),
            map_path.display(),
            epochs_run,
            radius
        );
    }
    comm.barrier()?;
    state = transition(rank, state, RunState::Finalized);
    log::trace!("rank {} leaves in state {:?}", rank, state);

    Ok(TrainingSummary { codebook, epochs_run, final_radius: radius })
} // end of run

/// The reduce combiner: component-wise sum of every partial sum sharing a key.
fn sum_partials(key: &str, values: &[String], out: &mut Vec<KeyValue>) -> Result<()> {
    let mut total = PartialSum::default();
    for value in values {
        total += value.parse::<PartialSum>()?;
    }
    out.push(KeyValue::new(key, total.to_string()));
    Ok(())
}

/// The update stage: the reduced quotient replaces the weight, a null denominator
/// keeps the previous weight untouched.
fn apply_update(pair: &KeyValue, codebook: &mut Codebook) -> Result<()> {
    let key: WeightKey = pair.key.parse()?;
    let sum: PartialSum = pair.value.parse()?;
    if sum.denom != 0.0 {
        codebook.set_component(key.row, key.col, key.dim, sum.numer / sum.denom)?;
    }
    Ok(())
}

//===========================================================================

#[cfg(test)]
mod tests {

    use super::*;
    use crate::cluster;
    use std::io::Write;
    use std::path::PathBuf;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// writes one shard file per row block and the master file listing them
    fn write_dataset(dir: &Path, blocks: &[&[[f32; 2]]]) -> PathBuf {
        let mut shard_paths = Vec::new();
        for (i, block) in blocks.iter().enumerate() {
            let path = dir.join(format!("chunk{}.txt", i));
            let mut f = std::fs::File::create(&path).unwrap();
            for v in *block {
                writeln!(f, "{} {}", v[0], v[1]).unwrap();
            }
            shard_paths.push(path);
        }
        let master = dir.join("master.txt");
        let mut f = std::fs::File::create(&master).unwrap();
        for path in &shard_paths {
            writeln!(f, "{}", path.display()).unwrap();
        }
        master
    }

    fn unit_square() -> [[f32; 2]; 4] {
        [[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]]
    }

    #[test]
    fn identity_fit_collapses_to_centroid() {
        log_init_test();
        // a large initial radius keeps the kernel flat over the 2 x 2 grid, so every
        // cell is pulled to the centroid of the unit square corners
        let dir = tempfile::tempdir().unwrap();
        let square = unit_square();
        let master = write_dataset(dir.path(), &[&square]);
        let mut params = SomParams::new(2, 2, 2, 4, 200);
        params.set_seed(42);
        params.set_initial_radius(50.0);
        params.set_output_dir(dir.path());

        let summaries = cluster::run_cluster(1, |comm| run(&comm, &params, &master)).unwrap();
        let codebook = &summaries[0].codebook;
        assert!(summaries[0].epochs_run > 0);
        assert!(codebook.is_finite());
        for row in 0..2 {
            for col in 0..2 {
                for (dim, w) in codebook.get_wvec(row, col).unwrap().iter().enumerate() {
                    // convex hull of the corners is the unit square
                    assert!((-1.0e-6..=1.0 + 1.0e-6).contains(w), "weight {} out of hull", w);
                    assert!(
                        (w - 0.5).abs() < 0.05,
                        "cell ({},{}) dim {} = {} far from centroid",
                        row,
                        col,
                        dim,
                        w
                    );
                }
            }
        }
    }

    #[test]
    fn radius_collapse_bounds_the_epoch_count() {
        log_init_test();
        // R0 = som_x / 2 = 2; the schedule must hit R <= 1 after
        // ceil(N * sqrt(ln 2 / 10)) epochs, far below the epoch budget
        let dir = tempfile::tempdir().unwrap();
        let master = write_dataset(dir.path(), &[&[[0.0, 0.0], [1.0, 1.0]]]);
        let nepochs = 10000u32;
        let mut params = SomParams::new(4, 4, 2, 2, nepochs);
        params.set_seed(1);
        params.set_output_dir(dir.path());

        let summaries = cluster::run_cluster(1, |comm| run(&comm, &params, &master)).unwrap();
        let expected = (nepochs as f64 * (2f64.ln() / 10.0).sqrt()).ceil() as u32;
        assert_eq!(summaries[0].epochs_run, expected);
        assert!(summaries[0].final_radius <= 1.0);
    }

    #[test]
    fn two_ranks_match_one_rank() {
        log_init_test();
        let vectors: [[f32; 2]; 8] = [
            [0.05, 0.1],
            [0.9, 0.85],
            [0.2, 0.8],
            [0.75, 0.3],
            [0.4, 0.45],
            [0.6, 0.2],
            [0.15, 0.65],
            [0.85, 0.55],
        ];
        let dir_single = tempfile::tempdir().unwrap();
        let master_single = write_dataset(dir_single.path(), &[&vectors]);
        let dir_split = tempfile::tempdir().unwrap();
        let master_split =
            write_dataset(dir_split.path(), &[&vectors[..4], &vectors[4..]]);

        let mut params_single = SomParams::new(8, 8, 2, 8, 1);
        params_single.set_seed(9);
        params_single.set_output_dir(dir_single.path());
        let single = cluster::run_cluster(1, |comm| run(&comm, &params_single, &master_single))
            .unwrap();

        let mut params_split = SomParams::new(8, 8, 2, 4, 1);
        params_split.set_seed(9);
        params_split.set_output_dir(dir_split.path());
        let split = cluster::run_cluster(2, |comm| run(&comm, &params_split, &master_split))
            .unwrap();

        let reference = single[0].codebook.as_slice();
        let distributed = split[0].codebook.as_slice();
        assert_eq!(reference.len(), distributed.len());
        for (a, b) in reference.iter().zip(distributed.iter()) {
            assert!((a - b).abs() < 1.0e-5, "{} vs {}", a, b);
        }
    }

    #[test]
    fn seeded_runs_reproduce_bitwise() {
        log_init_test();
        let dir = tempfile::tempdir().unwrap();
        let square = unit_square();
        let master = write_dataset(dir.path(), &[&square]);
        let mut params = SomParams::new(4, 3, 2, 4, 5);
        params.set_seed(123);
        params.set_output_dir(dir.path());

        let first = cluster::run_cluster(2, |comm| run(&comm, &params, &master)).unwrap();
        let second = cluster::run_cluster(2, |comm| run(&comm, &params, &master)).unwrap();
        assert!(first[0].epochs_run > 0);
        assert_eq!(first[0].codebook, second[0].codebook);
    }

    #[test]
    fn vanishing_radius_keeps_unvisited_cells_bitwise() {
        log_init_test();
        // one epoch at a microscopic radius: only the BMU cell of the single training
        // vector receives mass, every other weight must survive bit for bit
        let dir = tempfile::tempdir().unwrap();
        let master = write_dataset(dir.path(), &[&[[0.9, 0.9]]]);
        let mut params = SomParams::new(3, 3, 2, 1, 1);
        params.set_seed(5);
        params.set_output_dir(dir.path());
        // the epoch loop would not start with R <= 1, drive one epoch by hand
        let mut initial = Codebook::new(3, 3, 2).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        initial.randomize(&mut rng);

        let radius = 1.0e-18f32;
        let shards = shard::read_master(&master).unwrap();
        let summaries = cluster::run_cluster(1, |comm| {
            let mut codebook = initial.clone();
            let mut mr = MapReduce::new(&comm);
            mr.map_shards(&shards, |itask, path, out| {
                accumulate::train_batch_shard(itask, path, &codebook, radius, &params, out)
            })?;
            mr.collate()?;
            mr.reduce(sum_partials)?;
            mr.gather(ROOT)?;
            mr.map_pairs(|pair| apply_update(pair, &mut codebook))?;
            Ok(codebook)
        })
        .unwrap();
        let trained = &summaries[0];
        let bmu = initial.find_bmu(&[0.9, 0.9], crate::vecops::Distance::Euclidean);
        let mut touched = 0;
        for row in 0..3 {
            for col in 0..3 {
                let before = initial.get_wvec(row, col).unwrap();
                let after = trained.get_wvec(row, col).unwrap();
                if (row, col) == bmu {
                    touched += 1;
                } else {
                    for (b, a) in before.iter().zip(after.iter()) {
                        assert_eq!(b.to_bits(), a.to_bits());
                    }
                }
            }
        }
        assert_eq!(touched, 1);
        // the BMU itself moved onto the vector
        let bmu_weights = trained.get_wvec(bmu.0, bmu.1).unwrap();
        assert!((bmu_weights[0] - 0.9).abs() < 1.0e-6);
        assert!((bmu_weights[1] - 0.9).abs() < 1.0e-6);
    }

    #[test]
    fn gaussian_clusters_land_on_distinct_cells() {
        log_init_test();
        use rand_distr::{Distribution, Normal};
        // two tight clusters; after training their centers must resolve to different
        // BMUs and the map must stay finite
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(77);
        let near = Normal::<f32>::new(0.0, 0.05).unwrap();
        let far = Normal::<f32>::new(5.0, 0.05).unwrap();
        let mut vectors = Vec::<[f32; 2]>::new();
        for _ in 0..8 {
            vectors.push([near.sample(&mut rng), near.sample(&mut rng)]);
            vectors.push([far.sample(&mut rng), far.sample(&mut rng)]);
        }
        let dir = tempfile::tempdir().unwrap();
        let master = write_dataset(dir.path(), &[&vectors]);
        let mut params = SomParams::new(6, 6, 2, 16, 60);
        params.set_seed(2024);
        params.set_output_dir(dir.path());

        let summaries = cluster::run_cluster(2, |comm| run(&comm, &params, &master)).unwrap();
        let codebook = &summaries[0].codebook;
        assert!(codebook.is_finite());
        let bmu_near = codebook.find_bmu(&[0.0, 0.0], crate::vecops::Distance::Euclidean);
        let bmu_far = codebook.find_bmu(&[5.0, 5.0], crate::vecops::Distance::Euclidean);
        assert_ne!(bmu_near, bmu_far);
    }

    #[test]
    fn online_mode_is_rejected() {
        log_init_test();
        let dir = tempfile::tempdir().unwrap();
        let master = write_dataset(dir.path(), &[&[[0.0, 0.0]]]);
        let mut params = SomParams::new(2, 2, 2, 1, 1);
        params.set_mode(TrainMode::Online);
        params.set_output_dir(dir.path());
        let result = cluster::run_cluster(1, |comm| run(&comm, &params, &master));
        assert!(result.is_err());
    }
} // end of mod tests
