//! Command line front end of the batch SOM trainer.
//!
//! Runs the whole cluster in-process, one rank per thread, sized to the machine and
//! the shard count. Rank 0 leaves result.map.txt and result.umat.txt in the working
//! directory.

use std::path::PathBuf;
use std::time::SystemTime;

use anyhow::Result;
use clap::Parser;
use cpu_time::ProcessTime;

use somtrain::cluster;
use somtrain::driver;
use somtrain::params::{DEFAULT_SOM_X, DEFAULT_SOM_Y, SomParams, TrainMode};
use somtrain::shard;

#[derive(Parser)]
#[command(name = "somtrain", about = "distributed batch training of self-organizing maps")]
struct Cli {
    /// master file listing one shard path per line
    master_file: PathBuf,
    /// number of training epochs
    nepochs: u32,
    /// 0 = batch, 1 = online
    trainmode: u8,
    /// number of feature vectors per shard file
    nvecsperfile: usize,
    /// dimensionality of a feature vector
    ndimen: usize,
    /// map width, given together with the height
    #[arg(requires = "som_y")]
    som_x: Option<usize>,
    /// map height
    som_y: Option<usize>,
}

fn usage() {
    println!("    somtrain FILE NEPOCHS TRAINMODE NVECSPERFILE NDIMEN [X Y]");
    println!();
    println!("    FILE    = master file listing one shard path per line.");
    println!("    NEPOCHS = number of iterations.");
    println!("    TRAINMODE = 0-batch, 1-online.");
    println!("    NVECSPERFILE = number of feature vectors per shard.");
    println!("    NDIMEN  = number of dimensionality of feature vector.");
    println!(
        "    [X Y]   = optional, SOM map size. Default = [{} {}]",
        DEFAULT_SOM_X, DEFAULT_SOM_Y
    );
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(_) => {
            usage();
            std::process::exit(0);
        }
    };
    let mode = match TrainMode::from_code(cli.trainmode) {
        Ok(mode) => mode,
        Err(_) => {
            usage();
            std::process::exit(0);
        }
    };

    let som_x = cli.som_x.unwrap_or(DEFAULT_SOM_X);
    let som_y = cli.som_y.unwrap_or(DEFAULT_SOM_Y);
    let mut params = SomParams::new(som_x, som_y, cli.ndimen, cli.nvecsperfile, cli.nepochs);
    params.set_mode(mode);

    let shards = shard::read_master(&cli.master_file)?;
    let nranks = num_cpus::get().min(shards.len()).max(1);
    log::info!(
        "training a {} x {} map of dimension {} on {} ranks over {} shards",
        som_x,
        som_y,
        cli.ndimen,
        nranks,
        shards.len()
    );

    let sys_now = SystemTime::now();
    let cpu_start = ProcessTime::now();
    let summaries =
        cluster::run_cluster(nranks, |comm| driver::run(&comm, &params, &cli.master_file))?;
    let root = &summaries[0];
    println!(
        " som training time {:.2e} s, cpu time {:.2e} s, {} epochs, final radius {:.3}",
        sys_now.elapsed().map(|d| d.as_secs_f64()).unwrap_or(0.),
        cpu_start.elapsed().as_secs_f64(),
        root.epochs_run,
        root.final_radius
    );

    Ok(())
}
