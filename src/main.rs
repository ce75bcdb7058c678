//! Command line entry point for the trainer.

use clap::Parser;
use evolved::server::{DEFAULT_ADDRESS, Server};
use evolved::trainer::{Trainer, TrainerOptions};
use evolved::persist;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Starts the creature evolution trainer.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Filename of the JSON file configuring the simulation.
    config: PathBuf,

    /// Reset the fitness of all creatures of the loaded population
    /// (default: re-use fitness values).
    #[arg(long)]
    reset_fitness: bool,

    /// Terminate after this many fitness evaluations have been performed.
    /// If not specified, never terminate.
    #[arg(long)]
    terminate_evaluations: Option<u64>,

    /// Terminate after this many fitness evaluations that didn't cause the
    /// best fitness to improve. If not specified, never terminate.
    #[arg(long)]
    terminate_stall_evaluations: Option<u64>,

    /// If specified, append the result of the simulation to this csv file.
    #[arg(long)]
    result_filename: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(error) = run(args) {
        log::error!("{error}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let document = persist::load(&args.config)?;
    let trainer = Trainer::new(
        document,
        args.config.clone(),
        TrainerOptions {
            reset_fitness: args.reset_fitness,
            terminate_evaluations: args.terminate_evaluations,
            terminate_stall_evaluations: args.terminate_stall_evaluations,
        },
    )?;
    let trainer = Arc::new(Mutex::new(trainer));

    let server = Server::bind(DEFAULT_ADDRESS)?;
    server.serve(Arc::clone(&trainer))?;

    if let Some(path) = &args.result_filename {
        let trainer = trainer.lock().unwrap();
        write_result(&trainer, &args.config, path)?;
        log::info!("appended results to {}", path.display());
    }
    Ok(())
}

/// Append one row summarizing the run to a csv file, creating the file with
/// a header row if it does not exist yet.
fn write_result(trainer: &Trainer, config_path: &Path, path: &Path) -> std::io::Result<()> {
    let config = trainer.config();
    let generator = &config.structure.generator;
    let algorithm = trainer.algorithm();

    let best_fitness = match trainer.best_fitness() {
        Some(fitness) => fitness.to_string(),
        None => "nan".to_string(),
    };
    let data_file = config_path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();

    let mut columns: Vec<(String, String)> = vec![
        ("best fitness".to_string(), best_fitness),
        ("average fitness".to_string(), algorithm.average_fitness().to_string()),
        ("generations".to_string(), algorithm.generation().to_string()),
        ("fitness evaluations".to_string(), trainer.evaluations().to_string()),
        ("population size".to_string(), algorithm.population_size().to_string()),
        ("oscillators count".to_string(), generator.oscillators.count.to_string()),
        ("oscillators multiplier".to_string(), generator.oscillators.multiplier.to_string()),
        ("oscillators start".to_string(), generator.oscillators.start.to_string()),
        ("feedbacks".to_string(), generator.feedbacks.to_string()),
        ("layers".to_string(), generator.motor_controller.layers.len().to_string()),
        ("data file".to_string(), data_file),
    ];

    // Input flags in sorted key order.
    if let serde_json::Value::Object(inputs) = serde_json::to_value(&generator.inputs).unwrap() {
        for (key, value) in inputs {
            columns.push((key, value.to_string()));
        }
    }
    columns.push((
        "total inputs".to_string(),
        algorithm.best_creature().data.structure.num_inputs().to_string(),
    ));

    let header_row: Vec<&str> = columns.iter().map(|(key, _)| key.as_str()).collect();
    let value_row: Vec<&str> = columns.iter().map(|(_, value)| value.as_str()).collect();

    if path.exists() {
        let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
        writeln!(file, "{}", value_row.join(","))?;
    } else {
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "{}", header_row.join(","))?;
        writeln!(file, "{}", value_row.join(","))?;
    }
    Ok(())
}
