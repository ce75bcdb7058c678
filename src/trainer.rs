//! The trainer ties the genetic algorithm to the wire protocol: it owns the
//! experiment identity, routes requests into the population, accumulates
//! statistics, and decides when the run is over.
//!
//! One trainer value sits behind a mutex shared by all connection handlers,
//! so every method here runs inside one critical section. Anything slow
//! (file writes) is returned to the caller as a [Snapshot] instead of being
//! done in place.

use crate::config::{ConfigDocument, ConfigError};
use crate::creature::GeneratorType;
use crate::messages::{
    Request, ResultPayload, StatusResponse, StepBatchRequest, StepBatchResponse, TASK_MOVE_FAR, Task, WorkBatchResponse,
    WorkUnit,
};
use crate::persist::Snapshot;
use crate::population::GeneticAlgorithm;
use crate::uuid4;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Recompute the status line at most this often.
const STATUS_INTERVAL: Duration = Duration::from_secs(2);

/// Command line options that affect the trainer itself.
#[derive(Debug, Default, Clone)]
pub struct TrainerOptions {
    /// Discard the fitness of every loaded creature, forcing re-evaluation.
    pub reset_fitness: bool,

    /// Stop after this many accepted results.
    pub terminate_evaluations: Option<u64>,

    /// Stop after this many accepted results without a new best fitness.
    pub terminate_stall_evaluations: Option<u64>,
}

/// What the server should do after one routed request.
#[derive(Debug)]
pub struct Reply {
    /// Serialized JSON response, or None for fire-and-forget messages.
    pub response: Option<String>,

    /// Population state to persist, written after the trainer lock is
    /// released.
    pub save: Option<Snapshot>,

    /// The trainer is done and the server should stop accepting connections.
    pub stop: bool,
}

/// Throughput counters, reset every time the status line is recomputed.
struct Statistics {
    accumulated_fitness: HashMap<GeneratorType, f64>,
    accumulated_creatures: HashMap<GeneratorType, u64>,
    accumulated_simulated_time: f64,
    timestamp: Instant,
}

impl Statistics {
    fn new() -> Self {
        Self {
            accumulated_fitness: HashMap::new(),
            accumulated_creatures: HashMap::new(),
            accumulated_simulated_time: 0.0,
            timestamp: Instant::now(),
        }
    }
}

pub struct Trainer {
    config: ConfigDocument,

    /// Where saves go; the file the config was loaded from.
    filename: PathBuf,

    /// Regenerated on every server start. Results carrying a different id
    /// come from a worker that outlived a previous run and are rejected.
    experiment_id: String,

    algorithm: GeneticAlgorithm,

    statistics: Statistics,

    /// Total accepted results across all runs of this config file.
    evaluations: u64,

    best_fitness: Option<f64>,

    /// Evaluation count at the moment the best fitness last improved.
    best_fitness_evaluation: u64,

    last_status: String,

    terminate_evaluations: Option<u64>,
    terminate_stall_evaluations: Option<u64>,

    stopped: bool,
}

impl Trainer {
    pub fn new(mut config: ConfigDocument, filename: PathBuf, options: TrainerOptions) -> Result<Self, ConfigError> {
        config.validate()?;
        if options.reset_fitness {
            config.reset_fitness();
        }
        let algorithm = GeneticAlgorithm::new(&config.algorithm.arguments, &config.structure)?;
        let evaluations = config.algorithm.arguments.population.evaluations;
        let best_fitness = algorithm.best_fitness();
        Ok(Self {
            config,
            filename,
            experiment_id: uuid4(),
            algorithm,
            statistics: Statistics::new(),
            evaluations,
            best_fitness,
            best_fitness_evaluation: evaluations,
            last_status: "...waiting...".to_string(),
            terminate_evaluations: options.terminate_evaluations,
            terminate_stall_evaluations: options.terminate_stall_evaluations,
            stopped: false,
        })
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    pub fn config(&self) -> &ConfigDocument {
        &self.config
    }

    pub fn algorithm(&self) -> &GeneticAlgorithm {
        &self.algorithm
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub fn best_fitness(&self) -> Option<f64> {
        self.best_fitness
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Ask the server loop to wind down.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Route one request. Runs entirely under the caller's lock, so a
    /// batched submit-then-request exchange is atomic.
    pub fn handle(&mut self, request: &Request) -> Reply {
        match request {
            Request::Ping { extra } => {
                let mut object = extra.clone();
                object.insert("type".to_string(), serde_json::json!("PING"));
                object.insert("response".to_string(), serde_json::json!("PING"));
                self.reply(serde_json::Value::Object(object).to_string(), None)
            }
            Request::GetWork => {
                let (unit, save) = self.work_unit(false);
                self.reply(serde_json::to_string(&unit).unwrap(), save)
            }
            Request::GetBestCreature => {
                let (unit, save) = self.work_unit(true);
                self.reply(serde_json::to_string(&unit).unwrap(), save)
            }
            Request::GetWorkBatch { data } => {
                let (batch, save) = self.work_batch(data.max_work_units);
                self.reply(serde_json::to_string(&batch).unwrap(), save)
            }
            Request::StepBatch { data } => {
                let (response, save) = self.step_batch(data);
                self.reply(serde_json::to_string(&response).unwrap(), save)
            }
            Request::GetServerStatus => {
                let status = self.server_status();
                self.reply(serde_json::to_string(&status).unwrap(), None)
            }
            Request::Result { data } => {
                let save = self.register_result(data);
                Reply {
                    response: None,
                    save,
                    stop: self.stopped,
                }
            }
        }
    }

    fn reply(&self, response: String, save: Option<Snapshot>) -> Reply {
        Reply {
            response: Some(response),
            save,
            stop: self.stopped,
        }
    }

    /// Produce one work unit. Ordinary requests run population maintenance
    /// and dispatch an un-evaluated creature; playback requests return the
    /// current best without marking anything in-flight.
    fn work_unit(&mut self, best_for_playback: bool) -> (WorkUnit, Option<Snapshot>) {
        let mut save = None;
        let creature = if best_for_playback {
            Some(self.algorithm.best_creature())
        } else {
            if self.algorithm.maintain(Instant::now()) {
                save = Some(self.snapshot());
            }
            self.algorithm.acquire_for_evaluation()
        };
        let unit = match creature {
            Some(creature) => WorkUnit::Ok {
                task: Task {
                    name: TASK_MOVE_FAR.to_string(),
                    id: creature.id.clone(),
                    experiment_id: self.experiment_id.clone(),
                },
                creature: creature.data.clone(),
            },
            None => WorkUnit::NoWork,
        };
        (unit, save)
    }

    /// Collect up to `max_work_units` work units, stopping early once no
    /// more creatures are available.
    fn work_batch(&mut self, max_work_units: u64) -> (WorkBatchResponse, Option<Snapshot>) {
        let mut work_units = Vec::new();
        let mut save = None;
        for _ in 0..max_work_units {
            let (unit, unit_save) = self.work_unit(false);
            save = save.or(unit_save);
            match unit {
                WorkUnit::NoWork => break,
                unit => work_units.push(unit),
            }
        }
        (WorkBatchResponse { work_units }, save)
    }

    /// Apply all submitted results, then hand back fresh work. The results
    /// influence the tournament pool used for the work handed back in the
    /// same call.
    fn step_batch(&mut self, request: &StepBatchRequest) -> (StepBatchResponse, Option<Snapshot>) {
        let mut save = None;
        for result in &request.results {
            if self.stopped {
                break;
            }
            save = self.register_result(result).or(save);
        }
        let (batch, batch_save) = self.work_batch(request.max_work_units);
        save = save.or(batch_save);
        let status = self.server_status().status;
        (
            StepBatchResponse {
                work_units: batch.work_units,
                status,
            },
            save,
        )
    }

    /// Accept one evaluation result, or reject it if it is stale.
    ///
    /// Returns a snapshot to persist when the result completes a termination
    /// condition.
    fn register_result(&mut self, result: &ResultPayload) -> Option<Snapshot> {
        if result.experiment_id != self.experiment_id {
            log::warn!(
                "ignoring result for experiment {}: current experiment is {}",
                result.experiment_id,
                self.experiment_id
            );
            return None;
        }
        let Some(creature) = self.algorithm.creature(&result.id) else {
            // Late arrival for a creature that was reclaimed and recycled.
            log::debug!("discarding result for recycled creature {}", result.id);
            return None;
        };
        let generator_type = creature.generator_type;
        let fitness = result.max_distance;

        let statistics = &mut self.statistics;
        *statistics.accumulated_fitness.entry(generator_type).or_insert(0.0) += fitness;
        *statistics.accumulated_creatures.entry(generator_type).or_insert(0) += 1;
        statistics.accumulated_simulated_time += result.simulated_time;

        self.evaluations += 1;
        self.algorithm.record_fitness(&result.id, fitness);

        if self.best_fitness.is_none_or(|best| fitness > best) {
            self.best_fitness = Some(fitness);
            self.best_fitness_evaluation = self.evaluations;
            log::info!("new best creature found through {generator_type}, fitness={fitness}");
        }

        let mut save = None;
        if let Some(limit) = self.terminate_evaluations {
            if !self.stopped && self.evaluations >= limit {
                log::info!("terminating: {limit} fitness evaluations performed");
                save = Some(self.snapshot());
                self.stopped = true;
            }
        }
        if let Some(limit) = self.terminate_stall_evaluations {
            if !self.stopped && self.evaluations - self.best_fitness_evaluation >= limit {
                log::info!("terminating: best fitness unchanged for {limit} evaluations");
                save = Some(self.snapshot());
                self.stopped = true;
            }
        }
        save
    }

    /// The human-readable status line: throughput since the last report,
    /// fitness summary, and slot occupancy. Recomputed at most every couple
    /// of seconds; callers in between get the cached line.
    fn server_status(&mut self) -> StatusResponse {
        let elapsed = self.statistics.timestamp.elapsed();
        if elapsed > STATUS_INTERVAL {
            let seconds = elapsed.as_secs_f64();

            let mut total_creatures = 0u64;
            let mut new_fitness = String::new();
            for (generator_type, &count) in &self.statistics.accumulated_creatures {
                total_creatures += count;
                let fitness = self.statistics.accumulated_fitness.get(generator_type).copied().unwrap_or(0.0);
                if !new_fitness.is_empty() {
                    new_fitness.push_str(", ");
                }
                new_fitness.push_str(&format!("{generator_type}={:.1}", fitness / count as f64));
            }

            let best = match self.best_fitness {
                Some(fitness) => format!("{fitness:.1}"),
                None => "nan".to_string(),
            };
            self.last_status = format!(
                "{}{:.0}x RT, {:.1} creatures/sec. Fitness: best={}, avg={:.1}, new=({})",
                chrono::Local::now().format("%H:%M:%S: "),
                self.statistics.accumulated_simulated_time / seconds,
                total_creatures as f64 / seconds,
                best,
                self.algorithm.average_fitness(),
                new_fitness,
            );
            self.last_status.push_str(". ");
            self.last_status.push_str(&self.algorithm.status());

            self.statistics.accumulated_fitness.clear();
            self.statistics.accumulated_creatures.clear();
            self.statistics.accumulated_simulated_time = 0.0;
            self.statistics.timestamp = Instant::now();

            log::info!("{}", self.last_status);
        }
        StatusResponse {
            status: self.last_status.clone(),
        }
    }

    /// Serialize the whole run for persistence: the original config document
    /// with the live population and counters written back into it.
    pub fn snapshot(&self) -> Snapshot {
        let mut document = self.config.clone();
        document.structure.creatures = self.algorithm.saved_creatures();
        document.algorithm.arguments.population.generation = self.algorithm.generation();
        document.algorithm.arguments.population.evaluations = self.evaluations;
        Snapshot {
            path: self.filename.clone(),
            document: serde_json::to_string_pretty(&document).unwrap(),
        }
    }
}
