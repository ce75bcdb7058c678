//! The population of creatures and the machinery that keeps it evolving:
//! slot storage, work dispatch with fault recovery, and tournament-based
//! generational replacement.
//!
//! All state lives in one [GeneticAlgorithm] value. Callers serialize access
//! through a single lock; the multi-step sequences in here (dispatch,
//! replacement, reclaim) assume they run uninterrupted.

use crate::config::{AlgorithmArguments, ConfigError, CrossoverConfig, MutationConfig, SavedCreature, StructureConfig};
use crate::creature::Creature;
use rand::Rng;
use rand::seq::IndexedRandom;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Reclaim an in-flight creature this long after dispatch while the pool of
/// un-evaluated creatures is nearly exhausted.
const RECLAIM_EXHAUSTED: Duration = Duration::from_secs(1);

/// Reclaim an in-flight creature this long after dispatch otherwise.
const RECLAIM_RELAXED: Duration = Duration::from_secs(10);

/// The pool counts as nearly exhausted below this many un-evaluated slots.
const EXHAUSTED_THRESHOLD: usize = 10;

/// Write the population to disk this often.
const SAVE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Replacement phases with a rate at or below this are disabled.
const RATE_EPSILON: f64 = 0.00001;

struct Slot {
    /// Missing until a result is accepted, missing again after replacement.
    fitness: Option<f64>,

    creature: Creature,

    /// Dispatch timestamp while a worker is evaluating this slot.
    in_flight: Option<Instant>,
}

/// A fixed-size population of creatures evolved by tournament selection,
/// crossover and mutation.
pub struct GeneticAlgorithm {
    crossover: CrossoverConfig,
    mutation: MutationConfig,

    slots: Vec<Slot>,

    /// Creature id to slot index. Kept consistent with the slots by
    /// [GeneticAlgorithm::replace]; never updated anywhere else.
    index: HashMap<String, usize>,

    /// Slot indices with missing fitness, in dispatch preference order.
    missing_fitness: Vec<usize>,

    /// Slot indices currently dispatched to a worker.
    in_flight: Vec<usize>,

    generation: u64,

    last_save: Instant,
}

impl GeneticAlgorithm {
    /// Build the initial population: revive the saved creatures when there
    /// are any, otherwise generate `population.size` randomized ones.
    pub fn new(arguments: &AlgorithmArguments, structure: &StructureConfig) -> Result<Self, ConfigError> {
        if arguments.population.size < 1 && structure.creatures.is_empty() {
            return Err(ConfigError::EmptyPopulation);
        }
        let mut this = Self {
            crossover: arguments.crossover.clone(),
            mutation: arguments.mutation.clone(),
            slots: Vec::new(),
            index: HashMap::new(),
            missing_fitness: Vec::new(),
            in_flight: Vec::new(),
            generation: arguments.population.generation,
            last_save: Instant::now(),
        };
        let rng = &mut rand::rng();
        if structure.creatures.is_empty() {
            for slot in 0..arguments.population.size as usize {
                let creature = Creature::randomized(&structure.generator, rng);
                this.index.insert(creature.id.clone(), slot);
                this.missing_fitness.push(slot);
                this.slots.push(Slot {
                    fitness: None,
                    creature,
                    in_flight: None,
                });
            }
        } else {
            for (slot, saved) in structure.creatures.iter().enumerate() {
                let creature = Creature::loaded(saved.data.clone());
                this.index.insert(creature.id.clone(), slot);
                if saved.fitness.is_none() {
                    this.missing_fitness.push(slot);
                }
                this.slots.push(Slot {
                    fitness: saved.fitness,
                    creature,
                    in_flight: None,
                });
            }
        }
        Ok(this)
    }

    pub fn population_size(&self) -> usize {
        self.slots.len()
    }

    pub fn num_with_fitness(&self) -> usize {
        self.slots.len() - self.missing_fitness.len()
    }

    pub fn num_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of generations that have completely passed.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// O(1) lookup of a live creature by id.
    pub fn creature(&self, creature_id: &str) -> Option<&Creature> {
        let slot = *self.index.get(creature_id)?;
        Some(&self.slots[slot].creature)
    }

    pub fn average_fitness(&self) -> f64 {
        let mut count = 0;
        let mut sum = 0.0;
        for slot in &self.slots {
            if let Some(fitness) = slot.fitness {
                count += 1;
                sum += fitness;
            }
        }
        if count > 0 { sum / count as f64 } else { 0.0 }
    }

    /// The slot holding the greatest present fitness. Falls back to the first
    /// slot when nothing has been evaluated yet.
    pub fn best_index(&self) -> usize {
        let mut best_index = 0;
        let mut best_fitness = None;
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(fitness) = slot.fitness {
                if best_fitness.is_none_or(|best| fitness > best) {
                    best_fitness = Some(fitness);
                    best_index = index;
                }
            }
        }
        best_index
    }

    pub fn best_fitness(&self) -> Option<f64> {
        self.slots[self.best_index()].fitness
    }

    pub fn best_creature(&self) -> &Creature {
        &self.slots[self.best_index()].creature
    }

    /// The population in its saved form.
    pub fn saved_creatures(&self) -> Vec<SavedCreature> {
        self.slots
            .iter()
            .map(|slot| SavedCreature {
                fitness: slot.fitness,
                data: slot.creature.data.clone(),
            })
            .collect()
    }

    /// One line summarizing slot occupancy, for the status report.
    pub fn status(&self) -> String {
        format!(
            "GA({}): in flight = {} w/fitness={}",
            self.slots.len(),
            self.in_flight.len(),
            self.num_with_fitness(),
        )
    }

    /// Housekeeping, run from the dispatch path: reclaim creatures whose
    /// worker appears lost, advance the generation once every slot has a
    /// fitness, and report whether the save interval has elapsed.
    ///
    /// The caller is responsible for actually persisting when this returns
    /// true, and should do the file write outside the state lock.
    pub fn maintain(&mut self, now: Instant) -> bool {
        self.reclaim_stale(now);
        if self.missing_fitness.is_empty() {
            self.next_generation();
        }
        if now.duration_since(self.last_save) > SAVE_INTERVAL {
            self.last_save = now;
            return true;
        }
        false
    }

    /// Clear the in-flight marker of every dispatch that has outlived the
    /// reclaim deadline. The creature is kept and becomes eligible for
    /// re-dispatch; a result that still arrives later is simply accepted.
    ///
    /// The deadline is short while few un-evaluated slots remain, because a
    /// single lost worker would otherwise stall the generation boundary.
    pub fn reclaim_stale(&mut self, now: Instant) {
        let num_missing = self.missing_fitness.len();
        let mut reclaimed = Vec::new();
        for &slot in &self.in_flight {
            let Some(dispatched) = self.slots[slot].in_flight else {
                continue;
            };
            let elapsed = now.duration_since(dispatched);
            if (num_missing < EXHAUSTED_THRESHOLD && elapsed > RECLAIM_EXHAUSTED) || elapsed > RECLAIM_RELAXED {
                reclaimed.push(slot);
            }
        }
        for slot in reclaimed {
            self.slots[slot].in_flight = None;
            self.in_flight.retain(|&index| index != slot);
            log::debug!(
                "gave up waiting on creature {}, re-queued for evaluation",
                self.slots[slot].creature.id
            );
        }
    }

    /// Hand out one creature that needs evaluation, stamping it in-flight.
    /// Returns None when every un-evaluated creature is already dispatched.
    pub fn acquire_for_evaluation(&mut self) -> Option<&Creature> {
        let slot = *self
            .missing_fitness
            .iter()
            .find(|&&slot| self.slots[slot].in_flight.is_none())?;
        self.slots[slot].in_flight = Some(Instant::now());
        self.in_flight.push(slot);
        Some(&self.slots[slot].creature)
    }

    /// Accept an evaluation result. A result for a creature that has since
    /// been recycled is discarded; that is expected under the reclaim policy.
    pub fn record_fitness(&mut self, creature_id: &str, fitness: f64) -> bool {
        let Some(&slot) = self.index.get(creature_id) else {
            log::debug!("discarding result for creature {creature_id}: no longer in the population");
            return false;
        };
        self.in_flight.retain(|&index| index != slot);
        self.missing_fitness.retain(|&index| index != slot);
        self.slots[slot].fitness = Some(fitness);
        self.slots[slot].in_flight = None;
        true
    }

    /// Overwrite a slot with a new creature. The old id leaves the index, the
    /// new id enters it, and the slot reverts to missing fitness.
    fn replace(&mut self, slot: usize, creature: Creature) {
        let old_id = self.slots[slot].creature.id.clone();
        self.index.remove(&old_id);
        self.in_flight.retain(|&index| index != slot);
        self.index.insert(creature.id.clone(), slot);
        self.slots[slot] = Slot {
            fitness: None,
            creature,
            in_flight: None,
        };
        if !self.missing_fitness.contains(&slot) {
            self.missing_fitness.push(slot);
        }
    }

    /// Slot indices eligible for tournaments: only creatures that have
    /// actually been evaluated can compete.
    fn evaluated_indices(&self) -> Vec<usize> {
        (0..self.slots.len()).filter(|&slot| self.slots[slot].fitness.is_some()).collect()
    }

    /// Sample up to `num` distinct evaluated slot indices.
    fn pick_individuals(&self, num: usize, rng: &mut impl Rng) -> Vec<usize> {
        let evaluated = self.evaluated_indices();
        let num = num.min(evaluated.len());
        evaluated.choose_multiple(rng, num).copied().collect()
    }

    /// The sample member with the greatest fitness, first seen winning ties.
    fn select_best(&self, sample: &[usize]) -> Option<usize> {
        let mut winner: Option<(usize, f64)> = None;
        for &slot in sample {
            let Some(fitness) = self.slots[slot].fitness else {
                continue;
            };
            if winner.is_none_or(|(_, best)| fitness > best) {
                winner = Some((slot, fitness));
            }
        }
        winner.map(|(slot, _)| slot)
    }

    /// The sample member with the lowest fitness, first seen winning ties.
    fn select_worst(&self, sample: &[usize]) -> Option<usize> {
        let mut loser: Option<(usize, f64)> = None;
        for &slot in sample {
            let Some(fitness) = self.slots[slot].fitness else {
                continue;
            };
            if loser.is_none_or(|(_, worst)| fitness < worst) {
                loser = Some((slot, fitness));
            }
        }
        loser.map(|(slot, _)| slot)
    }

    fn find_reproduce_index(&self, competition_size: usize, rng: &mut impl Rng) -> Option<usize> {
        self.select_best(&self.pick_individuals(competition_size, rng))
    }

    fn find_eliminate_index(&self, competition_size: usize, rng: &mut impl Rng) -> Option<usize> {
        self.select_worst(&self.pick_individuals(competition_size, rng))
    }

    /// Refill evaluated slots with children. Runs the crossover phase, then
    /// the mutation phase, then counts the generation.
    ///
    /// Only reached when no slot is missing fitness, so the first tournaments
    /// always have the full population to draw from; as children replace
    /// losers they drop out of the candidate pool until they earn a fitness.
    fn next_generation(&mut self) {
        let rng = &mut rand::rng();
        let size = self.slots.len() as f64;

        let mut num_crossover = 0u64;
        let crossover = self.crossover.clone();
        while crossover.rate > RATE_EPSILON && (num_crossover as f64) < crossover.rate * size {
            num_crossover += 1;
            let Some(parent_a) = self.find_reproduce_index(crossover.competition_size.reproduce, rng) else {
                break;
            };
            let Some(parent_b) = self.find_reproduce_index(crossover.competition_size.reproduce, rng) else {
                break;
            };
            let child =
                self.slots[parent_a]
                    .creature
                    .crossed_over(&self.slots[parent_b].creature, &crossover.config, rng);
            let Some(eliminated) = self.find_eliminate_index(crossover.competition_size.eliminate, rng) else {
                break;
            };
            self.replace(eliminated, child);
        }

        let mut num_mutate = 0u64;
        let mutation = self.mutation.clone();
        while mutation.rate > RATE_EPSILON && (num_mutate as f64) < mutation.rate * size {
            num_mutate += 1;
            let Some(parent) = self.find_reproduce_index(mutation.competition_size.reproduce, rng) else {
                break;
            };
            let child = self.slots[parent].creature.mutated(&mutation.config, rng);
            let Some(eliminated) = self.find_eliminate_index(mutation.competition_size.eliminate, rng) else {
                break;
            };
            self.replace(eliminated, child);
        }

        self.generation += 1;
        log::info!(
            "proceeded to generation {}, {} children created",
            self.generation,
            num_crossover + num_mutate
        );
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        assert_eq!(self.index.len(), self.slots.len());
        for (slot, state) in self.slots.iter().enumerate() {
            assert_eq!(self.index.get(&state.creature.id), Some(&slot));
        }
        for &slot in &self.in_flight {
            assert!(self.slots[slot].in_flight.is_some());
        }
    }
}
