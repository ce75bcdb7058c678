//! The configuration document that drives a training run.
//!
//! One JSON file holds both the algorithm settings and the population state;
//! the same document is written back out on every save with
//! `structure.creatures` refreshed, so unrecognized fields are carried along
//! rather than rejected.

use crate::controller::{ControllerTemplate, CrossoverSettings, MutationSettings};
use crate::creature::CreatureData;
use crate::structure::{InputFlags, MotorTemplate, OscillatorConfig};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

pub const GENETIC_ALGORITHM: &str = "GeneticAlgorithm";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid numeric range {0:?}")]
    InvalidRange(String),

    #[error("only algorithm type \"GeneticAlgorithm\" is implemented, got {0:?}")]
    UnsupportedAlgorithm(String),

    #[error("population size must be at least 1")]
    EmptyPopulation,
}

/// A numeric interval encoded as a delimited string, for example "0.05-0.25".
/// Intervals that may contain negative numbers use a semicolon: "-2;2".
///
/// Parsing happens at deserialization time so a bad range fails the config
/// load instead of a mutation mid-run.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeStr {
    raw: String,
    lo: f64,
    hi: f64,
}

impl RangeStr {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidRange(raw.to_string());
        let (lo, hi) = match raw.split_once(';') {
            Some(parts) => parts,
            None => raw.split_once('-').ok_or_else(invalid)?,
        };
        let lo: f64 = lo.trim().parse().map_err(|_| invalid())?;
        let hi: f64 = hi.trim().parse().map_err(|_| invalid())?;
        if !lo.is_finite() || !hi.is_finite() {
            return Err(invalid());
        }
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        Ok(Self {
            raw: raw.to_string(),
            lo,
            hi,
        })
    }

    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        rng.random_range(self.lo..=self.hi)
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.lo, self.hi)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Serialize for RangeStr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for RangeStr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PopulationConfig {
    /// Number of slots. Fixed for the lifetime of the run.
    pub size: u64,

    /// Completed generations, carried across restarts.
    #[serde(default)]
    pub generation: u64,

    /// Total accepted fitness results, carried across restarts.
    #[serde(default)]
    pub evaluations: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompetitionSize {
    pub reproduce: usize,
    pub eliminate: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CrossoverConfig {
    /// Target number of crossover children per generation, as a ratio of the
    /// population size.
    pub rate: f64,

    #[serde(rename = "competitionSize")]
    pub competition_size: CompetitionSize,

    pub config: CrossoverSettings,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MutationConfig {
    /// Target number of mutation children per generation, as a ratio of the
    /// population size.
    pub rate: f64,

    #[serde(rename = "competitionSize")]
    pub competition_size: CompetitionSize,

    pub config: MutationSettings,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AlgorithmArguments {
    pub population: PopulationConfig,
    pub crossover: CrossoverConfig,
    pub mutation: MutationConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AlgorithmConfig {
    pub r#type: String,
    pub arguments: AlgorithmArguments,
}

/// Settings for generating fresh randomized creatures.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    pub inputs: InputFlags,

    pub feedbacks: u32,

    pub oscillators: OscillatorConfig,

    #[serde(rename = "numCapsules")]
    pub num_capsules: u32,

    #[serde(rename = "capsuleInnerHeightRange")]
    pub capsule_inner_height_range: RangeStr,

    #[serde(rename = "capsuleRadiusRange")]
    pub capsule_radius_range: RangeStr,

    pub motors: MotorTemplate,

    #[serde(rename = "motorController")]
    pub motor_controller: ControllerTemplate,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// One saved population member: its last known fitness and its genome.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SavedCreature {
    /// Missing when the creature still needs evaluation. Non-finite values
    /// from older files are treated as missing too.
    #[serde(default, deserialize_with = "deserialize_fitness")]
    pub fitness: Option<f64>,

    pub data: CreatureData,
}

fn deserialize_fitness<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.filter(|fitness| fitness.is_finite()))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StructureConfig {
    pub generator: GeneratorConfig,

    /// The saved population, empty for a fresh run.
    #[serde(default)]
    pub creatures: Vec<SavedCreature>,
}

/// The whole configuration file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    pub algorithm: AlgorithmConfig,

    pub structure: StructureConfig,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ConfigDocument {
    /// Check the invariants that would otherwise surface as faults deep in
    /// the run. Called once before the server starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.algorithm.r#type != GENETIC_ALGORITHM {
            return Err(ConfigError::UnsupportedAlgorithm(self.algorithm.r#type.clone()));
        }
        if self.algorithm.arguments.population.size < 1 {
            return Err(ConfigError::EmptyPopulation);
        }
        Ok(())
    }

    /// Mark every saved creature for re-evaluation.
    pub fn reset_fitness(&mut self) {
        for creature in &mut self.structure.creatures {
            creature.fitness = None;
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_document() -> ConfigDocument {
    serde_json::from_str(SAMPLE_CONFIG).unwrap()
}

#[cfg(test)]
pub(crate) const SAMPLE_CONFIG: &str = r#"{
    "algorithm": {
        "type": "GeneticAlgorithm",
        "arguments": {
            "population": { "size": 4, "generation": 0, "evaluations": 0 },
            "crossover": {
                "rate": 0.25,
                "competitionSize": { "reproduce": 2, "eliminate": 2 },
                "config": {
                    "numParameterChangedRatioRange": "0.05-0.25",
                    "changeRatioRange": "0.25-0.75"
                }
            },
            "mutation": {
                "rate": 0.25,
                "competitionSize": { "reproduce": 2, "eliminate": 2 },
                "config": {
                    "numParameterChangedRatioRange": "0.05-0.25",
                    "offsetRange": "0;0.5",
                    "offsetExponent": 2,
                    "randomizeSign": "yes"
                }
            }
        }
    },
    "structure": {
        "generator": {
            "numCapsules": 3,
            "capsuleInnerHeightRange": "1-3",
            "capsuleRadiusRange": "0.25-1",
            "feedbacks": 0,
            "oscillators": { "start": 0.5, "multiplier": 2, "count": 2 },
            "inputs": {
                "root-orientation-x": 0, "root-orientation-y": 0,
                "root-orientation-z": 0, "root-orientation-w": 0,
                "z-position": 1,
                "velocity-x": 1, "velocity-y": 1, "velocity-z": 0,
                "oscillators": 1,
                "capsule-position-x": 0, "capsule-position-y": 0, "capsule-position-z": 1,
                "capsule-velocity-x": 0, "capsule-velocity-y": 0, "capsule-velocity-z": 0,
                "capsule-angular-velocity-x": 0, "capsule-angular-velocity-y": 0,
                "capsule-angular-velocity-z": 0,
                "motor-angle-x": 1, "motor-angle-y": 0, "motor-angle-z": 1,
                "feedbacks": 0
            },
            "motors": {
                "x-rotation": { "range": "-0.25;0.25" },
                "z-rotation": { "range": "-0.25;0.25" }
            },
            "motorController": {
                "layers": [
                    { "activation": "tanh", "neurons": 4 },
                    { "activation": "linear" }
                ]
            }
        },
        "creatures": []
    }
}"#;
