//! A candidate solution: a body structure plus a motor controller,
//! identified by a unique id.
//!
//! Creatures are immutable once built. The genetic operators construct a new
//! creature from an old one, so a parent and its child never share state, and
//! every content change produces a fresh id.

use crate::config::GeneratorConfig;
use crate::controller::{CrossoverSettings, MotorController, MutationSettings};
use crate::structure::{self, CreatureStructure};
use crate::uuid4;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How a creature came to be. Informational only, used for reporting.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorType {
    Randomized,
    Loaded,
    Mutate,
    Crossover,
}

impl std::fmt::Display for GeneratorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Randomized => write!(f, "randomized"),
            Self::Loaded => write!(f, "loaded"),
            Self::Mutate => write!(f, "mutate"),
            Self::Crossover => write!(f, "crossover"),
        }
    }
}

/// The serialized form of a creature, exactly as workers and save files
/// consume it. The id is not part of this shape; it is regenerated whenever
/// a creature is built or rebuilt.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CreatureData {
    pub structure: CreatureStructure,

    #[serde(rename = "motorController")]
    pub motor_controller: MotorController,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Creature {
    pub id: String,
    pub generator_type: GeneratorType,
    pub data: CreatureData,
}

impl Creature {
    /// Sample a fresh creature from the generator settings.
    pub fn randomized(generator: &GeneratorConfig, rng: &mut impl Rng) -> Self {
        let structure = structure::randomized(
            rng,
            generator.inputs.clone(),
            generator.feedbacks,
            generator.oscillators.clone(),
            generator.num_capsules,
            generator.capsule_inner_height_range.bounds(),
            generator.capsule_radius_range.bounds(),
            &generator.motors,
        );
        let motor_controller = MotorController::randomized(
            structure.num_inputs(),
            structure.num_outputs(),
            &generator.motor_controller,
            rng,
        );
        Self {
            id: uuid4(),
            generator_type: GeneratorType::Randomized,
            data: CreatureData {
                structure,
                motor_controller,
            },
        }
    }

    /// Revive a creature from its saved form, under a new id.
    pub fn loaded(data: CreatureData) -> Self {
        Self {
            id: uuid4(),
            generator_type: GeneratorType::Loaded,
            data,
        }
    }

    /// Produce a mutated child of this creature.
    pub fn mutated(&self, settings: &MutationSettings, rng: &mut impl Rng) -> Self {
        let mut data = self.data.clone();
        data.motor_controller.mutate(settings, rng);
        Self {
            id: uuid4(),
            generator_type: GeneratorType::Mutate,
            data,
        }
    }

    /// Produce a child of this creature blended toward the donor's controller.
    pub fn crossed_over(&self, donor: &Creature, settings: &CrossoverSettings, rng: &mut impl Rng) -> Self {
        let mut data = self.data.clone();
        data.motor_controller.crossover(&donor.data.motor_controller, settings, rng);
        Self {
            id: uuid4(),
            generator_type: GeneratorType::Crossover,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sample_document;

    #[test]
    fn randomized_creature_is_consistent() {
        let rng = &mut rand::rng();
        let generator = sample_document().structure.generator;
        let creature = Creature::randomized(&generator, rng);

        assert_eq!(creature.generator_type, GeneratorType::Randomized);
        assert_eq!(creature.data.structure.capsules.len(), 3);
        // Two actuated axes per non-root capsule in the sample config.
        assert_eq!(creature.data.structure.num_outputs(), 4);

        // The controller's layer widths follow the derived counts.
        let inputs = creature.data.structure.num_inputs();
        let outputs = creature.data.structure.num_outputs();
        let layers = &creature.data.motor_controller.layers;
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].weights.len(), inputs * 4);
        assert_eq!(layers[1].weights.len(), 4 * outputs);

        let other = Creature::randomized(&generator, rng);
        assert_ne!(creature.id, other.id);
    }

    #[test]
    fn json_roundtrip_preserves_everything_derived() {
        let rng = &mut rand::rng();
        let generator = sample_document().structure.generator;
        let creature = Creature::randomized(&generator, rng);

        let json = serde_json::to_string(&creature.data).unwrap();
        let roundtrip: CreatureData = serde_json::from_str(&json).unwrap();

        assert_eq!(creature.data, roundtrip);
        assert_eq!(creature.data.structure.num_inputs(), roundtrip.structure.num_inputs());
        assert_eq!(creature.data.structure.num_outputs(), roundtrip.structure.num_outputs());
        assert_eq!(
            creature.data.motor_controller.num_weights(),
            roundtrip.motor_controller.num_weights()
        );
    }

    #[test]
    fn operators_regenerate_identity() {
        let rng = &mut rand::rng();
        let document = sample_document();
        let generator = &document.structure.generator;
        let mutation = &document.algorithm.arguments.mutation.config;
        let crossover = &document.algorithm.arguments.crossover.config;

        let parent = Creature::randomized(generator, rng);
        let donor = Creature::randomized(generator, rng);

        let mutant = parent.mutated(mutation, rng);
        assert_ne!(mutant.id, parent.id);
        assert_eq!(mutant.generator_type, GeneratorType::Mutate);
        // Mutation only touches the controller.
        assert_eq!(mutant.data.structure, parent.data.structure);

        let child = parent.crossed_over(&donor, crossover, rng);
        assert_ne!(child.id, parent.id);
        assert_ne!(child.id, donor.id);
        assert_eq!(child.generator_type, GeneratorType::Crossover);
        assert_eq!(child.data.structure, parent.data.structure);
    }

    #[test]
    fn loaded_creature_gets_a_new_id() {
        let rng = &mut rand::rng();
        let generator = sample_document().structure.generator;
        let original = Creature::randomized(&generator, rng);

        let revived = Creature::loaded(original.data.clone());
        assert_eq!(revived.generator_type, GeneratorType::Loaded);
        assert_eq!(revived.data, original.data);
        assert_ne!(revived.id, original.id);
    }
}
