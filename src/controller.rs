//! Weight-based motor controller and the genetic operators over it.
//!
//! A controller is an ordered list of layers. Each layer holds an activation
//! tag plus two equal-length flat lists, "weights" and "biases". The operators
//! address individual scalars through a flat coordinate space of size `2W`
//! (all weights in layer order, then all biases), mirroring how the workers
//! and older tooling index parameters.

use crate::config::RangeStr;
use rand::Rng;
use rand::seq::SliceRandom;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Settings for the mutation operator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MutationSettings {
    /// Fraction of the `2W` coordinates to perturb.
    #[serde(rename = "numParameterChangedRatioRange")]
    pub num_parameter_changed_ratio_range: RangeStr,

    /// Magnitude of the perturbation, sampled once per mutation.
    #[serde(rename = "offsetRange")]
    pub offset_range: RangeStr,

    #[serde(rename = "offsetExponent")]
    pub offset_exponent: i32,

    /// "yes" flips the offset's sign with probability one half.
    #[serde(rename = "randomizeSign", default)]
    pub randomize_sign: String,
}

/// Settings for the crossover operator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CrossoverSettings {
    /// Fraction of the `2W` coordinates to blend.
    #[serde(rename = "numParameterChangedRatioRange")]
    pub num_parameter_changed_ratio_range: RangeStr,

    /// How far each selected value moves toward the donor's value.
    #[serde(rename = "changeRatioRange")]
    pub change_ratio_range: RangeStr,
}

/// Shape of a controller to generate, from the structure generator config.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ControllerTemplate {
    pub layers: Vec<LayerTemplate>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LayerTemplate {
    pub activation: String,

    /// Output width of a hidden layer. The final layer omits this and gets
    /// the creature's motor-output count instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neurons: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Layer {
    pub activation: String,
    pub weights: Vec<f64>,
    pub biases: Vec<f64>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum WeightKind {
    Weight,
    Bias,
}

/// Address of one scalar parameter within a controller.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub layer: usize,
    pub kind: WeightKind,
    pub index: usize,
}

fn default_name() -> String {
    "LinearMotorController".to_string()
}

/// The evolvable controller parameters, serialized as
/// `{"name": "LinearMotorController", "layers": [...]}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MotorController {
    #[serde(default = "default_name")]
    pub name: String,

    pub layers: Vec<Layer>,
}

impl MotorController {
    /// Create a fresh controller with weights and biases drawn from N(0, 1).
    ///
    /// The input width flows from `num_inputs` through the hidden layers; the
    /// final layer's output width is `num_outputs`.
    pub fn randomized(num_inputs: usize, num_outputs: usize, template: &ControllerTemplate, rng: &mut impl Rng) -> Self {
        let mut layers = Vec::with_capacity(template.layers.len());
        let mut current_inputs = num_inputs;
        for layer in &template.layers {
            let outputs = layer.neurons.unwrap_or(num_outputs);
            let size = current_inputs * outputs;
            layers.push(Layer {
                activation: layer.activation.clone(),
                weights: random_weights(size, rng),
                biases: random_weights(size, rng),
            });
            current_inputs = outputs;
        }
        Self {
            name: default_name(),
            layers,
        }
    }

    /// Total weight count `W`. Biases add another `W` addressable scalars.
    pub fn num_weights(&self) -> usize {
        self.layers.iter().map(|layer| layer.weights.len()).sum()
    }

    /// Resolve a flat index in `0..2W` to a (layer, kind, offset) coordinate.
    /// The first `W` indices are weights in layer order, the rest are biases.
    fn coordinate(&self, mut flat: usize) -> Coordinate {
        for kind in [WeightKind::Weight, WeightKind::Bias] {
            for (layer, state) in self.layers.iter().enumerate() {
                if flat < state.weights.len() {
                    return Coordinate { layer, kind, index: flat };
                }
                flat -= state.weights.len();
            }
        }
        unreachable!("flat parameter index out of range");
    }

    /// Pick `round(ratio * 2W)` distinct coordinates uniformly at random.
    pub fn pick_coordinates(&self, ratio: f64, rng: &mut impl Rng) -> Vec<Coordinate> {
        let total = 2 * self.num_weights();
        let num = ((ratio * total as f64).round() as usize).min(total);
        let mut flat: Vec<usize> = (0..total).collect();
        flat.shuffle(rng);
        flat.truncate(num);
        flat.into_iter().map(|index| self.coordinate(index)).collect()
    }

    pub fn value(&self, coordinate: Coordinate) -> f64 {
        let layer = &self.layers[coordinate.layer];
        match coordinate.kind {
            WeightKind::Weight => layer.weights[coordinate.index],
            WeightKind::Bias => layer.biases[coordinate.index],
        }
    }

    pub fn value_mut(&mut self, coordinate: Coordinate) -> &mut f64 {
        let layer = &mut self.layers[coordinate.layer];
        match coordinate.kind {
            WeightKind::Weight => &mut layer.weights[coordinate.index],
            WeightKind::Bias => &mut layer.biases[coordinate.index],
        }
    }

    /// Add one shared random offset to a random selection of coordinates.
    ///
    /// The offset is sampled once and applied identically to every selected
    /// coordinate, not redrawn per coordinate.
    pub fn mutate(&mut self, settings: &MutationSettings, rng: &mut impl Rng) {
        let ratio = settings.num_parameter_changed_ratio_range.sample(rng);
        let mut offset = settings.offset_range.sample(rng).powi(settings.offset_exponent);
        if settings.randomize_sign == "yes" && rng.random::<bool>() {
            offset = -offset;
        }
        for coordinate in self.pick_coordinates(ratio, rng) {
            *self.value_mut(coordinate) += offset;
        }
    }

    /// Move a random selection of coordinates a fraction of the way toward
    /// the donor's values. Both the selection ratio and the blend fraction
    /// are sampled once per call.
    pub fn crossover(&mut self, donor: &MotorController, settings: &CrossoverSettings, rng: &mut impl Rng) {
        debug_assert_eq!(self.num_weights(), donor.num_weights());
        let ratio = settings.num_parameter_changed_ratio_range.sample(rng);
        let change = settings.change_ratio_range.sample(rng);
        for coordinate in self.pick_coordinates(ratio, rng) {
            let donor_value = donor.value(coordinate);
            let value = self.value_mut(coordinate);
            *value += change * (donor_value - *value);
        }
    }
}

fn random_weights(num: usize, rng: &mut impl Rng) -> Vec<f64> {
    (0..num).map(|_| rng.sample(StandardNormal)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn template(layers: &[(&str, Option<usize>)]) -> ControllerTemplate {
        ControllerTemplate {
            layers: layers
                .iter()
                .map(|(activation, neurons)| LayerTemplate {
                    activation: activation.to_string(),
                    neurons: *neurons,
                })
                .collect(),
        }
    }

    fn range(raw: &str) -> RangeStr {
        RangeStr::parse(raw).unwrap()
    }

    #[test]
    fn layer_sizing_flows_input_width() {
        let rng = &mut rand::rng();
        let controller = MotorController::randomized(3, 2, &template(&[("tanh", Some(4)), ("linear", None)]), rng);

        assert_eq!(controller.layers.len(), 2);
        assert_eq!(controller.layers[0].weights.len(), 12);
        assert_eq!(controller.layers[0].biases.len(), 12);
        assert_eq!(controller.layers[1].weights.len(), 8);
        assert_eq!(controller.layers[1].biases.len(), 8);
        assert_eq!(controller.num_weights(), 20);
    }

    #[test]
    fn full_ratio_selects_every_coordinate_once() {
        let rng = &mut rand::rng();
        // One layer, 1 input x 2 outputs: W = 2, so 4 addressable scalars.
        let controller = MotorController::randomized(1, 2, &template(&[("linear", None)]), rng);
        assert_eq!(controller.num_weights(), 2);

        let coordinates = controller.pick_coordinates(1.0, rng);
        assert_eq!(coordinates.len(), 4);
        let unique: HashSet<_> = coordinates.iter().collect();
        assert_eq!(unique.len(), 4);
        assert_eq!(coordinates.iter().filter(|c| c.kind == WeightKind::Weight).count(), 2);
        assert_eq!(coordinates.iter().filter(|c| c.kind == WeightKind::Bias).count(), 2);
    }

    #[test]
    fn mutation_applies_one_shared_offset() {
        let rng = &mut rand::rng();
        let mut controller = MotorController::randomized(2, 3, &template(&[("linear", None)]), rng);
        let before = controller.clone();

        let settings = MutationSettings {
            num_parameter_changed_ratio_range: range("1-1"),
            offset_range: range("3;3"),
            offset_exponent: 2,
            randomize_sign: String::new(),
        };
        controller.mutate(&settings, rng);

        for layer in 0..controller.layers.len() {
            for index in 0..controller.layers[layer].weights.len() {
                let delta = controller.layers[layer].weights[index] - before.layers[layer].weights[index];
                assert!((delta - 9.0).abs() < 1e-12);
                let delta = controller.layers[layer].biases[index] - before.layers[layer].biases[index];
                assert!((delta - 9.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn crossover_moves_toward_donor() {
        let rng = &mut rand::rng();
        let tmpl = template(&[("linear", None)]);
        let mut recipient = MotorController::randomized(2, 2, &tmpl, rng);
        let donor = MotorController::randomized(2, 2, &tmpl, rng);
        let before = recipient.clone();

        let settings = CrossoverSettings {
            num_parameter_changed_ratio_range: range("1-1"),
            change_ratio_range: range("0.5;0.5"),
        };
        recipient.crossover(&donor, &settings, rng);

        for layer in 0..recipient.layers.len() {
            for index in 0..recipient.layers[layer].weights.len() {
                let expected =
                    before.layers[layer].weights[index] + 0.5 * (donor.layers[layer].weights[index] - before.layers[layer].weights[index]);
                assert!((recipient.layers[layer].weights[index] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn controller_name_defaults_on_load() {
        let json = r#"{"layers": [{"activation": "tanh", "weights": [0.5], "biases": [-0.5]}]}"#;
        let controller: MotorController = serde_json::from_str(json).unwrap();
        assert_eq!(controller.name, "LinearMotorController");

        let json = serde_json::to_string(&controller).unwrap();
        assert_eq!(
            json,
            r#"{"name":"LinearMotorController","layers":[{"activation":"tanh","weights":[0.5],"biases":[-0.5]}]}"#
        );
    }
}
