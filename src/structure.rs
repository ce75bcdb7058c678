//! Body structure of a creature: an ordered chain of capsules connected by
//! motorized constraints.
//!
//! The serialized shape of these types is consumed verbatim by the physics
//! workers, so every field name is part of the wire contract.

use crate::uuid4;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-axis motor configuration, e.g. `{"range": "-0.25;0.25"}`.
///
/// The range string is in units of pi radians and is parsed by the worker,
/// not by this program.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AxisConfig {
    pub range: String,

    /// Workers may understand extra per-axis parameters.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Which rotational axes of a joint are actuated, as configured in the
/// structure generator.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MotorTemplate {
    #[serde(rename = "x-rotation", default, skip_serializing_if = "Option::is_none")]
    pub x_rotation: Option<AxisConfig>,

    #[serde(rename = "y-rotation", default, skip_serializing_if = "Option::is_none")]
    pub y_rotation: Option<AxisConfig>,

    #[serde(rename = "z-rotation", default, skip_serializing_if = "Option::is_none")]
    pub z_rotation: Option<AxisConfig>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A capsule's attachment to its parent: the motor configuration plus the id
/// of the parent capsule.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MotorConstraint {
    #[serde(rename = "parentId")]
    pub parent_id: String,

    #[serde(rename = "x-rotation", default, skip_serializing_if = "Option::is_none")]
    pub x_rotation: Option<AxisConfig>,

    #[serde(rename = "y-rotation", default, skip_serializing_if = "Option::is_none")]
    pub y_rotation: Option<AxisConfig>,

    #[serde(rename = "z-rotation", default, skip_serializing_if = "Option::is_none")]
    pub z_rotation: Option<AxisConfig>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl MotorConstraint {
    pub fn from_template(template: &MotorTemplate, parent_id: String) -> Self {
        Self {
            parent_id,
            x_rotation: template.x_rotation.clone(),
            y_rotation: template.y_rotation.clone(),
            z_rotation: template.z_rotation.clone(),
            extra: template.extra.clone(),
        }
    }
}

/// How a capsule is attached. The root capsule serializes as an empty string,
/// every other capsule carries a [MotorConstraint].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Constraint {
    Motor(MotorConstraint),
    Root(String),
}

impl Constraint {
    pub fn root() -> Self {
        Self::Root(String::new())
    }

    pub fn motor(&self) -> Option<&MotorConstraint> {
        match self {
            Self::Motor(motor) => Some(motor),
            Self::Root(_) => None,
        }
    }

    pub fn is_motorized(&self) -> bool {
        self.motor().is_some()
    }
}

/// One rigid body segment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Capsule {
    pub id: String,

    #[serde(rename = "innerHeight")]
    pub inner_height: f64,

    pub radius: f64,

    #[serde(rename = "positionX")]
    pub position_x: f64,

    #[serde(rename = "positionY")]
    pub position_y: f64,

    #[serde(rename = "positionZ")]
    pub position_z: f64,

    #[serde(rename = "quaternionX")]
    pub quaternion_x: f64,

    #[serde(rename = "quaternionY")]
    pub quaternion_y: f64,

    #[serde(rename = "quaternionZ")]
    pub quaternion_z: f64,

    #[serde(rename = "quaternionW")]
    pub quaternion_w: f64,

    pub constraint: Constraint,
}

/// Oscillator inputs made available to the controller.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct OscillatorConfig {
    pub start: f64,
    pub multiplier: f64,
    pub count: u32,
}

/// Feature flags selecting which sensor values the worker feeds into the
/// controller. A value of 1 enables the input.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct InputFlags {
    #[serde(rename = "root-orientation-x")]
    pub root_orientation_x: u8,

    #[serde(rename = "root-orientation-y")]
    pub root_orientation_y: u8,

    #[serde(rename = "root-orientation-z")]
    pub root_orientation_z: u8,

    #[serde(rename = "root-orientation-w")]
    pub root_orientation_w: u8,

    #[serde(rename = "z-position")]
    pub z_position: u8,

    #[serde(rename = "velocity-x")]
    pub velocity_x: u8,

    #[serde(rename = "velocity-y")]
    pub velocity_y: u8,

    #[serde(rename = "velocity-z")]
    pub velocity_z: u8,

    pub oscillators: u8,

    #[serde(rename = "capsule-position-x")]
    pub capsule_position_x: u8,

    #[serde(rename = "capsule-position-y")]
    pub capsule_position_y: u8,

    #[serde(rename = "capsule-position-z")]
    pub capsule_position_z: u8,

    #[serde(rename = "capsule-velocity-x")]
    pub capsule_velocity_x: u8,

    #[serde(rename = "capsule-velocity-y")]
    pub capsule_velocity_y: u8,

    #[serde(rename = "capsule-velocity-z")]
    pub capsule_velocity_z: u8,

    #[serde(rename = "capsule-angular-velocity-x")]
    pub capsule_angular_velocity_x: u8,

    #[serde(rename = "capsule-angular-velocity-y")]
    pub capsule_angular_velocity_y: u8,

    #[serde(rename = "capsule-angular-velocity-z")]
    pub capsule_angular_velocity_z: u8,

    #[serde(rename = "motor-angle-x")]
    pub motor_angle_x: u8,

    #[serde(rename = "motor-angle-y")]
    pub motor_angle_y: u8,

    #[serde(rename = "motor-angle-z")]
    pub motor_angle_z: u8,

    pub feedbacks: u8,
}

// Quaternions use the scalar-first (w, x, y, z) Hamilton convention.

fn quaternion_conjugate(q: [f64; 4]) -> [f64; 4] {
    let [w, x, y, z] = q;
    [w, -x, -y, -z]
}

fn quaternion_mult(q1: [f64; 4], q2: [f64; 4]) -> [f64; 4] {
    let [w1, x1, y1, z1] = q1;
    let [w2, x2, y2, z2] = q2;
    [
        w1 * w2 - x1 * x2 - y1 * y2 - z1 * z2,
        w1 * x2 + x1 * w2 + y1 * z2 - z1 * y2,
        w1 * y2 + y1 * w2 + z1 * x2 - x1 * z2,
        w1 * z2 + z1 * w2 + x1 * y2 - y1 * x2,
    ]
}

/// Rotate a vector through a quaternion: `q * (0, v) * q^-1`.
fn quaternion_rotate(q: [f64; 4], v: [f64; 3]) -> [f64; 3] {
    let [_, x, y, z] = quaternion_mult(quaternion_mult(q, [0.0, v[0], v[1], v[2]]), quaternion_conjugate(q));
    [x, y, z]
}

/// The body plan of one creature, together with the sensor configuration
/// that determines the controller's input and output widths.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CreatureStructure {
    pub capsules: Vec<Capsule>,

    pub feedbacks: u32,

    pub oscillators: OscillatorConfig,

    pub inputs: InputFlags,
}

impl CreatureStructure {
    pub fn add_capsule(&mut self, capsule: Capsule) {
        self.capsules.push(capsule);
    }

    /// Attach a new capsule to the capsule at `parent`. The new capsule sits
    /// at the parent-relative offset `(0, 0, halfHeights + radii)` rotated
    /// through the parent's orientation, and inherits that orientation.
    ///
    /// Returns the index of the new capsule.
    pub fn add_capsule_with_constraint(
        &mut self,
        inner_height: f64,
        radius: f64,
        parent: usize,
        motors: &MotorTemplate,
    ) -> usize {
        let parent = &self.capsules[parent];
        let middle_position = [
            0.0,
            0.0,
            0.5 * parent.inner_height + parent.radius + 0.5 * inner_height + radius,
        ];
        let parent_quaternion = [
            parent.quaternion_w,
            parent.quaternion_x,
            parent.quaternion_y,
            parent.quaternion_z,
        ];
        let rotated = quaternion_rotate(parent_quaternion, middle_position);
        let capsule = Capsule {
            id: uuid4(),
            inner_height,
            radius,
            position_x: rotated[0] + parent.position_x,
            position_y: rotated[1] + parent.position_y,
            position_z: rotated[2] + parent.position_z,
            quaternion_x: parent.quaternion_x,
            quaternion_y: parent.quaternion_y,
            quaternion_z: parent.quaternion_z,
            quaternion_w: parent.quaternion_w,
            constraint: Constraint::Motor(MotorConstraint::from_template(motors, parent.id.clone())),
        };
        self.add_capsule(capsule);
        self.capsules.len() - 1
    }

    /// Number of sensor values the worker feeds into the controller.
    ///
    /// Sums the enabled per-creature inputs, the enabled per-capsule inputs
    /// once per capsule, one motor-angle input per actuated axis whose flag
    /// is enabled, and the feedback loop if enabled.
    pub fn num_inputs(&self) -> usize {
        let on = |flag: u8| (flag == 1) as usize;
        let flags = &self.inputs;

        let mut per_creature = on(flags.root_orientation_x)
            + on(flags.root_orientation_y)
            + on(flags.root_orientation_z)
            + on(flags.root_orientation_w)
            + on(flags.z_position)
            + on(flags.velocity_x)
            + on(flags.velocity_y)
            + on(flags.velocity_z);
        if flags.oscillators == 1 {
            per_creature += self.oscillators.count as usize;
        }

        let per_capsule = on(flags.capsule_position_x)
            + on(flags.capsule_position_y)
            + on(flags.capsule_position_z)
            + on(flags.capsule_velocity_x)
            + on(flags.capsule_velocity_y)
            + on(flags.capsule_velocity_z)
            + on(flags.capsule_angular_velocity_x)
            + on(flags.capsule_angular_velocity_y)
            + on(flags.capsule_angular_velocity_z);

        let mut for_motors = 0;
        for capsule in &self.capsules {
            if let Some(motor) = capsule.constraint.motor() {
                if motor.x_rotation.is_some() && flags.motor_angle_x == 1 {
                    for_motors += 1;
                }
                if motor.y_rotation.is_some() && flags.motor_angle_y == 1 {
                    for_motors += 1;
                }
                if motor.z_rotation.is_some() && flags.motor_angle_z == 1 {
                    for_motors += 1;
                }
            }
        }

        let for_feedbacks = if flags.feedbacks == 1 { self.feedbacks as usize } else { 0 };

        per_creature + self.capsules.len() * per_capsule + for_motors + for_feedbacks
    }

    /// Number of motor commands the controller must produce: one per actuated
    /// rotational axis, plus the feedback loop.
    pub fn num_outputs(&self) -> usize {
        let mut num = 0;
        for capsule in &self.capsules {
            if let Some(motor) = capsule.constraint.motor() {
                num += motor.x_rotation.is_some() as usize;
                num += motor.y_rotation.is_some() as usize;
                num += motor.z_rotation.is_some() as usize;
            }
        }
        num + self.feedbacks as usize
    }

    pub fn num_constraints(&self) -> usize {
        self.capsules.iter().filter(|capsule| capsule.constraint.is_motorized()).count()
    }
}

/// Sample one random capsule chain from the generator settings.
///
/// The root capsule is placed just above the ground with a fixed orientation;
/// every subsequent capsule attaches to the previous one.
pub fn randomized(
    rng: &mut impl Rng,
    inputs: InputFlags,
    feedbacks: u32,
    oscillators: OscillatorConfig,
    num_capsules: u32,
    inner_height_range: (f64, f64),
    radius_range: (f64, f64),
    motors: &MotorTemplate,
) -> CreatureStructure {
    // Quarter turn about the X axis, normalized from (1, 0, 0, 1).
    let component = 1.0 / f64::sqrt(2.0);

    let mut structure = CreatureStructure {
        capsules: Vec::with_capacity(num_capsules as usize),
        feedbacks,
        oscillators,
        inputs,
    };

    let root = Capsule {
        id: uuid4(),
        inner_height: rng.random_range(inner_height_range.0..=inner_height_range.1),
        radius: rng.random_range(radius_range.0..=radius_range.1),
        position_x: 0.0,
        position_y: 0.0,
        // Place just above the ground.
        position_z: radius_range.1 + 1.0,
        quaternion_x: component,
        quaternion_y: 0.0,
        quaternion_z: 0.0,
        quaternion_w: component,
        constraint: Constraint::root(),
    };
    structure.add_capsule(root);

    let mut parent = 0;
    for _ in 1..num_capsules {
        parent = structure.add_capsule_with_constraint(
            rng.random_range(inner_height_range.0..=inner_height_range.1),
            rng.random_range(radius_range.0..=radius_range.1),
            parent,
            motors,
        );
    }

    structure
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x_axis_motor() -> MotorTemplate {
        MotorTemplate {
            x_rotation: Some(AxisConfig {
                range: "-0.25;0.25".to_string(),
                extra: HashMap::new(),
            }),
            y_rotation: None,
            z_rotation: None,
            extra: HashMap::new(),
        }
    }

    fn root_capsule(quaternion: [f64; 4]) -> Capsule {
        Capsule {
            id: "root".to_string(),
            inner_height: 2.0,
            radius: 0.5,
            position_x: 1.0,
            position_y: 2.0,
            position_z: 3.0,
            quaternion_x: quaternion[1],
            quaternion_y: quaternion[2],
            quaternion_z: quaternion[3],
            quaternion_w: quaternion[0],
            constraint: Constraint::root(),
        }
    }

    fn empty_structure() -> CreatureStructure {
        CreatureStructure {
            capsules: vec![],
            feedbacks: 0,
            oscillators: OscillatorConfig::default(),
            inputs: InputFlags::default(),
        }
    }

    #[test]
    fn child_placement_identity_orientation() {
        let mut structure = empty_structure();
        structure.add_capsule(root_capsule([1.0, 0.0, 0.0, 0.0]));
        structure.add_capsule_with_constraint(1.0, 0.25, 0, &x_axis_motor());

        // offset = .5*2.0 + 0.5 + .5*1.0 + 0.25 = 2.25, along +Z.
        let child = &structure.capsules[1];
        assert!((child.position_x - 1.0).abs() < 1e-12);
        assert!((child.position_y - 2.0).abs() < 1e-12);
        assert!((child.position_z - 5.25).abs() < 1e-12);
        assert_eq!(child.constraint.motor().unwrap().parent_id, "root");
    }

    #[test]
    fn child_placement_rotated_orientation() {
        // Quarter turn about X maps +Z onto -Y.
        let component = 1.0 / f64::sqrt(2.0);
        let mut structure = empty_structure();
        structure.add_capsule(root_capsule([component, component, 0.0, 0.0]));
        structure.add_capsule_with_constraint(1.0, 0.25, 0, &x_axis_motor());

        let child = &structure.capsules[1];
        assert!((child.position_x - 1.0).abs() < 1e-9);
        assert!((child.position_y - (2.0 - 2.25)).abs() < 1e-9);
        assert!((child.position_z - 3.0).abs() < 1e-9);
        // Orientation is inherited.
        assert!((child.quaternion_x - component).abs() < 1e-12);
        assert!((child.quaternion_w - component).abs() < 1e-12);
    }

    #[test]
    fn input_output_counts() {
        let mut structure = empty_structure();
        structure.inputs.z_position = 1;
        structure.inputs.velocity_x = 1;
        structure.inputs.capsule_position_z = 1;
        structure.inputs.motor_angle_x = 1;
        structure.inputs.oscillators = 1;
        structure.oscillators.count = 3;
        structure.feedbacks = 2;

        structure.add_capsule(root_capsule([1.0, 0.0, 0.0, 0.0]));
        let mid = structure.add_capsule_with_constraint(1.0, 0.25, 0, &x_axis_motor());
        structure.add_capsule_with_constraint(1.0, 0.25, mid, &x_axis_motor());

        // per creature: z-position + velocity-x + 3 oscillators = 5
        // per capsule: capsule-position-z, 3 capsules = 3
        // motors: 2 constrained x axes with motor-angle-x enabled = 2
        // feedbacks: flag disabled = 0
        assert_eq!(structure.num_inputs(), 10);
        // outputs: 2 actuated axes + 2 feedbacks
        assert_eq!(structure.num_outputs(), 4);
        assert_eq!(structure.num_constraints(), 2);

        structure.inputs.feedbacks = 1;
        assert_eq!(structure.num_inputs(), 12);
    }

    #[test]
    fn constraint_serialization() {
        let root = Constraint::root();
        assert_eq!(serde_json::to_string(&root).unwrap(), "\"\"");

        let motor = Constraint::Motor(MotorConstraint::from_template(&x_axis_motor(), "abc".to_string()));
        assert_eq!(
            serde_json::to_string(&motor).unwrap(),
            r#"{"parentId":"abc","x-rotation":{"range":"-0.25;0.25"}}"#
        );

        let roundtrip: Constraint = serde_json::from_str(&serde_json::to_string(&motor).unwrap()).unwrap();
        assert_eq!(motor, roundtrip);
        let roundtrip: Constraint = serde_json::from_str("\"\"").unwrap();
        assert_eq!(root, roundtrip);
    }

    #[test]
    fn structure_json_roundtrip() {
        let rng = &mut rand::rng();
        let structure = randomized(
            rng,
            InputFlags::default(),
            1,
            OscillatorConfig {
                start: 0.5,
                multiplier: 2.0,
                count: 2,
            },
            4,
            (1.0, 3.0),
            (0.25, 1.0),
            &x_axis_motor(),
        );
        assert_eq!(structure.capsules.len(), 4);

        let json = serde_json::to_string(&structure).unwrap();
        let roundtrip: CreatureStructure = serde_json::from_str(&json).unwrap();
        assert_eq!(structure, roundtrip);
        assert_eq!(structure.num_inputs(), roundtrip.num_inputs());
        assert_eq!(structure.num_outputs(), roundtrip.num_outputs());
    }
}
