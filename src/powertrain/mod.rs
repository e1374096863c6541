mod clutch;
mod differential;
mod engine;
mod transmission;

pub use clutch::Clutch;
pub use differential::{
    limited_slip_split, locked_split, open_split, Differential, DifferentialType, SplitInput,
    TorqueSplit,
};
pub use engine::{Engine, EngineState, ForcedInduction};
pub use transmission::{
    gear_name, CvtSettings, GearShift, ReverseEngagement, ShiftCheck, ShiftContext, ShiftEvent,
    ShiftKind, Transmission, TransmissionType,
};

use crate::curve::ResponseCurve;
use crate::wheel::{finite_or_zero, move_towards, sign_or_zero, Wheel, MIN_DT};
use bevy::prelude::*;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

/// Floor for any node inertia (kg·m²).
pub const INERTIA_EPSILON: f32 = 1e-4;
pub const RAD_S_TO_RPM: f32 = 60.0 / std::f32::consts::TAU;
const MAX_ENGINE_SPEED_FACTOR: f32 = 1.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(usize);

#[derive(Debug)]
pub enum NodeKind {
    Engine(Engine),
    Clutch(Clutch),
    Transmission(Box<Transmission>),
    Differential(Differential),
    Wheel(Box<Wheel>),
}

impl NodeKind {
    fn output_slots(&self) -> usize {
        match self {
            Self::Wheel(_) => 0,
            Self::Differential(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Debug)]
pub struct PowertrainNode {
    pub name: String,
    pub inertia: f32,
    pub angular_velocity: f32,
    /// Torque received on the last forward step.
    pub torque: f32,
    pub kind: NodeKind,
    output_names: [Option<String>; 2],
    outputs: [Option<NodeHandle>; 2],
    input: Option<NodeHandle>,
}

impl PowertrainNode {
    pub fn outputs(&self) -> [Option<NodeHandle>; 2] {
        self.outputs
    }

    pub fn input(&self) -> Option<NodeHandle> {
        self.input
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WiringIssue {
    MissingEngine,
    DuplicateName { name: String },
    UnresolvedOutput { node: String, output: String },
    MultipleInputs { node: String, rejected: String },
    Cycle { node: String, output: String },
    UnexpectedOutput { node: String, output: String },
    EngineAsOutput { node: String, output: String },
}

impl Display for WiringIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEngine => write!(f, "powertrain has no engine node"),
            Self::DuplicateName { name } => write!(f, "duplicate node name '{name}'"),
            Self::UnresolvedOutput { node, output } => {
                write!(f, "'{node}' outputs to unknown node '{output}'")
            }
            Self::MultipleInputs { node, rejected } => {
                write!(f, "'{node}' already has an input, ignoring '{rejected}'")
            }
            Self::Cycle { node, output } => {
                write!(f, "connecting '{node}' to '{output}' would close a cycle")
            }
            Self::UnexpectedOutput { node, output } => {
                write!(f, "'{node}' has no free output slot for '{output}'")
            }
            Self::EngineAsOutput { node, output } => {
                write!(f, "'{node}' cannot drive engine '{output}'")
            }
        }
    }
}

/// Per-tick driver inputs consumed by the driveline.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PowertrainInput {
    pub throttle: f32,
    /// Clutch pedal, 1 = fully pressed.
    pub clutch: f32,
    pub time: f64,
    pub dt: f32,
}

#[derive(Debug, Clone, Copy)]
enum StepPlan {
    Wheel,
    PassThrough,
    Engine {
        output: NodeHandle,
    },
    Clutch {
        output: NodeHandle,
        engagement: f32,
    },
    Transmission {
        output: NodeHandle,
        ratio: f32,
    },
    Differential {
        a: Option<NodeHandle>,
        b: Option<NodeHandle>,
    },
}

/// Arena of driveline nodes wired by name into a tree rooted at the engine.
#[derive(Debug, Default)]
pub struct Powertrain {
    nodes: Vec<PowertrainNode>,
    root: Option<NodeHandle>,
    free_wheels: Vec<NodeHandle>,
}

impl Powertrain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node whose outputs are resolved by name on the next `wire`.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        inertia: f32,
        kind: NodeKind,
        outputs: &[&str],
    ) -> NodeHandle {
        let name = name.into();
        let inertia = match &kind {
            NodeKind::Wheel(wheel) => wheel.inertia(),
            _ if inertia.is_finite() && inertia >= INERTIA_EPSILON => inertia,
            _ => {
                warn!(
                    "Powertrain node '{name}' has inertia {inertia}; using {INERTIA_EPSILON} instead."
                );
                INERTIA_EPSILON
            }
        };
        if outputs.len() > 2 {
            warn!(
                "Powertrain node '{name}' lists {} outputs; only the first two are used.",
                outputs.len()
            );
        }
        let mut output_names: [Option<String>; 2] = [None, None];
        for (slot, output) in output_names.iter_mut().zip(outputs.iter()) {
            *slot = Some((*output).to_string());
        }
        let angular_velocity = match &kind {
            NodeKind::Engine(engine) if engine.is_running() => engine.idle_rpm / RAD_S_TO_RPM,
            NodeKind::Wheel(wheel) => wheel.angular_velocity,
            _ => 0.0,
        };

        let handle = NodeHandle(self.nodes.len());
        self.nodes.push(PowertrainNode {
            name,
            inertia,
            angular_velocity,
            torque: 0.0,
            kind,
            output_names,
            outputs: [None, None],
            input: None,
        });
        handle
    }

    pub fn add_engine(
        &mut self,
        name: &str,
        inertia: f32,
        engine: Engine,
        output: &str,
    ) -> NodeHandle {
        self.add_node(name, inertia, NodeKind::Engine(engine), &[output])
    }

    pub fn add_clutch(
        &mut self,
        name: &str,
        inertia: f32,
        clutch: Clutch,
        output: &str,
    ) -> NodeHandle {
        self.add_node(name, inertia, NodeKind::Clutch(clutch), &[output])
    }

    pub fn add_transmission(
        &mut self,
        name: &str,
        inertia: f32,
        transmission: Transmission,
        output: &str,
    ) -> NodeHandle {
        self.add_node(
            name,
            inertia,
            NodeKind::Transmission(Box::new(transmission)),
            &[output],
        )
    }

    pub fn add_differential(
        &mut self,
        name: &str,
        inertia: f32,
        differential: Differential,
        outputs: [&str; 2],
    ) -> NodeHandle {
        self.add_node(name, inertia, NodeKind::Differential(differential), &outputs)
    }

    pub fn add_wheel(&mut self, name: &str, wheel: Wheel) -> NodeHandle {
        if wheel.radius() != wheel.radius {
            warn!(
                "Wheel '{name}' has radius {}; using {} instead.",
                wheel.radius,
                wheel.radius()
            );
        }
        self.add_node(name, 0.0, NodeKind::Wheel(Box::new(wheel)), &[])
    }

    /// Resolves output names into handles. Problems are logged and returned;
    /// offending connections are left open so the rest of the tree still runs.
    pub fn wire(&mut self) -> Vec<WiringIssue> {
        let mut issues = Vec::new();
        for node in &mut self.nodes {
            node.outputs = [None, None];
            node.input = None;
        }

        let mut by_name: HashMap<String, NodeHandle> = HashMap::with_capacity(self.nodes.len());
        for (index, node) in self.nodes.iter().enumerate() {
            if by_name.contains_key(&node.name) {
                issues.push(WiringIssue::DuplicateName {
                    name: node.name.clone(),
                });
            } else {
                by_name.insert(node.name.clone(), NodeHandle(index));
            }
        }

        for index in 0..self.nodes.len() {
            for slot in 0..2 {
                let Some(output) = self.nodes[index].output_names[slot].clone() else {
                    continue;
                };
                if let Some(issue) = self.connect(index, slot, &output, &by_name) {
                    issues.push(issue);
                }
            }
        }

        self.root = self
            .nodes
            .iter()
            .position(|node| matches!(node.kind, NodeKind::Engine(_)))
            .map(NodeHandle);
        if self.root.is_none() {
            issues.push(WiringIssue::MissingEngine);
        }

        self.free_wheels = (0..self.nodes.len())
            .map(NodeHandle)
            .filter(|&handle| matches!(self.nodes[handle.0].kind, NodeKind::Wheel(_)))
            .filter(|&handle| self.root.is_none_or(|root| !self.is_descendant(handle, root)))
            .collect();

        for issue in &issues {
            match issue {
                WiringIssue::UnresolvedOutput { .. } => error!("Powertrain wiring: {issue}."),
                _ => warn!("Powertrain wiring: {issue}."),
            }
        }
        if !self.free_wheels.is_empty() {
            debug!(
                "Powertrain has {} undriven wheel(s).",
                self.free_wheels.len()
            );
        }
        issues
    }

    fn connect(
        &mut self,
        index: usize,
        slot: usize,
        output: &str,
        by_name: &HashMap<String, NodeHandle>,
    ) -> Option<WiringIssue> {
        let node_name = self.nodes[index].name.clone();
        if slot >= self.nodes[index].kind.output_slots() {
            return Some(WiringIssue::UnexpectedOutput {
                node: node_name,
                output: output.to_string(),
            });
        }
        let Some(&target) = by_name.get(output) else {
            return Some(WiringIssue::UnresolvedOutput {
                node: node_name,
                output: output.to_string(),
            });
        };
        if matches!(self.nodes[target.0].kind, NodeKind::Engine(_)) {
            return Some(WiringIssue::EngineAsOutput {
                node: node_name,
                output: output.to_string(),
            });
        }
        if self.is_descendant(NodeHandle(index), target) || target.0 == index {
            return Some(WiringIssue::Cycle {
                node: node_name,
                output: output.to_string(),
            });
        }
        if self.nodes[target.0].input.is_some() {
            return Some(WiringIssue::MultipleInputs {
                node: output.to_string(),
                rejected: node_name,
            });
        }

        self.nodes[index].outputs[slot] = Some(target);
        self.nodes[target.0].input = Some(NodeHandle(index));
        None
    }

    /// Walks the input chain of `handle` looking for `ancestor`.
    fn is_descendant(&self, handle: NodeHandle, ancestor: NodeHandle) -> bool {
        let mut current = self.nodes.get(handle.0).and_then(|node| node.input);
        let mut steps = 0;
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.nodes.len() {
                return false;
            }
            current = self.nodes[node.0].input;
        }
        false
    }

    pub fn root(&self) -> Option<NodeHandle> {
        self.root
    }

    pub fn free_wheels(&self) -> &[NodeHandle] {
        &self.free_wheels
    }

    pub fn find(&self, name: &str) -> Option<NodeHandle> {
        self.nodes
            .iter()
            .position(|node| node.name == name)
            .map(NodeHandle)
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&PowertrainNode> {
        self.nodes.get(handle.0)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeHandle, &PowertrainNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (NodeHandle(index), node))
    }

    pub fn engine(&self) -> Option<&Engine> {
        match &self.nodes.get(self.root?.0)?.kind {
            NodeKind::Engine(engine) => Some(engine),
            _ => None,
        }
    }

    pub fn engine_mut(&mut self) -> Option<&mut Engine> {
        let root = self.root?;
        match &mut self.nodes.get_mut(root.0)?.kind {
            NodeKind::Engine(engine) => Some(engine),
            _ => None,
        }
    }

    pub fn engine_angular_velocity(&self) -> f32 {
        self.root
            .and_then(|root| self.nodes.get(root.0))
            .map_or(0.0, |node| node.angular_velocity)
    }

    pub fn engine_rpm(&self) -> f32 {
        self.engine_angular_velocity() * RAD_S_TO_RPM
    }

    /// The first clutch added.
    pub fn clutch(&self) -> Option<&Clutch> {
        self.nodes.iter().find_map(|node| match &node.kind {
            NodeKind::Clutch(clutch) => Some(clutch),
            _ => None,
        })
    }

    /// The first transmission added.
    pub fn transmission(&self) -> Option<&Transmission> {
        self.nodes.iter().find_map(|node| match &node.kind {
            NodeKind::Transmission(transmission) => Some(transmission.as_ref()),
            _ => None,
        })
    }

    pub fn transmission_mut(&mut self) -> Option<&mut Transmission> {
        self.nodes.iter_mut().find_map(|node| match &mut node.kind {
            NodeKind::Transmission(transmission) => Some(transmission.as_mut()),
            _ => None,
        })
    }

    pub fn differential_mut(&mut self, handle: NodeHandle) -> Option<&mut Differential> {
        match &mut self.nodes.get_mut(handle.0)?.kind {
            NodeKind::Differential(differential) => Some(differential),
            _ => None,
        }
    }

    pub fn wheel(&self, handle: NodeHandle) -> Option<&Wheel> {
        match &self.nodes.get(handle.0)?.kind {
            NodeKind::Wheel(wheel) => Some(wheel.as_ref()),
            _ => None,
        }
    }

    pub fn wheel_mut(&mut self, handle: NodeHandle) -> Option<&mut Wheel> {
        match &mut self.nodes.get_mut(handle.0)?.kind {
            NodeKind::Wheel(wheel) => Some(wheel.as_mut()),
            _ => None,
        }
    }

    fn plan(&self, handle: NodeHandle) -> Option<StepPlan> {
        let node = self.nodes.get(handle.0)?;
        let [a, b] = node.outputs;
        Some(match (&node.kind, a) {
            (NodeKind::Wheel(_), _) => StepPlan::Wheel,
            (NodeKind::Differential(_), _) if a.is_none() && b.is_none() => StepPlan::PassThrough,
            (NodeKind::Differential(_), _) => StepPlan::Differential { a, b },
            (_, None) => StepPlan::PassThrough,
            (NodeKind::Engine(_), Some(output)) => StepPlan::Engine { output },
            (NodeKind::Clutch(clutch), Some(output)) => StepPlan::Clutch {
                output,
                engagement: clutch.engagement(),
            },
            (NodeKind::Transmission(transmission), Some(output)) => StepPlan::Transmission {
                output,
                ratio: transmission.ratio(),
            },
        })
    }

    fn angular_velocity_of(&self, handle: NodeHandle) -> f32 {
        self.nodes
            .get(handle.0)
            .map_or(0.0, |node| node.angular_velocity)
    }

    /// Angular velocity seen at the input of `handle` when driven at `input_angular_velocity`.
    pub fn query_angular_velocity(&self, handle: NodeHandle, input_angular_velocity: f32) -> f32 {
        let Some(plan) = self.plan(handle) else {
            return input_angular_velocity;
        };
        match plan {
            StepPlan::Wheel => self.wheel(handle).map_or(0.0, |wheel| wheel.angular_velocity),
            StepPlan::PassThrough => input_angular_velocity,
            StepPlan::Engine { output } => {
                self.query_angular_velocity(output, input_angular_velocity)
            }
            StepPlan::Clutch { output, engagement } => {
                self.query_angular_velocity(output, input_angular_velocity) * engagement
                    + input_angular_velocity * (1.0 - engagement)
            }
            StepPlan::Transmission { ratio, .. } if ratio == 0.0 => input_angular_velocity,
            StepPlan::Transmission { output, ratio } => {
                self.query_angular_velocity(output, input_angular_velocity / ratio) * ratio
            }
            StepPlan::Differential { a, b } => {
                let branch_w = |branch: Option<NodeHandle>| {
                    branch.map_or(input_angular_velocity, |handle| {
                        self.query_angular_velocity(handle, input_angular_velocity)
                    })
                };
                (branch_w(a) + branch_w(b)) * 0.5
            }
        }
    }

    /// Own inertia of `handle` plus everything downstream reflected onto its input.
    pub fn query_inertia(&self, handle: NodeHandle) -> f32 {
        let Some(plan) = self.plan(handle) else {
            return 0.0;
        };
        let own = self.nodes[handle.0].inertia;
        let downstream = match plan {
            StepPlan::Wheel | StepPlan::PassThrough => 0.0,
            StepPlan::Engine { output } => self.query_inertia(output),
            StepPlan::Clutch { output, engagement } => self.query_inertia(output) * engagement,
            StepPlan::Transmission { ratio, .. } if ratio == 0.0 => 0.0,
            StepPlan::Transmission { output, ratio } => self.query_inertia(output) / (ratio * ratio),
            StepPlan::Differential { a, b } => {
                let branch_inertia = |branch: Option<NodeHandle>| {
                    branch.map_or(0.0, |handle| self.query_inertia(handle))
                };
                (branch_inertia(a) + branch_inertia(b)) * 0.5
            }
        };
        own + downstream
    }

    /// Pushes `torque` into `handle` and returns the counter torque at its input.
    /// `inertia_sum` is the upstream inertia already reflected onto this node.
    pub fn forward_step(
        &mut self,
        handle: NodeHandle,
        torque: f32,
        inertia_sum: f32,
        dt: f32,
    ) -> f32 {
        let torque = finite_or_zero(torque);
        let Some(plan) = self.plan(handle) else {
            return torque;
        };
        let inertia_sum = finite_or_zero(inertia_sum).max(0.0);
        let dt = if dt.is_finite() { dt.max(MIN_DT) } else { MIN_DT };
        let own = self.nodes[handle.0].inertia;
        let passed_inertia = inertia_sum + own;
        self.nodes[handle.0].torque = torque;

        match plan {
            StepPlan::Wheel => {
                let node = &mut self.nodes[handle.0];
                let NodeKind::Wheel(wheel) = &mut node.kind else {
                    return torque;
                };
                let counter = wheel.step(torque, inertia_sum, dt);
                node.angular_velocity = wheel.angular_velocity;
                counter
            }
            StepPlan::PassThrough => torque,
            StepPlan::Engine { output } => self.forward_step(output, torque, passed_inertia, dt),
            StepPlan::Clutch { output, engagement } => {
                let transmitted = match &self.nodes[handle.0].kind {
                    NodeKind::Clutch(clutch) => clutch.transmitted_torque(torque),
                    _ => return torque,
                };
                let counter =
                    self.forward_step(output, transmitted, passed_inertia * engagement, dt);
                let output_w = self.angular_velocity_of(output);
                let node = &mut self.nodes[handle.0];
                node.angular_velocity = output_w;
                match &node.kind {
                    NodeKind::Clutch(clutch) => clutch.returned_torque(counter),
                    _ => counter,
                }
            }
            StepPlan::Transmission { output, ratio } => {
                if let NodeKind::Transmission(transmission) = &mut self.nodes[handle.0].kind {
                    transmission.record_input_torque(torque);
                }
                if ratio == 0.0 {
                    self.forward_step(output, 0.0, 0.0, dt);
                    return 0.0;
                }
                let counter =
                    self.forward_step(output, torque * ratio, passed_inertia * ratio * ratio, dt);
                self.nodes[handle.0].angular_velocity = self.angular_velocity_of(output) * ratio;
                counter / ratio
            }
            StepPlan::Differential { a, b } => {
                self.step_differential(handle, torque, passed_inertia, dt, a, b)
            }
        }
    }

    fn step_differential(
        &mut self,
        handle: NodeHandle,
        torque: f32,
        passed_inertia: f32,
        dt: f32,
        a: Option<NodeHandle>,
        b: Option<NodeHandle>,
    ) -> f32 {
        let input_w = self.nodes[handle.0].angular_velocity;
        let branch_w = |branch: Option<NodeHandle>| {
            branch.map_or(input_w, |h| self.query_angular_velocity(h, input_w))
        };
        let branch_inertia = |branch: Option<NodeHandle>| {
            branch.map_or(INERTIA_EPSILON, |h| self.query_inertia(h))
        };
        let input = SplitInput {
            torque,
            bias_ab: 0.5,
            angular_velocity_a: branch_w(a),
            angular_velocity_b: branch_w(b),
            inertia_a: branch_inertia(a),
            inertia_b: branch_inertia(b),
            dt,
            stiffness: 0.0,
            slip_torque: 0.0,
            power_ramp: 1.0,
            coast_ramp: 1.0,
        };
        let NodeKind::Differential(differential) = &mut self.nodes[handle.0].kind else {
            return torque;
        };
        let (torque_a, torque_b) = differential.split(input);

        // A missing branch cannot turn, so its share comes straight back.
        let half_inertia = passed_inertia * 0.5;
        let counter_a = match a {
            Some(branch) => self.forward_step(branch, torque_a, half_inertia, dt),
            None => torque_a,
        };
        let counter_b = match b {
            Some(branch) => self.forward_step(branch, torque_b, half_inertia, dt),
            None => torque_b,
        };

        let speeds: Vec<f32> = [a, b]
            .into_iter()
            .flatten()
            .map(|branch| self.angular_velocity_of(branch))
            .collect();
        self.nodes[handle.0].angular_velocity =
            speeds.iter().sum::<f32>() / speeds.len().max(1) as f32;
        counter_a + counter_b
    }

    /// One driveline tick: engine torque, clutch engagement, the forward pass from
    /// the root and engine integration, then the wheels nothing drives.
    pub fn tick(&mut self, input: &PowertrainInput) {
        let dt = if input.dt.is_finite() {
            input.dt.max(MIN_DT)
        } else {
            MIN_DT
        };
        if let Some(root) = self.root {
            self.tick_engine(root, input, dt);
        }
        for index in 0..self.free_wheels.len() {
            let wheel = self.free_wheels[index];
            self.forward_step(wheel, 0.0, 0.0, dt);
        }
    }

    fn tick_engine(&mut self, root: NodeHandle, input: &PowertrainInput, dt: f32) {
        let Some(node) = self.nodes.get_mut(root.0) else {
            return;
        };
        let own = node.inertia;
        let engine_w = node.angular_velocity;
        let output = node.outputs[0];
        let NodeKind::Engine(engine) = &mut node.kind else {
            return;
        };
        let torque = engine.update(engine_w, input.throttle, input.time, dt);
        let running = engine.is_running();
        let max_w = engine.rev_limiter_rpm.max(1.0) * MAX_ENGINE_SPEED_FACTOR / RAD_S_TO_RPM;

        let rpm = engine_w.max(0.0) * RAD_S_TO_RPM;
        for node in &mut self.nodes {
            if let NodeKind::Clutch(clutch) = &mut node.kind {
                clutch.update(rpm, running, input.clutch);
            }
        }

        let w = match output {
            Some(output) => {
                let downstream_w = self.query_angular_velocity(output, engine_w);
                let downstream_inertia = self.query_inertia(output);
                let counter = self.forward_step(output, torque, own, dt);
                downstream_w + (torque - counter) / (own + downstream_inertia) * dt
            }
            None => engine_w + torque / own * dt,
        };

        let node = &mut self.nodes[root.0];
        node.torque = torque;
        node.angular_velocity = finite_or_zero(w).clamp(0.0, max_w);
    }
}
