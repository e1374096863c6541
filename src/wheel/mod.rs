mod friction;
mod suspension;

pub use friction::FrictionAxis;
pub use suspension::{Damper, ExtensionState, Spring, Suspension};

use crate::curve::{FrictionCurve, ResponseCurve};
use crate::powertrain::INERTIA_EPSILON;
use bevy::prelude::*;
use friction::ContactFrame;
use std::f32::consts::FRAC_PI_2;

pub(crate) use suspension::move_towards;

pub const MIN_DT: f32 = 1e-4;
pub const MIN_RADIUS: f32 = 0.01;
const MIN_LOAD_RATING: f32 = 1.0;
const LOAD_CLAMP_FACTOR: f32 = 2.0;
const SPIN_SLIP_THRESHOLD: f32 = 0.3;
const SKID_SLIP_THRESHOLD: f32 = 0.3;

/// Ground contact reported by the host raycast for one wheel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundHit {
    /// Hit distance along the suspension axis minus the wheel radius.
    pub spring_length: f32,
    pub point: Vec3,
    pub normal: Vec3,
    /// Velocity of the chassis at `point` relative to the contacted surface.
    pub velocity: Vec3,
    /// Chassis forward axis, before steering.
    pub forward: Vec3,
    pub surface: FrictionCurve,
}

/// World-space forces produced by a wheel this tick, applied at `point`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WheelForces {
    pub point: Vec3,
    pub suspension: Vec3,
    pub friction: Vec3,
}

impl WheelForces {
    pub fn total(&self) -> Vec3 {
        self.suspension + self.friction
    }

    /// Force to apply to the body the wheel is standing on.
    pub fn reaction(&self) -> Vec3 {
        -self.total()
    }
}

#[derive(Debug, Clone)]
pub struct Wheel {
    pub radius: f32,
    pub width: f32,
    pub mass: f32,
    pub load_rating: f32,
    pub rolling_resistance: f32,
    /// 0 keeps the axes independent, 1 fully couples them.
    pub friction_circle_strength: f32,
    pub suspension: Suspension,
    pub longitudinal: FrictionAxis,
    pub lateral: FrictionAxis,
    pub friction_curve: FrictionCurve,
    pub angular_velocity: f32,
    pub motor_torque: f32,
    pub brake_torque: f32,
    pub counter_torque: f32,
    pub steer_angle: f32,
    pub vehicle_mass: f32,
    pub load_share: f32,
    /// Set by the vehicle each tick: the driver is not asking for drive, so a
    /// wheel at rest may anchor itself against creeping.
    pub hold_at_rest: bool,
    load: f32,
    grounded: bool,
    hit: Option<GroundHit>,
    creep_anchor: Option<Vec3>,
    forces: WheelForces,
}

impl Default for Wheel {
    fn default() -> Self {
        Self {
            radius: 0.35,
            width: 0.25,
            mass: 20.0,
            load_rating: 5_000.0,
            rolling_resistance: 0.015,
            friction_circle_strength: 1.0,
            suspension: Suspension::default(),
            longitudinal: FrictionAxis::default(),
            lateral: FrictionAxis::default(),
            friction_curve: FrictionCurve::default(),
            angular_velocity: 0.0,
            motor_torque: 0.0,
            brake_torque: 0.0,
            counter_torque: 0.0,
            steer_angle: 0.0,
            vehicle_mass: 1_500.0,
            load_share: 0.25,
            hold_at_rest: true,
            load: 0.0,
            grounded: false,
            hit: None,
            creep_anchor: None,
            forces: WheelForces::default(),
        }
    }
}

impl Wheel {
    pub fn radius(&self) -> f32 {
        if self.radius.is_finite() {
            self.radius.max(MIN_RADIUS)
        } else {
            MIN_RADIUS
        }
    }

    pub fn inertia(&self) -> f32 {
        let inertia = 0.5 * self.mass * self.radius() * self.radius();
        if inertia.is_finite() {
            inertia.max(INERTIA_EPSILON)
        } else {
            INERTIA_EPSILON
        }
    }

    pub fn load(&self) -> f32 {
        self.load
    }

    pub fn is_grounded(&self) -> bool {
        self.grounded
    }

    pub fn forces(&self) -> WheelForces {
        self.forces
    }

    pub fn hit(&self) -> Option<&GroundHit> {
        self.hit.as_ref()
    }

    pub fn is_spinning(&self) -> bool {
        self.grounded && self.longitudinal.slip > SPIN_SLIP_THRESHOLD
    }

    pub fn is_skidding(&self) -> bool {
        self.grounded
            && (self.lateral.slip.abs() > SKID_SLIP_THRESHOLD
                || self.longitudinal.slip < -SKID_SLIP_THRESHOLD)
    }

    pub fn is_airborne(&self) -> bool {
        !self.grounded
    }

    /// In-plane sideways axis of the current contact, zero while airborne.
    pub fn contact_side(&self) -> Vec3 {
        self.hit
            .map(|hit| ContactFrame::new(&hit, self.steer_angle).side)
            .unwrap_or(Vec3::ZERO)
    }

    /// Runs the spring/damper and latches the contact used by the next `step`.
    pub fn update_suspension(&mut self, hit: Option<GroundHit>, dt: f32) {
        let grounded = self.suspension.update(hit.map(|hit| hit.spring_length), dt);
        self.grounded = grounded && hit.is_some();
        if let Some(hit) = hit {
            self.friction_curve = hit.surface;
        }
        self.hit = if self.grounded { hit } else { None };
        self.load = self.suspension.load(self.grounded, self.load_rating);
        if !self.grounded {
            self.creep_anchor = None;
        }
    }

    /// Applies `motor_torque` with `upstream_inertia` reflected onto the axle and
    /// returns the counter torque sent back up the driveline.
    pub fn step(&mut self, motor_torque: f32, upstream_inertia: f32, dt: f32) -> f32 {
        let dt = if dt.is_finite() { dt.max(MIN_DT) } else { MIN_DT };
        self.motor_torque = finite_or_zero(motor_torque);
        let effective_inertia = self.inertia() + finite_or_zero(upstream_inertia).max(0.0);
        let initial_w = finite_or_zero(self.angular_velocity);
        self.angular_velocity = initial_w;

        match self.hit {
            Some(hit) if self.grounded => self.step_grounded(&hit, effective_inertia, dt),
            _ => self.step_airborne(effective_inertia, dt),
        }

        self.counter_torque = finite_or_zero(
            self.motor_torque - effective_inertia * (self.angular_velocity - initial_w) / dt,
        );
        self.counter_torque
    }

    fn step_grounded(&mut self, hit: &GroundHit, effective_inertia: f32, dt: f32) {
        let frame = ContactFrame::new(hit, self.steer_angle);
        let longitudinal = self.step_longitudinal(&frame, effective_inertia, dt);
        let lateral = self.step_lateral(&frame, dt);
        let (creep_longitudinal, creep_lateral) = self.anti_creep_force(&frame, dt);

        self.longitudinal.force = longitudinal + creep_longitudinal;
        self.lateral.force = lateral + creep_lateral;
        self.clamp_friction_to_peak();
        self.apply_friction_circle(&frame);
        self.clamp_friction_to_peak();

        let normal = hit.normal.normalize_or(Vec3::Y);
        self.forces = WheelForces {
            point: hit.point,
            suspension: normal * self.load,
            friction: frame.forward * self.longitudinal.force + frame.side * self.lateral.force,
        };
    }

    fn step_airborne(&mut self, effective_inertia: f32, dt: f32) {
        self.longitudinal.clear();
        self.lateral.clear();
        self.creep_anchor = None;
        self.forces = WheelForces::default();

        let mut w = self.angular_velocity + self.motor_torque / effective_inertia * dt;
        let brake_delta = self.brake_torque.max(0.0) / effective_inertia * dt;
        w = if w.abs() <= brake_delta {
            0.0
        } else {
            w - w.signum() * brake_delta
        };
        self.angular_velocity = finite_or_zero(w);
    }
}

/// `f32::signum` maps 0.0 to 1.0; friction directions need a true zero.
pub(crate) fn sign_or_zero(value: f32) -> f32 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

pub(crate) fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inertia_is_half_m_r_squared_and_floored() {
        let wheel = Wheel {
            radius: 0.4,
            mass: 25.0,
            ..Wheel::default()
        };
        assert!((wheel.inertia() - 2.0).abs() < 1e-5);

        let degenerate = Wheel {
            radius: 0.0,
            mass: 0.0,
            ..Wheel::default()
        };
        assert_eq!(degenerate.inertia(), INERTIA_EPSILON);
        assert_eq!(degenerate.radius(), MIN_RADIUS);
    }

    #[test]
    fn airborne_wheel_spins_freely_without_forces() {
        let mut wheel = Wheel::default();
        wheel.update_suspension(None, 0.02);
        let counter = wheel.step(100.0, 0.0, 0.02);

        assert!(wheel.is_airborne());
        assert!(wheel.hit().is_none());
        assert_eq!(wheel.load(), 0.0);
        assert_eq!(wheel.forces(), WheelForces::default());
        assert!(wheel.angular_velocity > 0.0);
        assert!(counter.abs() < 1e-3);
    }

    #[test]
    fn steering_rotates_the_friction_axes() {
        let mut wheel = Wheel::default();
        wheel.steer_angle = FRAC_PI_2;
        wheel.update_suspension(
            Some(GroundHit {
                spring_length: 0.15,
                point: Vec3::ZERO,
                normal: Vec3::Y,
                velocity: Vec3::ZERO,
                forward: Vec3::X,
                surface: FrictionCurve::default(),
            }),
            0.02,
        );

        assert!(wheel.contact_side().x.abs() > 0.99);
    }

    #[test]
    fn nan_inputs_do_not_propagate() {
        let mut wheel = Wheel::default();
        wheel.update_suspension(
            Some(GroundHit {
                spring_length: 0.1,
                point: Vec3::ZERO,
                normal: Vec3::Y,
                velocity: Vec3::new(f32::NAN, 0.0, 0.0),
                forward: Vec3::X,
                surface: FrictionCurve::default(),
            }),
            0.02,
        );
        let counter = wheel.step(f32::NAN, f32::INFINITY, f32::NAN);

        assert!(counter.is_finite());
        assert!(wheel.angular_velocity.is_finite());
        assert!(wheel.forces().total().is_finite());
    }
}
