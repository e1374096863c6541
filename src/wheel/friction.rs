use super::*;

const MOMENTUM_CLAMP_SPEED_BIAS: f32 = 0.01;
const SLIP_SPEED_FLOOR: f32 = 0.5;
const LATERAL_SPEED_EPSILON: f32 = 1e-3;
const LATERAL_LOAD_DERATE: f32 = 0.4;
const STATIONARY_ANGULAR_VELOCITY: f32 = 1e-3;
const STATIONARY_SPEED: f32 = 1e-3;
const CREEP_SPEED_THRESHOLD: f32 = 0.12;
const CREEP_STIFFNESS: f32 = 25.0;
const CREEP_DAMPING: f32 = 2.0;
const FRICTION_CIRCLE_MIN_SPEED: f32 = 0.5;

/// Per-axis friction state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrictionAxis {
    pub slip: f32,
    pub speed: f32,
    pub force: f32,
    pub grip: f32,
    pub stiffness: f32,
}

impl Default for FrictionAxis {
    fn default() -> Self {
        Self {
            slip: 0.0,
            speed: 0.0,
            force: 0.0,
            grip: 1.0,
            stiffness: 1.0,
        }
    }
}

impl FrictionAxis {
    pub(super) fn clear(&mut self) {
        self.slip = 0.0;
        self.speed = 0.0;
        self.force = 0.0;
    }
}

/// Inputs shared by both axes for one tick.
#[derive(Debug, Clone, Copy)]
pub(super) struct ContactFrame {
    pub point: Vec3,
    pub forward: Vec3,
    pub side: Vec3,
    pub longitudinal_speed: f32,
    pub lateral_speed: f32,
}

impl ContactFrame {
    pub(super) fn new(hit: &GroundHit, steer_angle: f32) -> Self {
        let normal = hit.normal.normalize_or(Vec3::Y);
        let steered = Quat::from_axis_angle(normal, steer_angle) * hit.forward;
        let forward = (steered - normal * steered.dot(normal)).normalize_or_zero();
        let side = normal.cross(forward).normalize_or_zero();
        let velocity = if hit.velocity.is_finite() {
            hit.velocity
        } else {
            Vec3::ZERO
        };

        Self {
            point: hit.point,
            forward,
            side,
            longitudinal_speed: velocity.dot(forward),
            lateral_speed: velocity.dot(side),
        }
    }
}

impl Wheel {
    pub(super) fn load_clamped(&self) -> f32 {
        let rating = self.load_rating.max(MIN_LOAD_RATING);
        self.load.clamp(0.0, rating * LOAD_CLAMP_FACTOR)
    }

    pub fn peak_longitudinal_force(&self) -> f32 {
        self.friction_curve.peak_value() * self.load_clamped() * self.longitudinal.grip.max(0.0)
    }

    pub fn peak_lateral_force(&self) -> f32 {
        self.friction_curve.peak_value() * self.load_clamped() * self.lateral.grip.max(0.0)
    }

    fn mass_share(&self) -> f32 {
        (self.vehicle_mass * self.load_share).max(0.0)
    }

    /// Rolling-resistance torque plus brake torque, always non-negative.
    pub fn total_brake_torque(&self) -> f32 {
        let rolling = self.rolling_resistance.max(0.0) * self.load * self.radius();
        (self.brake_torque.max(0.0) + rolling).max(0.0)
    }

    /// Integrates angular velocity against the ground and returns the clamped
    /// longitudinal friction force.
    pub(super) fn step_longitudinal(
        &mut self,
        frame: &ContactFrame,
        effective_inertia: f32,
        dt: f32,
    ) -> f32 {
        let radius = self.radius();
        let speed = frame.longitudinal_speed;
        let initial_w = self.angular_velocity;
        let peak = self.peak_longitudinal_force();

        let momentum_clamp = self.mass_share()
            * ((initial_w * radius + speed).abs() + MOMENTUM_CLAMP_SPEED_BIAS)
            / dt;
        let max_force = peak.min(momentum_clamp).max(0.0);

        let motor_force = self.motor_torque / radius;
        let total_brake = self.total_brake_torque();
        let mut brake_force = total_brake / radius;
        let brake_direction = if initial_w.abs() > STATIONARY_ANGULAR_VELOCITY {
            -initial_w.signum()
        } else if speed.abs() > STATIONARY_SPEED {
            -speed.signum()
        } else {
            brake_force = brake_force.min(motor_force.abs());
            -sign_or_zero(motor_force)
        };

        let input_force = motor_force + brake_direction * brake_force;
        let clamped_force = input_force.clamp(-max_force, max_force);

        let mut w = initial_w + self.motor_torque / effective_inertia * dt;
        let brake_delta = total_brake / effective_inertia * dt;
        w = if w.abs() <= brake_delta {
            0.0
        } else {
            w - w.signum() * brake_delta
        };

        let slip_velocity = w * radius - speed;
        let correction = (slip_velocity * effective_inertia / (radius * radius * dt))
            .clamp(-max_force, max_force);
        w -= correction * radius / effective_inertia * dt;

        if total_brake / radius > max_force + motor_force.abs() {
            w = 0.0;
        }

        self.angular_velocity = finite_or_zero(w);
        self.longitudinal.speed = speed;
        self.longitudinal.slip = ((self.angular_velocity * radius - speed)
            / speed.abs().max(SLIP_SPEED_FLOOR))
        .clamp(-1.0, 1.0);

        clamped_force
    }

    pub(super) fn step_lateral(&mut self, frame: &ContactFrame, dt: f32) -> f32 {
        let lateral_speed = frame.lateral_speed;
        let longitudinal_speed = frame.longitudinal_speed.abs().max(LATERAL_SPEED_EPSILON);
        let load_percent = (self.load / self.load_rating.max(MIN_LOAD_RATING)).clamp(0.0, 1.0);

        let slip = lateral_speed.atan2(longitudinal_speed) / FRAC_PI_2
            * self.lateral.stiffness.max(0.0)
            * (1.0 - LATERAL_LOAD_DERATE * load_percent);
        self.lateral.speed = lateral_speed;
        self.lateral.slip = finite_or_zero(slip);

        let peak = self.peak_lateral_force();
        let momentum_clamp = self.mass_share() * lateral_speed.abs() / dt;
        let force = -sign_or_zero(self.lateral.slip)
            * self.friction_curve.evaluate(self.lateral.slip)
            * self.load_clamped()
            * self.lateral.grip.max(0.0);

        let limit = peak.min(momentum_clamp);
        force.clamp(-limit, limit)
    }

    /// Spring toward the position where the wheel came to rest, returned as
    /// (longitudinal, lateral) force. Each axis is capped at the force that
    /// stops this wheel's share of the mass on the anchor within one tick.
    pub(super) fn anti_creep_force(&mut self, frame: &ContactFrame, dt: f32) -> (f32, f32) {
        let below_threshold = frame.longitudinal_speed.abs() < CREEP_SPEED_THRESHOLD
            && frame.lateral_speed.abs() < CREEP_SPEED_THRESHOLD;
        let holding = below_threshold
            && self.hold_at_rest
            && self.motor_torque.abs() <= self.total_brake_torque();
        if !holding {
            self.creep_anchor = None;
            return (0.0, 0.0);
        }

        let anchor = *self.creep_anchor.get_or_insert(frame.point);
        let offset = frame.point - anchor;
        let load_factor = self.load_clamped();
        let mass_share = self.mass_share();
        let axis_force = |offset: f32, speed: f32| {
            let force = -(offset * CREEP_STIFFNESS + speed * CREEP_DAMPING) * load_factor;
            let stopping = mass_share * (speed.abs() + offset.abs() / dt) / dt;
            finite_or_zero(force.clamp(-stopping, stopping))
        };
        (
            axis_force(offset.dot(frame.forward), frame.longitudinal_speed),
            axis_force(offset.dot(frame.side), frame.lateral_speed),
        )
    }

    /// Couples the two axes once the combined slip leaves the unit circle.
    pub(super) fn apply_friction_circle(&mut self, frame: &ContactFrame) {
        let strength = self.friction_circle_strength.clamp(0.0, 1.0);
        let speed = Vec2::new(frame.longitudinal_speed, frame.lateral_speed).length();
        if strength <= 0.0 || speed <= FRICTION_CIRCLE_MIN_SPEED {
            return;
        }

        let peak_slip = self.friction_curve.peak_slip().max(f32::EPSILON);
        let combined = Vec2::new(
            self.longitudinal.slip / peak_slip,
            self.lateral.slip / peak_slip,
        );
        if combined.length() <= 1.0 {
            return;
        }

        let direction = combined.normalize_or_zero();
        let longitudinal_limit =
            self.peak_longitudinal_force() * (1.0 + (direction.x.abs() - 1.0) * strength);
        let lateral_limit =
            self.peak_lateral_force() * (1.0 + (direction.y.abs() - 1.0) * strength);
        self.longitudinal.force = self
            .longitudinal
            .force
            .clamp(-longitudinal_limit, longitudinal_limit);
        self.lateral.force = self.lateral.force.clamp(-lateral_limit, lateral_limit);
    }

    pub(super) fn clamp_friction_to_peak(&mut self) {
        let longitudinal_peak = self.peak_longitudinal_force();
        let lateral_peak = self.peak_lateral_force();
        self.longitudinal.force =
            finite_or_zero(self.longitudinal.force).clamp(-longitudinal_peak, longitudinal_peak);
        self.lateral.force = finite_or_zero(self.lateral.force).clamp(-lateral_peak, lateral_peak);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded_wheel() -> Wheel {
        let mut wheel = Wheel {
            vehicle_mass: 1_200.0,
            load_share: 0.25,
            ..Wheel::default()
        };
        wheel.suspension.spring.length = 0.15;
        wheel.update_suspension(Some(flat_hit(0.15, Vec3::ZERO)), 0.02);
        wheel
    }

    fn flat_hit(spring_length: f32, velocity: Vec3) -> GroundHit {
        GroundHit {
            spring_length,
            point: Vec3::ZERO,
            normal: Vec3::Y,
            velocity,
            forward: Vec3::X,
            surface: FrictionCurve::default(),
        }
    }

    #[test]
    fn full_brake_locks_the_wheel_in_one_step() {
        let mut wheel = loaded_wheel();
        wheel.radius = 0.3;
        wheel.update_suspension(Some(flat_hit(0.15, Vec3::X * 15.0)), 0.02);
        wheel.angular_velocity = 50.0;
        wheel.brake_torque = wheel.peak_longitudinal_force() * wheel.radius * 1.5;

        wheel.step(0.0, 0.0, 0.02);

        assert_eq!(wheel.angular_velocity, 0.0);
        assert!(wheel.longitudinal.force < 0.0);
    }

    #[test]
    fn forces_stay_within_peak_for_any_input() {
        let torques = [-6_000.0, -400.0, 0.0, 250.0, 9_000.0];
        let brakes = [0.0, 300.0, 20_000.0];
        let velocities = [
            Vec3::ZERO,
            Vec3::new(0.05, 0.0, 0.02),
            Vec3::new(25.0, 0.0, 3.0),
            Vec3::new(-8.0, 0.0, -12.0),
            Vec3::new(0.2, 0.0, 30.0),
        ];
        for strength in [0.0, 0.5, 1.0] {
            for motor in torques {
                for brake in brakes {
                    for velocity in velocities {
                        let mut wheel = loaded_wheel();
                        wheel.friction_circle_strength = strength;
                        wheel.update_suspension(Some(flat_hit(0.1, velocity)), 0.02);
                        wheel.angular_velocity = velocity.x / wheel.radius + 3.0;
                        wheel.brake_torque = brake;
                        wheel.step(motor, 0.4, 0.02);

                        let forces = wheel.forces();
                        assert!(wheel.longitudinal.force.abs() <= wheel.peak_longitudinal_force() + 1e-3);
                        assert!(wheel.lateral.force.abs() <= wheel.peak_lateral_force() + 1e-3);
                        assert!(forces.friction.is_finite());
                        assert!(wheel.angular_velocity.is_finite());
                    }
                }
            }
        }
    }

    #[test]
    fn lateral_force_opposes_sideways_sliding() {
        let mut wheel = loaded_wheel();
        wheel.update_suspension(Some(flat_hit(0.15, Vec3::new(10.0, 0.0, 1.5))), 0.02);
        wheel.angular_velocity = 10.0 / wheel.radius;
        wheel.step(0.0, 0.0, 0.02);

        let side_velocity = Vec3::new(10.0, 0.0, 1.5).dot(wheel.contact_side());
        assert!(side_velocity.abs() > 0.0);
        assert!(wheel.lateral.force * side_velocity < 0.0);
    }

    #[test]
    fn friction_circle_strength_removes_lateral_grip_when_locked() {
        let velocity = Vec3::new(20.0, 0.0, 2.0);
        let mut coupled = loaded_wheel();
        coupled.friction_circle_strength = 1.0;
        coupled.update_suspension(Some(flat_hit(0.15, velocity)), 0.02);
        coupled.brake_torque = 50_000.0;
        coupled.step(0.0, 0.0, 0.02);

        let mut independent = loaded_wheel();
        independent.friction_circle_strength = 0.0;
        independent.update_suspension(Some(flat_hit(0.15, velocity)), 0.02);
        independent.brake_torque = 50_000.0;
        independent.step(0.0, 0.0, 0.02);

        assert_eq!(coupled.angular_velocity, 0.0);
        assert!(coupled.lateral.force.abs() < independent.lateral.force.abs());
        assert!(coupled.lateral.force.abs() < 0.2 * coupled.peak_lateral_force());
    }

    #[test]
    fn anti_creep_pulls_back_toward_rest_position() {
        let mut wheel = loaded_wheel();
        wheel.brake_torque = 500.0;
        wheel.step(0.0, 0.0, 0.02);
        assert!(wheel.creep_anchor.is_some());

        let mut drifted = flat_hit(0.15, Vec3::new(0.01, 0.0, 0.0));
        drifted.point = Vec3::new(0.02, 0.0, 0.0);
        wheel.update_suspension(Some(drifted), 0.02);
        wheel.step(0.0, 0.0, 0.02);
        assert!(wheel.longitudinal.force < 0.0);
    }

    #[test]
    fn anti_creep_waits_for_the_vehicle_to_hold() {
        let mut wheel = loaded_wheel();
        wheel.hold_at_rest = false;
        wheel.brake_torque = 500.0;
        wheel.step(0.0, 0.0, 0.02);
        assert!(wheel.creep_anchor.is_none());
    }

    #[test]
    fn anti_creep_never_exceeds_the_stopping_force() {
        let mut wheel = loaded_wheel();
        let frame = ContactFrame {
            point: Vec3::ZERO,
            forward: Vec3::X,
            side: Vec3::Z,
            longitudinal_speed: 0.1,
            lateral_speed: 0.0,
        };
        let (longitudinal, lateral) = wheel.anti_creep_force(&frame, 0.02);

        let stopping = wheel.vehicle_mass * wheel.load_share * 0.1 / 0.02;
        assert!(longitudinal < 0.0);
        assert!((longitudinal + stopping).abs() < 1e-2, "force {longitudinal}");
        assert_eq!(lateral, 0.0);
    }

    #[test]
    fn anti_creep_releases_under_drive_torque() {
        let mut wheel = loaded_wheel();
        wheel.step(0.0, 0.0, 0.02);
        wheel.step(800.0, 0.0, 0.02);
        assert!(wheel.creep_anchor.is_none());
    }
}
