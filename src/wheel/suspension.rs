use super::*;

const DAMPER_SPEED_SCALE: f32 = 10.0;
const RIGID_CONTACT_MARGIN_M: f32 = 0.02;
const MIN_SPRING_LENGTH_M: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtensionState {
    #[default]
    Normal,
    BottomedOut,
    OverExtended,
}

#[derive(Debug, Clone)]
pub struct Spring {
    pub max_length: f32,
    pub max_force: f32,
    pub force_curve: ResponseCurve,
    /// Rate at which an unsupported spring extends back toward `max_length` (m/s).
    pub extension_speed: f32,
    pub length: f32,
    pub prev_length: f32,
    pub compression: f32,
    pub velocity: f32,
    pub force: f32,
    pub extension_state: ExtensionState,
}

impl Default for Spring {
    fn default() -> Self {
        Self {
            max_length: 0.3,
            max_force: 24_000.0,
            force_curve: ResponseCurve::linear(),
            extension_speed: 4.0,
            length: 0.3,
            prev_length: 0.3,
            compression: 0.0,
            velocity: 0.0,
            force: 0.0,
            extension_state: ExtensionState::Normal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Damper {
    pub max_bump_force: f32,
    pub max_rebound_force: f32,
    pub bump_curve: ResponseCurve,
    pub rebound_curve: ResponseCurve,
    pub force: f32,
}

impl Default for Damper {
    fn default() -> Self {
        Self {
            max_bump_force: 2_800.0,
            max_rebound_force: 3_400.0,
            bump_curve: ResponseCurve::linear(),
            rebound_curve: ResponseCurve::linear(),
            force: 0.0,
        }
    }
}

impl Damper {
    /// Positive while compressing (`velocity < 0`), negative while extending.
    pub fn evaluate(&self, velocity: f32) -> f32 {
        let speed_factor = velocity.abs() / DAMPER_SPEED_SCALE;
        if velocity < 0.0 {
            self.max_bump_force * self.bump_curve.evaluate(speed_factor) * DAMPER_SPEED_SCALE
        } else if velocity > 0.0 {
            -self.max_rebound_force * self.rebound_curve.evaluate(speed_factor) * DAMPER_SPEED_SCALE
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Suspension {
    pub spring: Spring,
    pub damper: Damper,
}

impl Suspension {
    /// No travel and no spring force configured: the wheel carries its rated load directly.
    pub fn is_rigid(&self) -> bool {
        self.spring.max_length <= f32::EPSILON && self.spring.max_force <= f32::EPSILON
    }

    /// Advances spring and damper from the raw contact length (hit distance minus
    /// radius) and returns whether the wheel is grounded.
    ///
    /// `prev_length` is written before `length`; nothing reads `length` between.
    pub fn update(&mut self, raw_length: Option<f32>, dt: f32) -> bool {
        let dt = dt.max(MIN_DT);
        if self.is_rigid() {
            return self.update_rigid(raw_length);
        }

        let spring = &mut self.spring;
        let max_length = spring.max_length.max(MIN_SPRING_LENGTH_M);
        spring.prev_length = spring.length.clamp(0.0, max_length);

        let raw_length = raw_length.filter(|length| length.is_finite());
        let grounded = match raw_length {
            Some(length) if length <= 0.0 => {
                spring.length = 0.0;
                spring.extension_state = ExtensionState::BottomedOut;
                true
            }
            Some(length) if length >= max_length => {
                spring.length = max_length;
                spring.extension_state = ExtensionState::OverExtended;
                false
            }
            Some(length) => {
                spring.length = length;
                spring.extension_state = ExtensionState::Normal;
                true
            }
            None => {
                spring.length = move_towards(
                    spring.prev_length,
                    max_length,
                    spring.extension_speed.max(0.0) * dt,
                );
                spring.extension_state = if spring.length >= max_length {
                    ExtensionState::OverExtended
                } else {
                    ExtensionState::Normal
                };
                false
            }
        };

        spring.compression = ((max_length - spring.length) / max_length).clamp(0.0, 1.0);
        spring.velocity = (spring.length - spring.prev_length) / dt;
        spring.force = spring.max_force * spring.force_curve.evaluate(spring.compression);
        self.damper.force = self.damper.evaluate(spring.velocity);

        grounded
    }

    fn update_rigid(&mut self, raw_length: Option<f32>) -> bool {
        let spring = &mut self.spring;
        spring.prev_length = 0.0;
        spring.length = 0.0;
        spring.compression = 0.0;
        spring.velocity = 0.0;
        spring.force = 0.0;
        spring.extension_state = ExtensionState::Normal;
        self.damper.force = 0.0;

        raw_length.is_some_and(|length| length.is_finite() && length <= RIGID_CONTACT_MARGIN_M)
    }

    /// Vertical load carried by the wheel in newtons.
    pub fn load(&self, grounded: bool, load_rating: f32) -> f32 {
        if !grounded {
            return 0.0;
        }
        if self.is_rigid() {
            return load_rating.max(0.0);
        }
        let load = self.spring.force + self.damper.force;
        if load.is_finite() {
            load.max(0.0)
        } else {
            0.0
        }
    }
}

pub(crate) fn move_towards(current: f32, target: f32, max_delta: f32) -> f32 {
    if (target - current).abs() <= max_delta {
        target
    } else {
        current + (target - current).signum() * max_delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_length_bottoms_out_at_full_compression() {
        let mut suspension = Suspension::default();
        suspension.spring.length = 0.05;
        let grounded = suspension.update(Some(-0.04), 0.02);

        assert!(grounded);
        assert_eq!(suspension.spring.length, 0.0);
        assert_eq!(suspension.spring.extension_state, ExtensionState::BottomedOut);
        assert_eq!(suspension.spring.compression, 1.0);

        let expected_spring = suspension.spring.max_force * suspension.spring.force_curve.evaluate(1.0);
        assert_eq!(suspension.spring.force, expected_spring);
        let expected_load = expected_spring + suspension.damper.force;
        assert!((suspension.load(grounded, 5_000.0) - expected_load).abs() < 1e-3);
        assert!(suspension.damper.force > 0.0);
    }

    #[test]
    fn over_extension_forces_wheel_ungrounded() {
        let mut suspension = Suspension::default();
        let grounded = suspension.update(Some(0.45), 0.02);

        assert!(!grounded);
        assert_eq!(suspension.spring.length, suspension.spring.max_length);
        assert_eq!(suspension.spring.extension_state, ExtensionState::OverExtended);
        assert_eq!(suspension.load(grounded, 5_000.0), 0.0);
    }

    #[test]
    fn missing_hit_extends_at_limited_speed() {
        let mut suspension = Suspension::default();
        suspension.spring.length = 0.1;
        suspension.spring.extension_speed = 2.0;

        assert!(!suspension.update(None, 0.02));
        assert!((suspension.spring.length - 0.14).abs() < 1e-5);
        assert_eq!(suspension.spring.extension_state, ExtensionState::Normal);
    }

    #[test]
    fn damper_pushes_on_bump_and_pulls_on_rebound() {
        let mut suspension = Suspension::default();
        suspension.spring.length = 0.2;
        suspension.update(Some(0.15), 0.02);
        let bump = suspension.damper.force;
        suspension.update(Some(0.2), 0.02);
        let rebound = suspension.damper.force;

        assert!(bump > 0.0);
        assert!(rebound < 0.0);
    }

    #[test]
    fn rigid_mount_carries_rated_load() {
        let mut suspension = Suspension::default();
        suspension.spring.max_length = 0.0;
        suspension.spring.max_force = 0.0;

        let grounded = suspension.update(Some(0.0), 0.02);
        assert!(grounded);
        assert_eq!(suspension.load(grounded, 3_200.0), 3_200.0);
        assert!(!suspension.update(None, 0.02));
    }

    #[test]
    fn load_never_goes_negative() {
        let mut suspension = Suspension::default();
        suspension.spring.length = 0.01;
        let grounded = suspension.update(Some(0.29), 0.001);
        assert!(grounded);
        assert_eq!(suspension.load(grounded, 5_000.0), 0.0);
    }
}
