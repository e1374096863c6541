use super::*;
use serde::Deserialize;
use std::fmt::{Debug, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferentialType {
    #[default]
    Open,
    Locked,
    LimitedSlip,
    External,
}

/// Branch state handed to a split function. Branch A is the first output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitInput {
    pub torque: f32,
    pub bias_ab: f32,
    pub angular_velocity_a: f32,
    pub angular_velocity_b: f32,
    pub inertia_a: f32,
    pub inertia_b: f32,
    pub dt: f32,
    pub stiffness: f32,
    pub slip_torque: f32,
    pub power_ramp: f32,
    pub coast_ramp: f32,
}

/// Host-supplied torque split for `DifferentialType::External`.
pub trait TorqueSplit: Send + Sync {
    /// Returns `(torque_a, torque_b)`.
    fn split(&self, input: &SplitInput) -> (f32, f32);
}

impl<F> TorqueSplit for F
where
    F: Fn(&SplitInput) -> (f32, f32) + Send + Sync,
{
    fn split(&self, input: &SplitInput) -> (f32, f32) {
        self(input)
    }
}

pub struct Differential {
    pub differential_type: DifferentialType,
    /// Share of torque sent to branch B by the open split.
    pub bias_ab: f32,
    pub stiffness: f32,
    pub slip_torque: f32,
    pub power_ramp: f32,
    pub coast_ramp: f32,
    external: Option<Box<dyn TorqueSplit>>,
}

impl Debug for Differential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Differential")
            .field("differential_type", &self.differential_type)
            .field("bias_ab", &self.bias_ab)
            .field("stiffness", &self.stiffness)
            .field("slip_torque", &self.slip_torque)
            .field("power_ramp", &self.power_ramp)
            .field("coast_ramp", &self.coast_ramp)
            .field("external", &self.external.is_some())
            .finish()
    }
}

impl Default for Differential {
    fn default() -> Self {
        Self {
            differential_type: DifferentialType::Open,
            bias_ab: 0.5,
            stiffness: 0.5,
            slip_torque: 400.0,
            power_ramp: 1.0,
            coast_ramp: 0.5,
            external: None,
        }
    }
}

impl Differential {
    pub fn set_external(&mut self, split: Box<dyn TorqueSplit>) {
        self.external = Some(split);
    }

    /// Splits `input.torque` across both branches. The locked split also nudges `bias_ab`.
    pub fn split(&mut self, input: SplitInput) -> (f32, f32) {
        let input = SplitInput {
            bias_ab: self.bias_ab.clamp(0.0, 1.0),
            stiffness: self.stiffness.max(0.0),
            slip_torque: self.slip_torque.max(0.0),
            power_ramp: self.power_ramp,
            coast_ramp: self.coast_ramp,
            dt: input.dt.max(MIN_DT),
            ..input
        };

        let (torque_a, torque_b) = match self.differential_type {
            DifferentialType::Open => open_split(&input),
            DifferentialType::Locked => {
                let (torque_a, torque_b, bias_ab) = locked_split(&input);
                self.bias_ab = bias_ab;
                (torque_a, torque_b)
            }
            DifferentialType::LimitedSlip => limited_slip_split(&input),
            DifferentialType::External => match self.external.as_ref() {
                Some(split) => split.split(&input),
                None => open_split(&input),
            },
        };
        (finite_or_zero(torque_a), finite_or_zero(torque_b))
    }
}

pub fn open_split(input: &SplitInput) -> (f32, f32) {
    (
        input.torque * (1.0 - input.bias_ab),
        input.torque * input.bias_ab,
    )
}

/// Drives both branches toward their inertia-weighted mean speed.
pub fn locked_split(input: &SplitInput) -> (f32, f32, f32) {
    let (base_a, base_b) = open_split(input);
    let inertia_a = input.inertia_a.max(INERTIA_EPSILON);
    let inertia_b = input.inertia_b.max(INERTIA_EPSILON);
    let w_a = input.angular_velocity_a;
    let w_b = input.angular_velocity_b;
    let target = (w_a * inertia_a + w_b * inertia_b) / (inertia_a + inertia_b);

    let limit = input.torque.abs();
    let correction_a =
        ((target - w_a) * inertia_a / input.dt * input.stiffness).clamp(-limit, limit);
    let correction_b =
        ((target - w_b) * inertia_b / input.dt * input.stiffness).clamp(-limit, limit);

    let speed_difference = (w_a - w_b) / (w_a.abs() + w_b.abs() + f32::EPSILON);
    let bias_ab = (input.bias_ab + speed_difference * input.stiffness * 0.5).clamp(0.0, 1.0);

    (base_a + correction_a, base_b + correction_b, bias_ab)
}

pub fn limited_slip_split(input: &SplitInput) -> (f32, f32) {
    let w_a = input.angular_velocity_a;
    let w_b = input.angular_velocity_b;
    if w_a < 0.0 || w_b < 0.0 {
        return open_split(input);
    }

    let half = input.torque * 0.5;
    let speed_sum = w_a.abs() + w_b.abs();
    if speed_sum <= f32::EPSILON {
        return (half, half);
    }

    let slip = (w_a - w_b) / speed_sum;
    let ramp = if input.torque >= 0.0 {
        input.power_ramp
    } else {
        input.coast_ramp
    };
    let limit = half.abs();
    let correction = (slip * input.stiffness * ramp * input.slip_torque).clamp(-limit, limit);
    (half - correction, half + correction)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(torque: f32, w_a: f32, w_b: f32) -> SplitInput {
        SplitInput {
            torque,
            bias_ab: 0.5,
            angular_velocity_a: w_a,
            angular_velocity_b: w_b,
            inertia_a: 1.0,
            inertia_b: 1.0,
            dt: 0.02,
            stiffness: 1.0,
            slip_torque: 400.0,
            power_ramp: 1.0,
            coast_ramp: 0.5,
        }
    }

    #[test]
    fn open_with_zero_bias_sends_everything_to_branch_a() {
        let mut differential = Differential {
            bias_ab: 0.0,
            ..Differential::default()
        };
        for torque in [-750.0, -1.0, 0.0, 3.5, 1_200.0] {
            for (w_a, w_b) in [(0.0, 0.0), (40.0, -3.0), (-12.0, 90.0)] {
                let (a, b) = differential.split(input(torque, w_a, w_b));
                assert_eq!(a, torque);
                assert_eq!(b, 0.0);
            }
        }
    }

    #[test]
    fn locked_pushes_torque_to_slower_branch() {
        let (a, b, bias) = locked_split(&input(100.0, 10.0, 0.0));
        assert!((a - -50.0).abs() < 1e-4);
        assert!((b - 150.0).abs() < 1e-4);
        assert!((a + b - 100.0).abs() < 1e-4);
        assert!(bias > 0.5);
    }

    #[test]
    fn locked_bias_is_stored_on_the_differential() {
        let mut differential = Differential {
            differential_type: DifferentialType::Locked,
            stiffness: 0.2,
            ..Differential::default()
        };
        differential.split(input(100.0, 0.0, 10.0));
        assert!(differential.bias_ab < 0.5);
    }

    #[test]
    fn limited_slip_biases_toward_slower_branch_and_clamps() {
        let (a, b) = limited_slip_split(&input(200.0, 30.0, 10.0));
        assert!(b > a);
        assert!((a + b - 200.0).abs() < 1e-4);
        assert!(a >= 0.0 && b <= 200.0);

        let (coast_a, coast_b) = limited_slip_split(&input(-200.0, 30.0, 10.0));
        assert!((coast_a + coast_b + 200.0).abs() < 1e-4);
    }

    #[test]
    fn limited_slip_falls_back_to_bias_in_reverse() {
        let (a, b) = limited_slip_split(&input(-80.0, -5.0, -20.0));
        assert_eq!((a, b), (-40.0, -40.0));
    }

    #[test]
    fn external_without_callback_behaves_open() {
        let mut differential = Differential {
            differential_type: DifferentialType::External,
            bias_ab: 0.25,
            ..Differential::default()
        };
        assert_eq!(differential.split(input(100.0, 5.0, 1.0)), (75.0, 25.0));

        differential.set_external(Box::new(|input: &SplitInput| (0.0, input.torque)));
        assert_eq!(differential.split(input(100.0, 5.0, 1.0)), (0.0, 100.0));
    }
}
