use super::*;

#[derive(Debug, Clone, PartialEq)]
pub struct Clutch {
    pub automatic: bool,
    pub engagement_rpm: f32,
    pub engagement_range: f32,
    /// Maximum torque the clutch can transfer in either direction.
    pub slip_torque: f32,
    pub creep_torque: f32,
    engagement: f32,
    creep_active: bool,
}

impl Default for Clutch {
    fn default() -> Self {
        Self {
            automatic: true,
            engagement_rpm: 1_200.0,
            engagement_range: 400.0,
            slip_torque: 500.0,
            creep_torque: 0.0,
            engagement: 1.0,
            creep_active: false,
        }
    }
}

impl Clutch {
    pub fn engagement(&self) -> f32 {
        self.engagement
    }

    /// Recomputes engagement from engine speed and the driver's pedal (1 = pressed).
    pub fn update(&mut self, engine_rpm: f32, engine_running: bool, clutch_input: f32) {
        let pedal = finite_or_zero(clutch_input).clamp(0.0, 1.0);
        self.engagement = if self.automatic {
            let range = self.engagement_range.max(f32::EPSILON);
            ((engine_rpm - self.engagement_rpm) / range).clamp(0.0, 1.0) * (1.0 - pedal)
        } else {
            1.0 - pedal
        };
        self.engagement = finite_or_zero(self.engagement);
        self.creep_active = self.automatic && engine_running && self.creep_torque > 0.0;
    }

    /// Torque handed to the output for `input_torque` at the flywheel.
    pub fn transmitted_torque(&self, input_torque: f32) -> f32 {
        let slip_torque = self.slip_torque.max(0.0);
        let limit = slip_torque * self.engagement;
        let mut torque = input_torque.clamp(-limit, limit);
        if self.creep_active {
            torque += self.creep_torque * (1.0 - self.engagement);
        }
        torque.clamp(-slip_torque, slip_torque)
    }

    /// Counter torque reaching the flywheel for `returned` from the output side.
    pub fn returned_torque(&self, returned: f32) -> f32 {
        let slip_torque = self.slip_torque.max(0.0);
        (returned * self.engagement).clamp(-slip_torque, slip_torque)
    }
}
