use super::*;

const IDLE_CONTROLLER_GAIN: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    Off,
    Starting,
    #[default]
    Running,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForcedInduction {
    /// Torque multiplier added at full boost.
    pub boost_gain: f32,
    pub spool_up_rate: f32,
    pub spool_down_rate: f32,
    pub boost: f32,
}

impl Default for ForcedInduction {
    fn default() -> Self {
        Self {
            boost_gain: 0.3,
            spool_up_rate: 1.2,
            spool_down_rate: 3.0,
            boost: 0.0,
        }
    }
}

impl ForcedInduction {
    fn update(&mut self, throttle: f32, rpm_fraction: f32, dt: f32) {
        let target = (throttle * rpm_fraction).clamp(0.0, 1.0);
        let rate = if target > self.boost {
            self.spool_up_rate
        } else {
            self.spool_down_rate
        };
        self.boost = move_towards(self.boost, target, rate.max(0.0) * dt).clamp(0.0, 1.0);
    }

    fn torque_multiplier(&self) -> f32 {
        1.0 + self.boost * self.boost_gain.max(0.0)
    }
}

/// Torque source at the root of the driveline.
#[derive(Debug, Clone)]
pub struct Engine {
    pub idle_rpm: f32,
    pub rev_limiter_rpm: f32,
    pub stall_rpm: f32,
    pub max_torque: f32,
    /// Torque fraction keyed by `rpm / rev_limiter_rpm`.
    pub torque_curve: ResponseCurve,
    /// Internal friction at the rev limiter, scaled linearly with rpm.
    pub friction_torque: f32,
    /// Seconds of zero throttle after the limiter is hit.
    pub rev_limiter_cutoff: f32,
    pub starter_torque: f32,
    pub start_duration: f32,
    pub can_stall: bool,
    pub forced_induction: Option<ForcedInduction>,
    state: EngineState,
    start_timer: f32,
    limiter_cut_until: f64,
    throttle: f32,
    generated_torque: f32,
    loss_torque: f32,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            idle_rpm: 850.0,
            rev_limiter_rpm: 6_800.0,
            stall_rpm: 400.0,
            max_torque: 260.0,
            torque_curve: ResponseCurve::new(vec![
                [0.0, 0.45],
                [0.25, 0.82],
                [0.6, 1.0],
                [0.9, 0.9],
                [1.0, 0.78],
            ]),
            friction_torque: 40.0,
            rev_limiter_cutoff: 0.1,
            starter_torque: 60.0,
            start_duration: 1.5,
            can_stall: true,
            forced_induction: None,
            state: EngineState::Running,
            start_timer: 0.0,
            limiter_cut_until: f64::NEG_INFINITY,
            throttle: 0.0,
            generated_torque: 0.0,
            loss_torque: 0.0,
        }
    }
}

impl Engine {
    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == EngineState::Running
    }

    /// Throttle actually applied last update, after idle control and the limiter.
    pub fn throttle(&self) -> f32 {
        self.throttle
    }

    pub fn generated_torque(&self) -> f32 {
        self.generated_torque
    }

    pub fn loss_torque(&self) -> f32 {
        self.loss_torque
    }

    pub fn boost(&self) -> f32 {
        self.forced_induction
            .as_ref()
            .map_or(0.0, |induction| induction.boost)
    }

    pub fn start(&mut self) {
        if self.state == EngineState::Off {
            self.state = EngineState::Starting;
            self.start_timer = 0.0;
        }
    }

    pub fn stop(&mut self) {
        self.state = EngineState::Off;
    }

    /// Advances the engine state and returns the net torque at the flywheel.
    pub fn update(&mut self, angular_velocity: f32, throttle: f32, time: f64, dt: f32) -> f32 {
        let rpm = angular_velocity.max(0.0) * RAD_S_TO_RPM;
        let rev_limiter_rpm = self.rev_limiter_rpm.max(1.0);
        let rpm_fraction = rpm / rev_limiter_rpm;

        self.generated_torque = match self.state {
            EngineState::Off => {
                self.throttle = 0.0;
                0.0
            }
            EngineState::Starting => {
                self.start_timer += dt;
                if rpm >= self.idle_rpm {
                    self.state = EngineState::Running;
                    info!("Engine started at {rpm:.0} rpm.");
                } else if self.start_timer > self.start_duration {
                    self.state = EngineState::Off;
                    warn!("Engine failed to start within {:.1}s.", self.start_duration);
                }
                self.throttle = 0.0;
                self.starter_torque.max(0.0)
            }
            EngineState::Running => {
                if self.can_stall && rpm < self.stall_rpm {
                    self.state = EngineState::Off;
                    self.throttle = 0.0;
                    info!("Engine stalled at {rpm:.0} rpm.");
                    0.0
                } else {
                    self.running_torque(rpm, rpm_fraction, throttle, time, dt)
                }
            }
        };

        let loss = self.friction_torque.max(0.0) * rpm_fraction.min(1.5);
        self.loss_torque = if angular_velocity > 0.0 { loss } else { 0.0 };
        finite_or_zero(self.generated_torque - self.loss_torque)
    }

    fn running_torque(
        &mut self,
        rpm: f32,
        rpm_fraction: f32,
        throttle: f32,
        time: f64,
        dt: f32,
    ) -> f32 {
        let idle_throttle = if rpm < self.idle_rpm {
            ((self.idle_rpm - rpm) / self.idle_rpm.max(1.0) * IDLE_CONTROLLER_GAIN).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let mut throttle = finite_or_zero(throttle).clamp(0.0, 1.0).max(idle_throttle);

        if rpm >= self.rev_limiter_rpm {
            self.limiter_cut_until = time + f64::from(self.rev_limiter_cutoff.max(0.0));
        }
        if time < self.limiter_cut_until {
            throttle = 0.0;
        }
        self.throttle = throttle;

        let multiplier = match self.forced_induction.as_mut() {
            Some(induction) => {
                induction.update(throttle, rpm_fraction, dt);
                induction.torque_multiplier()
            }
            None => 1.0,
        };

        self.max_torque.max(0.0) * self.torque_curve.evaluate(rpm_fraction) * throttle * multiplier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpm_to_w(rpm: f32) -> f32 {
        rpm / RAD_S_TO_RPM
    }

    #[test]
    fn full_throttle_follows_torque_curve() {
        let mut engine = Engine {
            friction_torque: 0.0,
            ..Engine::default()
        };
        let torque = engine.update(rpm_to_w(0.6 * 6_800.0), 1.0, 0.0, 0.02);
        assert!((torque - 260.0).abs() < 0.5);
    }

    #[test]
    fn limiter_cuts_throttle_for_cutoff_window() {
        let mut engine = Engine::default();
        let torque = engine.update(rpm_to_w(6_900.0), 1.0, 1.0, 0.02);
        assert!(torque < 0.0);
        assert!(engine.loss_torque() > 0.0);
        assert_eq!(engine.throttle(), 0.0);

        engine.update(rpm_to_w(6_000.0), 1.0, 1.05, 0.02);
        assert_eq!(engine.throttle(), 0.0);
        engine.update(rpm_to_w(6_000.0), 1.0, 1.2, 0.02);
        assert_eq!(engine.throttle(), 1.0);
    }

    #[test]
    fn idle_controller_adds_throttle_below_idle() {
        let mut engine = Engine::default();
        engine.update(rpm_to_w(700.0), 0.0, 0.0, 0.02);
        assert!(engine.throttle() > 0.0);
        engine.update(rpm_to_w(1_500.0), 0.0, 0.0, 0.02);
        assert_eq!(engine.throttle(), 0.0);
    }

    #[test]
    fn stalls_below_stall_rpm_and_restarts_with_starter() {
        let mut engine = Engine::default();
        assert!(engine.update(rpm_to_w(100.0), 1.0, 0.0, 0.02) <= 0.0);
        assert_eq!(engine.state(), EngineState::Off);
        assert_eq!(engine.generated_torque(), 0.0);

        engine.start();
        let torque = engine.update(rpm_to_w(100.0), 0.0, 0.1, 0.02);
        assert_eq!(engine.state(), EngineState::Starting);
        assert!(torque > 0.0);
        engine.update(rpm_to_w(900.0), 0.0, 0.2, 0.02);
        assert_eq!(engine.state(), EngineState::Running);
    }

    #[test]
    fn boost_spools_and_raises_torque() {
        let mut engine = Engine {
            forced_induction: Some(ForcedInduction::default()),
            friction_torque: 0.0,
            ..Engine::default()
        };
        let w = rpm_to_w(5_000.0);
        let first = engine.update(w, 1.0, 0.0, 0.02);
        for step in 1..200 {
            engine.update(w, 1.0, f64::from(step) * 0.02, 0.02);
        }
        let spooled = engine.update(w, 1.0, 4.0, 0.02);

        assert!(engine.boost() > 0.5);
        assert!(spooled > first);
    }
}
