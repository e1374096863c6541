use super::*;
use serde::Deserialize;
use std::fmt::{Debug, Formatter};

const STANDSTILL_SPEED_MPS: f32 = 0.5;
const CLUTCH_ENGAGED_THRESHOLD: f32 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmissionType {
    Manual,
    #[default]
    Automatic,
    Cvt,
}

/// How an automatic gearbox leaves neutral and switches direction at standstill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReverseEngagement {
    /// Throttle engages first gear, brake at standstill engages reverse.
    #[default]
    Auto,
    /// Only shift-up / shift-down inputs change direction.
    RequireShiftInput,
    /// Reverse needs the brake released and pressed again at standstill.
    RepeatInput,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GearShift {
    pub from_gear: i32,
    pub to_gear: i32,
    pub from_rpm: f32,
    pub to_rpm: f32,
    pub start_time: f64,
    pub duration: f32,
}

impl GearShift {
    pub fn is_upshift(&self) -> bool {
        self.to_gear.abs() > self.from_gear.abs()
    }

    pub fn is_downshift(&self) -> bool {
        self.to_gear.abs() < self.from_gear.abs()
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + f64::from(self.duration.max(0.0))
    }

    pub fn has_ended(&self, now: f64) -> bool {
        now > self.end_time()
    }

    pub fn progress(&self, now: f64) -> f32 {
        if self.duration <= f32::EPSILON {
            return 1.0;
        }
        (((now - self.start_time) / f64::from(self.duration)) as f32).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftKind {
    Upshift,
    Downshift,
    /// Direction change or neutral toggle without a gear-magnitude change.
    Shift,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShiftEvent {
    pub shift: GearShift,
    pub kind: ShiftKind,
}

impl From<GearShift> for ShiftEvent {
    fn from(shift: GearShift) -> Self {
        let kind = if shift.is_upshift() {
            ShiftKind::Upshift
        } else if shift.is_downshift() {
            ShiftKind::Downshift
        } else {
            ShiftKind::Shift
        };
        Self { shift, kind }
    }
}

/// Everything the gearbox looks at while deciding on a shift.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShiftContext {
    pub time: f64,
    pub dt: f32,
    /// Raw driver pedals, before reverse swapping.
    pub throttle: f32,
    pub brake: f32,
    pub shift_up: bool,
    pub shift_down: bool,
    pub shift_into: Option<i32>,
    pub engine_rpm: f32,
    pub rev_limiter_rpm: f32,
    pub forward_speed: f32,
    /// Sine of the chassis pitch; positive when climbing.
    pub incline: f32,
    pub wheel_spin: bool,
    pub wheel_skid: bool,
    pub wheel_air: bool,
    pub clutch_engagement: f32,
}

pub enum ShiftCheck {
    NoWheelSpin,
    NoWheelSkid,
    NoWheelAir,
    ClutchEngaged,
    External(Box<dyn Fn(&ShiftContext) -> bool + Send + Sync>),
}

impl Debug for ShiftCheck {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoWheelSpin => f.write_str("NoWheelSpin"),
            Self::NoWheelSkid => f.write_str("NoWheelSkid"),
            Self::NoWheelAir => f.write_str("NoWheelAir"),
            Self::ClutchEngaged => f.write_str("ClutchEngaged"),
            Self::External(_) => f.write_str("External(..)"),
        }
    }
}

impl ShiftCheck {
    pub fn passes(&self, context: &ShiftContext) -> bool {
        match self {
            Self::NoWheelSpin => !context.wheel_spin,
            Self::NoWheelSkid => !context.wheel_skid,
            Self::NoWheelAir => !context.wheel_air,
            Self::ClutchEngaged => context.clutch_engagement >= CLUTCH_ENGAGED_THRESHOLD,
            Self::External(check) => check(context),
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![
            Self::NoWheelSpin,
            Self::NoWheelSkid,
            Self::NoWheelAir,
            Self::ClutchEngaged,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CvtSettings {
    pub min_ratio: f32,
    pub max_ratio: f32,
    /// Exponential smoothing rate of the ratio blend (1/s).
    pub smoothing: f32,
    /// Input torque that maps to `max_ratio`.
    pub max_input_torque: f32,
}

impl Default for CvtSettings {
    fn default() -> Self {
        Self {
            min_ratio: 0.45,
            max_ratio: 2.6,
            smoothing: 3.0,
            max_input_torque: 220.0,
        }
    }
}

#[derive(Debug)]
pub struct Transmission {
    pub transmission_type: TransmissionType,
    pub reverse_engagement: ReverseEngagement,
    forward_ratios: Vec<f32>,
    reverse_ratios: Vec<f32>,
    pub final_ratio: f32,
    pub shift_duration: f32,
    pub post_shift_ban: f32,
    pub upshift_rpm: f32,
    pub downshift_rpm: f32,
    /// How far full throttle pushes the shift points toward the limiter.
    pub variable_shift_intensity: f32,
    pub incline_effect: f32,
    pub throttle_smoothing: f32,
    pub input_deadzone: f32,
    pub shift_check_cooldown: f32,
    pub shift_checks: Vec<ShiftCheck>,
    pub cvt: CvtSettings,
    gear: i32,
    ratio: f32,
    cvt_blend: f32,
    input_torque: f32,
    smoothed_throttle: f32,
    target_upshift_rpm: f32,
    target_downshift_rpm: f32,
    shift_check_timer: f32,
    brake_released_at_standstill: bool,
    last_shift: Option<GearShift>,
    pending_events: Vec<ShiftEvent>,
}

impl Default for Transmission {
    fn default() -> Self {
        Self::new(vec![3.6, 2.2, 1.5, 1.15, 0.92, 0.78], vec![3.3], 4.1)
    }
}

impl Transmission {
    /// Ratios are magnitudes; reverse ratios are negated internally.
    pub fn new(forward_ratios: Vec<f32>, reverse_ratios: Vec<f32>, final_ratio: f32) -> Self {
        let sanitize = |ratios: Vec<f32>| -> Vec<f32> {
            ratios
                .into_iter()
                .filter(|ratio| ratio.is_finite() && ratio.abs() > f32::EPSILON)
                .map(f32::abs)
                .collect()
        };
        Self {
            transmission_type: TransmissionType::Automatic,
            reverse_engagement: ReverseEngagement::Auto,
            forward_ratios: sanitize(forward_ratios),
            reverse_ratios: sanitize(reverse_ratios),
            final_ratio,
            shift_duration: 0.25,
            post_shift_ban: 0.5,
            upshift_rpm: 5_200.0,
            downshift_rpm: 2_400.0,
            variable_shift_intensity: 0.35,
            incline_effect: 1.5,
            throttle_smoothing: 4.0,
            input_deadzone: 0.04,
            shift_check_cooldown: 0.2,
            shift_checks: ShiftCheck::defaults(),
            cvt: CvtSettings::default(),
            gear: 0,
            ratio: 0.0,
            cvt_blend: 0.0,
            input_torque: 0.0,
            smoothed_throttle: 0.0,
            target_upshift_rpm: 5_200.0,
            target_downshift_rpm: 2_400.0,
            shift_check_timer: 0.0,
            brake_released_at_standstill: false,
            last_shift: None,
            pending_events: Vec::new(),
        }
    }

    pub fn gear(&self) -> i32 {
        self.gear
    }

    /// Total ratio including the final drive; 0 in neutral, negative in reverse.
    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    pub fn forward_gear_count(&self) -> i32 {
        if self.transmission_type == TransmissionType::Cvt {
            return 1;
        }
        self.forward_ratios.len() as i32
    }

    pub fn reverse_gear_count(&self) -> i32 {
        if self.transmission_type == TransmissionType::Cvt {
            return 1;
        }
        self.reverse_ratios.len() as i32
    }

    pub fn target_upshift_rpm(&self) -> f32 {
        self.target_upshift_rpm
    }

    pub fn target_downshift_rpm(&self) -> f32 {
        self.target_downshift_rpm
    }

    pub fn last_shift(&self) -> Option<&GearShift> {
        self.last_shift.as_ref()
    }

    pub fn is_shifting(&self, now: f64) -> bool {
        self.last_shift.is_some_and(|shift| !shift.has_ended(now))
    }

    /// Engine rpm the shift is blending toward, while a timed shift runs.
    pub fn rev_match_rpm(&self, now: f64) -> Option<f32> {
        self.last_shift
            .filter(|shift| !shift.has_ended(now))
            .map(|shift| shift.from_rpm + (shift.to_rpm - shift.from_rpm) * shift.progress(now))
    }

    pub fn gear_name(&self) -> String {
        gear_name(self.gear)
    }

    pub fn take_shift_events(&mut self) -> Vec<ShiftEvent> {
        std::mem::take(&mut self.pending_events)
    }

    pub(super) fn record_input_torque(&mut self, torque: f32) {
        self.input_torque = finite_or_zero(torque);
    }

    /// Gearbox ratio for `gear` including the final drive; CVT reports its current blend.
    pub fn ratio_for_gear(&self, gear: i32) -> f32 {
        let final_ratio = finite_or_zero(self.final_ratio);
        if self.transmission_type == TransmissionType::Cvt {
            let span = self.cvt.min_ratio + (self.cvt.max_ratio - self.cvt.min_ratio) * self.cvt_blend;
            return sign_or_zero(gear as f32) * span * final_ratio;
        }
        let gearbox = match gear {
            0 => 0.0,
            g if g > 0 => self.forward_ratios.get((g - 1) as usize).copied().unwrap_or(0.0),
            g => -self
                .reverse_ratios
                .get((-g - 1) as usize)
                .copied()
                .unwrap_or(0.0),
        };
        gearbox * final_ratio
    }

    /// Changes gear if the target is valid, differs from the current gear and the
    /// post-shift ban has elapsed. `instant` skips both the ban and the shift duration.
    pub fn shift_into(&mut self, target: i32, now: f64, instant: bool, engine_rpm: f32) -> bool {
        if target > self.forward_gear_count() || target < -self.reverse_gear_count() {
            return false;
        }
        if target == self.gear {
            return false;
        }
        if !instant {
            if let Some(last) = &self.last_shift {
                if now < last.end_time() + f64::from(self.post_shift_ban.max(0.0)) {
                    return false;
                }
            }
        }

        let from_ratio = self.ratio_for_gear(self.gear);
        let to_ratio = self.ratio_for_gear(target);
        let to_rpm = if from_ratio.abs() > f32::EPSILON && to_ratio.abs() > f32::EPSILON {
            engine_rpm * (to_ratio / from_ratio).abs()
        } else {
            engine_rpm
        };
        let shift = GearShift {
            from_gear: self.gear,
            to_gear: target,
            from_rpm: engine_rpm,
            to_rpm,
            start_time: now,
            duration: if instant {
                0.0
            } else {
                self.shift_duration.max(0.0)
            },
        };

        self.gear = target;
        self.refresh_ratio();
        self.last_shift = Some(shift);
        self.pending_events.push(ShiftEvent::from(shift));
        true
    }

    /// Runs once per tick before the driveline is stepped.
    pub fn update(&mut self, context: &ShiftContext) {
        let dt = context.dt.max(MIN_DT);
        let throttle = finite_or_zero(context.throttle).clamp(0.0, 1.0);
        let smoothing = 1.0 - (-self.throttle_smoothing.max(0.0) * dt).exp();
        self.smoothed_throttle += (throttle - self.smoothed_throttle) * smoothing;
        self.update_shift_points(context);

        if self.shift_checks.iter().all(|check| check.passes(context)) {
            self.shift_check_timer += dt;
        } else {
            self.shift_check_timer = 0.0;
        }

        if self.transmission_type == TransmissionType::Cvt {
            let torque_fraction = (self.input_torque.abs() / self.cvt.max_input_torque.max(f32::EPSILON))
                .clamp(0.0, 1.0);
            let blend_rate = 1.0 - (-self.cvt.smoothing.max(0.0) * dt).exp();
            self.cvt_blend += (torque_fraction - self.cvt_blend) * blend_rate;
        }

        if let Some(target) = context.shift_into {
            self.shift_into(target, context.time, false, context.engine_rpm);
        } else {
            match self.transmission_type {
                TransmissionType::Manual => self.update_manual(context),
                TransmissionType::Automatic => {
                    self.update_direction(context);
                    self.update_automatic(context);
                }
                TransmissionType::Cvt => self.update_direction(context),
            }
        }

        self.refresh_ratio();
    }

    fn refresh_ratio(&mut self) {
        self.ratio = finite_or_zero(self.ratio_for_gear(self.gear));
    }

    fn update_shift_points(&mut self, context: &ShiftContext) {
        let rev_limiter_rpm = if context.rev_limiter_rpm > 0.0 {
            context.rev_limiter_rpm
        } else {
            self.upshift_rpm
        };
        let widen = self.smoothed_throttle * self.variable_shift_intensity
            + finite_or_zero(context.incline).max(0.0) * self.incline_effect;
        self.target_upshift_rpm = self.upshift_rpm + (rev_limiter_rpm - self.upshift_rpm) * widen;
        self.target_downshift_rpm =
            self.downshift_rpm + (self.upshift_rpm - self.downshift_rpm) * widen * 0.5;
    }

    fn update_manual(&mut self, context: &ShiftContext) {
        if context.shift_up {
            self.shift_into(self.gear + 1, context.time, false, context.engine_rpm);
        } else if context.shift_down {
            self.shift_into(self.gear - 1, context.time, false, context.engine_rpm);
        }
    }

    /// Neutral engagement and direction changes for automatic gearboxes.
    fn update_direction(&mut self, context: &ShiftContext) {
        let deadzone = self.input_deadzone;
        let throttle_pressed = context.throttle > deadzone;
        let brake_pressed = context.brake > deadzone;
        let standstill = context.forward_speed.abs() < STANDSTILL_SPEED_MPS;
        let now = context.time;
        let rpm = context.engine_rpm;

        match self.reverse_engagement {
            ReverseEngagement::Auto => {
                if self.gear == 0 {
                    if throttle_pressed {
                        self.shift_into(1, now, true, rpm);
                    } else if brake_pressed && standstill {
                        self.shift_into(-1, now, true, rpm);
                    }
                } else if standstill {
                    if self.gear > 0 && brake_pressed && !throttle_pressed {
                        self.shift_into(-1, now, true, rpm);
                    } else if self.gear < 0 && throttle_pressed && !brake_pressed {
                        self.shift_into(1, now, true, rpm);
                    }
                }
            }
            ReverseEngagement::RequireShiftInput => {
                if !standstill && self.gear != 0 {
                    return;
                }
                if context.shift_up && self.gear < 1 {
                    self.shift_into(self.gear + 1, now, true, rpm);
                } else if context.shift_down && self.gear > -1 {
                    self.shift_into(self.gear - 1, now, true, rpm);
                }
            }
            ReverseEngagement::RepeatInput => {
                if !standstill {
                    self.brake_released_at_standstill = false;
                    if self.gear == 0 && throttle_pressed {
                        self.shift_into(1, now, true, rpm);
                    }
                    return;
                }
                if !brake_pressed {
                    self.brake_released_at_standstill = true;
                }
                if self.gear <= 0 && throttle_pressed && !brake_pressed {
                    self.shift_into(1, now, true, rpm);
                } else if self.gear >= 0 && brake_pressed && self.brake_released_at_standstill {
                    self.brake_released_at_standstill = false;
                    self.shift_into(-1, now, true, rpm);
                }
            }
        }
    }

    fn update_automatic(&mut self, context: &ShiftContext) {
        if self.gear <= 0 || self.shift_check_timer < self.shift_check_cooldown {
            return;
        }

        let rpm = context.engine_rpm;
        let current_ratio = self.ratio_for_gear(self.gear);
        if current_ratio.abs() <= f32::EPSILON {
            return;
        }

        if self.gear < self.forward_gear_count() && rpm > self.target_upshift_rpm {
            let predicted = rpm * self.ratio_for_gear(self.gear + 1) / current_ratio;
            if predicted > self.target_downshift_rpm {
                self.shift_into(self.gear + 1, context.time, false, rpm);
            }
        } else if self.gear > 1 && rpm < self.target_downshift_rpm {
            let predicted = rpm * self.ratio_for_gear(self.gear - 1) / current_ratio;
            if predicted < self.target_upshift_rpm {
                self.shift_into(self.gear - 1, context.time, false, rpm);
            }
        }
    }
}

pub fn gear_name(gear: i32) -> String {
    match gear {
        0 => "N".to_string(),
        -1 => "R".to_string(),
        g if g < 0 => format!("R{}", -g),
        g => g.to_string(),
    }
}
