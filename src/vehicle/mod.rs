mod setup;

use crate::powertrain::{
    DifferentialType, EngineState, NodeHandle, Powertrain, PowertrainInput, ShiftCheck,
    ShiftContext, ShiftEvent, TorqueSplit, Transmission, TransmissionType, WiringIssue,
};
use crate::wheel::{finite_or_zero, ExtensionState, GroundHit, Wheel, WheelForces, MIN_DT};
use bevy::prelude::*;

/// Driver controls for one tick. Pedals are 0..1, steering is -1..1 (positive left).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VehicleInput {
    pub throttle: f32,
    pub brake: f32,
    pub clutch: f32,
    pub steering: f32,
    pub handbrake: f32,
    pub shift_up: bool,
    pub shift_down: bool,
    pub shift_into: Option<i32>,
    pub start_engine: bool,
}

impl VehicleInput {
    fn sanitized(&self) -> Self {
        Self {
            throttle: finite_or_zero(self.throttle).clamp(0.0, 1.0),
            brake: finite_or_zero(self.brake).clamp(0.0, 1.0),
            clutch: finite_or_zero(self.clutch).clamp(0.0, 1.0),
            steering: finite_or_zero(self.steering).clamp(-1.0, 1.0),
            handbrake: finite_or_zero(self.handbrake).clamp(0.0, 1.0),
            ..*self
        }
    }
}

/// Rigid-body state the host reports before each tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BodyState {
    pub mass: f32,
    /// Velocity along the chassis forward axis (m/s).
    pub forward_speed: f32,
    /// Sine of the chassis pitch, positive nose-up.
    pub incline: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StepContext {
    pub dt: f32,
    pub time: f64,
    pub input: VehicleInput,
    pub body: BodyState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WheelMount {
    pub handle: NodeHandle,
    pub name: String,
    /// Suspension top mount in chassis space.
    pub hardpoint: Vec3,
    pub steer: f32,
    pub brake: f32,
    pub handbrake: f32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WheelTelemetry {
    pub name: String,
    pub grounded: bool,
    pub load: f32,
    pub angular_velocity: f32,
    pub longitudinal_slip: f32,
    pub lateral_slip: f32,
    pub spring_length: f32,
    pub extension_state: ExtensionState,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VehicleTelemetry {
    pub engine_rpm: f32,
    pub engine_state: EngineState,
    pub engine_torque: f32,
    pub boost: f32,
    pub gear: i32,
    pub gear_name: String,
    pub shifting: bool,
    pub rev_match_rpm: Option<f32>,
    pub transmission_ratio: f32,
    pub target_upshift_rpm: f32,
    pub target_downshift_rpm: f32,
    pub clutch_engagement: f32,
    pub wheels: Vec<WheelTelemetry>,
}

/// A powertrain plus the wheel mounts and driver-input mapping of one vehicle.
#[derive(Debug)]
pub struct Vehicle {
    pub powertrain: Powertrain,
    pub mounts: Vec<WheelMount>,
    pub max_brake_torque: f32,
    pub max_handbrake_torque: f32,
    /// Radians at full steering input.
    pub max_steer_angle: f32,
    /// Automatic gearboxes: the brake pedal drives the car while in reverse.
    pub swap_reverse_inputs: bool,
    telemetry: VehicleTelemetry,
    events: Vec<ShiftEvent>,
    wiring_issues: Vec<WiringIssue>,
}

impl Vehicle {
    /// Wires `powertrain` and keeps whatever issues the wiring pass reports.
    pub fn new(mut powertrain: Powertrain, mounts: Vec<WheelMount>) -> Self {
        let wiring_issues = powertrain.wire();
        Self {
            powertrain,
            mounts,
            max_brake_torque: 2_500.0,
            max_handbrake_torque: 3_000.0,
            max_steer_angle: 32_f32.to_radians(),
            swap_reverse_inputs: true,
            telemetry: VehicleTelemetry::default(),
            events: Vec::new(),
            wiring_issues,
        }
    }

    pub fn wiring_issues(&self) -> &[WiringIssue] {
        &self.wiring_issues
    }

    pub fn telemetry(&self) -> &VehicleTelemetry {
        &self.telemetry
    }

    pub fn wheel(&self, index: usize) -> Option<&Wheel> {
        let mount = self.mounts.get(index)?;
        self.powertrain.wheel(mount.handle)
    }

    pub fn wheel_forces(&self) -> impl Iterator<Item = (usize, WheelForces)> + '_ {
        self.mounts.iter().enumerate().filter_map(|(index, mount)| {
            self.powertrain
                .wheel(mount.handle)
                .filter(|wheel| wheel.is_grounded())
                .map(|wheel| (index, wheel.forces()))
        })
    }

    /// Shift events accepted since the last call, oldest first.
    pub fn drain_shift_events(&mut self) -> Vec<ShiftEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn add_shift_check(&mut self, check: ShiftCheck) {
        if let Some(transmission) = self.powertrain.transmission_mut() {
            transmission.shift_checks.push(check);
        }
    }

    /// Switches the named differential to a host-supplied torque split.
    pub fn set_external_differential(&mut self, name: &str, split: Box<dyn TorqueSplit>) -> bool {
        let Some(differential) = self
            .powertrain
            .find(name)
            .and_then(|handle| self.powertrain.differential_mut(handle))
        else {
            warn!("No differential named '{name}' to attach an external split to.");
            return false;
        };
        differential.differential_type = DifferentialType::External;
        differential.set_external(split);
        true
    }

    /// Advances the vehicle one fixed tick. `hits[i]` is the ground contact of `mounts[i]`.
    pub fn step(&mut self, context: &StepContext, hits: &[Option<GroundHit>]) {
        let dt = if context.dt.is_finite() {
            context.dt.max(MIN_DT)
        } else {
            MIN_DT
        };
        let input = context.input.sanitized();

        if input.start_engine {
            if let Some(engine) = self.powertrain.engine_mut() {
                engine.start();
            }
        }

        // Shift decisions see the wheel state of the previous tick.
        let shift_context = self.shift_context(context, &input, dt);
        if let Some(transmission) = self.powertrain.transmission_mut() {
            transmission.update(&shift_context);
            self.events.extend(transmission.take_shift_events());
        }

        let (throttle, brake) = self.drive_pedals(&input);
        let hold_at_rest = self.holds_at_rest(throttle, brake, input.handbrake);
        for (index, mount) in self.mounts.iter().enumerate() {
            let Some(wheel) = self.powertrain.wheel_mut(mount.handle) else {
                continue;
            };
            wheel.brake_torque = brake * self.max_brake_torque * mount.brake
                + input.handbrake * self.max_handbrake_torque * mount.handbrake;
            wheel.steer_angle = input.steering * self.max_steer_angle * mount.steer;
            wheel.vehicle_mass = context.body.mass.max(0.0);
            wheel.hold_at_rest = hold_at_rest;
            wheel.update_suspension(hits.get(index).copied().flatten(), dt);
        }
        self.distribute_load_shares();

        self.powertrain.tick(&PowertrainInput {
            throttle,
            clutch: input.clutch,
            time: context.time,
            dt,
        });

        self.refresh_telemetry(context.time);
    }

    /// Throttle and brake after reverse swapping.
    fn drive_pedals(&self, input: &VehicleInput) -> (f32, f32) {
        let swap = self.swap_reverse_inputs
            && self.powertrain.transmission().is_some_and(|transmission| {
                transmission.transmission_type != TransmissionType::Manual
                    && transmission.gear() < 0
            });
        if swap {
            (input.brake, input.throttle)
        } else {
            (input.throttle, input.brake)
        }
    }

    /// Wheels may anchor against creep only while the driver is not asking for
    /// drive: no throttle, and either a brake applied or no gear engaged.
    fn holds_at_rest(&self, throttle: f32, brake: f32, handbrake: f32) -> bool {
        let transmission = self.powertrain.transmission();
        let deadzone = transmission.map_or(0.0, |transmission| transmission.input_deadzone);
        if throttle > deadzone {
            return false;
        }
        let drive_engaged = self.powertrain.engine().is_some_and(|engine| engine.is_running())
            && transmission.is_none_or(|transmission| transmission.gear() != 0);
        brake > 0.0 || handbrake > 0.0 || !drive_engaged
    }

    fn distribute_load_shares(&mut self) {
        let loads: Vec<f32> = self
            .mounts
            .iter()
            .map(|mount| self.powertrain.wheel(mount.handle).map_or(0.0, Wheel::load))
            .collect();
        let total: f32 = loads.iter().sum();
        let equal_share = 1.0 / self.mounts.len().max(1) as f32;
        for (mount, load) in self.mounts.iter().zip(loads) {
            if let Some(wheel) = self.powertrain.wheel_mut(mount.handle) {
                wheel.load_share = if total > f32::EPSILON {
                    load / total
                } else {
                    equal_share
                };
            }
        }
    }

    fn shift_context(&self, context: &StepContext, input: &VehicleInput, dt: f32) -> ShiftContext {
        let wheels = || {
            self.mounts
                .iter()
                .filter_map(|mount| self.powertrain.wheel(mount.handle))
        };
        ShiftContext {
            time: context.time,
            dt,
            throttle: input.throttle,
            brake: input.brake,
            shift_up: input.shift_up,
            shift_down: input.shift_down,
            shift_into: input.shift_into,
            engine_rpm: self.powertrain.engine_rpm(),
            rev_limiter_rpm: self
                .powertrain
                .engine()
                .map_or(0.0, |engine| engine.rev_limiter_rpm),
            forward_speed: finite_or_zero(context.body.forward_speed),
            incline: finite_or_zero(context.body.incline),
            wheel_spin: wheels().any(Wheel::is_spinning),
            wheel_skid: wheels().any(Wheel::is_skidding),
            wheel_air: wheels().any(Wheel::is_airborne),
            clutch_engagement: self.powertrain.clutch().map_or(1.0, |clutch| clutch.engagement()),
        }
    }

    fn refresh_telemetry(&mut self, time: f64) {
        let engine = self.powertrain.engine();
        let transmission = self.powertrain.transmission();
        let telemetry = &mut self.telemetry;

        telemetry.engine_rpm = self.powertrain.engine_rpm();
        telemetry.engine_state = engine.map_or(EngineState::Off, |engine| engine.state());
        telemetry.engine_torque = engine.map_or(0.0, |engine| engine.generated_torque());
        telemetry.boost = engine.map_or(0.0, |engine| engine.boost());
        telemetry.gear = transmission.map_or(0, Transmission::gear);
        telemetry.gear_name = transmission.map_or_else(|| "N".to_string(), Transmission::gear_name);
        telemetry.shifting = transmission.is_some_and(|transmission| transmission.is_shifting(time));
        telemetry.rev_match_rpm = transmission.and_then(|transmission| transmission.rev_match_rpm(time));
        telemetry.transmission_ratio = transmission.map_or(0.0, Transmission::ratio);
        telemetry.target_upshift_rpm = transmission.map_or(0.0, Transmission::target_upshift_rpm);
        telemetry.target_downshift_rpm =
            transmission.map_or(0.0, Transmission::target_downshift_rpm);
        telemetry.clutch_engagement = self
            .powertrain
            .clutch()
            .map_or(1.0, |clutch| clutch.engagement());

        telemetry.wheels.clear();
        for mount in &self.mounts {
            let Some(wheel) = self.powertrain.wheel(mount.handle) else {
                continue;
            };
            telemetry.wheels.push(WheelTelemetry {
                name: mount.name.clone(),
                grounded: wheel.is_grounded(),
                load: wheel.load(),
                angular_velocity: wheel.angular_velocity,
                longitudinal_slip: wheel.longitudinal.slip,
                lateral_slip: wheel.lateral.slip,
                spring_length: wheel.suspension.spring.length,
                extension_state: wheel.suspension.spring.extension_state,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::FrictionCurve;
    use crate::powertrain::{Clutch, Differential, Engine, SplitInput};

    const DT: f32 = 0.02;

    fn rear_drive() -> Vehicle {
        let mut powertrain = Powertrain::new();
        powertrain.add_engine("engine", 0.2, Engine::default(), "clutch");
        powertrain.add_clutch("clutch", 0.05, Clutch::default(), "gearbox");
        powertrain.add_transmission("gearbox", 0.1, Transmission::default(), "rear_diff");
        powertrain.add_differential(
            "rear_diff",
            0.05,
            Differential::default(),
            ["rear_left", "rear_right"],
        );

        let mut mounts = Vec::new();
        for (name, x, steer) in [
            ("front_left", 1.3, 1.0),
            ("front_right", 1.3, 1.0),
            ("rear_left", -1.2, 0.0),
            ("rear_right", -1.2, 0.0),
        ] {
            let handle = powertrain.add_wheel(name, Wheel::default());
            mounts.push(WheelMount {
                handle,
                name: name.to_string(),
                hardpoint: Vec3::new(x, -0.2, 0.0),
                steer,
                brake: 1.0,
                handbrake: if steer > 0.0 { 0.0 } else { 1.0 },
            });
        }
        Vehicle::new(powertrain, mounts)
    }

    fn flat_hits(speed: f32) -> Vec<Option<GroundHit>> {
        hits_at(0.15, speed)
    }

    /// Spring length at which the default spring carries about a quarter of a
    /// 1500 kg chassis.
    const CHASSIS_SPRING_LENGTH: f32 = 0.254;

    fn hits_at(spring_length: f32, speed: f32) -> Vec<Option<GroundHit>> {
        vec![
            Some(GroundHit {
                spring_length,
                point: Vec3::ZERO,
                normal: Vec3::Y,
                velocity: Vec3::X * speed,
                forward: Vec3::X,
                surface: FrictionCurve::default(),
            });
            4
        ]
    }

    fn context(time: f64, speed: f32, input: VehicleInput) -> StepContext {
        StepContext {
            dt: DT,
            time,
            input,
            body: BodyState {
                mass: 1_500.0,
                forward_speed: speed,
                incline: 0.0,
            },
        }
    }

    #[test]
    fn front_wheels_stay_free() {
        let vehicle = rear_drive();
        assert!(vehicle.wiring_issues().is_empty());
        assert_eq!(vehicle.powertrain.free_wheels().len(), 2);
    }

    #[test]
    fn load_shares_sum_to_one() {
        let mut vehicle = rear_drive();
        let mut hits = flat_hits(0.0);
        hits[0] = None;
        vehicle.step(&context(0.0, 0.0, VehicleInput::default()), &hits);

        let shares: f32 = (0..4)
            .filter_map(|index| vehicle.wheel(index))
            .map(|wheel| wheel.load_share)
            .sum();
        assert!((shares - 1.0).abs() < 1e-5);
        assert_eq!(vehicle.wheel(0).map(|wheel| wheel.load_share), Some(0.0));
    }

    #[test]
    fn brake_and_steering_are_distributed_per_mount() {
        let mut vehicle = rear_drive();
        let input = VehicleInput {
            brake: 0.5,
            handbrake: 1.0,
            steering: 1.0,
            ..VehicleInput::default()
        };
        vehicle.step(&context(0.0, 5.0, input), &flat_hits(5.0));

        let front = vehicle.wheel(0).expect("front wheel");
        let rear = vehicle.wheel(2).expect("rear wheel");
        assert_eq!(front.brake_torque, 0.5 * vehicle.max_brake_torque);
        assert_eq!(
            rear.brake_torque,
            0.5 * vehicle.max_brake_torque + vehicle.max_handbrake_torque
        );
        assert_eq!(front.steer_angle, vehicle.max_steer_angle);
        assert_eq!(rear.steer_angle, 0.0);
    }

    #[test]
    fn brake_pedal_drives_in_reverse() {
        let mut vehicle = rear_drive();
        let input = VehicleInput {
            brake: 1.0,
            ..VehicleInput::default()
        };
        vehicle.step(&context(0.0, 0.0, input), &flat_hits(0.0));

        assert_eq!(vehicle.telemetry().gear, -1);
        assert_eq!(vehicle.telemetry().gear_name, "R");
        let rear = vehicle.wheel(2).expect("rear wheel");
        assert_eq!(rear.brake_torque, 0.0);
        let throttle = vehicle.powertrain.engine().map_or(0.0, Engine::throttle);
        assert_eq!(throttle, 1.0);

        let events = vehicle.drain_shift_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].shift.to_gear, -1);
        assert!(vehicle.drain_shift_events().is_empty());
    }

    /// Drives straight on flat ground and returns the gear after every tick
    /// together with the final speed.
    fn drive(
        vehicle: &mut Vehicle,
        spring_length: f32,
        throttle: f32,
        ticks: u32,
    ) -> (Vec<i32>, f32) {
        let mass = 1_500.0;
        let mut speed = 0.0_f32;
        let mut gears = Vec::with_capacity(ticks as usize);
        let input = VehicleInput {
            throttle,
            ..VehicleInput::default()
        };

        for step in 0..ticks {
            let time = f64::from(step) * f64::from(DT);
            vehicle.step(&context(time, speed, input), &hits_at(spring_length, speed));
            let force: f32 = vehicle
                .wheel_forces()
                .map(|(_, forces)| forces.friction.x)
                .sum();
            assert!(force.is_finite());
            speed += force / mass * DT;
            gears.push(vehicle.telemetry().gear);
        }
        (gears, speed)
    }

    #[test]
    fn straight_line_launch_upshifts_and_stays_finite() {
        let mut vehicle = rear_drive();
        let (gears, speed) = drive(&mut vehicle, 0.15, 1.0, 600);

        let telemetry = vehicle.telemetry();
        assert!(speed > 5.0, "speed {speed}");
        assert!(gears.last().is_some_and(|gear| *gear >= 2), "gears {gears:?}");
        assert!(telemetry.engine_rpm.is_finite());
        assert_eq!(telemetry.wheels.len(), 4);
        assert!(telemetry.wheels.iter().all(|wheel| wheel.grounded));
    }

    #[test]
    fn gentle_launch_pulls_away() {
        let mut settled = rear_drive();
        for step in 0..2 {
            settled.step(
                &context(f64::from(step) * f64::from(DT), 0.0, VehicleInput::default()),
                &hits_at(CHASSIS_SPRING_LENGTH, 0.0),
            );
        }
        let load = settled.wheel(2).map_or(0.0, Wheel::load);
        assert!((load - 3_680.0).abs() < 100.0, "load {load}");

        let mut vehicle = rear_drive();
        let (gears, speed) = drive(&mut vehicle, CHASSIS_SPRING_LENGTH, 0.3, 1_500);
        assert!(speed > 5.0, "speed {speed}");
        assert!(gears.last().is_some_and(|gear| *gear >= 2), "gears {gears:?}");
    }

    #[test]
    fn full_throttle_upshifts_in_order_to_top_gear() {
        let mut vehicle = rear_drive();
        let top = vehicle
            .powertrain
            .transmission()
            .map_or(0, Transmission::forward_gear_count);

        let (gears, speed) = drive(&mut vehicle, CHASSIS_SPRING_LENGTH, 1.0, 3_000);
        assert!(speed.is_finite());
        for pair in gears.windows(2) {
            assert!(pair[1] >= pair[0], "gear dropped from {} to {}", pair[0], pair[1]);
        }
        assert_eq!(gears.last().copied(), Some(top));
    }

    #[test]
    fn wheels_hold_at_rest_only_without_drive_request() {
        let mut vehicle = rear_drive();
        let holding = |vehicle: &Vehicle| {
            (0..4)
                .filter_map(|index| vehicle.wheel(index))
                .map(|wheel| wheel.hold_at_rest)
                .collect::<Vec<_>>()
        };

        vehicle.step(&context(0.0, 0.0, VehicleInput::default()), &flat_hits(0.0));
        assert_eq!(vehicle.telemetry().gear, 0);
        assert_eq!(holding(&vehicle), vec![true; 4]);

        let gentle = VehicleInput {
            throttle: 0.3,
            ..VehicleInput::default()
        };
        vehicle.step(&context(0.02, 0.0, gentle), &flat_hits(0.0));
        assert_eq!(vehicle.telemetry().gear, 1);
        assert_eq!(holding(&vehicle), vec![false; 4]);

        vehicle.step(&context(0.04, 0.0, VehicleInput::default()), &flat_hits(0.0));
        assert_eq!(holding(&vehicle), vec![false; 4]);

        let parked = VehicleInput {
            handbrake: 1.0,
            ..VehicleInput::default()
        };
        vehicle.step(&context(0.06, 0.0, parked), &flat_hits(0.0));
        assert_eq!(vehicle.telemetry().gear, 1);
        assert_eq!(holding(&vehicle), vec![true; 4]);
    }

    #[test]
    fn external_differential_is_attached_by_name() {
        let mut vehicle = rear_drive();
        assert!(vehicle.set_external_differential(
            "rear_diff",
            Box::new(|input: &SplitInput| (input.torque, 0.0)),
        ));
        assert!(!vehicle.set_external_differential(
            "front_diff",
            Box::new(|_: &SplitInput| (0.0, 0.0)),
        ));
    }
}
