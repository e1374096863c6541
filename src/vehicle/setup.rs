use super::*;
use crate::config::{
    ClutchConfig, DifferentialConfig, EngineConfig, GameConfig, TransmissionConfig, VehicleConfig,
    WheelConfig,
};
use crate::curve::ResponseCurve;
use crate::powertrain::{Clutch, CvtSettings, Differential, Engine, ForcedInduction};

impl Vehicle {
    /// Builds and wires a vehicle from its config row. Wiring problems are kept
    /// on the vehicle rather than failing the build.
    pub fn from_config(config: &VehicleConfig, game: &GameConfig) -> Self {
        let mut powertrain = Powertrain::new();

        let engine = &config.engine;
        powertrain.add_engine(&engine.name, engine.inertia, build_engine(engine), &engine.output);

        if let Some(clutch) = &config.clutch {
            powertrain.add_clutch(&clutch.name, clutch.inertia, build_clutch(clutch), &clutch.output);
        }

        let transmission = &config.transmission;
        powertrain.add_transmission(
            &transmission.name,
            transmission.inertia,
            build_transmission(transmission),
            &transmission.output,
        );

        for differential in &config.differentials {
            powertrain.add_differential(
                &differential.name,
                differential.inertia,
                build_differential(differential),
                [&differential.outputs[0], &differential.outputs[1]],
            );
        }

        let mounts = config
            .wheels
            .iter()
            .map(|wheel| WheelMount {
                handle: powertrain.add_wheel(&wheel.name, build_wheel(wheel, game)),
                name: wheel.name.clone(),
                hardpoint: Vec3::new(wheel.hardpoint[0], wheel.hardpoint[1], 0.0),
                steer: wheel.steer,
                brake: wheel.brake,
                handbrake: wheel.handbrake,
            })
            .collect();

        let mut vehicle = Vehicle::new(powertrain, mounts);
        vehicle.max_brake_torque = config.max_brake_torque.max(0.0);
        vehicle.max_handbrake_torque = config.max_handbrake_torque.max(0.0);
        vehicle.max_steer_angle = config.max_steer_angle_degrees.to_radians();
        vehicle.swap_reverse_inputs = config.swap_reverse_inputs;

        if vehicle.wiring_issues().is_empty() {
            debug!(
                "Built vehicle `{}` with {} wheels.",
                config.id,
                vehicle.mounts.len()
            );
        } else {
            warn!(
                "Vehicle `{}` has {} wiring issue(s); unconnected branches stay idle.",
                config.id,
                vehicle.wiring_issues().len()
            );
        }
        vehicle
    }
}

fn build_engine(config: &EngineConfig) -> Engine {
    let mut engine = Engine::default();
    engine.idle_rpm = config.idle_rpm;
    engine.rev_limiter_rpm = config.rev_limiter_rpm;
    engine.stall_rpm = config.stall_rpm;
    engine.max_torque = config.max_torque;
    engine.friction_torque = config.friction_torque;
    engine.rev_limiter_cutoff = config.rev_limiter_cutoff;
    engine.starter_torque = config.starter_torque;
    engine.start_duration = config.start_duration;
    engine.can_stall = config.can_stall;
    engine.forced_induction = config
        .forced_induction
        .as_ref()
        .map(|induction| ForcedInduction {
            boost_gain: induction.boost_gain,
            spool_up_rate: induction.spool_up_rate,
            spool_down_rate: induction.spool_down_rate,
            boost: 0.0,
        });
    if !config.torque_curve.is_empty() {
        engine.torque_curve = ResponseCurve::new(config.torque_curve.clone());
    }
    if !config.start_running {
        engine.stop();
    }
    engine
}

fn build_clutch(config: &ClutchConfig) -> Clutch {
    let mut clutch = Clutch::default();
    clutch.automatic = config.automatic;
    clutch.engagement_rpm = config.engagement_rpm;
    clutch.engagement_range = config.engagement_range;
    clutch.slip_torque = config.slip_torque;
    clutch.creep_torque = config.creep_torque;
    clutch
}

fn build_transmission(config: &TransmissionConfig) -> Transmission {
    let mut transmission = Transmission::new(
        config.forward_ratios.clone(),
        config.reverse_ratios.clone(),
        config.final_ratio,
    );
    transmission.transmission_type = config.kind;
    transmission.reverse_engagement = config.reverse_engagement;
    transmission.shift_duration = config.shift_duration;
    transmission.post_shift_ban = config.post_shift_ban;
    transmission.upshift_rpm = config.upshift_rpm;
    transmission.downshift_rpm = config.downshift_rpm;
    transmission.variable_shift_intensity = config.variable_shift_intensity;
    transmission.incline_effect = config.incline_effect;
    transmission.input_deadzone = config.input_deadzone;
    transmission.shift_check_cooldown = config.shift_check_cooldown;
    transmission.cvt = CvtSettings {
        min_ratio: config.cvt_min_ratio,
        max_ratio: config.cvt_max_ratio,
        smoothing: config.cvt_smoothing,
        max_input_torque: config.cvt_max_input_torque,
    };
    transmission
}

fn build_differential(config: &DifferentialConfig) -> Differential {
    let mut differential = Differential::default();
    differential.differential_type = config.kind;
    differential.bias_ab = config.bias_ab;
    differential.stiffness = config.stiffness;
    differential.slip_torque = config.slip_torque;
    differential.power_ramp = config.power_ramp;
    differential.coast_ramp = config.coast_ramp;
    differential
}

fn build_wheel(config: &WheelConfig, game: &GameConfig) -> Wheel {
    let mut wheel = Wheel::default();
    wheel.radius = config.radius;
    wheel.width = config.width;
    wheel.mass = config.mass;
    wheel.load_rating = config.load_rating;
    wheel.rolling_resistance = config.rolling_resistance;
    wheel.friction_circle_strength = config.friction_circle_strength;
    wheel.friction_curve = game.friction_curve(config.surface.as_deref());
    wheel.longitudinal.grip = config.longitudinal_grip;
    wheel.lateral.grip = config.lateral_grip;
    wheel.lateral.stiffness = config.lateral_stiffness;

    let spring = &mut wheel.suspension.spring;
    spring.max_length = config.spring_max_length;
    spring.length = config.spring_max_length;
    spring.prev_length = config.spring_max_length;
    spring.max_force = config.spring_max_force;
    spring.extension_speed = config.extension_speed;
    if !config.spring_curve.is_empty() {
        spring.force_curve = ResponseCurve::new(config.spring_curve.clone());
    }
    let damper = &mut wheel.suspension.damper;
    damper.max_bump_force = config.damper_bump_force;
    damper.max_rebound_force = config.damper_rebound_force;
    wheel
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn bundled() -> GameConfig {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("config");
        GameConfig::load_from_dir(&dir).expect("bundled config is valid")
    }

    #[test]
    fn every_bundled_vehicle_wires_cleanly() {
        let game = bundled();
        for config in &game.vehicles.vehicles {
            let vehicle = Vehicle::from_config(config, &game);
            assert!(
                vehicle.wiring_issues().is_empty(),
                "{} wiring issues: {:?}",
                config.id,
                vehicle.wiring_issues()
            );
            assert_eq!(vehicle.mounts.len(), config.wheels.len());
            assert!(vehicle.powertrain.root().is_some());
        }
    }

    #[test]
    fn config_values_reach_the_components() {
        let game = bundled();
        let config = &game.vehicles_by_id[&game.game.app.default_vehicle];
        let vehicle = Vehicle::from_config(config, &game);

        let transmission = vehicle
            .powertrain
            .transmission()
            .expect("every vehicle has a gearbox");
        assert_eq!(transmission.transmission_type, config.transmission.kind);
        assert_eq!(transmission.upshift_rpm, config.transmission.upshift_rpm);

        let engine = vehicle.powertrain.engine().expect("every vehicle has an engine");
        assert_eq!(engine.rev_limiter_rpm, config.engine.rev_limiter_rpm);

        let first = &config.wheels[0];
        let wheel = vehicle.wheel(0).expect("first wheel");
        assert_eq!(wheel.radius, first.radius);
        assert_eq!(wheel.suspension.spring.max_length, first.spring_max_length);
        assert!((vehicle.max_steer_angle - config.max_steer_angle_degrees.to_radians()).abs() < 1e-6);
    }

    #[test]
    fn wheel_surface_overrides_the_default() {
        let game = bundled();
        let mut config = game.vehicles_by_id[&game.game.app.default_vehicle].clone();
        config.wheels[0].surface = Some("ice".to_string());

        let vehicle = Vehicle::from_config(&config, &game);
        let icy = vehicle.wheel(0).expect("first wheel").friction_curve.peak_value();
        let dry = vehicle.wheel(1).expect("second wheel").friction_curve.peak_value();
        assert!(icy < dry);
    }
}
