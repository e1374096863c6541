use super::*;
use crate::powertrain::gear_name;
use crate::vehicle::{BodyState, StepContext};
use crate::wheel::{GroundHit, MIN_DT};

/// Chassis pose and motion sampled once per fixed tick.
#[derive(Debug, Clone, Copy)]
struct ChassisFrame {
    entity: Entity,
    position: Vec2,
    rotation: f32,
    center_of_mass: Vec2,
    linvel: Vec2,
    angvel: f32,
}

impl ChassisFrame {
    fn to_world(&self, local: Vec2) -> Vec2 {
        wheel_hardpoint_world(self.position, self.rotation, local)
    }

    fn forward(&self) -> Vec2 {
        Mat2::from_angle(self.rotation) * Vec2::X
    }

    fn down(&self) -> Vec2 {
        Mat2::from_angle(self.rotation) * Vec2::NEG_Y
    }

    fn point_velocity(&self, world_point: Vec2) -> Vec2 {
        rigid_point_velocity(self.linvel, self.angvel, self.center_of_mass, world_point)
    }
}

pub(super) fn read_vehicle_input(
    keyboard: Res<ButtonInput<KeyCode>>,
    bindings: Res<VehicleInputBindings>,
    mut input_state: ResMut<VehicleInputState>,
) {
    let pressed = |keys: &[KeyCode]| keys.iter().any(|key| keyboard.pressed(*key));
    let just_pressed = |keys: &[KeyCode]| keys.iter().any(|key| keyboard.just_pressed(*key));

    input_state.throttle = pressed(&bindings.throttle);
    input_state.brake = pressed(&bindings.brake);
    input_state.clutch = pressed(&bindings.clutch);
    input_state.handbrake = pressed(&bindings.handbrake);
    input_state.shift_up |= just_pressed(&bindings.shift_up);
    input_state.shift_down |= just_pressed(&bindings.shift_down);
    input_state.shift_neutral |= just_pressed(&bindings.shift_neutral);
    input_state.start_engine |= just_pressed(&bindings.start_engine);
}

pub(super) fn toggle_force_gizmos(
    keyboard: Res<ButtonInput<KeyCode>>,
    mut force_gizmos: ResMut<ForceGizmos>,
) {
    if keyboard.just_pressed(KeyCode::F3) {
        force_gizmos.enabled = !force_gizmos.enabled;
        info!(
            "Wheel force gizmos {}.",
            if force_gizmos.enabled { "on" } else { "off" }
        );
    }
}

#[allow(clippy::type_complexity)]
pub(super) fn step_vehicle_dynamics(
    time: Res<Time>,
    mut input_state: ResMut<VehicleInputState>,
    mut telemetry: ResMut<VehicleTelemetryState>,
    rapier_context: ReadRapierContext,
    mut shift_messages: MessageWriter<GearShiftMessage>,
    mut player_query: Query<
        (
            Entity,
            &Transform,
            &Velocity,
            Option<&ReadMassProperties>,
            &mut ExternalForce,
            &mut VehicleDynamics,
        ),
        With<PlayerVehicle>,
    >,
    mut reacting_query: Query<
        (&Transform, &Velocity, &mut ExternalForce),
        (With<ReactsToWheels>, Without<PlayerVehicle>),
    >,
) {
    let Ok(rapier_context) = rapier_context.single() else {
        return;
    };
    let input = input_state.to_vehicle_input();
    input_state.clear_requests();

    for (_, _, mut external_force) in &mut reacting_query {
        *external_force = ExternalForce::default();
    }

    let Ok((entity, transform, velocity, mass_properties, mut external_force, mut dynamics)) =
        player_query.single_mut()
    else {
        return;
    };
    *external_force = ExternalForce::default();

    let dt = time.delta_secs().max(MIN_DT);
    let (_, _, z_rot_rad) = transform.rotation.to_euler(EulerRot::XYZ);
    let position = transform.translation.truncate();
    let local_center_of_mass = mass_properties.map_or(Vec2::ZERO, |props| props.local_center_of_mass);
    let chassis = ChassisFrame {
        entity,
        position,
        rotation: z_rot_rad,
        center_of_mass: wheel_hardpoint_world(position, z_rot_rad, local_center_of_mass),
        linvel: velocity.linvel,
        angvel: velocity.angvel,
    };
    let body_mass = mass_properties
        .map(|props| props.mass)
        .filter(|mass| *mass > 0.0)
        .unwrap_or(dynamics.mass_kg);

    let mut hits = Vec::with_capacity(dynamics.vehicle.mounts.len());
    let mut hit_bodies = Vec::with_capacity(dynamics.vehicle.mounts.len());
    for (index, mount) in dynamics.vehicle.mounts.iter().enumerate() {
        let Some(wheel) = dynamics.vehicle.wheel(index) else {
            hits.push(None);
            hit_bodies.push(None);
            continue;
        };
        let surface = dynamics
            .wheel_surfaces
            .get(index)
            .copied()
            .unwrap_or(wheel.friction_curve);
        let hit = cast_wheel_ray(
            &rapier_context,
            &chassis,
            mount.hardpoint.truncate(),
            wheel.radius(),
            wheel.suspension.spring.max_length,
            surface,
            |body| reacting_query.get(body).ok().map(|(_, velocity, _)| velocity.linvel),
        );
        hit_bodies.push(hit.map(|(body, _)| body));
        hits.push(hit.map(|(_, hit)| hit));
    }

    let forward = chassis.forward();
    dynamics.vehicle.step(
        &StepContext {
            dt,
            time: time.elapsed_secs_f64(),
            input,
            body: BodyState {
                mass: body_mass,
                forward_speed: chassis.linvel.dot(forward),
                incline: forward.y,
            },
        },
        &hits,
    );

    let mut grounded_wheels = 0;
    for (index, forces) in dynamics.vehicle.wheel_forces() {
        grounded_wheels += 1;
        let point = forces.point.truncate();
        *external_force +=
            ExternalForce::at_point(forces.total().truncate(), point, chassis.center_of_mass);

        let Some(body) = hit_bodies.get(index).copied().flatten() else {
            continue;
        };
        if let Ok((body_transform, _, mut body_force)) = reacting_query.get_mut(body) {
            *body_force += ExternalForce::at_point(
                forces.reaction().truncate(),
                point,
                body_transform.translation.truncate(),
            );
        }
    }

    for event in dynamics.vehicle.drain_shift_events() {
        shift_messages.write(GearShiftMessage {
            entity,
            event,
            gear_name: gear_name(event.shift.to_gear),
        });
    }

    telemetry.distance_m = position.x.max(0.0);
    telemetry.speed_mps = chassis.linvel.dot(forward);
    telemetry.grounded_wheels = grounded_wheels;
    telemetry.vehicle = dynamics.vehicle.telemetry().clone();
}

/// Casts from the hardpoint along the chassis down axis. Returns the body that
/// was hit alongside the contact.
fn cast_wheel_ray(
    rapier_context: &RapierContext<'_>,
    chassis: &ChassisFrame,
    hardpoint_local: Vec2,
    radius: f32,
    spring_max_length: f32,
    surface: FrictionCurve,
    ground_velocity: impl Fn(Entity) -> Option<Vec2>,
) -> Option<(Entity, GroundHit)> {
    let origin = chassis.to_world(hardpoint_local);
    let down = chassis.down().normalize_or_zero();
    if down.length_squared() <= f32::EPSILON {
        return None;
    }

    let ray_length = spring_max_length.max(0.0) + radius + WHEEL_RAY_MARGIN_M;
    let ray_filter = QueryFilter::default()
        .exclude_sensors()
        .exclude_rigid_body(chassis.entity);
    let (body, intersection) =
        rapier_context.cast_ray_and_get_normal(origin, down, ray_length, false, ray_filter)?;

    let point = intersection.point;
    let relative_velocity =
        chassis.point_velocity(point) - ground_velocity(body).unwrap_or(Vec2::ZERO);
    Some((
        body,
        GroundHit {
            spring_length: intersection.time_of_impact - radius,
            point: point.extend(0.0),
            normal: intersection.normal.normalize_or(Vec2::Y).extend(0.0),
            velocity: relative_velocity.extend(0.0),
            forward: chassis.forward().extend(0.0),
            surface,
        },
    ))
}

pub(super) fn log_gear_shifts(mut shift_messages: MessageReader<GearShiftMessage>) {
    for message in shift_messages.read() {
        let shift = message.event.shift;
        info!(
            "{:?}: {} -> {} at {:.0} rpm.",
            message.event.kind,
            gear_name(shift.from_gear),
            message.gear_name,
            shift.from_rpm
        );
    }
}

pub(super) fn sync_wheel_visuals(
    time: Res<Time>,
    player_query: Query<&VehicleDynamics, With<PlayerVehicle>>,
    mut wheel_query: Query<(&WheelVisual, &mut Transform)>,
) {
    let Ok(dynamics) = player_query.single() else {
        return;
    };

    let dt = time.delta_secs();
    for (visual, mut transform) in &mut wheel_query {
        let Some(wheel) = dynamics.vehicle.wheel(visual.mount) else {
            continue;
        };
        transform.translation.x = visual.hardpoint.x;
        transform.translation.y = visual.hardpoint.y - wheel.suspension.spring.length;
        transform.rotate_z(-(wheel.angular_velocity * dt));
    }
}

pub(super) fn camera_follow_vehicle(
    time: Res<Time>,
    telemetry: Res<VehicleTelemetryState>,
    player_query: Query<&Transform, With<PlayerVehicle>>,
    mut camera_query: Query<&mut Transform, (With<Camera2d>, Without<PlayerVehicle>)>,
) {
    let Ok(player_transform) = player_query.single() else {
        return;
    };
    let Ok(mut camera_transform) = camera_query.single_mut() else {
        return;
    };

    let look_ahead_m = (telemetry.speed_mps * CAMERA_LOOK_AHEAD_PER_MPS)
        .clamp(-CAMERA_LOOK_AHEAD_MAX_M, CAMERA_LOOK_AHEAD_MAX_M);
    let target = player_transform.translation.truncate()
        + Vec2::new(look_ahead_m, CAMERA_Y_OFFSET_M);
    let blend = (CAMERA_FOLLOW_SMOOTH_RATE_HZ * time.delta_secs()).clamp(0.0, 1.0);
    let current = camera_transform.translation.truncate();
    let next = current.lerp(target, blend);
    camera_transform.translation = next.extend(CAMERA_Z);
}

pub(super) fn draw_wheel_force_gizmos(
    force_gizmos: Res<ForceGizmos>,
    player_query: Query<&VehicleDynamics, With<PlayerVehicle>>,
    mut gizmos: Gizmos,
) {
    if !force_gizmos.enabled {
        return;
    }
    let Ok(dynamics) = player_query.single() else {
        return;
    };

    for (_, forces) in dynamics.vehicle.wheel_forces() {
        let point = forces.point.truncate();
        gizmos.arrow_2d(
            point,
            point + forces.suspension.truncate() * FORCE_GIZMO_SCALE,
            Color::srgb(0.35, 0.85, 0.40),
        );
        gizmos.arrow_2d(
            point,
            point + forces.friction.truncate() * FORCE_GIZMO_SCALE,
            Color::srgb(0.95, 0.55, 0.20),
        );
    }
}

pub(super) fn wheel_hardpoint_world(
    root_position: Vec2,
    root_z_rotation: f32,
    hardpoint_local: Vec2,
) -> Vec2 {
    root_position + (Mat2::from_angle(root_z_rotation) * hardpoint_local)
}

fn rigid_point_velocity(linvel: Vec2, angvel: f32, center_of_mass: Vec2, point: Vec2) -> Vec2 {
    linvel + (point - center_of_mass).perp() * angvel
}
