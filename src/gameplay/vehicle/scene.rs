use super::*;
use crate::config::VehicleConfig;

const CRATE_POSITIONS_X_M: [f32; 3] = [35.0, 36.0, 90.0];

pub(super) fn spawn_vehicle_scene(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<ColorMaterial>>,
    config: Res<GameConfig>,
    existing_player: Query<Entity, With<PlayerVehicle>>,
    existing_ground: Query<Entity, With<GroundVisual>>,
) {
    if existing_ground.is_empty() {
        spawn_ground(&mut commands, &mut meshes, &mut materials, &config);
    }

    if existing_player.is_empty() {
        let Some(vehicle_config) = config.vehicles_by_id.get(&config.game.app.default_vehicle)
        else {
            return;
        };
        spawn_player_vehicle(
            &mut commands,
            &mut meshes,
            &mut materials,
            &config,
            vehicle_config,
        );
    }
}

/// Drops the scene after an F5 reload so it is rebuilt from the new values.
pub(super) fn despawn_scene_on_config_reload(
    mut commands: Commands,
    config: Res<GameConfig>,
    player_query: Query<Entity, With<PlayerVehicle>>,
    ground_query: Query<Entity, With<GroundVisual>>,
) {
    if !config.is_changed() || config.is_added() {
        return;
    }

    for entity in &player_query {
        commands.entity(entity).try_despawn();
    }
    for entity in &ground_query {
        commands.entity(entity).try_despawn();
    }
}

fn spawn_ground(
    commands: &mut Commands,
    meshes: &mut Assets<Mesh>,
    materials: &mut Assets<ColorMaterial>,
    config: &GameConfig,
) {
    let terrain = &config.game.terrain;
    let ground_profile = build_ground_profile_samples(terrain);
    let strip_mesh = meshes.add(build_ground_strip_mesh(&ground_profile));
    let strip_material = materials.add(ColorMaterial::from(Color::srgb(0.24, 0.27, 0.30)));

    commands
        .spawn((
            Name::new("GroundVisual"),
            GroundVisual,
            Transform::default(),
            Visibility::Inherited,
        ))
        .with_children(|parent| {
            parent.spawn((
                Name::new("GroundStrip"),
                Mesh2d(strip_mesh),
                MeshMaterial2d(strip_material),
                Transform::default(),
            ));

            for segment in ground_profile.segments.iter().copied() {
                parent.spawn((
                    Name::new("GroundColliderSegment"),
                    GroundPhysicsCollider,
                    RigidBody::Fixed,
                    Collider::segment(segment.top0, segment.top1),
                    Friction::coefficient(1.0),
                    Restitution::coefficient(0.0),
                    Transform::default(),
                ));
            }
        });

    for x in CRATE_POSITIONS_X_M {
        let half = CRATE_SIZE_M * 0.5;
        let y = terrain_height_at_x(terrain, x) + half + 0.05;
        commands.spawn((
            Name::new("WheelReactiveCrate"),
            GroundVisual,
            ReactsToWheels,
            Sprite::from_color(Color::srgb(0.62, 0.46, 0.26), Vec2::splat(CRATE_SIZE_M)),
            Transform::from_xyz(x, y, 0.5),
            RigidBody::Dynamic,
            Collider::cuboid(half, half),
            ColliderMassProperties::Mass(CRATE_MASS_KG),
            Friction::coefficient(0.8),
            Velocity::zero(),
            ExternalForce::default(),
        ));
    }
}

fn spawn_player_vehicle(
    commands: &mut Commands,
    meshes: &mut Assets<Mesh>,
    materials: &mut Assets<ColorMaterial>,
    config: &GameConfig,
    vehicle_config: &VehicleConfig,
) {
    let vehicle = Vehicle::from_config(vehicle_config, config);
    let wheel_surfaces = vehicle_config
        .wheels
        .iter()
        .map(|wheel| config.friction_curve(wheel.surface.as_deref()))
        .collect();

    let chassis_size = Vec2::new(vehicle_config.chassis_length_m, vehicle_config.chassis_height_m);
    let principal_inertia = vehicle_config.mass_kg
        * ((chassis_size.x * chassis_size.x) + (chassis_size.y * chassis_size.y))
        / 12.0;
    let hang_depth = vehicle_config
        .wheels
        .iter()
        .map(|wheel| -wheel.hardpoint[1] + wheel.spring_max_length + wheel.radius)
        .fold(chassis_size.y * 0.5, f32::max);
    let spawn_y = terrain_height_at_x(&config.game.terrain, 0.0) + hang_depth + START_HEIGHT_OFFSET_M;

    info!(
        "Spawning vehicle `{}` ({} wheels, {:.0} kg).",
        vehicle_config.id,
        vehicle_config.wheels.len(),
        vehicle_config.mass_kg
    );

    let wheel_material = materials.add(ColorMaterial::from(Color::srgb(0.70, 0.80, 0.90)));
    let wheel_visuals: Vec<(WheelVisual, Handle<Mesh>)> = vehicle_config
        .wheels
        .iter()
        .enumerate()
        .map(|(mount, wheel)| {
            (
                WheelVisual {
                    mount,
                    hardpoint: Vec2::from(wheel.hardpoint),
                },
                meshes.add(RegularPolygon::new(wheel.radius.max(0.05), 8)),
            )
        })
        .collect();

    commands
        .spawn((
            Name::new("PlayerVehicle"),
            PlayerVehicle,
            VehicleDynamics {
                vehicle,
                wheel_surfaces,
                mass_kg: vehicle_config.mass_kg,
            },
            Transform::from_xyz(0.0, spawn_y, 10.0),
            Visibility::Inherited,
        ))
        .insert((
            RigidBody::Dynamic,
            Collider::cuboid(chassis_size.x * 0.5, chassis_size.y * 0.5),
            ColliderMassProperties::MassProperties(MassProperties {
                local_center_of_mass: Vec2::new(0.0, vehicle_config.center_of_mass_height_m),
                mass: vehicle_config.mass_kg,
                principal_inertia,
            }),
            ReadMassProperties::default(),
            Friction::coefficient(0.6),
            Restitution::coefficient(0.02),
            Velocity::zero(),
            ExternalForce::default(),
            Damping {
                linear_damping: 0.02,
                angular_damping: 0.2,
            },
            Ccd::enabled(),
            Sleeping::disabled(),
        ))
        .with_children(|parent| {
            parent.spawn((
                Name::new("PlayerChassis"),
                Sprite::from_color(Color::srgb(0.93, 0.34, 0.24), chassis_size),
                Transform::default(),
            ));

            // Left and right wheels share a hardpoint in the side view and draw on top of each other.
            for (visual, mesh) in wheel_visuals {
                parent.spawn((
                    Name::new("PlayerWheel"),
                    visual,
                    Mesh2d(mesh),
                    MeshMaterial2d(wheel_material.clone()),
                    Transform::from_xyz(visual.hardpoint.x, visual.hardpoint.y, WHEEL_VISUAL_Z),
                ));
            }
        });
}
