mod runtime;
mod scene;
mod terrain;

use crate::config::GameConfig;
use crate::curve::FrictionCurve;
use crate::powertrain::ShiftEvent;
use crate::vehicle::{Vehicle, VehicleInput};
use bevy::asset::RenderAssetUsages;
use bevy::math::primitives::RegularPolygon;
use bevy::mesh::{Indices, PrimitiveTopology};
use bevy::prelude::*;
use bevy_rapier2d::prelude::*;
use runtime::*;
use scene::*;
use terrain::*;

const CAMERA_ORTHO_SCALE_METERS: f32 = 0.02;
const CAMERA_Y_OFFSET_M: f32 = 1.5;
const CAMERA_Z: f32 = 999.9;
const CAMERA_LOOK_AHEAD_PER_MPS: f32 = 0.25;
const CAMERA_LOOK_AHEAD_MAX_M: f32 = 6.0;
const CAMERA_FOLLOW_SMOOTH_RATE_HZ: f32 = 6.0;
const START_HEIGHT_OFFSET_M: f32 = 1.5;
const GROUND_STRIP_THICKNESS_M: f32 = 1.2;
const GROUND_RUN_UP_M: f32 = 40.0;
const GROUND_STRIP_Z: f32 = -1.0;
const WHEEL_RAY_MARGIN_M: f32 = 0.05;
const WHEEL_VISUAL_Z: f32 = 0.8;
const CRATE_SIZE_M: f32 = 0.8;
const CRATE_MASS_KG: f32 = 60.0;
const FORCE_GIZMO_SCALE: f32 = 1.0 / 4_000.0;

pub struct VehicleGameplayPlugin;

impl Plugin for VehicleGameplayPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<VehicleInputState>()
            .init_resource::<VehicleInputBindings>()
            .init_resource::<VehicleTelemetryState>()
            .init_resource::<ForceGizmos>()
            .add_message::<GearShiftMessage>()
            .add_systems(Startup, spawn_camera)
            .add_systems(
                Update,
                (
                    despawn_scene_on_config_reload,
                    spawn_vehicle_scene,
                    read_vehicle_input,
                    toggle_force_gizmos,
                    log_gear_shifts,
                    sync_wheel_visuals,
                    camera_follow_vehicle,
                    draw_wheel_force_gizmos,
                )
                    .chain()
                    .run_if(resource_exists::<GameConfig>),
            )
            .add_systems(
                FixedUpdate,
                step_vehicle_dynamics.run_if(resource_exists::<GameConfig>),
            );
    }
}

#[derive(Component)]
pub struct PlayerVehicle;

/// The simulated vehicle plus the ground surface each wheel mount drives on.
#[derive(Component, Debug)]
pub struct VehicleDynamics {
    pub vehicle: Vehicle,
    pub wheel_surfaces: Vec<FrictionCurve>,
    /// Used until Rapier reports the body's mass.
    pub mass_kg: f32,
}

/// Side-view wheel sprite bound to `Vehicle::mounts[mount]`.
#[derive(Component, Debug, Clone, Copy)]
pub struct WheelVisual {
    pub mount: usize,
    pub hardpoint: Vec2,
}

/// Dynamic bodies that receive the reaction of wheel forces pressing on them.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct ReactsToWheels;

#[derive(Component)]
struct GroundVisual;

#[derive(Component)]
struct GroundPhysicsCollider;

/// Latched driver input. Edge-triggered requests survive until a fixed tick consumes them.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct VehicleInputState {
    pub throttle: bool,
    pub brake: bool,
    pub clutch: bool,
    pub handbrake: bool,
    pub shift_up: bool,
    pub shift_down: bool,
    pub shift_neutral: bool,
    pub start_engine: bool,
}

impl VehicleInputState {
    fn to_vehicle_input(self) -> VehicleInput {
        let pedal = |pressed: bool| if pressed { 1.0 } else { 0.0 };
        VehicleInput {
            throttle: pedal(self.throttle),
            brake: pedal(self.brake),
            clutch: pedal(self.clutch),
            steering: 0.0,
            handbrake: pedal(self.handbrake),
            shift_up: self.shift_up,
            shift_down: self.shift_down,
            shift_into: self.shift_neutral.then_some(0),
            start_engine: self.start_engine,
        }
    }

    fn clear_requests(&mut self) {
        self.shift_up = false;
        self.shift_down = false;
        self.shift_neutral = false;
        self.start_engine = false;
    }
}

#[derive(Resource, Debug, Clone)]
struct VehicleInputBindings {
    throttle: Vec<KeyCode>,
    brake: Vec<KeyCode>,
    clutch: Vec<KeyCode>,
    handbrake: Vec<KeyCode>,
    shift_up: Vec<KeyCode>,
    shift_down: Vec<KeyCode>,
    shift_neutral: Vec<KeyCode>,
    start_engine: Vec<KeyCode>,
}

impl Default for VehicleInputBindings {
    fn default() -> Self {
        Self {
            throttle: vec![KeyCode::KeyD, KeyCode::ArrowRight],
            brake: vec![KeyCode::KeyA, KeyCode::ArrowLeft],
            clutch: vec![KeyCode::ShiftLeft],
            handbrake: vec![KeyCode::Space],
            shift_up: vec![KeyCode::KeyE],
            shift_down: vec![KeyCode::KeyQ],
            shift_neutral: vec![KeyCode::KeyN],
            start_engine: vec![KeyCode::KeyI],
        }
    }
}

/// Snapshot of the player vehicle for other plugins.
#[derive(Resource, Debug, Clone, Default)]
pub struct VehicleTelemetryState {
    pub distance_m: f32,
    pub speed_mps: f32,
    pub grounded_wheels: usize,
    pub vehicle: crate::vehicle::VehicleTelemetry,
}

#[derive(Resource, Debug, Clone, Copy, Default)]
struct ForceGizmos {
    enabled: bool,
}

#[derive(Message, Debug, Clone)]
pub struct GearShiftMessage {
    pub entity: Entity,
    pub event: ShiftEvent,
    pub gear_name: String,
}

fn spawn_camera(mut commands: Commands) {
    commands.spawn((
        Name::new("GameplayCamera"),
        Camera2d,
        Projection::Orthographic(OrthographicProjection {
            scale: CAMERA_ORTHO_SCALE_METERS,
            ..OrthographicProjection::default_2d()
        }),
        Transform::from_xyz(0.0, 0.0, CAMERA_Z),
    ));
}
