use crate::curve::{FrictionCurve, PacejkaParams};
use crate::powertrain::{DifferentialType, ReverseEngagement, TransmissionType};
use bevy::prelude::*;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = "config";

pub struct ConfigPlugin;

impl Plugin for ConfigPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, load_game_config)
            .add_systems(Update, reload_game_config_hotkey);
    }
}

fn load_game_config(mut commands: Commands) {
    let config = GameConfig::load_from_dir(Path::new(CONFIG_DIR)).unwrap_or_else(|error| {
        panic!("failed to load configuration from `{CONFIG_DIR}`: {error}");
    });

    log_config_summary("Loaded", &config);
    info!("Press F5 to hot-reload config files from `{CONFIG_DIR}`.");

    commands.insert_resource(Time::<Fixed>::from_hz(f64::from(
        config.game.app.fixed_timestep_hz,
    )));
    commands.insert_resource(config);
}

fn reload_game_config_hotkey(
    keyboard: Res<ButtonInput<KeyCode>>,
    game_config: Option<ResMut<GameConfig>>,
    mut fixed_time: ResMut<Time<Fixed>>,
) {
    if !keyboard.just_pressed(KeyCode::F5) {
        return;
    }

    let Some(mut current_config) = game_config else {
        warn!("Config hot-reload requested, but `GameConfig` resource is not initialized yet.");
        return;
    };

    match GameConfig::load_from_dir(Path::new(CONFIG_DIR)) {
        Ok(new_config) => {
            *current_config = new_config;
            fixed_time.set_timestep_hz(f64::from(current_config.game.app.fixed_timestep_hz));
            log_config_summary("Hot-reloaded", &current_config);
        }
        Err(error) => {
            error!("Config hot-reload failed; keeping previous config: {error}");
        }
    }
}

fn log_config_summary(prefix: &str, config: &GameConfig) {
    info!(
        "{prefix} config: {} vehicles, {} surfaces, physics at {} Hz, driving `{}` on `{}`.",
        config.vehicles_by_id.len(),
        config.surfaces_by_id.len(),
        config.game.app.fixed_timestep_hz,
        config.game.app.default_vehicle,
        config.game.app.default_surface
    );
}

#[derive(Resource, Debug, Clone)]
pub struct GameConfig {
    pub game: GameFile,
    pub surfaces: SurfacesFile,
    pub vehicles: VehiclesFile,
    pub surfaces_by_id: HashMap<String, SurfaceConfig>,
    pub vehicles_by_id: HashMap<String, VehicleConfig>,
}

impl GameConfig {
    pub fn load_from_dir(config_dir: &Path) -> Result<Self, ConfigError> {
        let game: GameFile = read_toml(&config_dir.join("game.toml"))?;
        let surfaces: SurfacesFile = read_toml(&config_dir.join("surfaces.toml"))?;
        let vehicles: VehiclesFile = read_toml(&config_dir.join("vehicles.toml"))?;
        Self::from_files(game, surfaces, vehicles)
    }

    pub fn from_files(
        game: GameFile,
        surfaces: SurfacesFile,
        vehicles: VehiclesFile,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            surfaces_by_id: to_index("surfaces.toml::surfaces", &surfaces.surfaces)?,
            vehicles_by_id: to_index("vehicles.toml::vehicles", &vehicles.vehicles)?,
            game,
            surfaces,
            vehicles,
        };

        config.validate_references()?;
        Ok(config)
    }

    /// Friction curve for `surface_id`, falling back to the default surface.
    pub fn friction_curve(&self, surface_id: Option<&str>) -> FrictionCurve {
        let id = surface_id.unwrap_or(&self.game.app.default_surface);
        match self.surfaces_by_id.get(id) {
            Some(surface) => surface.friction_curve(),
            None => {
                warn!("Unknown surface id `{id}`; using tarmac friction.");
                FrictionCurve::default()
            }
        }
    }

    fn validate_references(&self) -> Result<(), ConfigError> {
        let app = &self.game.app;
        if app.fixed_timestep_hz <= 0.0 {
            return Err(ConfigError::Validation(
                "game.toml::app.fixed_timestep_hz must be > 0".to_string(),
            ));
        }

        if !self.vehicles_by_id.contains_key(&app.default_vehicle) {
            return Err(ConfigError::Validation(format!(
                "game.toml::app.default_vehicle references unknown vehicle id `{}`",
                app.default_vehicle
            )));
        }

        if !self.surfaces_by_id.contains_key(&app.default_surface) {
            return Err(ConfigError::Validation(format!(
                "game.toml::app.default_surface references unknown surface id `{}`",
                app.default_surface
            )));
        }

        let terrain = &self.game.terrain;
        if terrain.length_m <= 0.0 || terrain.sample_spacing_m <= 0.0 {
            return Err(ConfigError::Validation(
                "game.toml::terrain.length_m and sample_spacing_m must be > 0".to_string(),
            ));
        }

        for (index, surface) in self.surfaces.surfaces.iter().enumerate() {
            if surface.b <= 0.0 || surface.c <= 0.0 || surface.d <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "surfaces.toml::surfaces[{index}] b, c and d must be > 0"
                )));
            }
        }

        for (index, vehicle) in self.vehicles.vehicles.iter().enumerate() {
            self.validate_vehicle(index, vehicle)?;
        }

        Ok(())
    }

    fn validate_vehicle(&self, index: usize, vehicle: &VehicleConfig) -> Result<(), ConfigError> {
        let path = format!("vehicles.toml::vehicles[{index}]");
        if vehicle.mass_kg <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "{path}.mass_kg must be > 0"
            )));
        }
        if vehicle.chassis_length_m <= 0.0 || vehicle.chassis_height_m <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "{path}.chassis_length_m and chassis_height_m must be > 0"
            )));
        }
        if vehicle.wheels.is_empty() {
            return Err(ConfigError::Validation(format!(
                "{path}.wheels must contain at least one wheel"
            )));
        }

        let engine = &vehicle.engine;
        if engine.idle_rpm <= 0.0 || engine.rev_limiter_rpm <= engine.idle_rpm {
            return Err(ConfigError::Validation(format!(
                "{path}.engine needs 0 < idle_rpm < rev_limiter_rpm"
            )));
        }
        if engine.max_torque < 0.0 {
            return Err(ConfigError::Validation(format!(
                "{path}.engine.max_torque must be >= 0"
            )));
        }

        if let Some(clutch) = &vehicle.clutch {
            if clutch.slip_torque < 0.0 || clutch.engagement_range <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "{path}.clutch needs slip_torque >= 0 and engagement_range > 0"
                )));
            }
        }

        let transmission = &vehicle.transmission;
        if transmission.final_ratio <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "{path}.transmission.final_ratio must be > 0"
            )));
        }
        if transmission.kind != TransmissionType::Cvt && transmission.forward_ratios.is_empty() {
            return Err(ConfigError::Validation(format!(
                "{path}.transmission.forward_ratios cannot be empty"
            )));
        }
        if transmission
            .forward_ratios
            .iter()
            .chain(transmission.reverse_ratios.iter())
            .any(|ratio| *ratio <= 0.0)
        {
            return Err(ConfigError::Validation(format!(
                "{path}.transmission ratios must be > 0; reverse is implied"
            )));
        }
        if transmission.cvt_min_ratio <= 0.0 || transmission.cvt_max_ratio < transmission.cvt_min_ratio
        {
            return Err(ConfigError::Validation(format!(
                "{path}.transmission needs 0 < cvt_min_ratio <= cvt_max_ratio"
            )));
        }

        for (diff_index, differential) in vehicle.differentials.iter().enumerate() {
            if !(0.0..=1.0).contains(&differential.bias_ab) {
                return Err(ConfigError::Validation(format!(
                    "{path}.differentials[{diff_index}].bias_ab must be within [0, 1]"
                )));
            }
        }

        for (wheel_index, wheel) in vehicle.wheels.iter().enumerate() {
            let wheel_path = format!("{path}.wheels[{wheel_index}]");
            if wheel.radius <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "{wheel_path}.radius must be > 0"
                )));
            }
            if wheel.mass <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "{wheel_path}.mass must be > 0"
                )));
            }
            if wheel.load_rating <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "{wheel_path}.load_rating must be > 0"
                )));
            }
            if wheel.spring_max_length < 0.0 || wheel.spring_max_force < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "{wheel_path} spring values must be >= 0"
                )));
            }
            if let Some(surface) = wheel.surface.as_deref() {
                if !self.surfaces_by_id.contains_key(surface) {
                    return Err(ConfigError::Validation(format!(
                        "{wheel_path}.surface references unknown surface id `{surface}`"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: Box<toml::de::Error>,
    },
    Validation(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse `{}`: {source}", path.display())
            }
            Self::Validation(message) => write!(f, "{message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source: Box::new(source),
    })
}

fn to_index<T>(label: &str, rows: &[T]) -> Result<HashMap<String, T>, ConfigError>
where
    T: HasId + Clone,
{
    let mut map = HashMap::new();

    for row in rows {
        let id = row.id();
        if id.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{label} contains an empty id"
            )));
        }

        if map.insert(id.to_string(), row.clone()).is_some() {
            return Err(ConfigError::Validation(format!(
                "{label} contains duplicate id `{id}`"
            )));
        }
    }

    Ok(map)
}

trait HasId {
    fn id(&self) -> &str;
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameFile {
    pub app: AppConfig,
    pub terrain: TerrainConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub fixed_timestep_hz: f32,
    pub default_vehicle: String,
    pub default_surface: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerrainConfig {
    pub base_height: f32,
    pub ramp_slope: f32,
    pub wave_a_amplitude: f32,
    pub wave_a_frequency: f32,
    pub wave_b_amplitude: f32,
    pub wave_b_frequency: f32,
    #[serde(default = "default_terrain_length_m")]
    pub length_m: f32,
    #[serde(default = "default_terrain_sample_spacing_m")]
    pub sample_spacing_m: f32,
}

fn default_terrain_length_m() -> f32 {
    2_000.0
}

fn default_terrain_sample_spacing_m() -> f32 {
    2.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct SurfacesFile {
    pub surfaces: Vec<SurfaceConfig>,
}

/// Pacejka coefficients for one ground material.
#[derive(Debug, Clone, Deserialize)]
pub struct SurfaceConfig {
    pub id: String,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
}

impl SurfaceConfig {
    pub fn friction_curve(&self) -> FrictionCurve {
        FrictionCurve::new(PacejkaParams {
            b: self.b,
            c: self.c,
            d: self.d,
            e: self.e,
        })
    }
}

impl HasId for SurfaceConfig {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VehiclesFile {
    pub vehicles: Vec<VehicleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VehicleConfig {
    pub id: String,
    pub mass_kg: f32,
    pub chassis_length_m: f32,
    pub chassis_height_m: f32,
    #[serde(default = "default_center_of_mass_height_m")]
    pub center_of_mass_height_m: f32,
    pub max_brake_torque: f32,
    #[serde(default = "default_max_handbrake_torque")]
    pub max_handbrake_torque: f32,
    #[serde(default = "default_max_steer_angle_degrees")]
    pub max_steer_angle_degrees: f32,
    #[serde(default = "default_true")]
    pub swap_reverse_inputs: bool,
    pub engine: EngineConfig,
    #[serde(default)]
    pub clutch: Option<ClutchConfig>,
    pub transmission: TransmissionConfig,
    #[serde(default)]
    pub differentials: Vec<DifferentialConfig>,
    pub wheels: Vec<WheelConfig>,
}

fn default_center_of_mass_height_m() -> f32 {
    -0.2
}

fn default_max_handbrake_torque() -> f32 {
    3_000.0
}

fn default_max_steer_angle_degrees() -> f32 {
    32.0
}

fn default_true() -> bool {
    true
}

impl HasId for VehicleConfig {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_name")]
    pub name: String,
    pub output: String,
    #[serde(default = "default_engine_inertia")]
    pub inertia: f32,
    pub idle_rpm: f32,
    pub rev_limiter_rpm: f32,
    #[serde(default = "default_stall_rpm")]
    pub stall_rpm: f32,
    pub max_torque: f32,
    /// `[rpm / rev_limiter_rpm, torque fraction]` pairs.
    #[serde(default)]
    pub torque_curve: Vec<[f32; 2]>,
    #[serde(default = "default_engine_friction_torque")]
    pub friction_torque: f32,
    #[serde(default = "default_rev_limiter_cutoff")]
    pub rev_limiter_cutoff: f32,
    #[serde(default = "default_starter_torque")]
    pub starter_torque: f32,
    #[serde(default = "default_start_duration")]
    pub start_duration: f32,
    #[serde(default = "default_true")]
    pub can_stall: bool,
    #[serde(default = "default_true")]
    pub start_running: bool,
    #[serde(default)]
    pub forced_induction: Option<ForcedInductionConfig>,
}

fn default_engine_name() -> String {
    "engine".to_string()
}

fn default_engine_inertia() -> f32 {
    0.2
}

fn default_stall_rpm() -> f32 {
    400.0
}

fn default_engine_friction_torque() -> f32 {
    40.0
}

fn default_rev_limiter_cutoff() -> f32 {
    0.1
}

fn default_starter_torque() -> f32 {
    60.0
}

fn default_start_duration() -> f32 {
    1.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForcedInductionConfig {
    pub boost_gain: f32,
    pub spool_up_rate: f32,
    pub spool_down_rate: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClutchConfig {
    #[serde(default = "default_clutch_name")]
    pub name: String,
    pub output: String,
    #[serde(default = "default_clutch_inertia")]
    pub inertia: f32,
    #[serde(default = "default_true")]
    pub automatic: bool,
    #[serde(default = "default_engagement_rpm")]
    pub engagement_rpm: f32,
    #[serde(default = "default_engagement_range")]
    pub engagement_range: f32,
    #[serde(default = "default_clutch_slip_torque")]
    pub slip_torque: f32,
    #[serde(default)]
    pub creep_torque: f32,
}

fn default_clutch_name() -> String {
    "clutch".to_string()
}

fn default_clutch_inertia() -> f32 {
    0.05
}

fn default_engagement_rpm() -> f32 {
    1_200.0
}

fn default_engagement_range() -> f32 {
    400.0
}

fn default_clutch_slip_torque() -> f32 {
    500.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransmissionConfig {
    #[serde(default = "default_transmission_name")]
    pub name: String,
    pub output: String,
    #[serde(default = "default_transmission_inertia")]
    pub inertia: f32,
    #[serde(default)]
    pub kind: TransmissionType,
    #[serde(default)]
    pub reverse_engagement: ReverseEngagement,
    #[serde(default)]
    pub forward_ratios: Vec<f32>,
    #[serde(default)]
    pub reverse_ratios: Vec<f32>,
    pub final_ratio: f32,
    #[serde(default = "default_shift_duration")]
    pub shift_duration: f32,
    #[serde(default = "default_post_shift_ban")]
    pub post_shift_ban: f32,
    #[serde(default = "default_upshift_rpm")]
    pub upshift_rpm: f32,
    #[serde(default = "default_downshift_rpm")]
    pub downshift_rpm: f32,
    #[serde(default = "default_variable_shift_intensity")]
    pub variable_shift_intensity: f32,
    #[serde(default = "default_incline_effect")]
    pub incline_effect: f32,
    #[serde(default = "default_input_deadzone")]
    pub input_deadzone: f32,
    #[serde(default = "default_shift_check_cooldown")]
    pub shift_check_cooldown: f32,
    #[serde(default = "default_cvt_min_ratio")]
    pub cvt_min_ratio: f32,
    #[serde(default = "default_cvt_max_ratio")]
    pub cvt_max_ratio: f32,
    #[serde(default = "default_cvt_smoothing")]
    pub cvt_smoothing: f32,
    #[serde(default = "default_cvt_max_input_torque")]
    pub cvt_max_input_torque: f32,
}

fn default_transmission_name() -> String {
    "transmission".to_string()
}

fn default_transmission_inertia() -> f32 {
    0.1
}

fn default_shift_duration() -> f32 {
    0.25
}

fn default_post_shift_ban() -> f32 {
    0.5
}

fn default_upshift_rpm() -> f32 {
    5_200.0
}

fn default_downshift_rpm() -> f32 {
    2_400.0
}

fn default_variable_shift_intensity() -> f32 {
    0.35
}

fn default_incline_effect() -> f32 {
    1.5
}

fn default_input_deadzone() -> f32 {
    0.04
}

fn default_shift_check_cooldown() -> f32 {
    0.2
}

fn default_cvt_min_ratio() -> f32 {
    0.45
}

fn default_cvt_max_ratio() -> f32 {
    2.6
}

fn default_cvt_smoothing() -> f32 {
    3.0
}

fn default_cvt_max_input_torque() -> f32 {
    220.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct DifferentialConfig {
    pub name: String,
    /// Branch A then branch B.
    pub outputs: [String; 2],
    #[serde(default = "default_differential_inertia")]
    pub inertia: f32,
    #[serde(default)]
    pub kind: DifferentialType,
    #[serde(default = "default_bias_ab")]
    pub bias_ab: f32,
    #[serde(default = "default_differential_stiffness")]
    pub stiffness: f32,
    #[serde(default = "default_differential_slip_torque")]
    pub slip_torque: f32,
    #[serde(default = "default_power_ramp")]
    pub power_ramp: f32,
    #[serde(default = "default_coast_ramp")]
    pub coast_ramp: f32,
}

fn default_differential_inertia() -> f32 {
    0.05
}

fn default_bias_ab() -> f32 {
    0.5
}

fn default_differential_stiffness() -> f32 {
    0.5
}

fn default_differential_slip_torque() -> f32 {
    400.0
}

fn default_power_ramp() -> f32 {
    1.0
}

fn default_coast_ramp() -> f32 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct WheelConfig {
    pub name: String,
    /// Suspension top mount in chassis space `[x, y]` (m).
    pub hardpoint: [f32; 2],
    pub radius: f32,
    #[serde(default = "default_wheel_width")]
    pub width: f32,
    #[serde(default = "default_wheel_mass")]
    pub mass: f32,
    #[serde(default = "default_load_rating")]
    pub load_rating: f32,
    #[serde(default = "default_rolling_resistance")]
    pub rolling_resistance: f32,
    #[serde(default = "default_friction_circle_strength")]
    pub friction_circle_strength: f32,
    #[serde(default = "default_spring_max_length")]
    pub spring_max_length: f32,
    #[serde(default = "default_spring_max_force")]
    pub spring_max_force: f32,
    #[serde(default)]
    pub spring_curve: Vec<[f32; 2]>,
    #[serde(default = "default_extension_speed")]
    pub extension_speed: f32,
    #[serde(default = "default_damper_bump_force")]
    pub damper_bump_force: f32,
    #[serde(default = "default_damper_rebound_force")]
    pub damper_rebound_force: f32,
    #[serde(default = "default_grip")]
    pub longitudinal_grip: f32,
    #[serde(default = "default_grip")]
    pub lateral_grip: f32,
    #[serde(default = "default_lateral_stiffness")]
    pub lateral_stiffness: f32,
    /// Share of the steering input applied to this wheel.
    #[serde(default)]
    pub steer: f32,
    /// Share of the brake pedal torque applied to this wheel.
    #[serde(default = "default_brake_share")]
    pub brake: f32,
    #[serde(default)]
    pub handbrake: f32,
    /// Tire curve used until the host reports the surface underneath.
    #[serde(default)]
    pub surface: Option<String>,
}

fn default_wheel_width() -> f32 {
    0.25
}

fn default_wheel_mass() -> f32 {
    20.0
}

fn default_load_rating() -> f32 {
    5_000.0
}

fn default_rolling_resistance() -> f32 {
    0.015
}

fn default_friction_circle_strength() -> f32 {
    1.0
}

fn default_spring_max_length() -> f32 {
    0.3
}

fn default_spring_max_force() -> f32 {
    24_000.0
}

fn default_extension_speed() -> f32 {
    4.0
}

fn default_damper_bump_force() -> f32 {
    2_800.0
}

fn default_damper_rebound_force() -> f32 {
    3_400.0
}

fn default_grip() -> f32 {
    1.0
}

fn default_lateral_stiffness() -> f32 {
    1.0
}

fn default_brake_share() -> f32 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAME: &str = r#"
        [app]
        fixed_timestep_hz = 50.0
        default_vehicle = "kart"
        default_surface = "tarmac"

        [terrain]
        base_height = -2.0
        ramp_slope = 0.0
        wave_a_amplitude = 0.5
        wave_a_frequency = 0.05
        wave_b_amplitude = 0.2
        wave_b_frequency = 0.3
    "#;

    const SURFACES: &str = r#"
        [[surfaces]]
        id = "tarmac"
        b = 10.0
        c = 1.9
        d = 1.0
        e = 0.97
    "#;

    fn kart(wheel_surface: &str) -> String {
        format!(
            r#"
            [[vehicles]]
            id = "kart"
            mass_kg = 180.0
            chassis_length_m = 1.6
            chassis_height_m = 0.3
            max_brake_torque = 400.0

            [vehicles.engine]
            output = "transmission"
            idle_rpm = 1500.0
            rev_limiter_rpm = 9000.0
            max_torque = 20.0

            [vehicles.transmission]
            output = "rear_wheel"
            forward_ratios = [1.0]
            final_ratio = 5.0

            [[vehicles.wheels]]
            name = "rear_wheel"
            hardpoint = [-0.6, -0.1]
            radius = 0.14
            surface = "{wheel_surface}"
            "#
        )
    }

    fn parse(vehicles: &str) -> Result<GameConfig, ConfigError> {
        let game: GameFile = toml::from_str(GAME).expect("game.toml fixture parses");
        let surfaces: SurfacesFile = toml::from_str(SURFACES).expect("surfaces fixture parses");
        let vehicles: VehiclesFile = toml::from_str(vehicles).expect("vehicles fixture parses");
        GameConfig::from_files(game, surfaces, vehicles)
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let config = parse(&kart("tarmac")).expect("fixture is valid");
        let kart = &config.vehicles_by_id["kart"];

        assert_eq!(kart.engine.name, "engine");
        assert_eq!(kart.transmission.kind, TransmissionType::Automatic);
        assert_eq!(kart.transmission.reverse_engagement, ReverseEngagement::Auto);
        assert!(kart.clutch.is_none());
        assert!(kart.swap_reverse_inputs);
        let wheel = &kart.wheels[0];
        assert_eq!(wheel.load_rating, 5_000.0);
        assert_eq!(wheel.lateral_stiffness, 1.0);
        assert_eq!(wheel.brake, 1.0);
        assert_eq!(wheel.steer, 0.0);
        assert_eq!(wheel.handbrake, 0.0);
        assert_eq!(config.game.terrain.sample_spacing_m, 2.0);
    }

    #[test]
    fn validation_fails_for_unknown_wheel_surface() {
        let error = parse(&kart("mud")).expect_err("validation should fail");
        let message = error.to_string();

        assert!(message.contains("vehicles[0].wheels[0].surface"));
        assert!(message.contains("mud"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let twice = format!("{}\n{}", kart("tarmac"), kart("tarmac"));
        let error = parse(&twice).expect_err("duplicate vehicle id");
        assert!(error.to_string().contains("duplicate id `kart`"));
    }

    #[test]
    fn unknown_surface_falls_back_to_tarmac() {
        let config = parse(&kart("tarmac")).expect("fixture is valid");
        let tarmac = config.friction_curve(None);
        let fallback = config.friction_curve(Some("lava"));
        assert_eq!(tarmac.params(), fallback.params());
        assert_eq!(fallback.params(), PacejkaParams::TARMAC);
    }

    #[test]
    fn bundled_config_loads() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join(CONFIG_DIR);
        let config = GameConfig::load_from_dir(&dir).expect("bundled config is valid");

        assert!(config.vehicles_by_id.contains_key(&config.game.app.default_vehicle));
        for id in ["tarmac", "gravel", "grass", "snow", "ice"] {
            assert!(config.surfaces_by_id.contains_key(id), "missing surface {id}");
        }
    }
}
