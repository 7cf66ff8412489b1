use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// Set when the binary runs without a window.
#[derive(Resource, Clone, Copy, Default)]
pub struct HeadlessMode(pub bool);

/// Stable id of a scripted entity inside one simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// Tuning constants shared by the level builder, the physics step and the script bridge.
#[derive(Resource, Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub pixels_per_meter: f32,
    pub pixels_per_tile: f32,
    pub pixels_per_physics_tile: f32,
    /// Meters per second squared, positive y points down.
    pub gravity: f32,
    pub fixed_hz: f64,
    /// Name of the tile layer that produces static level collision.
    pub collision_layer: String,
    pub player_health: i32,
    pub player_width_px: f32,
    pub player_height_px: f32,
    /// Impulses below this are contact noise.
    pub impulse_noise_threshold: f32,
    /// Impulses above this hurt the player.
    pub impulse_damage_threshold: f32,
    pub impulse_damage_factor: f32,
    pub sticky_inactive_impulse: f32,
    pub sticky_removal_delay_ms: u64,
    pub bouncer_speed: f32,
    /// Radius of projectiles from weapons without their own shape.
    pub projectile_radius: f32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            pixels_per_meter: 48.0,
            pixels_per_tile: 24.0,
            pixels_per_physics_tile: 8.0,
            gravity: 9.81,
            fixed_hz: 60.0,
            collision_layer: "level".to_string(),
            player_health: 100,
            player_width_px: 14.0,
            player_height_px: 32.0,
            impulse_noise_threshold: 0.03,
            impulse_damage_threshold: 1.5,
            impulse_damage_factor: 20.0,
            sticky_inactive_impulse: 0.0003,
            sticky_removal_delay_ms: 1000,
            bouncer_speed: 9.0,
            projectile_radius: 0.05,
        }
    }
}

impl GameConfig {
    pub fn meters_per_pixel(&self) -> f32 {
        1.0 / self.pixels_per_meter.max(0.0001)
    }

    /// Physics cells covered by one tile along each axis.
    pub fn physics_tiles_per_tile(&self) -> usize {
        (self.pixels_per_tile / self.pixels_per_physics_tile.max(1.0))
            .round()
            .max(1.0) as usize
    }

    /// Tile coordinates from level descriptions address tile centers.
    pub fn tile_to_pixel(&self, tile: f32) -> f32 {
        tile * self.pixels_per_tile + self.pixels_per_tile / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: GameConfig =
            serde_json::from_str(r#"{ "pixels_per_tile": 16.0 }"#).expect("config parses");
        assert_eq!(cfg.pixels_per_tile, 16.0);
        assert_eq!(cfg.pixels_per_physics_tile, 8.0);
        assert_eq!(cfg.physics_tiles_per_tile(), 2);
        assert_eq!(cfg.collision_layer, "level");
    }

    #[test]
    fn tile_positions_map_to_tile_centers() {
        let cfg = GameConfig::default();
        assert_eq!(cfg.tile_to_pixel(0.0), 12.0);
        assert_eq!(cfg.tile_to_pixel(3.0), 84.0);
        assert_eq!(cfg.physics_tiles_per_tile(), 3);
    }
}
