//! Level descriptions, static collision and the physics-tile grid used for path checks.

use std::path::{Path, PathBuf};

use bevy::prelude::{IVec2, Vec2};
use serde::Deserialize;
use thiserror::Error;

use crate::components::GameConfig;
use crate::contact::{FixtureNode, ObjectType};
use crate::mechanisms::MechanismDescription;
use crate::physics_world::{BodyDef, BodyHandle, FixtureDef, PhysicsWorld, Shape};
use crate::property::Properties;
use crate::tmx::{TmxError, TmxLayer, TmxMap};

#[derive(Debug, Error)]
pub enum LevelError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in '{path}': {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("tile map error: {0}")]
    Tmx(#[from] TmxError),
    #[error("tile map has no layer named '{0}'")]
    MissingLayer(String),
    #[error("level index {index} out of range, {count} levels listed")]
    LevelIndex { index: usize, count: usize },
    #[error("level loader for '{0}' stopped without a result")]
    LoaderStopped(String),
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, LevelError> {
    let text = std::fs::read_to_string(path).map_err(|source| LevelError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| LevelError::Json {
        path: path.display().to_string(),
        source,
    })
}

#[derive(Clone, Debug, Deserialize)]
pub struct LevelItem {
    pub levelname: String,
}

/// Ordered list of level description files.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct LevelList(pub Vec<LevelItem>);

impl LevelList {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LevelError> {
        read_json(path.as_ref())
    }

    pub fn get(&self, index: usize) -> Result<&LevelItem, LevelError> {
        self.0.get(index).ok_or(LevelError::LevelIndex {
            index,
            count: self.0.len(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ScriptProperty {
    pub name: String,
    pub value: String,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct EnemyDescription {
    pub script: String,
    #[serde(default)]
    pub startposition: Vec<f32>,
    /// Flat x/y pairs.
    #[serde(default)]
    pub path: Vec<f32>,
    #[serde(default)]
    pub properties: Vec<ScriptProperty>,
    #[serde(default = "default_true")]
    pub position_in_tiles: bool,
}

impl EnemyDescription {
    fn to_pixels(&self, x: f32, y: f32, config: &GameConfig) -> Vec2 {
        if self.position_in_tiles {
            Vec2::new(config.tile_to_pixel(x), config.tile_to_pixel(y))
        } else {
            Vec2::new(x, y)
        }
    }

    pub fn start_position_px(&self, config: &GameConfig) -> Option<Vec2> {
        match self.startposition.as_slice() {
            [x, y, ..] => Some(self.to_pixels(*x, *y, config)),
            _ => None,
        }
    }

    pub fn patrol_path_px(&self, config: &GameConfig) -> Vec<Vec2> {
        self.path
            .chunks_exact(2)
            .map(|p| self.to_pixels(p[0], p[1], config))
            .collect()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LevelDescription {
    /// Tile map path, relative to the description file.
    pub filename: String,
    /// Player start in tiles.
    #[serde(default)]
    pub startposition: Option<[f32; 2]>,
    #[serde(default)]
    pub enemies: Vec<EnemyDescription>,
    #[serde(default)]
    pub mechanisms: Vec<MechanismDescription>,
}

/// Axis aligned block of solid physics cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Solid cells of the collision layer at physics-tile resolution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PhysicsGrid {
    pub offset: IVec2,
    pub width: i32,
    pub height: i32,
    cells: Vec<bool>,
}

impl PhysicsGrid {
    pub fn from_layer(layer: &TmxLayer, cells_per_tile: usize) -> Self {
        let n = cells_per_tile.max(1) as i32;
        let width = layer.width as i32 * n;
        let height = layer.height as i32 * n;
        let mut cells = vec![false; (width * height) as usize];
        for ty in 0..layer.height as i32 {
            for tx in 0..layer.width as i32 {
                if layer.tile_at(layer.offset_x + tx, layer.offset_y + ty) == 0 {
                    continue;
                }
                for cy in ty * n..(ty + 1) * n {
                    let row = (cy * width) as usize;
                    cells[row + (tx * n) as usize..row + ((tx + 1) * n) as usize].fill(true);
                }
            }
        }
        Self {
            offset: IVec2::new(layer.offset_x * n, layer.offset_y * n),
            width,
            height,
            cells,
        }
    }

    /// Solid state of a cell in world cell coordinates, cells outside the grid are open.
    pub fn is_solid(&self, cell: IVec2) -> bool {
        let local = cell - self.offset;
        if local.x < 0 || local.y < 0 || local.x >= self.width || local.y >= self.height {
            return false;
        }
        self.cells[(local.y * self.width + local.x) as usize]
    }

    /// Walks the Bresenham line between two cells, true when any cell on it is solid.
    pub fn line_collides(&self, from: IVec2, to: IVec2) -> bool {
        let dx = (to.x - from.x).abs();
        let dy = -(to.y - from.y).abs();
        let sx = if from.x < to.x { 1 } else { -1 };
        let sy = if from.y < to.y { 1 } else { -1 };
        let mut err = dx + dy;
        let mut cell = from;
        loop {
            if self.is_solid(cell) {
                return true;
            }
            if cell == to {
                return false;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                cell.x += sx;
            }
            if e2 <= dx {
                err += dx;
                cell.y += sy;
            }
        }
    }

    /// Solid cells merged into rectangles: runs per row first, then identical runs of adjacent
    /// rows are stacked.
    pub fn merged_rects(&self) -> Vec<CellRect> {
        let mut open: Vec<CellRect> = Vec::new();
        let mut done = Vec::new();
        for y in 0..self.height {
            let mut runs = Vec::new();
            let mut x = 0;
            while x < self.width {
                if !self.cells[(y * self.width + x) as usize] {
                    x += 1;
                    continue;
                }
                let start = x;
                while x < self.width && self.cells[(y * self.width + x) as usize] {
                    x += 1;
                }
                runs.push((start, x - start));
            }

            let mut next_open = Vec::with_capacity(runs.len());
            for (start, len) in runs {
                match open.iter().position(|r| r.x == start && r.width == len) {
                    Some(i) => {
                        let mut rect = open.swap_remove(i);
                        rect.height += 1;
                        next_open.push(rect);
                    }
                    None => next_open.push(CellRect {
                        x: start,
                        y,
                        width: len,
                        height: 1,
                    }),
                }
            }
            done.append(&mut open);
            open = next_open;
        }
        done.append(&mut open);
        for rect in &mut done {
            rect.x += self.offset.x;
            rect.y += self.offset.y;
        }
        done.sort_by_key(|r| (r.y, r.x));
        done
    }
}

pub struct Level {
    pub description: LevelDescription,
    pub map: TmxMap,
    pub grid: PhysicsGrid,
    base_dir: PathBuf,
}

impl Level {
    pub fn load(description_path: impl AsRef<Path>, config: &GameConfig) -> Result<Self, LevelError> {
        let description_path = description_path.as_ref();
        let description: LevelDescription = read_json(description_path)?;
        let base_dir = description_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let map = TmxMap::load(base_dir.join(&description.filename))?;
        Self::from_parts(description, map, base_dir, config)
    }

    pub fn from_parts(
        description: LevelDescription,
        map: TmxMap,
        base_dir: PathBuf,
        config: &GameConfig,
    ) -> Result<Self, LevelError> {
        let layer = map
            .layer(&config.collision_layer)
            .ok_or_else(|| LevelError::MissingLayer(config.collision_layer.clone()))?;
        let grid = PhysicsGrid::from_layer(layer, config.physics_tiles_per_tile());
        Ok(Self {
            description,
            map,
            grid,
            base_dir,
        })
    }

    pub fn script_path(&self, script: &str) -> PathBuf {
        self.base_dir.join(script)
    }

    pub fn properties(&self) -> &Properties {
        &self.map.properties
    }

    /// Player start in pixels, the first tile center when the description has none.
    pub fn player_start_px(&self, config: &GameConfig) -> Vec2 {
        let [x, y] = self.description.startposition.unwrap_or([0.0, 0.0]);
        Vec2::new(config.tile_to_pixel(x), config.tile_to_pixel(y))
    }

    /// True when the straight line between two physics cells crosses no solid cell.
    pub fn is_physics_path_clear(&self, from: IVec2, to: IVec2) -> bool {
        !self.grid.line_collides(from, to)
    }

    /// Adds the collision layer to the world as closed chains tagged solid.
    pub fn spawn_static_geometry(&self, world: &mut PhysicsWorld, config: &GameConfig) -> Vec<BodyHandle> {
        let cell_m = config.pixels_per_physics_tile * config.meters_per_pixel();
        let rects = self.grid.merged_rects();
        let mut bodies = Vec::with_capacity(rects.len());
        for rect in rects {
            let lower = Vec2::new(rect.x as f32, rect.y as f32) * cell_m;
            let upper = Vec2::new((rect.x + rect.width) as f32, (rect.y + rect.height) as f32) * cell_m;
            let body = world.create_body(&BodyDef::default());
            let chain = Shape::Chain {
                vertices: vec![
                    lower,
                    Vec2::new(upper.x, lower.y),
                    upper,
                    Vec2::new(lower.x, upper.y),
                ],
                closed: true,
            };
            world.create_fixture(
                body,
                FixtureDef::new(chain).with_node(FixtureNode::new(ObjectType::Solid)),
            );
            bodies.push(body);
        }
        bodies
    }
}
