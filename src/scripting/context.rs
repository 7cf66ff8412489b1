use std::cell::RefCell;
use std::rc::Rc;

use bevy::prelude::Vec2;
use serde::Serialize;

use crate::components::{EntityId, GameConfig};
use crate::level::PhysicsGrid;
use crate::physics_world::PhysicsWorld;
use crate::player::PlayerState;
use crate::timer::TimerQueue;
use crate::weapons::ProjectileRegistry;

/// Requests from scripts for the audio and effects layers, published as game events.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum ScriptEffect {
    SampleAdded { sample: String },
    SamplePlayed { sample: String, volume: f32 },
    Boom { x: f32, y: f32, intensity: f32 },
    DetonationAnimation { x: f32, y: f32 },
}

impl ScriptEffect {
    pub fn event_name(&self) -> &'static str {
        match self {
            ScriptEffect::SampleAdded { .. } => "sample_added",
            ScriptEffect::SamplePlayed { .. } => "sample_played",
            ScriptEffect::Boom { .. } => "boom",
            ScriptEffect::DetonationAnimation { .. } => "detonation_animation",
        }
    }
}

/// World state shared by the step loop and every script node of a level.
pub struct SimulationContext {
    pub config: GameConfig,
    pub world: PhysicsWorld,
    pub player: PlayerState,
    pub projectiles: ProjectileRegistry,
    pub timers: TimerQueue,
    pub grid: PhysicsGrid,
    pub effects: Vec<(EntityId, ScriptEffect)>,
}

pub type SharedContext = Rc<RefCell<SimulationContext>>;

impl SimulationContext {
    pub fn new(config: GameConfig) -> Self {
        Self {
            world: PhysicsWorld::new(Vec2::new(0.0, config.gravity)),
            player: PlayerState::new(&config),
            projectiles: ProjectileRegistry::default(),
            timers: TimerQueue::default(),
            grid: PhysicsGrid::default(),
            effects: Vec::new(),
            config,
        }
    }

    pub fn shared(config: GameConfig) -> SharedContext {
        Rc::new(RefCell::new(Self::new(config)))
    }

    /// Drops everything that belongs to a level, the config stays.
    pub fn clear_level(&mut self) {
        self.world = PhysicsWorld::new(Vec2::new(0.0, self.config.gravity));
        self.player = PlayerState::new(&self.config);
        self.projectiles = ProjectileRegistry::default();
        self.timers.clear();
        self.grid = PhysicsGrid::default();
        self.effects.clear();
    }
}
