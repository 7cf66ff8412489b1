//! Script-driven entities: one isolated Lua state per entity plus the native state scripts
//! manipulate through the bridge.

use std::cell::{Ref, RefCell};
use std::path::Path;
use std::rc::Rc;

use bevy::prelude::*;
use mlua::{IntoLuaMulti, Lua, Value};

use super::context::{SharedContext, SimulationContext};
use super::{bridge, ScriptError};
use super::{
    FUNCTION_COLLISION_WITH_PLAYER, FUNCTION_HIT, FUNCTION_INITIALIZE, FUNCTION_MOVED_TO,
    FUNCTION_PLAYER_MOVED_TO, FUNCTION_RETRIEVE_PROPERTIES, FUNCTION_SET_PATH,
    FUNCTION_SET_START_POSITION, FUNCTION_TIMEOUT, FUNCTION_UPDATE, FUNCTION_WRITE_PROPERTY,
};
use crate::components::{EntityId, GameConfig};
use crate::contact::{category, FixtureNode, NodeOwner, ObjectType};
use crate::level::EnemyDescription;
use crate::physics_world::{BodyDef, BodyHandle, BodyType, Filter, FixtureDef, PhysicsWorld, Shape};
use crate::property::{Properties, PropertyValue};
use crate::weapons::{TextureRect, Weapon};

/// Bits of the mask passed to `updateKeysPressed`. Up (4) and down (8) are accepted but do not
/// move walkers.
pub mod keys {
    pub const LEFT: u32 = 1;
    pub const RIGHT: u32 = 2;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpriteSlot {
    pub rect: Option<TextureRect>,
    pub origin: Vec2,
    pub offset: Vec2,
}

/// Native side of a scripted entity.
pub struct EntityState {
    pub id: EntityId,
    pub script_name: String,
    /// `None` once the script called `die`.
    pub body: Option<BodyHandle>,
    /// Pixels.
    pub position: Vec2,
    pub start_position: Vec2,
    pub properties: Properties,
    /// Fixtures created when the body is set up.
    pub shapes: Vec<Shape>,
    pub sprites: Vec<SpriteSlot>,
    pub texture: Option<String>,
    pub z: i32,
    pub weapons: Vec<Weapon>,
    pub keys_pressed: u32,
    pub samples: Vec<String>,
    /// Shared by the entity's fixtures and its projectiles so they never collide.
    pub group_index: i16,
}

impl EntityState {
    pub fn new(id: EntityId, script_name: impl Into<String>, start_position: Vec2) -> Self {
        Self {
            id,
            script_name: script_name.into(),
            body: None,
            position: start_position,
            start_position,
            properties: Properties::new(),
            shapes: Vec::new(),
            sprites: vec![SpriteSlot::default()],
            texture: None,
            z: 0,
            weapons: Vec::new(),
            keys_pressed: 0,
            samples: Vec::new(),
            group_index: -1 - (id.0 % i16::MAX as u64) as i16,
        }
    }

    /// Applies properties that have a native counterpart.
    pub fn synchronize_properties(&mut self) {
        if let Some(sprite) = self.properties.str("sprite") {
            self.texture = Some(sprite.to_string());
        }
    }

    fn property_number(&self, key: &str) -> f64 {
        self.properties.double_or(key, 0.0)
    }

    /// Moves the body to the start position and creates the enemy fixtures from the queued
    /// shapes, honoring the `staticBody`, `sensor` and `damage` properties.
    pub fn setup_body(&mut self, world: &mut PhysicsWorld, config: &GameConfig) {
        let Some(body) = self.body else {
            return;
        };
        let static_body = self.properties.bool_or("staticBody", false);
        let sensor = self.properties.bool_or("sensor", false);
        let damage = match self.properties.get("damage") {
            Some(PropertyValue::Double(d)) => *d as i64,
            Some(value) => value.as_i64().unwrap_or(0),
            None => 0,
        };

        world.set_transform(body, self.start_position * config.meters_per_pixel(), 0.0);
        if let Some(b) = world.body_mut(body) {
            b.fixed_rotation = true;
        }
        world.set_body_type(
            body,
            if static_body {
                BodyType::Static
            } else {
                BodyType::Dynamic
            },
        );

        let filter = Filter {
            category_bits: category::ENEMY_WALK_THROUGH,
            mask_bits: category::BOUNDARY | category::FRIENDLY,
            group_index: self.group_index,
        };
        for shape in &self.shapes {
            let node = FixtureNode::new(ObjectType::Enemy)
                .with_owner(NodeOwner::Entity(self.id))
                .with_property("damage", damage);
            let mut fixture = FixtureDef::new(shape.clone())
                .with_filter(filter)
                .with_node(node);
            if sensor {
                fixture = fixture.sensor();
            }
            world.create_fixture(body, fixture);
        }
    }

    pub fn die(&mut self, world: &mut PhysicsWorld) {
        if let Some(body) = self.body.take() {
            world.destroy_body(body);
        }
    }

    /// Walks along x from the pressed keys, braking to a stop when none is held.
    pub fn update_velocity(&self, world: &mut PhysicsWorld) {
        let Some(body) = self.body.and_then(|b| world.body_mut(b)) else {
            return;
        };
        let velocity_max = self.property_number("velocity_walk_max") as f32;
        let acceleration = self.property_number("acceleration_ground") as f32;
        let vx = body.linear_velocity.x;

        let mut desired = 0.0;
        if self.keys_pressed & keys::LEFT != 0 {
            desired = (vx - acceleration).max(-velocity_max);
        }
        if self.keys_pressed & keys::RIGHT != 0 {
            desired = (vx + acceleration).min(velocity_max);
        }
        let impulse = body.mass() * (desired - vx);
        body.apply_linear_impulse(Vec2::new(impulse, 0.0));
    }

    pub fn update_weapons(&mut self, ctx: &mut SimulationContext, dt: f32) {
        let dt_ms = (dt.max(0.0) * 1000.0).round() as u64;
        for weapon in &mut self.weapons {
            if let Some(request) = weapon.update(dt_ms) {
                ctx.projectiles
                    .spawn(&mut ctx.world, self.id, weapon, request, self.group_index);
            }
        }
    }

    pub fn update_position(&mut self, world: &PhysicsWorld, config: &GameConfig) {
        if let Some(body) = self.body.and_then(|b| world.body(b)) {
            self.position = body.position * config.pixels_per_meter;
        }
    }
}

pub struct ScriptNode {
    name: String,
    lua: Lua,
    state: Rc<RefCell<EntityState>>,
    context: SharedContext,
}

impl ScriptNode {
    pub fn load(
        id: EntityId,
        path: &Path,
        description: &EnemyDescription,
        context: &SharedContext,
    ) -> Result<Self, ScriptError> {
        let source = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_source(id, &path.display().to_string(), &source, description, context)
    }

    /// Runs the script once, then `setStartPosition`, `movedTo`, `initialize`,
    /// `retrieveProperties`, `setPath` for a patrol path and `writeProperty` for each
    /// description property, and finally builds the body.
    pub fn from_source(
        id: EntityId,
        name: &str,
        source: &str,
        description: &EnemyDescription,
        context: &SharedContext,
    ) -> Result<Self, ScriptError> {
        let (start, patrol_path, body) = {
            let mut ctx = context.borrow_mut();
            let start = description
                .start_position_px(&ctx.config)
                .unwrap_or(Vec2::ZERO);
            let patrol_path = description.patrol_path_px(&ctx.config);
            let position = start * ctx.config.meters_per_pixel();
            let body = ctx.world.create_body(&BodyDef {
                position,
                fixed_rotation: true,
                ..Default::default()
            });
            (start, patrol_path, body)
        };

        let mut state = EntityState::new(id, name, start);
        state.body = Some(body);
        let state = Rc::new(RefCell::new(state));

        let lua = Lua::new();
        let load_error = |err: mlua::Error| ScriptError::Load {
            script: name.to_string(),
            message: err.to_string(),
        };
        bridge::register(&lua, context, &state).map_err(load_error)?;
        lua.load(source).set_name(name).exec().map_err(load_error)?;

        let node = Self {
            name: name.to_string(),
            lua,
            state,
            context: Rc::clone(context),
        };
        node.call(FUNCTION_SET_START_POSITION, (start.x, start.y), false)?;
        node.call(FUNCTION_MOVED_TO, (start.x, start.y), false)?;
        node.call(FUNCTION_INITIALIZE, (), true)?;
        node.call(FUNCTION_RETRIEVE_PROPERTIES, (), true)?;
        if !patrol_path.is_empty() {
            let flat = patrol_path
                .iter()
                .flat_map(|p| [f64::from(p.x), f64::from(p.y)]);
            let table = node.lua.create_sequence_from(flat).map_err(load_error)?;
            node.call(FUNCTION_SET_PATH, ("patrol_path", table), true)?;
        }
        for property in &description.properties {
            node.write_property(&property.name, &property.value)?;
        }

        {
            let mut ctx = context.borrow_mut();
            let ctx = &mut *ctx;
            node.state.borrow_mut().setup_body(&mut ctx.world, &ctx.config);
        }
        debug!("[Undercroft scripts] Loaded '{}' as entity {}", name, id.0);
        Ok(node)
    }

    /// Calls a global script function. Missing functions fail only when `required`.
    fn call(
        &self,
        callback: &'static str,
        args: impl IntoLuaMulti,
        required: bool,
    ) -> Result<(), ScriptError> {
        let function = match self.lua.globals().get::<Value>(callback) {
            Ok(Value::Function(function)) => function,
            _ if required => {
                return Err(ScriptError::MissingCallback {
                    script: self.name.clone(),
                    callback,
                })
            }
            _ => return Ok(()),
        };
        function
            .call::<()>(args)
            .map_err(|err| ScriptError::Callback {
                script: self.name.clone(),
                callback,
                message: err.to_string(),
            })
    }

    pub fn id(&self) -> EntityId {
        self.state.borrow().id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> Ref<'_, EntityState> {
        self.state.borrow()
    }

    pub fn is_alive(&self) -> bool {
        self.state.borrow().body.is_some()
    }

    /// One simulation step: walking, `playerMovedTo`, `update(dt)`, weapons, position sync.
    pub fn update(&self, dt: f32) -> Result<(), ScriptError> {
        let player = {
            let mut ctx = self.context.borrow_mut();
            self.state.borrow().update_velocity(&mut ctx.world);
            ctx.player.pixel_position()
        };
        self.call(FUNCTION_PLAYER_MOVED_TO, (player.x, player.y), false)?;
        self.call(FUNCTION_UPDATE, dt, true)?;

        let mut ctx = self.context.borrow_mut();
        let ctx = &mut *ctx;
        let mut state = self.state.borrow_mut();
        state.update_weapons(ctx, dt);
        state.update_position(&ctx.world, &ctx.config);
        Ok(())
    }

    pub fn hit(&self, damage: i32) -> Result<(), ScriptError> {
        self.call(FUNCTION_HIT, damage, false)
    }

    pub fn collision_with_player(&self) -> Result<(), ScriptError> {
        self.call(FUNCTION_COLLISION_WITH_PLAYER, (), false)
    }

    pub fn timeout(&self, timer_id: i64) -> Result<(), ScriptError> {
        self.call(FUNCTION_TIMEOUT, timer_id, true)
    }

    pub fn write_property(&self, key: &str, value: &str) -> Result<(), ScriptError> {
        self.call(FUNCTION_WRITE_PROPERTY, (key, value), false)
    }
}
