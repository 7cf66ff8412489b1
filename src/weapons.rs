//! Enemy weapons and the projectiles they fire.

use std::collections::{BTreeMap, VecDeque};

use bevy::prelude::Vec2;
use serde::Serialize;

use crate::components::EntityId;
use crate::contact::{FixtureNode, NodeOwner, ObjectType};
use crate::physics_world::{BodyDef, BodyHandle, BodyType, Filter, FixtureDef, PhysicsWorld, Shape};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProjectileId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum WeaponType {
    Default,
    Bow,
    Gun,
}

impl WeaponType {
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(WeaponType::Default),
            1 => Some(WeaponType::Bow),
            2 => Some(WeaponType::Gun),
            _ => None,
        }
    }

    /// Arrows stay in whatever they hit for a moment.
    pub fn is_sticky(self) -> bool {
        self == WeaponType::Bow
    }

    pub fn gravity_scale(self) -> f32 {
        match self {
            WeaponType::Bow => 1.0,
            WeaponType::Default | WeaponType::Gun => 0.0,
        }
    }
}

/// Projectile collision shape in meters, relative to the projectile body.
#[derive(Clone, Debug, PartialEq)]
pub enum ProjectileShape {
    Circle { radius: f32 },
    Polygon { vertices: Vec<Vec2> },
}

impl ProjectileShape {
    fn to_shape(&self) -> Shape {
        match self {
            ProjectileShape::Circle { radius } => Shape::circle(*radius, Vec2::ZERO),
            ProjectileShape::Polygon { vertices } => Shape::Polygon {
                vertices: vertices.clone(),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextureRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProjectileTexture {
    pub path: String,
    pub rect: Option<TextureRect>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FrameAnimation {
    pub path: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub origin: Vec2,
    pub seconds_per_frame: f32,
    pub frame_count: u32,
    pub frames_per_row: u32,
    pub start_frame: u32,
}

/// Queued shot: position in meters, initial velocity in meters per second.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FireRequest {
    pub position: Vec2,
    pub velocity: Vec2,
}

#[derive(Clone, Debug)]
pub struct Weapon {
    pub weapon_type: WeaponType,
    pub fire_interval_ms: u64,
    pub damage: i32,
    pub shape: ProjectileShape,
    pub texture: Option<ProjectileTexture>,
    pub animation: Option<FrameAnimation>,
    pub hit_animation: Option<FrameAnimation>,
    cooldown_ms: u64,
    queued: VecDeque<FireRequest>,
}

impl Weapon {
    pub fn new(weapon_type: WeaponType, fire_interval_ms: u64, damage: i32, shape: ProjectileShape) -> Self {
        Self {
            weapon_type,
            fire_interval_ms,
            damage,
            shape,
            texture: None,
            animation: None,
            hit_animation: None,
            cooldown_ms: 0,
            queued: VecDeque::new(),
        }
    }

    pub fn fire(&mut self, request: FireRequest) {
        self.queued.push_back(request);
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Releases at most one queued shot once the fire interval has passed since the last one.
    pub fn update(&mut self, dt_ms: u64) -> Option<FireRequest> {
        self.cooldown_ms = self.cooldown_ms.saturating_sub(dt_ms);
        if self.cooldown_ms > 0 {
            return None;
        }
        let shot = self.queued.pop_front()?;
        self.cooldown_ms = self.fire_interval_ms;
        Some(shot)
    }
}

#[derive(Clone, Debug)]
pub struct Projectile {
    pub body: BodyHandle,
    pub owner: EntityId,
    pub weapon_type: WeaponType,
    pub damage: i32,
    pub inactive: bool,
    pub hit_animation: Option<String>,
}

/// Live projectiles of the current level.
#[derive(Default)]
pub struct ProjectileRegistry {
    next_id: u64,
    projectiles: BTreeMap<ProjectileId, Projectile>,
}

impl ProjectileRegistry {
    pub fn spawn(
        &mut self,
        world: &mut PhysicsWorld,
        owner: EntityId,
        weapon: &Weapon,
        request: FireRequest,
        group_index: i16,
    ) -> ProjectileId {
        self.next_id += 1;
        let id = ProjectileId(self.next_id);
        let body = world.create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: request.position,
            linear_velocity: request.velocity,
            gravity_scale: weapon.weapon_type.gravity_scale(),
            fixed_rotation: true,
            ..Default::default()
        });
        let node = FixtureNode::new(ObjectType::Projectile)
            .with_owner(NodeOwner::Projectile(id))
            .with_property("damage", i64::from(weapon.damage))
            .with_property("sticky", weapon.weapon_type.is_sticky());
        world.create_fixture(
            body,
            FixtureDef::new(weapon.shape.to_shape())
                .with_filter(Filter {
                    group_index,
                    ..Filter::default()
                })
                .with_node(node),
        );
        self.projectiles.insert(
            id,
            Projectile {
                body,
                owner,
                weapon_type: weapon.weapon_type,
                damage: weapon.damage,
                inactive: false,
                hit_animation: weapon.hit_animation.as_ref().map(|a| a.path.clone()),
            },
        );
        id
    }

    pub fn get(&self, id: ProjectileId) -> Option<&Projectile> {
        self.projectiles.get(&id)
    }

    /// Stops a projectile where it is.
    pub fn deactivate(&mut self, world: &mut PhysicsWorld, id: ProjectileId) {
        if let Some(projectile) = self.projectiles.get_mut(&id) {
            projectile.inactive = true;
            world.set_linear_velocity(projectile.body, Vec2::ZERO);
            world.set_body_type(projectile.body, BodyType::Static);
        }
    }

    pub fn remove(&mut self, world: &mut PhysicsWorld, id: ProjectileId) -> Option<Projectile> {
        let projectile = self.projectiles.remove(&id)?;
        world.destroy_body(projectile.body);
        Some(projectile)
    }

    pub fn len(&self) -> usize {
        self.projectiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projectiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ProjectileId, &Projectile)> {
        self.projectiles.iter()
    }

    pub fn clear(&mut self, world: &mut PhysicsWorld) {
        for projectile in std::mem::take(&mut self.projectiles).into_values() {
            world.destroy_body(projectile.body);
        }
    }
}
