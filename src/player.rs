//! Player state seen by the contact classifier and the script bridge.
//!
//! Input handling and rendering live outside the core; the player here is a physics body with
//! health, ground/platform references and a pixel position that scripts can read.

use bevy::prelude::Vec2;
use serde::Serialize;

use crate::components::GameConfig;
use crate::contact::{
    category, ContactClassifier, ContactCounters, FixtureNode, NodeOwner, ObjectType,
};
use crate::physics_world::{
    BodyDef, BodyHandle, BodyType, Filter, FixtureDef, PhysicsWorld, Shape,
};

const SENSOR_THICKNESS_M: f32 = 0.05;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DeathReason {
    TouchesDeadly,
    Smashed,
    OutOfHealth,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlayerEvent {
    DamageTaken { amount: i32, force: [f32; 2], health: i32 },
    PlayerImpulse { intensity: f32 },
    Bounced { speed: f32 },
}

impl PlayerEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            PlayerEvent::DamageTaken { .. } => "damage_taken",
            PlayerEvent::PlayerImpulse { .. } => "player_impulse",
            PlayerEvent::Bounced { .. } => "bounced",
        }
    }
}

pub struct PlayerState {
    pub body: Option<BodyHandle>,
    pub health: i32,
    pub max_health: i32,
    ground_body: Option<BodyHandle>,
    platform_body: Option<BodyHandle>,
    pixel_position: Vec2,
    events: Vec<PlayerEvent>,
    impulse_damage_threshold: f32,
    impulse_damage_factor: f32,
    meters_per_pixel: f32,
}

impl PlayerState {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            body: None,
            health: config.player_health,
            max_health: config.player_health,
            ground_body: None,
            platform_body: None,
            pixel_position: Vec2::ZERO,
            events: Vec::new(),
            impulse_damage_threshold: config.impulse_damage_threshold,
            impulse_damage_factor: config.impulse_damage_factor,
            meters_per_pixel: config.meters_per_pixel(),
        }
    }

    /// Creates the player body at a pixel position. The upper half of the body carries the
    /// `head` flag so one-sided platforms let it through.
    pub fn spawn_body(
        &mut self,
        world: &mut PhysicsWorld,
        pixel_position: Vec2,
        config: &GameConfig,
    ) -> BodyHandle {
        if let Some(old) = self.body.take() {
            world.destroy_body(old);
        }
        let mpp = config.meters_per_pixel();
        let half_w = config.player_width_px * 0.5 * mpp;
        let half_h = config.player_height_px * 0.5 * mpp;
        let body = world.create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: pixel_position * mpp,
            fixed_rotation: true,
            ..Default::default()
        });

        let filter = Filter {
            category_bits: category::FRIENDLY,
            ..Filter::default()
        };
        let tag = |object_type| FixtureNode::new(object_type).with_owner(NodeOwner::Player);
        let fixtures = [
            FixtureDef::new(Shape::rect(half_w, half_h * 0.5, Vec2::new(0.0, half_h * 0.5)))
                .with_node(tag(ObjectType::Player)),
            FixtureDef::new(Shape::rect(half_w, half_h * 0.5, Vec2::new(0.0, -half_h * 0.5)))
                .with_node(tag(ObjectType::Player).with_flag("head")),
            FixtureDef::new(Shape::rect(half_w * 0.8, SENSOR_THICKNESS_M, Vec2::new(0.0, half_h)))
                .sensor()
                .with_node(tag(ObjectType::PlayerFootSensor)),
            FixtureDef::new(Shape::rect(half_w * 0.8, SENSOR_THICKNESS_M, Vec2::new(0.0, -half_h)))
                .sensor()
                .with_node(tag(ObjectType::PlayerHeadSensor)),
            FixtureDef::new(Shape::rect(SENSOR_THICKNESS_M, half_h * 0.5, Vec2::new(-half_w, 0.0)))
                .sensor()
                .with_node(tag(ObjectType::PlayerLeftArmSensor)),
            FixtureDef::new(Shape::rect(SENSOR_THICKNESS_M, half_h * 0.5, Vec2::new(half_w, 0.0)))
                .sensor()
                .with_node(tag(ObjectType::PlayerRightArmSensor)),
        ];
        for fixture in fixtures {
            world.create_fixture(body, fixture.with_filter(filter));
        }

        self.body = Some(body);
        self.pixel_position = pixel_position;
        self.ground_body = None;
        self.platform_body = None;
        body
    }

    pub fn reset(&mut self) {
        self.health = self.max_health;
        self.ground_body = None;
        self.platform_body = None;
        self.events.clear();
    }

    pub fn pixel_position(&self) -> Vec2 {
        self.pixel_position
    }

    /// Moves the player, its body follows when there is one.
    #[cfg(test)]
    pub fn set_pixel_position(&mut self, world: &mut PhysicsWorld, pixel_position: Vec2) {
        self.pixel_position = pixel_position;
        if let Some(body) = self.body {
            world.set_transform(body, pixel_position * self.meters_per_pixel, 0.0);
        }
    }

    pub fn sync_from_body(&mut self, world: &PhysicsWorld) {
        if let Some(body) = self.body.and_then(|b| world.body(b)) {
            self.pixel_position = body.position / self.meters_per_pixel;
        }
    }

    pub fn set_ground_body(&mut self, body: BodyHandle) {
        self.ground_body = Some(body);
    }

    pub fn set_platform_body(&mut self, body: BodyHandle) {
        self.platform_body = Some(body);
    }

    /// Carries the player along x with the body it stands on, a moving platform wins over the
    /// ground. References whose contacts have all ended are dropped first.
    pub fn ride(&mut self, world: &mut PhysicsWorld, counters: ContactCounters, dt: f32) {
        if counters.moving_platform == 0 {
            self.platform_body = None;
        }
        if counters.foot == 0 {
            self.ground_body = None;
        }
        let carrier = self
            .platform_body
            .or(self.ground_body)
            .and_then(|b| world.body(b))
            .map(|b| b.linear_velocity.x)
            .unwrap_or(0.0);
        if carrier == 0.0 {
            return;
        }
        if let Some(body) = self.body.and_then(|b| world.body_mut(b)) {
            body.position.x += carrier * dt;
        }
    }

    /// Applies damage and pushes the body along `force`, given in pixel space.
    pub fn damage(&mut self, world: &mut PhysicsWorld, amount: i32, force: Vec2) {
        if amount <= 0 || self.is_dead() {
            return;
        }
        self.health = (self.health - amount).max(0);
        if let Some(body) = self.body.and_then(|b| world.body_mut(b)) {
            body.apply_linear_impulse(force * self.meters_per_pixel);
        }
        self.events.push(PlayerEvent::DamageTaken {
            amount,
            force: [force.x, force.y],
            health: self.health,
        });
    }

    /// Hard impacts hurt, everything else is only reported.
    pub fn impulse(&mut self, world: &mut PhysicsWorld, intensity: f32) {
        self.events.push(PlayerEvent::PlayerImpulse { intensity });
        if intensity > self.impulse_damage_threshold {
            let amount =
                ((intensity - self.impulse_damage_threshold) * self.impulse_damage_factor) as i32;
            self.damage(world, amount, Vec2::ZERO);
        }
    }

    /// Launches the player upwards, used by bouncers.
    pub fn bounce(&mut self, world: &mut PhysicsWorld, speed: f32) {
        if let Some(body) = self.body.and_then(|b| world.body_mut(b)) {
            body.linear_velocity.y = -speed;
            self.events.push(PlayerEvent::Bounced { speed });
        }
    }

    pub fn is_dead(&self) -> bool {
        self.health <= 0
    }

    pub fn check_dead(&self, classifier: &ContactClassifier) -> Option<DeathReason> {
        if classifier.is_dead_by_contact() {
            Some(DeathReason::TouchesDeadly)
        } else if classifier.is_smashed() {
            Some(DeathReason::Smashed)
        } else if self.is_dead() {
            Some(DeathReason::OutOfHealth)
        } else {
            None
        }
    }

    pub fn drain_events(&mut self) -> Vec<PlayerEvent> {
        std::mem::take(&mut self.events)
    }
}
