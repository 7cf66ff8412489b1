//! Gameplay classification of physics contacts.
//!
//! Every fixture that matters to gameplay carries a [`FixtureNode`] naming its role. The
//! [`ContactClassifier`] keeps the per-level contact counters, decides which one-sided platform
//! contacts are solid and turns collisions into [`ContactAction`]s that the simulation applies
//! right after the physics step.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::components::{EntityId, GameConfig};
use crate::mechanisms::MechanismId;
use crate::physics_world::{
    BodyHandle, Contact, ContactImpulse, ContactKey, ContactListener, FixtureHandle, PhysicsWorld,
};
use crate::property::{Properties, PropertyValue};
use crate::weapons::ProjectileId;

/// Collision filter categories.
pub mod category {
    pub const BOUNDARY: u16 = 0x0001;
    pub const FRIENDLY: u16 = 0x0002;
    pub const ENEMY_WALK_THROUGH: u16 = 0x0004;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ObjectType {
    Player,
    PlayerFootSensor,
    PlayerHeadSensor,
    PlayerLeftArmSensor,
    PlayerRightArmSensor,
    Enemy,
    Projectile,
    Deadly,
    Crusher,
    MovingPlatform,
    Solid,
    SolidOneSided,
    Bouncer,
    ConveyorBelt,
    Door,
    MoveableBox,
    DeathBlock,
}

/// Non-owning back reference from a fixture to the game object that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeOwner {
    None,
    Player,
    Entity(EntityId),
    Projectile(ProjectileId),
    Mechanism(MechanismId),
}

/// Gameplay tag stored as fixture user data.
#[derive(Clone, Debug, PartialEq)]
pub struct FixtureNode {
    pub object_type: ObjectType,
    pub owner: NodeOwner,
    pub properties: Properties,
    flags: BTreeSet<String>,
}

impl FixtureNode {
    pub fn new(object_type: ObjectType) -> Self {
        Self {
            object_type,
            owner: NodeOwner::None,
            properties: Properties::new(),
            flags: BTreeSet::new(),
        }
    }

    pub fn with_owner(mut self, owner: NodeOwner) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_property(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties.set(key, value);
        self
    }

    pub fn with_flag(mut self, flag: &str) -> Self {
        self.flags.insert(flag.to_string());
        self
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    pub fn damage(&self) -> i32 {
        self.properties.int_or("damage", 0) as i32
    }

    pub fn is_sticky(&self) -> bool {
        self.properties.bool_or("sticky", false)
    }
}

/// Open contacts per player-related category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ContactCounters {
    pub foot: u32,
    pub head: u32,
    pub left_arm: u32,
    pub right_arm: u32,
    pub player: u32,
    pub deadly: u32,
    pub moving_platform: u32,
}

/// Gameplay effect requested by a contact event.
#[derive(Clone, Debug, PartialEq)]
pub enum ContactAction {
    DamagePlayer { amount: i32 },
    ScriptHit { entity: EntityId, damage: i32 },
    CollisionWithPlayer { entity: EntityId },
    RemoveProjectile { projectile: ProjectileId, delay_ms: u64 },
    DeactivateProjectile { projectile: ProjectileId },
    SetGroundBody { body: BodyHandle },
    SetPlatformBody { body: BodyHandle },
    ActivateBouncer { mechanism: MechanismId },
    PlayerImpulse { impulse: f32 },
}

#[derive(Clone, Copy, Debug)]
struct OneSidedContact {
    other: FixtureHandle,
}

pub struct ContactClassifier {
    counters: ContactCounters,
    smashed: bool,
    one_sided: BTreeMap<ContactKey, OneSidedContact>,
    stuck_projectiles: HashSet<ProjectileId>,
    actions: Vec<ContactAction>,
    impulse_noise_threshold: f32,
    sticky_inactive_impulse: f32,
    sticky_removal_delay_ms: u64,
}

impl ContactClassifier {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            counters: ContactCounters::default(),
            smashed: false,
            one_sided: BTreeMap::new(),
            stuck_projectiles: HashSet::new(),
            actions: Vec::new(),
            impulse_noise_threshold: config.impulse_noise_threshold,
            sticky_inactive_impulse: config.sticky_inactive_impulse,
            sticky_removal_delay_ms: config.sticky_removal_delay_ms,
        }
    }

    pub fn counters(&self) -> ContactCounters {
        self.counters
    }

    pub fn is_smashed(&self) -> bool {
        self.smashed
    }

    pub fn player_on_ground(&self) -> bool {
        self.counters.foot > 0
    }

    pub fn is_dead_by_contact(&self) -> bool {
        self.counters.deadly > 0
    }

    pub fn reset(&mut self) {
        self.counters = ContactCounters::default();
        self.smashed = false;
        self.one_sided.clear();
        self.stuck_projectiles.clear();
        self.actions.clear();
    }

    pub fn forget_projectile(&mut self, projectile: ProjectileId) {
        self.stuck_projectiles.remove(&projectile);
    }

    pub fn drain_actions(&mut self) -> Vec<ContactAction> {
        std::mem::take(&mut self.actions)
    }

    /// Deadly, crusher, projectile and enemy rules only fire against the player's body
    /// fixtures, never against its sensors.
    fn begin_side(
        &mut self,
        world: &PhysicsWorld,
        this: FixtureHandle,
        other: FixtureHandle,
    ) -> Option<OneSidedContact> {
        let node = world.fixture_node(this)?;
        let other_fixture = world.fixture(other);
        let other_node = world.fixture_node(other);
        let other_type = other_node.map(|n| n.object_type);
        let other_is_sensor = other_fixture.map(|f| f.is_sensor).unwrap_or(false);
        let other_is_player = other_type == Some(ObjectType::Player);

        match node.object_type {
            ObjectType::Crusher | ObjectType::Deadly => {
                if other_is_player {
                    self.counters.deadly += 1;
                }
            }
            ObjectType::PlayerFootSensor => {
                if !other_is_sensor {
                    if other_fixture.map(|f| f.shape.is_chain()).unwrap_or(false) {
                        self.actions.push(ContactAction::SetGroundBody { body: other.body });
                    }
                    self.counters.foot += 1;
                }
            }
            ObjectType::PlayerHeadSensor => {
                if !other_is_sensor {
                    self.counters.head += 1;
                }
            }
            ObjectType::PlayerLeftArmSensor => {
                if !other_is_sensor {
                    self.counters.left_arm += 1;
                }
            }
            ObjectType::PlayerRightArmSensor => {
                if !other_is_sensor {
                    self.counters.right_arm += 1;
                }
            }
            ObjectType::Projectile => {
                let damage = node.damage();
                match other_node {
                    Some(o) if o.object_type == ObjectType::Player => {
                        self.actions.push(ContactAction::DamagePlayer { amount: damage });
                    }
                    Some(o) if o.object_type == ObjectType::Enemy => {
                        if let NodeOwner::Entity(entity) = o.owner {
                            self.actions.push(ContactAction::ScriptHit { entity, damage });
                        }
                    }
                    _ => {}
                }
                // sticky projectiles are handled once the impulse is known
                if !node.is_sticky() {
                    if let NodeOwner::Projectile(projectile) = node.owner {
                        self.actions.push(ContactAction::RemoveProjectile {
                            projectile,
                            delay_ms: 0,
                        });
                    }
                }
            }
            ObjectType::SolidOneSided => {
                if !other_is_sensor {
                    return Some(OneSidedContact { other });
                }
            }
            ObjectType::Player => {
                self.counters.player += 1;
            }
            ObjectType::MovingPlatform => {
                if other_node.map(|n| n.owner) == Some(NodeOwner::Player) {
                    if other_type == Some(ObjectType::PlayerHeadSensor) && self.player_on_ground() {
                        self.smashed = true;
                    }
                    self.actions
                        .push(ContactAction::SetPlatformBody { body: this.body });
                    self.counters.moving_platform += 1;
                }
            }
            ObjectType::Bouncer => {
                if let NodeOwner::Mechanism(mechanism) = node.owner {
                    self.actions.push(ContactAction::ActivateBouncer { mechanism });
                }
            }
            ObjectType::Enemy => {
                if other_is_player {
                    if let NodeOwner::Entity(entity) = node.owner {
                        self.actions
                            .push(ContactAction::CollisionWithPlayer { entity });
                    }
                    self.actions.push(ContactAction::DamagePlayer {
                        amount: node.damage(),
                    });
                }
            }
            ObjectType::Door
            | ObjectType::ConveyorBelt
            | ObjectType::MoveableBox
            | ObjectType::DeathBlock
            | ObjectType::Solid => {}
        }
        None
    }

    fn end_side(&mut self, world: &PhysicsWorld, this: FixtureHandle, other: FixtureHandle) {
        let Some(node) = world.fixture_node(this) else {
            return;
        };
        let other_node = world.fixture_node(other);
        let other_is_sensor = world.fixture(other).map(|f| f.is_sensor).unwrap_or(false);
        let other_is_player = other_node.map(|n| n.object_type) == Some(ObjectType::Player);

        let counter = match node.object_type {
            ObjectType::Crusher | ObjectType::Deadly if other_is_player => {
                Some(&mut self.counters.deadly)
            }
            ObjectType::PlayerFootSensor if !other_is_sensor => Some(&mut self.counters.foot),
            ObjectType::PlayerHeadSensor if !other_is_sensor => Some(&mut self.counters.head),
            ObjectType::PlayerLeftArmSensor if !other_is_sensor => {
                Some(&mut self.counters.left_arm)
            }
            ObjectType::PlayerRightArmSensor if !other_is_sensor => {
                Some(&mut self.counters.right_arm)
            }
            ObjectType::Player => Some(&mut self.counters.player),
            ObjectType::MovingPlatform
                if other_node.map(|n| n.owner) == Some(NodeOwner::Player) =>
            {
                Some(&mut self.counters.moving_platform)
            }
            _ => None,
        };
        if let Some(counter) = counter {
            *counter = counter.saturating_sub(1);
        }
    }

    /// Head flags always pass through, everything else only lands on the platform while moving
    /// down.
    fn resolve_one_sided(&self, world: &PhysicsWorld, contact: &mut Contact, os: OneSidedContact) {
        let head = world
            .fixture_node(os.other)
            .map(|n| n.has_flag("head"))
            .unwrap_or(false);
        if head {
            contact.set_enabled(false);
            return;
        }
        if world.fixture_body_velocity(os.other).y > 0.0 {
            return;
        }
        contact.set_enabled(false);
    }

    fn apply_conveyor(&self, world: &PhysicsWorld, contact: &mut Contact) {
        let belt = [contact.fixture_a, contact.fixture_b]
            .into_iter()
            .filter_map(|f| world.fixture_node(f))
            .find(|n| n.object_type == ObjectType::ConveyorBelt);
        if let Some(belt) = belt {
            // positive belt velocity carries bodies on top towards +x
            let velocity = belt.properties.double_or("velocity", 0.0) as f32;
            contact.set_tangent_speed(-velocity);
        }
    }

    fn post_solve_side(&mut self, world: &PhysicsWorld, this: FixtureHandle, impulse: f32) {
        let Some(node) = world.fixture_node(this) else {
            return;
        };
        match node.object_type {
            ObjectType::Player => {
                if impulse >= self.impulse_noise_threshold {
                    self.actions.push(ContactAction::PlayerImpulse { impulse });
                }
            }
            ObjectType::Projectile if node.is_sticky() => {
                let NodeOwner::Projectile(projectile) = node.owner else {
                    return;
                };
                if !self.stuck_projectiles.insert(projectile) {
                    return;
                }
                self.actions.push(ContactAction::RemoveProjectile {
                    projectile,
                    delay_ms: self.sticky_removal_delay_ms,
                });
                if impulse > self.sticky_inactive_impulse {
                    self.actions
                        .push(ContactAction::DeactivateProjectile { projectile });
                }
            }
            _ => {}
        }
    }
}

impl ContactListener for ContactClassifier {
    fn begin_contact(&mut self, world: &PhysicsWorld, contact: &mut Contact) {
        let (a, b) = (contact.fixture_a, contact.fixture_b);
        let first = self.begin_side(world, a, b);
        let second = self.begin_side(world, b, a);
        if let Some(os) = first.or(second) {
            self.one_sided.insert(contact.key(), os);
        }
    }

    fn end_contact(&mut self, world: &PhysicsWorld, contact: &mut Contact) {
        let (a, b) = (contact.fixture_a, contact.fixture_b);
        self.end_side(world, a, b);
        self.end_side(world, b, a);
        if self.one_sided.remove(&contact.key()).is_some() {
            contact.set_enabled(true);
        }
    }

    fn pre_solve(&mut self, world: &PhysicsWorld, contact: &mut Contact) {
        if let Some(os) = self.one_sided.get(&contact.key()).copied() {
            self.resolve_one_sided(world, contact, os);
        }
        self.apply_conveyor(world, contact);
    }

    fn post_solve(&mut self, world: &PhysicsWorld, contact: &Contact, impulse: &ContactImpulse) {
        let first = impulse.normal_impulses[0];
        self.post_solve_side(world, contact.fixture_a, first);
        self.post_solve_side(world, contact.fixture_b, first);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics_world::{BodyDef, BodyType, FixtureDef, Shape};
    use bevy::prelude::Vec2;

    struct Scene {
        world: PhysicsWorld,
        classifier: ContactClassifier,
    }

    impl Scene {
        fn new() -> Self {
            Self {
                world: PhysicsWorld::new(Vec2::ZERO),
                classifier: ContactClassifier::new(&GameConfig::default()),
            }
        }

        fn body(&mut self, body_type: BodyType, pos: Vec2, fixtures: Vec<FixtureDef>) -> BodyHandle {
            let body = self.world.create_body(&BodyDef {
                body_type,
                position: pos,
                fixed_rotation: true,
                ..Default::default()
            });
            for f in fixtures {
                self.world.create_fixture(body, f);
            }
            body
        }

        fn step(&mut self) {
            self.world.step(1.0 / 60.0, &mut self.classifier);
        }
    }

    fn player_box() -> FixtureDef {
        FixtureDef::new(Shape::rect(0.25, 0.5, Vec2::ZERO))
            .with_node(FixtureNode::new(ObjectType::Player).with_owner(NodeOwner::Player))
    }

    fn sensor(kind: ObjectType, half: Vec2, center: Vec2) -> FixtureDef {
        FixtureDef::new(Shape::rect(half.x, half.y, center))
            .sensor()
            .with_node(FixtureNode::new(kind).with_owner(NodeOwner::Player))
    }

    fn tagged_box(kind: ObjectType, half: Vec2) -> FixtureDef {
        FixtureDef::new(Shape::rect(half.x, half.y, Vec2::ZERO)).with_node(FixtureNode::new(kind))
    }

    #[test]
    fn counters_follow_open_contacts() {
        let mut scene = Scene::new();
        let player = scene.body(
            BodyType::Dynamic,
            Vec2::new(0.0, 0.0),
            vec![
                player_box(),
                sensor(ObjectType::PlayerFootSensor, Vec2::new(0.2, 0.05), Vec2::new(0.0, 0.5)),
            ],
        );
        let floor = scene.body(
            BodyType::Static,
            Vec2::new(0.0, 1.0),
            vec![tagged_box(ObjectType::Solid, Vec2::new(3.0, 0.5))],
        );
        let spikes = scene.body(
            BodyType::Static,
            Vec2::new(0.4, 0.0),
            vec![tagged_box(ObjectType::Deadly, Vec2::new(0.2, 0.2))],
        );
        scene.step();

        let c = scene.classifier.counters();
        assert_eq!(c.foot, 1);
        assert_eq!(c.player, 2);
        assert_eq!(c.deadly, 1);
        assert!(scene.classifier.player_on_ground());

        scene.world.destroy_body(spikes);
        scene.step();
        let c = scene.classifier.counters();
        assert_eq!(c.deadly, 0);
        assert_eq!(c.player, 1);

        scene.world.set_transform(player, Vec2::new(0.0, -5.0), 0.0);
        scene.step();
        assert_eq!(scene.classifier.counters(), ContactCounters::default());
        assert!(scene.world.contains(floor));
    }

    #[test]
    fn untagged_fixtures_are_ignored() {
        let mut scene = Scene::new();
        scene.body(
            BodyType::Dynamic,
            Vec2::ZERO,
            vec![FixtureDef::new(Shape::rect(0.5, 0.5, Vec2::ZERO))],
        );
        scene.body(
            BodyType::Static,
            Vec2::new(0.0, 0.9),
            vec![FixtureDef::new(Shape::rect(1.0, 0.5, Vec2::ZERO))],
        );
        scene.step();
        assert_eq!(scene.world.contact_count(), 1);
        assert_eq!(scene.classifier.counters(), ContactCounters::default());
        assert!(scene.classifier.drain_actions().is_empty());
    }

    #[test]
    fn foot_on_chain_reports_ground_body() {
        let mut scene = Scene::new();
        scene.body(
            BodyType::Dynamic,
            Vec2::ZERO,
            vec![sensor(ObjectType::PlayerFootSensor, Vec2::new(0.2, 0.1), Vec2::new(0.0, 0.5))],
        );
        let chain = Shape::Chain {
            vertices: vec![
                Vec2::new(-2.0, 0.55),
                Vec2::new(2.0, 0.55),
                Vec2::new(2.0, 1.0),
                Vec2::new(-2.0, 1.0),
            ],
            closed: true,
        };
        let ground = scene.body(
            BodyType::Static,
            Vec2::ZERO,
            vec![FixtureDef::new(chain).with_node(FixtureNode::new(ObjectType::Solid))],
        );
        scene.step();
        assert_eq!(scene.classifier.counters().foot, 1);
        assert!(scene
            .classifier
            .drain_actions()
            .contains(&ContactAction::SetGroundBody { body: ground }));
    }

    #[test]
    fn sensors_do_not_count_other_sensors() {
        let mut scene = Scene::new();
        scene.body(
            BodyType::Dynamic,
            Vec2::ZERO,
            vec![sensor(ObjectType::PlayerHeadSensor, Vec2::new(0.2, 0.1), Vec2::ZERO)],
        );
        scene.body(
            BodyType::Static,
            Vec2::ZERO,
            vec![FixtureDef::new(Shape::rect(0.5, 0.5, Vec2::ZERO))
                .sensor()
                .with_node(FixtureNode::new(ObjectType::Door))],
        );
        scene.step();
        assert_eq!(scene.classifier.counters().head, 0);
    }

    fn one_sided_scene(player_velocity: Vec2, head: bool) -> (Scene, BodyHandle) {
        let mut scene = Scene::new();
        let mut node = FixtureNode::new(ObjectType::Player).with_owner(NodeOwner::Player);
        if head {
            node = node.with_flag("head");
        }
        let player = scene.world.create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::new(0.0, 0.0),
            linear_velocity: player_velocity,
            fixed_rotation: true,
            ..Default::default()
        });
        scene.world.create_fixture(
            player,
            FixtureDef::new(Shape::rect(0.25, 0.5, Vec2::ZERO)).with_node(node),
        );
        scene.body(
            BodyType::Static,
            Vec2::new(0.0, 0.6),
            vec![tagged_box(ObjectType::SolidOneSided, Vec2::new(2.0, 0.2))],
        );
        (scene, player)
    }

    #[test]
    fn one_sided_platform_holds_a_falling_player() {
        let (mut scene, player) = one_sided_scene(Vec2::new(0.0, 2.0), false);
        scene.step();
        let contact = scene.world.contacts().next().expect("contact");
        assert!(contact.is_enabled());
        let vy = scene.world.body(player).expect("player").linear_velocity.y;
        assert!(vy.abs() < 1e-3, "landing removes downward speed, vy = {vy}");
    }

    #[test]
    fn one_sided_platform_lets_a_rising_player_through() {
        let (mut scene, player) = one_sided_scene(Vec2::new(0.0, -2.0), false);
        scene.step();
        let contact = scene.world.contacts().next().expect("contact");
        assert!(!contact.is_enabled());
        assert!(scene.world.body(player).expect("player").linear_velocity.y < -1.9);
    }

    #[test]
    fn one_sided_platform_disables_stationary_contacts_and_heads() {
        let (mut scene, _) = one_sided_scene(Vec2::ZERO, false);
        scene.step();
        assert!(!scene.world.contacts().next().expect("contact").is_enabled());

        let (mut scene, _) = one_sided_scene(Vec2::new(0.0, 2.0), true);
        scene.step();
        assert!(!scene.world.contacts().next().expect("contact").is_enabled());
    }

    #[test]
    fn one_sided_decision_is_reevaluated_each_step() {
        let (mut scene, player) = one_sided_scene(Vec2::new(0.0, -0.5), false);
        scene.step();
        assert!(!scene.world.contacts().next().expect("contact").is_enabled());
        if let Some(body) = scene.world.body_mut(player) {
            body.linear_velocity = Vec2::new(0.0, 1.0);
        }
        scene.step();
        assert!(scene.world.contacts().next().expect("contact").is_enabled());
    }

    fn smash_scene(grounded: bool) -> Scene {
        let mut scene = Scene::new();
        let mut fixtures = vec![sensor(
            ObjectType::PlayerHeadSensor,
            Vec2::new(0.2, 0.05),
            Vec2::new(0.0, -0.5),
        )];
        if grounded {
            fixtures.push(sensor(
                ObjectType::PlayerFootSensor,
                Vec2::new(0.2, 0.05),
                Vec2::new(0.0, 0.5),
            ));
            scene.body(
                BodyType::Static,
                Vec2::new(0.0, 1.0),
                vec![tagged_box(ObjectType::Solid, Vec2::new(2.0, 0.5))],
            );
        }
        scene.body(BodyType::Dynamic, Vec2::ZERO, fixtures);
        scene.step();
        scene
    }

    #[test]
    fn moving_platform_smashes_only_grounded_heads() {
        for grounded in [true, false] {
            let mut scene = smash_scene(grounded);
            assert_eq!(scene.classifier.player_on_ground(), grounded);
            let platform = scene.body(
                BodyType::Kinematic,
                Vec2::new(0.0, -0.8),
                vec![tagged_box(ObjectType::MovingPlatform, Vec2::new(1.0, 0.3))],
            );
            scene.step();
            assert_eq!(scene.classifier.is_smashed(), grounded);
            assert_eq!(scene.classifier.counters().moving_platform, 1);
            assert!(scene
                .classifier
                .drain_actions()
                .contains(&ContactAction::SetPlatformBody { body: platform }));

            scene.classifier.reset();
            assert!(!scene.classifier.is_smashed());
        }
    }

    #[test]
    fn platform_on_a_grounded_body_without_head_contact_does_not_smash() {
        let mut scene = smash_scene(true);
        scene.body(
            BodyType::Kinematic,
            Vec2::new(3.0, -0.8),
            vec![tagged_box(ObjectType::MovingPlatform, Vec2::new(1.0, 0.3))],
        );
        scene.step();
        assert!(!scene.classifier.is_smashed());
    }

    #[test]
    fn projectiles_hurt_players_and_hit_enemies() {
        let mut scene = Scene::new();
        let enemy_id = EntityId(4);
        scene.body(
            BodyType::Dynamic,
            Vec2::new(0.0, 0.0),
            vec![player_box()],
        );
        scene.body(
            BodyType::Static,
            Vec2::new(5.0, 0.0),
            vec![FixtureDef::new(Shape::rect(0.5, 0.5, Vec2::ZERO)).with_node(
                FixtureNode::new(ObjectType::Enemy)
                    .with_owner(NodeOwner::Entity(enemy_id))
                    .with_property("damage", 7i64),
            )],
        );
        let bullet = |id: u64, sticky: bool| {
            FixtureDef::new(Shape::circle(0.1, Vec2::ZERO)).with_node(
                FixtureNode::new(ObjectType::Projectile)
                    .with_owner(NodeOwner::Projectile(ProjectileId(id)))
                    .with_property("damage", 12i64)
                    .with_property("sticky", sticky),
            )
        };
        scene.body(BodyType::Dynamic, Vec2::new(0.3, 0.0), vec![bullet(1, false)]);
        scene.body(BodyType::Dynamic, Vec2::new(5.5, 0.0), vec![bullet(2, true)]);
        scene.step();

        let actions = scene.classifier.drain_actions();
        assert!(actions.contains(&ContactAction::DamagePlayer { amount: 12 }));
        assert!(actions.contains(&ContactAction::ScriptHit {
            entity: enemy_id,
            damage: 12
        }));
        assert!(actions.contains(&ContactAction::RemoveProjectile {
            projectile: ProjectileId(1),
            delay_ms: 0
        }));
        assert!(actions.contains(&ContactAction::RemoveProjectile {
            projectile: ProjectileId(2),
            delay_ms: 1000
        }));
        assert!(!actions.contains(&ContactAction::RemoveProjectile {
            projectile: ProjectileId(2),
            delay_ms: 0
        }));

        scene.step();
        let again = scene.classifier.drain_actions();
        assert!(!again
            .iter()
            .any(|a| matches!(a, ContactAction::RemoveProjectile { projectile, .. } if *projectile == ProjectileId(2))));
    }

    #[test]
    fn enemy_touch_damages_player_and_notifies_script() {
        let mut scene = Scene::new();
        let enemy_id = EntityId(9);
        scene.body(BodyType::Dynamic, Vec2::ZERO, vec![player_box()]);
        scene.body(
            BodyType::Kinematic,
            Vec2::new(0.6, 0.0),
            vec![FixtureDef::new(Shape::rect(0.5, 0.5, Vec2::ZERO)).with_node(
                FixtureNode::new(ObjectType::Enemy)
                    .with_owner(NodeOwner::Entity(enemy_id))
                    .with_property("damage", 25i64),
            )],
        );
        scene.step();
        let actions = scene.classifier.drain_actions();
        assert!(actions.contains(&ContactAction::CollisionWithPlayer { entity: enemy_id }));
        assert!(actions.contains(&ContactAction::DamagePlayer { amount: 25 }));
    }

    #[test]
    fn hard_landing_reports_player_impulse() {
        let mut scene = Scene::new();
        let player = scene.world.create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::ZERO,
            linear_velocity: Vec2::new(0.0, 6.0),
            fixed_rotation: true,
            ..Default::default()
        });
        scene.world.create_fixture(player, player_box());
        scene.body(
            BodyType::Static,
            Vec2::new(0.0, 1.0),
            vec![tagged_box(ObjectType::Solid, Vec2::new(2.0, 0.5))],
        );
        scene.step();
        let impulses: Vec<f32> = scene
            .classifier
            .drain_actions()
            .into_iter()
            .filter_map(|a| match a {
                ContactAction::PlayerImpulse { impulse } => Some(impulse),
                _ => None,
            })
            .collect();
        assert_eq!(impulses.len(), 1);
        assert!((impulses[0] - 3.0).abs() < 1e-3, "mass 0.5 * 6 m/s, got {}", impulses[0]);
    }

    #[test]
    fn crusher_contact_kills_the_player() {
        let mut scene = Scene::new();
        scene.body(
            BodyType::Dynamic,
            Vec2::ZERO,
            vec![
                player_box(),
                sensor(ObjectType::PlayerFootSensor, Vec2::new(0.2, 0.05), Vec2::new(0.0, 0.5)),
            ],
        );
        let crusher = scene.body(
            BodyType::Kinematic,
            Vec2::new(0.0, -0.6),
            vec![tagged_box(ObjectType::Crusher, Vec2::new(1.0, 0.2))],
        );
        scene.step();
        assert_eq!(scene.classifier.counters().deadly, 1);
        assert!(scene.classifier.is_dead_by_contact());
        let player = crate::player::PlayerState::new(&GameConfig::default());
        assert_eq!(
            player.check_dead(&scene.classifier),
            Some(crate::player::DeathReason::TouchesDeadly)
        );

        scene.world.destroy_body(crusher);
        scene.step();
        assert_eq!(scene.classifier.counters().deadly, 0);
        assert_eq!(player.check_dead(&scene.classifier), None);
    }

    #[test]
    fn crusher_ignores_player_sensors() {
        let mut scene = Scene::new();
        scene.body(
            BodyType::Dynamic,
            Vec2::ZERO,
            vec![sensor(ObjectType::PlayerFootSensor, Vec2::new(0.2, 0.05), Vec2::new(0.0, 0.5))],
        );
        scene.body(
            BodyType::Kinematic,
            Vec2::new(0.0, 0.6),
            vec![tagged_box(ObjectType::Crusher, Vec2::new(1.0, 0.2))],
        );
        scene.step();
        assert_eq!(scene.classifier.counters().foot, 1);
        assert_eq!(scene.classifier.counters().deadly, 0);
    }

    #[test]
    fn arm_sensors_count_walls_on_their_side() {
        let mut scene = Scene::new();
        scene.body(
            BodyType::Dynamic,
            Vec2::ZERO,
            vec![
                sensor(ObjectType::PlayerLeftArmSensor, Vec2::new(0.05, 0.25), Vec2::new(-0.3, 0.0)),
                sensor(ObjectType::PlayerRightArmSensor, Vec2::new(0.05, 0.25), Vec2::new(0.3, 0.0)),
            ],
        );
        let left_wall = scene.body(
            BodyType::Static,
            Vec2::new(-0.6, 0.0),
            vec![tagged_box(ObjectType::Solid, Vec2::new(0.3, 1.0))],
        );
        scene.step();
        let c = scene.classifier.counters();
        assert_eq!((c.left_arm, c.right_arm), (1, 0));

        scene.world.destroy_body(left_wall);
        scene.body(
            BodyType::Static,
            Vec2::new(0.6, 0.0),
            vec![tagged_box(ObjectType::Solid, Vec2::new(0.3, 1.0))],
        );
        scene.step();
        let c = scene.classifier.counters();
        assert_eq!((c.left_arm, c.right_arm), (0, 1));
    }

    #[test]
    fn bouncer_contact_activates_its_mechanism() {
        let mut scene = Scene::new();
        scene.body(BodyType::Dynamic, Vec2::ZERO, vec![player_box()]);
        scene.body(
            BodyType::Static,
            Vec2::new(0.0, 0.6),
            vec![FixtureDef::new(Shape::rect(1.0, 0.2, Vec2::ZERO)).with_node(
                FixtureNode::new(ObjectType::Bouncer)
                    .with_owner(NodeOwner::Mechanism(MechanismId(3))),
            )],
        );
        scene.step();
        let activations: Vec<ContactAction> = scene
            .classifier
            .drain_actions()
            .into_iter()
            .filter(|a| matches!(a, ContactAction::ActivateBouncer { .. }))
            .collect();
        assert_eq!(
            activations,
            vec![ContactAction::ActivateBouncer {
                mechanism: MechanismId(3)
            }]
        );
    }

    #[test]
    fn random_begin_end_sequences_keep_counters_exact() {
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};

        let mut world = PhysicsWorld::new(Vec2::ZERO);
        let add = |world: &mut PhysicsWorld, body_type: BodyType, def: FixtureDef| {
            let body = world.create_body(&BodyDef {
                body_type,
                ..Default::default()
            });
            world.create_fixture(body, def).expect("fixture")
        };
        let half = Vec2::splat(0.2);
        let player_sensor = |kind: ObjectType| sensor(kind, half, Vec2::ZERO);
        let body = add(&mut world, BodyType::Dynamic, player_box());
        let foot = add(&mut world, BodyType::Dynamic, player_sensor(ObjectType::PlayerFootSensor));
        let head = add(&mut world, BodyType::Dynamic, player_sensor(ObjectType::PlayerHeadSensor));
        let left = add(&mut world, BodyType::Dynamic, player_sensor(ObjectType::PlayerLeftArmSensor));
        let right = add(&mut world, BodyType::Dynamic, player_sensor(ObjectType::PlayerRightArmSensor));
        let solid = add(&mut world, BodyType::Static, tagged_box(ObjectType::Solid, half));
        let deadly = add(&mut world, BodyType::Static, tagged_box(ObjectType::Deadly, half));
        let crusher = add(&mut world, BodyType::Kinematic, tagged_box(ObjectType::Crusher, half));
        let platform = add(
            &mut world,
            BodyType::Kinematic,
            tagged_box(ObjectType::MovingPlatform, half),
        );
        let door = add(
            &mut world,
            BodyType::Static,
            FixtureDef::new(Shape::rect(0.2, 0.2, Vec2::ZERO))
                .sensor()
                .with_node(FixtureNode::new(ObjectType::Door)),
        );

        let counters = |foot, head, left_arm, right_arm, player, deadly, moving_platform| {
            ContactCounters {
                foot,
                head,
                left_arm,
                right_arm,
                player,
                deadly,
                moving_platform,
            }
        };
        // every pair with the counters one open contact of it holds
        let pairs = [
            (body, solid, counters(0, 0, 0, 0, 1, 0, 0)),
            (body, deadly, counters(0, 0, 0, 0, 1, 1, 0)),
            (body, crusher, counters(0, 0, 0, 0, 1, 1, 0)),
            (body, platform, counters(0, 0, 0, 0, 1, 0, 1)),
            (body, door, counters(0, 0, 0, 0, 1, 0, 0)),
            (foot, solid, counters(1, 0, 0, 0, 0, 0, 0)),
            (foot, deadly, counters(1, 0, 0, 0, 0, 0, 0)),
            (foot, platform, counters(1, 0, 0, 0, 0, 0, 1)),
            (foot, door, counters(0, 0, 0, 0, 0, 0, 0)),
            (head, crusher, counters(0, 1, 0, 0, 0, 0, 0)),
            (head, platform, counters(0, 1, 0, 0, 0, 0, 1)),
            (left, solid, counters(0, 0, 1, 0, 0, 0, 0)),
            (right, solid, counters(0, 0, 0, 1, 0, 0, 0)),
            (right, door, counters(0, 0, 0, 0, 0, 0, 0)),
        ];

        let mut classifier = ContactClassifier::new(&GameConfig::default());
        let mut contacts: Vec<Contact> = pairs
            .iter()
            .map(|(a, b, _)| Contact::between(*a, *b))
            .collect();
        let mut open = vec![false; pairs.len()];
        let mut rng = SmallRng::seed_from_u64(0xc0ffee);

        for _ in 0..2000 {
            let i = rng.gen_range(0..pairs.len());
            if open[i] {
                classifier.end_contact(&world, &mut contacts[i]);
            } else {
                classifier.begin_contact(&world, &mut contacts[i]);
            }
            open[i] = !open[i];
            classifier.drain_actions();

            let mut expected = ContactCounters::default();
            for (pair, _) in pairs.iter().zip(&open).filter(|(_, o)| **o) {
                let c = pair.2;
                expected.foot += c.foot;
                expected.head += c.head;
                expected.left_arm += c.left_arm;
                expected.right_arm += c.right_arm;
                expected.player += c.player;
                expected.deadly += c.deadly;
                expected.moving_platform += c.moving_platform;
            }
            assert_eq!(classifier.counters(), expected);
        }

        for (contact, was_open) in contacts.iter_mut().zip(&open) {
            if *was_open {
                classifier.end_contact(&world, contact);
            }
        }
        assert_eq!(classifier.counters(), ContactCounters::default());
    }

    #[test]
    fn conveyor_carries_bodies_resting_on_it() {
        let mut scene = Scene::new();
        let crate_body = scene.body(
            BodyType::Dynamic,
            Vec2::ZERO,
            vec![tagged_box(ObjectType::MoveableBox, Vec2::new(0.5, 0.5))],
        );
        scene.body(
            BodyType::Static,
            Vec2::new(0.0, 0.95),
            vec![FixtureDef::new(Shape::rect(3.0, 0.5, Vec2::ZERO)).with_node(
                FixtureNode::new(ObjectType::ConveyorBelt).with_property("velocity", 1.5),
            )],
        );
        scene.step();
        let vx = scene.world.body(crate_body).expect("crate").linear_velocity.x;
        assert!((vx - 1.5).abs() < 1e-4, "vx = {vx}");
    }
}
