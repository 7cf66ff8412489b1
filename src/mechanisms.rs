//! Level mechanisms: bouncers, conveyor belts, one-sided platforms, deadly zones and moving
//! platforms. Rectangles come from the level description in pixels.

use std::collections::BTreeMap;

use bevy::prelude::Vec2;
use serde::Deserialize;

use crate::components::GameConfig;
use crate::contact::{FixtureNode, NodeOwner, ObjectType};
use crate::physics_world::{BodyDef, BodyHandle, BodyType, FixtureDef, PhysicsWorld, Shape};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MechanismId(pub u64);

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MechanismKind {
    Bouncer,
    Conveyor {
        /// Meters per second, positive moves towards +x.
        velocity: f64,
    },
    OneSided,
    Deadly,
    MovingPlatform {
        /// Flat x/y pixel pairs.
        path: Vec<f32>,
        /// Meters per second.
        #[serde(default = "default_platform_speed")]
        speed: f32,
    },
}

fn default_platform_speed() -> f32 {
    1.0
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MechanismDescription {
    #[serde(flatten)]
    pub kind: MechanismKind,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Clone, Debug)]
pub struct Bouncer {
    pub body: BodyHandle,
    pub activations: u32,
}

#[derive(Clone, Debug)]
pub struct MovingPlatform {
    pub body: BodyHandle,
    pub waypoints: Vec<Vec2>,
    pub speed: f32,
    target: usize,
}

#[derive(Default)]
pub struct Mechanisms {
    next_id: u64,
    bodies: BTreeMap<MechanismId, BodyHandle>,
    bouncers: BTreeMap<MechanismId, Bouncer>,
    platforms: BTreeMap<MechanismId, MovingPlatform>,
}

impl Mechanisms {
    pub fn spawn(
        &mut self,
        world: &mut PhysicsWorld,
        description: &MechanismDescription,
        config: &GameConfig,
    ) -> MechanismId {
        self.next_id += 1;
        let id = MechanismId(self.next_id);
        let mpp = config.meters_per_pixel();
        let half = Vec2::new(description.width, description.height) * 0.5 * mpp;
        let center = Vec2::new(description.x, description.y) * mpp + half;

        let (object_type, body_type, sensor) = match &description.kind {
            MechanismKind::Bouncer => (ObjectType::Bouncer, BodyType::Static, false),
            MechanismKind::Conveyor { .. } => (ObjectType::ConveyorBelt, BodyType::Static, false),
            MechanismKind::OneSided => (ObjectType::SolidOneSided, BodyType::Static, false),
            MechanismKind::Deadly => (ObjectType::Deadly, BodyType::Static, true),
            MechanismKind::MovingPlatform { .. } => {
                (ObjectType::MovingPlatform, BodyType::Kinematic, false)
            }
        };
        let mut node = FixtureNode::new(object_type).with_owner(NodeOwner::Mechanism(id));
        if let MechanismKind::Conveyor { velocity } = &description.kind {
            node = node.with_property("velocity", *velocity);
        }

        let body = world.create_body(&BodyDef {
            body_type,
            position: center,
            fixed_rotation: true,
            ..Default::default()
        });
        let mut fixture = FixtureDef::new(Shape::rect(half.x, half.y, Vec2::ZERO)).with_node(node);
        if sensor {
            fixture = fixture.sensor();
        }
        world.create_fixture(body, fixture);
        self.bodies.insert(id, body);

        match &description.kind {
            MechanismKind::Bouncer => {
                self.bouncers.insert(
                    id,
                    Bouncer {
                        body,
                        activations: 0,
                    },
                );
            }
            MechanismKind::MovingPlatform { path, speed } => {
                let waypoints: Vec<Vec2> = path
                    .chunks_exact(2)
                    .map(|p| Vec2::new(p[0], p[1]) * mpp + half)
                    .collect();
                self.platforms.insert(
                    id,
                    MovingPlatform {
                        body,
                        waypoints,
                        speed: *speed,
                        target: 0,
                    },
                );
            }
            _ => {}
        }
        id
    }

    pub fn body(&self, id: MechanismId) -> Option<BodyHandle> {
        self.bodies.get(&id).copied()
    }

    pub fn bouncer(&self, id: MechanismId) -> Option<&Bouncer> {
        self.bouncers.get(&id)
    }

    /// Records a bouncer hit, false for ids that are not bouncers.
    pub fn activate_bouncer(&mut self, id: MechanismId) -> bool {
        match self.bouncers.get_mut(&id) {
            Some(bouncer) => {
                bouncer.activations += 1;
                true
            }
            None => false,
        }
    }

    /// Steers moving platforms towards their next waypoint, looping over the path.
    pub fn update(&mut self, world: &mut PhysicsWorld, dt: f32) {
        for platform in self.platforms.values_mut() {
            let Some(position) = world.body(platform.body).map(|b| b.position) else {
                continue;
            };
            if platform.waypoints.is_empty() || platform.speed <= 0.0 {
                world.set_linear_velocity(platform.body, Vec2::ZERO);
                continue;
            }
            let mut target = platform.waypoints[platform.target];
            if position.distance(target) <= platform.speed * dt {
                platform.target = (platform.target + 1) % platform.waypoints.len();
                target = platform.waypoints[platform.target];
            }
            let velocity = (target - position).normalize_or_zero() * platform.speed;
            world.set_linear_velocity(platform.body, velocity);
        }
    }

    pub fn clear(&mut self, world: &mut PhysicsWorld) {
        for body in std::mem::take(&mut self.bodies).into_values() {
            world.destroy_body(body);
        }
        self.bouncers.clear();
        self.platforms.clear();
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Vec<MechanismDescription> {
        serde_json::from_str(json).expect("mechanisms parse")
    }

    #[test]
    fn descriptions_deserialize_by_type_tag() {
        let list = parse(
            r#"[
                {"type": "bouncer", "x": 0, "y": 0, "width": 24, "height": 8},
                {"type": "conveyor", "velocity": -1.5, "x": 48, "y": 96, "width": 96, "height": 24},
                {"type": "moving_platform", "path": [0, 0, 96, 0], "x": 0, "y": 0, "width": 48, "height": 12}
            ]"#,
        );
        assert_eq!(list[0].kind, MechanismKind::Bouncer);
        assert_eq!(list[1].kind, MechanismKind::Conveyor { velocity: -1.5 });
        assert_eq!(
            list[2].kind,
            MechanismKind::MovingPlatform {
                path: vec![0.0, 0.0, 96.0, 0.0],
                speed: 1.0
            }
        );
    }

    #[test]
    fn spawned_fixtures_are_tagged_in_meters() {
        let config = GameConfig::default();
        let mut world = PhysicsWorld::new(Vec2::ZERO);
        let mut mechanisms = Mechanisms::default();
        let list = parse(
            r#"[
                {"type": "conveyor", "velocity": 2.0, "x": 48, "y": 96, "width": 96, "height": 24},
                {"type": "deadly", "x": 0, "y": 0, "width": 48, "height": 48}
            ]"#,
        );
        let conveyor = mechanisms.spawn(&mut world, &list[0], &config);
        let deadly = mechanisms.spawn(&mut world, &list[1], &config);

        let body = world.body(mechanisms.body(conveyor).expect("conveyor")).expect("body");
        assert!((body.position - Vec2::new(2.0, 2.25)).length() < 1e-5);
        let node = body.fixtures()[0].node.as_ref().expect("node");
        assert_eq!(node.object_type, ObjectType::ConveyorBelt);
        assert_eq!(node.properties.double_or("velocity", 0.0), 2.0);
        assert_eq!(node.owner, NodeOwner::Mechanism(conveyor));

        let body = world.body(mechanisms.body(deadly).expect("deadly")).expect("body");
        assert!(body.fixtures()[0].is_sensor);

        assert!(!mechanisms.activate_bouncer(conveyor));
        mechanisms.clear(&mut world);
        assert!(mechanisms.is_empty());
        assert_eq!(world.body_count(), 0);
    }

    #[test]
    fn bouncers_count_activations() {
        let config = GameConfig::default();
        let mut world = PhysicsWorld::new(Vec2::ZERO);
        let mut mechanisms = Mechanisms::default();
        let list = parse(r#"[{"type": "bouncer", "x": 0, "y": 0, "width": 24, "height": 8}]"#);
        let id = mechanisms.spawn(&mut world, &list[0], &config);
        assert!(mechanisms.activate_bouncer(id));
        assert!(mechanisms.activate_bouncer(id));
        assert_eq!(mechanisms.bouncer(id).map(|b| b.activations), Some(2));
    }

    #[test]
    fn moving_platforms_patrol_their_path() {
        let config = GameConfig::default();
        let mut world = PhysicsWorld::new(Vec2::ZERO);
        let mut mechanisms = Mechanisms::default();
        let list = parse(
            r#"[{"type": "moving_platform", "path": [0, 0, 96, 0], "speed": 2.0,
                 "x": 0, "y": 0, "width": 48, "height": 12}]"#,
        );
        let id = mechanisms.spawn(&mut world, &list[0], &config);
        let body = mechanisms.body(id).expect("platform");

        let dt = 1.0 / 60.0;
        let mut max_x: f32 = 0.0;
        for _ in 0..240 {
            mechanisms.update(&mut world, dt);
            world.step(dt, &mut ());
            max_x = max_x.max(world.body(body).expect("body").position.x);
        }
        let start_x = 0.5;
        assert!(max_x > start_x + 1.9, "platform reached the far waypoint, max_x = {max_x}");
        assert!(max_x < start_x + 2.1);
        assert_eq!(world.body(body).expect("body").body_type, BodyType::Kinematic);
    }
}
