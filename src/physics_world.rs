//! Rigid body world used by the level, the player and scripted entities.
//!
//! Units are meters with y pointing down. Collision uses world-space bounding boxes for every
//! shape pair except circle/circle, which is exact. The step reports contacts to a
//! [`ContactListener`] in the same order a Box2D world does: begin/end while updating the
//! contact list, pre-solve before resolution and post-solve with the resolved normal impulse.

use std::collections::{BTreeMap, BTreeSet};

use bevy::prelude::Vec2;

use crate::contact::FixtureNode;
use crate::raycast::{segment_hits, RaycastTarget};

/// Overlaps deeper than this count as touching, so resting bodies keep their contacts.
const CONTACT_SKIN: f32 = 0.005;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyHandle(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixtureHandle {
    pub body: BodyHandle,
    pub index: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyType {
    Static,
    Kinematic,
    Dynamic,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub lower: Vec2,
    pub upper: Vec2,
}

impl Aabb {
    pub fn new(a: Vec2, b: Vec2) -> Self {
        Self {
            lower: a.min(b),
            upper: a.max(b),
        }
    }

    fn from_points(points: impl IntoIterator<Item = Vec2>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Self::new(first, first), |acc, p| Self {
            lower: acc.lower.min(p),
            upper: acc.upper.max(p),
        }))
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.lower.x <= other.upper.x
            && other.lower.x <= self.upper.x
            && self.lower.y <= other.upper.y
            && other.lower.y <= self.upper.y
    }

    pub fn center(&self) -> Vec2 {
        (self.lower + self.upper) * 0.5
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    Circle { center: Vec2, radius: f32 },
    Polygon { vertices: Vec<Vec2> },
    /// Edge loop or strip, used for static level geometry.
    Chain { vertices: Vec<Vec2>, closed: bool },
}

impl Shape {
    pub fn circle(radius: f32, center: Vec2) -> Self {
        Shape::Circle { center, radius }
    }

    /// Axis aligned box from half extents.
    pub fn rect(half_width: f32, half_height: f32, center: Vec2) -> Self {
        Shape::Polygon {
            vertices: vec![
                center + Vec2::new(-half_width, -half_height),
                center + Vec2::new(half_width, -half_height),
                center + Vec2::new(half_width, half_height),
                center + Vec2::new(-half_width, half_height),
            ],
        }
    }

    pub fn is_chain(&self) -> bool {
        matches!(self, Shape::Chain { .. })
    }

    fn area(&self) -> f32 {
        match self {
            Shape::Circle { radius, .. } => std::f32::consts::PI * radius * radius,
            Shape::Polygon { vertices } => {
                let n = vertices.len();
                let twice: f32 = (0..n)
                    .map(|i| vertices[i].perp_dot(vertices[(i + 1) % n]))
                    .sum();
                twice.abs() * 0.5
            }
            Shape::Chain { .. } => 0.0,
        }
    }

    fn world_aabb(&self, position: Vec2, angle: f32) -> Option<Aabb> {
        let rot = Vec2::from_angle(angle);
        match self {
            Shape::Circle { center, radius } => {
                let c = position + rot.rotate(*center);
                Some(Aabb::new(c - Vec2::splat(*radius), c + Vec2::splat(*radius)))
            }
            Shape::Polygon { vertices } | Shape::Chain { vertices, .. } => {
                Aabb::from_points(vertices.iter().map(|v| position + rot.rotate(*v)))
            }
        }
    }
}

/// Collision filtering with category/mask bits and a group override.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Filter {
    pub category_bits: u16,
    pub mask_bits: u16,
    pub group_index: i16,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            category_bits: 0x0001,
            mask_bits: 0xFFFF,
            group_index: 0,
        }
    }
}

impl Filter {
    pub fn should_collide(&self, other: &Filter) -> bool {
        if self.group_index == other.group_index && self.group_index != 0 {
            return self.group_index > 0;
        }
        (self.mask_bits & other.category_bits) != 0 && (self.category_bits & other.mask_bits) != 0
    }
}

#[derive(Clone, Debug)]
pub struct FixtureDef {
    pub shape: Shape,
    pub density: f32,
    pub is_sensor: bool,
    pub filter: Filter,
    pub node: Option<FixtureNode>,
}

impl FixtureDef {
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            density: 1.0,
            is_sensor: false,
            filter: Filter::default(),
            node: None,
        }
    }

    pub fn sensor(mut self) -> Self {
        self.is_sensor = true;
        self
    }

    pub fn with_node(mut self, node: FixtureNode) -> Self {
        self.node = Some(node);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
}

#[derive(Clone, Debug)]
pub struct Fixture {
    pub shape: Shape,
    pub density: f32,
    pub is_sensor: bool,
    pub filter: Filter,
    pub node: Option<FixtureNode>,
}

#[derive(Clone, Copy, Debug)]
pub struct BodyDef {
    pub body_type: BodyType,
    pub position: Vec2,
    pub angle: f32,
    pub linear_velocity: Vec2,
    pub gravity_scale: f32,
    pub fixed_rotation: bool,
    pub active: bool,
}

impl Default for BodyDef {
    fn default() -> Self {
        Self {
            body_type: BodyType::Static,
            position: Vec2::ZERO,
            angle: 0.0,
            linear_velocity: Vec2::ZERO,
            gravity_scale: 1.0,
            fixed_rotation: false,
            active: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Body {
    pub body_type: BodyType,
    pub position: Vec2,
    pub angle: f32,
    pub linear_velocity: Vec2,
    pub gravity_scale: f32,
    pub fixed_rotation: bool,
    active: bool,
    fixtures: Vec<Fixture>,
    mass: f32,
    destroyed: bool,
}

impl Body {
    pub fn fixtures(&self) -> &[Fixture] {
        &self.fixtures
    }

    pub fn fixtures_mut(&mut self) -> &mut [Fixture] {
        &mut self.fixtures
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn is_dynamic(&self) -> bool {
        self.body_type == BodyType::Dynamic
    }

    pub fn apply_linear_impulse(&mut self, impulse: Vec2) {
        if self.is_dynamic() {
            self.linear_velocity += impulse / self.mass;
        }
    }

    fn recompute_mass(&mut self) {
        let mass: f32 = self
            .fixtures
            .iter()
            .filter(|f| !f.is_sensor)
            .map(|f| f.shape.area() * f.density)
            .sum();
        self.mass = if mass > 0.0 { mass } else { 1.0 };
    }

    fn participates(&self) -> bool {
        self.active && !self.destroyed
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContactKey(FixtureHandle, FixtureHandle);

impl ContactKey {
    fn new(a: FixtureHandle, b: FixtureHandle) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }
}

/// Touching fixture pair. Enabled state and tangent speed only last for the current step.
#[derive(Clone, Debug)]
pub struct Contact {
    pub fixture_a: FixtureHandle,
    pub fixture_b: FixtureHandle,
    enabled: bool,
    tangent_speed: f32,
}

impl Contact {
    fn new(key: ContactKey) -> Self {
        Self {
            fixture_a: key.0,
            fixture_b: key.1,
            enabled: true,
            tangent_speed: 0.0,
        }
    }

    /// Free-standing contact for driving a listener without a step.
    #[cfg(test)]
    pub fn between(a: FixtureHandle, b: FixtureHandle) -> Self {
        Self::new(ContactKey::new(a, b))
    }

    pub fn key(&self) -> ContactKey {
        ContactKey::new(self.fixture_a, self.fixture_b)
    }

    #[cfg(test)]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn tangent_speed(&self) -> f32 {
        self.tangent_speed
    }

    pub fn set_tangent_speed(&mut self, speed: f32) {
        self.tangent_speed = speed;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ContactImpulse {
    pub normal_impulses: [f32; 2],
    pub count: usize,
}

pub trait ContactListener {
    fn begin_contact(&mut self, _world: &PhysicsWorld, _contact: &mut Contact) {}
    fn end_contact(&mut self, _world: &PhysicsWorld, _contact: &mut Contact) {}
    fn pre_solve(&mut self, _world: &PhysicsWorld, _contact: &mut Contact) {}
    fn post_solve(&mut self, _world: &PhysicsWorld, _contact: &Contact, _impulse: &ContactImpulse) {}
}

impl ContactListener for () {}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    pub fixture: FixtureHandle,
    pub point: Vec2,
    pub fraction: f32,
}

/// Separation data for an overlapping pair, normal points from A to B.
#[derive(Clone, Copy, Debug)]
struct Manifold {
    normal: Vec2,
    penetration: f32,
}

#[derive(Default)]
pub struct PhysicsWorld {
    gravity: Vec2,
    bodies: BTreeMap<BodyHandle, Body>,
    contacts: BTreeMap<ContactKey, Contact>,
    next_body: u64,
}

impl PhysicsWorld {
    pub fn new(gravity: Vec2) -> Self {
        Self {
            gravity,
            ..Default::default()
        }
    }

    pub fn gravity(&self) -> Vec2 {
        self.gravity
    }

    pub fn create_body(&mut self, def: &BodyDef) -> BodyHandle {
        self.next_body += 1;
        let handle = BodyHandle(self.next_body);
        self.bodies.insert(
            handle,
            Body {
                body_type: def.body_type,
                position: def.position,
                angle: def.angle,
                linear_velocity: def.linear_velocity,
                gravity_scale: def.gravity_scale,
                fixed_rotation: def.fixed_rotation,
                active: def.active,
                fixtures: Vec::new(),
                mass: 1.0,
                destroyed: false,
            },
        );
        handle
    }

    pub fn create_fixture(&mut self, body: BodyHandle, def: FixtureDef) -> Option<FixtureHandle> {
        let b = self.bodies.get_mut(&body).filter(|b| !b.destroyed)?;
        b.fixtures.push(Fixture {
            shape: def.shape,
            density: def.density,
            is_sensor: def.is_sensor,
            filter: def.filter,
            node: def.node,
        });
        b.recompute_mass();
        Some(FixtureHandle {
            body,
            index: (b.fixtures.len() - 1) as u32,
        })
    }

    /// Marks the body for removal. Its contacts end during the next step, queries skip it
    /// right away.
    pub fn destroy_body(&mut self, handle: BodyHandle) {
        if let Some(body) = self.bodies.get_mut(&handle) {
            body.destroyed = true;
        }
    }

    /// Live body lookup. Destroyed bodies stay readable through [`Self::fixture`] until the
    /// next step so end-of-contact handling can still classify them.
    pub fn body(&self, handle: BodyHandle) -> Option<&Body> {
        self.bodies.get(&handle).filter(|b| !b.destroyed)
    }

    pub fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut Body> {
        self.bodies.get_mut(&handle).filter(|b| !b.destroyed)
    }

    pub fn contains(&self, handle: BodyHandle) -> bool {
        self.body(handle).is_some()
    }

    #[cfg(test)]
    pub fn body_count(&self) -> usize {
        self.bodies.values().filter(|b| !b.destroyed).count()
    }

    pub fn fixture(&self, handle: FixtureHandle) -> Option<&Fixture> {
        self.bodies
            .get(&handle.body)?
            .fixtures
            .get(handle.index as usize)
    }

    pub fn fixture_node(&self, handle: FixtureHandle) -> Option<&FixtureNode> {
        self.fixture(handle)?.node.as_ref()
    }

    /// Velocity of the body owning a fixture, also for bodies pending removal.
    pub fn fixture_body_velocity(&self, handle: FixtureHandle) -> Vec2 {
        self.bodies
            .get(&handle.body)
            .map(|b| b.linear_velocity)
            .unwrap_or(Vec2::ZERO)
    }

    pub fn set_transform(&mut self, handle: BodyHandle, position: Vec2, angle: f32) {
        if let Some(body) = self.body_mut(handle) {
            body.position = position;
            body.angle = angle;
        }
    }

    pub fn set_linear_velocity(&mut self, handle: BodyHandle, velocity: Vec2) {
        if let Some(body) = self.body_mut(handle) {
            if body.body_type != BodyType::Static {
                body.linear_velocity = velocity;
            }
        }
    }

    pub fn set_gravity_scale(&mut self, handle: BodyHandle, scale: f32) {
        if let Some(body) = self.body_mut(handle) {
            body.gravity_scale = scale;
        }
    }

    pub fn set_body_type(&mut self, handle: BodyHandle, body_type: BodyType) {
        if let Some(body) = self.body_mut(handle) {
            body.body_type = body_type;
            if body_type == BodyType::Static {
                body.linear_velocity = Vec2::ZERO;
            }
        }
    }

    pub fn set_active(&mut self, handle: BodyHandle, active: bool) {
        if let Some(body) = self.body_mut(handle) {
            body.active = active;
        }
    }

    #[cfg(test)]
    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.values()
    }

    /// Fixtures whose bounds overlap `aabb`, sensors included.
    pub fn query_aabb(&self, aabb: Aabb) -> Vec<FixtureHandle> {
        self.fixture_bounds()
            .into_iter()
            .filter(|(_, bounds)| bounds.overlaps(&aabb))
            .map(|(handle, _)| handle)
            .collect()
    }

    /// Fixtures crossed by the segment, nearest first.
    pub fn ray_cast(&self, from: Vec2, to: Vec2) -> Vec<RayHit> {
        let targets = self
            .fixture_bounds()
            .into_iter()
            .map(|(key, bounds)| RaycastTarget {
                key,
                min: bounds.lower,
                max: bounds.upper,
            });
        segment_hits(from, to, targets)
            .into_iter()
            .map(|hit| RayHit {
                fixture: hit.key,
                point: hit.point,
                fraction: hit.fraction,
            })
            .collect()
    }

    pub fn step(&mut self, dt: f32, listener: &mut impl ContactListener) {
        self.integrate(dt);
        self.update_contacts(listener);
        self.bodies.retain(|_, b| !b.destroyed);

        let mut contacts = std::mem::take(&mut self.contacts);
        for contact in contacts.values_mut() {
            contact.enabled = true;
            contact.tangent_speed = 0.0;
            listener.pre_solve(self, contact);
        }

        let mut solved = Vec::new();
        for (key, contact) in contacts.iter() {
            if let Some(impulse) = self.solve(contact) {
                solved.push((*key, impulse));
            }
        }
        for (key, impulse) in solved {
            if let Some(contact) = contacts.get(&key) {
                listener.post_solve(self, contact, &impulse);
            }
        }
        self.contacts = contacts;
    }

    fn integrate(&mut self, dt: f32) {
        let gravity = self.gravity;
        for body in self.bodies.values_mut() {
            if !body.participates() {
                continue;
            }
            match body.body_type {
                BodyType::Static => {}
                BodyType::Kinematic => body.position += body.linear_velocity * dt,
                BodyType::Dynamic => {
                    body.linear_velocity += gravity * body.gravity_scale * dt;
                    body.position += body.linear_velocity * dt;
                }
            }
        }
    }

    fn fixture_bounds(&self) -> Vec<(FixtureHandle, Aabb)> {
        let mut out = Vec::new();
        for (handle, body) in &self.bodies {
            if !body.participates() {
                continue;
            }
            for (index, fixture) in body.fixtures.iter().enumerate() {
                if let Some(bounds) = fixture.shape.world_aabb(body.position, body.angle) {
                    out.push((
                        FixtureHandle {
                            body: *handle,
                            index: index as u32,
                        },
                        bounds,
                    ));
                }
            }
        }
        out
    }

    fn may_touch(&self, a: FixtureHandle, b: FixtureHandle) -> bool {
        if a.body == b.body {
            return false;
        }
        let (Some(body_a), Some(body_b)) = (self.bodies.get(&a.body), self.bodies.get(&b.body))
        else {
            return false;
        };
        if !body_a.is_dynamic() && !body_b.is_dynamic() {
            return false;
        }
        match (self.fixture(a), self.fixture(b)) {
            (Some(fa), Some(fb)) => fa.filter.should_collide(&fb.filter),
            _ => false,
        }
    }

    fn update_contacts(&mut self, listener: &mut impl ContactListener) {
        let bounds = self.fixture_bounds();
        let mut touching = BTreeSet::new();
        for (i, (fa, _)) in bounds.iter().enumerate() {
            for (fb, _) in bounds.iter().skip(i + 1) {
                if !self.may_touch(*fa, *fb) {
                    continue;
                }
                if self.manifold(*fa, *fb).is_some() {
                    touching.insert(ContactKey::new(*fa, *fb));
                }
            }
        }

        let mut contacts = std::mem::take(&mut self.contacts);
        let ended: Vec<ContactKey> = contacts
            .keys()
            .filter(|k| !touching.contains(k))
            .copied()
            .collect();
        for key in ended {
            if let Some(mut contact) = contacts.remove(&key) {
                listener.end_contact(self, &mut contact);
            }
        }
        for key in touching {
            if contacts.contains_key(&key) {
                continue;
            }
            let mut contact = Contact::new(key);
            listener.begin_contact(self, &mut contact);
            contacts.insert(key, contact);
        }
        self.contacts = contacts;
    }

    fn manifold(&self, a: FixtureHandle, b: FixtureHandle) -> Option<Manifold> {
        let body_a = self.bodies.get(&a.body)?;
        let body_b = self.bodies.get(&b.body)?;
        let fa = body_a.fixtures.get(a.index as usize)?;
        let fb = body_b.fixtures.get(b.index as usize)?;

        if let (
            Shape::Circle {
                center: ca,
                radius: ra,
            },
            Shape::Circle {
                center: cb,
                radius: rb,
            },
        ) = (&fa.shape, &fb.shape)
        {
            let pa = body_a.position + Vec2::from_angle(body_a.angle).rotate(*ca);
            let pb = body_b.position + Vec2::from_angle(body_b.angle).rotate(*cb);
            let delta = pb - pa;
            let dist = delta.length();
            let penetration = ra + rb - dist;
            if penetration <= -CONTACT_SKIN {
                return None;
            }
            let normal = if dist > 1e-6 { delta / dist } else { Vec2::Y };
            return Some(Manifold {
                normal,
                penetration,
            });
        }

        let ba = fa.shape.world_aabb(body_a.position, body_a.angle)?;
        let bb = fb.shape.world_aabb(body_b.position, body_b.angle)?;
        let overlap_x = ba.upper.x.min(bb.upper.x) - ba.lower.x.max(bb.lower.x);
        let overlap_y = ba.upper.y.min(bb.upper.y) - ba.lower.y.max(bb.lower.y);
        if overlap_x <= -CONTACT_SKIN || overlap_y <= -CONTACT_SKIN {
            return None;
        }
        let delta = bb.center() - ba.center();
        let manifold = if overlap_x < overlap_y {
            Manifold {
                normal: Vec2::new(if delta.x >= 0.0 { 1.0 } else { -1.0 }, 0.0),
                penetration: overlap_x,
            }
        } else {
            Manifold {
                normal: Vec2::new(0.0, if delta.y >= 0.0 { 1.0 } else { -1.0 }),
                penetration: overlap_y,
            }
        };
        Some(manifold)
    }

    /// Pushes dynamic bodies apart and removes approaching velocity. Returns the normal impulse
    /// for post-solve, `None` when the pair does not respond physically.
    fn solve(&mut self, contact: &Contact) -> Option<ContactImpulse> {
        if !contact.enabled {
            return None;
        }
        let (a, b) = (contact.fixture_a, contact.fixture_b);
        if self.fixture(a)?.is_sensor || self.fixture(b)?.is_sensor {
            return None;
        }
        let manifold = self.manifold(a, b)?;
        let (body_a, body_b) = (self.bodies.get(&a.body)?, self.bodies.get(&b.body)?);
        let inv_a = if body_a.is_dynamic() { 1.0 / body_a.mass } else { 0.0 };
        let inv_b = if body_b.is_dynamic() { 1.0 / body_b.mass } else { 0.0 };
        let inv_sum = inv_a + inv_b;
        if inv_sum <= 0.0 {
            return None;
        }

        let n = manifold.normal;
        let relative = body_a.linear_velocity - body_b.linear_velocity;
        let approach = relative.dot(n);
        let impulse = if approach > 0.0 { approach / inv_sum } else { 0.0 };
        let correction = manifold.penetration.max(0.0) / inv_sum;

        let tangent = n.perp();
        let tangent_speed = contact.tangent_speed;
        let slide = relative.dot(tangent);

        if let Some(body) = self.bodies.get_mut(&a.body) {
            if inv_a > 0.0 {
                body.linear_velocity -= n * impulse * inv_a;
                body.position -= n * correction * inv_a;
                if tangent_speed != 0.0 {
                    body.linear_velocity += tangent * (tangent_speed - slide) * (inv_a / inv_sum);
                }
            }
        }
        if let Some(body) = self.bodies.get_mut(&b.body) {
            if inv_b > 0.0 {
                body.linear_velocity += n * impulse * inv_b;
                body.position += n * correction * inv_b;
                if tangent_speed != 0.0 {
                    body.linear_velocity -= tangent * (tangent_speed - slide) * (inv_b / inv_sum);
                }
            }
        }

        Some(ContactImpulse {
            normal_impulses: [impulse, 0.0],
            count: 1,
        })
    }
}
