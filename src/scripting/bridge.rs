//! Native operations exposed to entity scripts.
//!
//! Every Lua state carries a [`Binding`] in its app data that names the entity it belongs to.
//! Calls whose binding cannot be resolved, whose argument count differs from the operation's
//! arity, or whose arguments do not convert are ignored.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};

use bevy::prelude::*;
use mlua::{Lua, MultiValue};

use super::args::{BridgeArgs, Outcome, Reply};
use super::context::{ScriptEffect, SharedContext, SimulationContext};
use super::node::{EntityState, SpriteSlot};
use super::value::property_pairs;
use crate::physics_world::{Aabb, BodyHandle, BodyType, Shape};
use crate::timer::TimerAction;
use crate::weapons::{
    FireRequest, FrameAnimation, ProjectileShape, ProjectileTexture, TextureRect, Weapon, WeaponType,
};

pub struct BridgeCall<'a> {
    pub ctx: &'a mut SimulationContext,
    pub entity: &'a mut EntityState,
}

impl BridgeCall<'_> {
    fn body(&self) -> Option<BodyHandle> {
        self.entity.body
    }

    fn meters_per_pixel(&self) -> f32 {
        self.ctx.config.meters_per_pixel()
    }

    fn effect(&mut self, effect: ScriptEffect) {
        self.ctx.effects.push((self.entity.id, effect));
    }
}

/// `None` means the call was not applicable and is ignored.
pub type NativeOp = fn(&mut BridgeCall<'_>, &BridgeArgs) -> Option<Reply>;

pub const CATALOG: &[(&str, NativeOp)] = &[
    ("addSample", add_sample),
    ("addShapeCircle", add_shape_circle),
    ("addShapePoly", add_shape_poly),
    ("addShapeRect", add_shape_rect),
    ("addSprite", add_sprite),
    ("addWeapon", add_weapon),
    ("boom", boom),
    ("damage", damage),
    ("damageRadius", damage_radius),
    ("debug", debug),
    ("die", die),
    ("fireWeapon", fire_weapon),
    ("getLinearVelocity", get_linear_velocity),
    ("isPhysicsPathClear", is_physics_path_clear),
    // misspelled name used by existing scripts
    ("isPhsyicsPathClear", is_physics_path_clear),
    ("makeDynamic", make_dynamic),
    ("makeStatic", make_static),
    ("playDetonationAnimation", play_detonation_animation),
    ("playSample", play_sample),
    ("queryAABB", query_aabb),
    ("queryRayCast", query_ray_cast),
    ("registerHitAnimation", register_hit_animation),
    ("setActive", set_active),
    ("setDamage", set_damage),
    ("setGravityScale", set_gravity_scale),
    ("setLinearVelocity", set_linear_velocity),
    ("setSpriteOffset", set_sprite_offset),
    ("setSpriteOrigin", set_sprite_origin),
    ("setTransform", set_transform),
    ("setZ", set_z),
    ("timer", timer),
    ("updateKeysPressed", update_keys_pressed),
    ("updateProjectileAnimation", update_projectile_animation),
    ("updateProjectileTexture", update_projectile_texture),
    ("updateProperties", update_properties),
    ("updateSpriteRect", update_sprite_rect),
];

/// Links a Lua state to its entity and the simulation it lives in.
struct Binding {
    context: SharedContext,
    entity: Weak<RefCell<EntityState>>,
}

/// Binds the native catalog into `lua` for one entity.
pub fn register(
    lua: &Lua,
    context: &SharedContext,
    entity: &Rc<RefCell<EntityState>>,
) -> mlua::Result<()> {
    lua.set_app_data(Binding {
        context: Rc::clone(context),
        entity: Rc::downgrade(entity),
    });
    let globals = lua.globals();
    for &(name, op) in CATALOG {
        let function = lua.create_function(move |lua, values: MultiValue| {
            dispatch(lua, name, op, &BridgeArgs::from_values(&values)).into_values(lua)
        })?;
        globals.set(name, function)?;
    }
    Ok(())
}

fn dispatch(lua: &Lua, name: &str, op: NativeOp, args: &BridgeArgs) -> Outcome {
    let Some(binding) = lua.app_data_ref::<Binding>() else {
        return Outcome::Ignored;
    };
    let Some(entity) = binding.entity.upgrade() else {
        return Outcome::Ignored;
    };
    let (Ok(mut ctx), Ok(mut state)) = (binding.context.try_borrow_mut(), entity.try_borrow_mut())
    else {
        warn!("[Undercroft scripts] '{}' called re-entrantly, ignoring", name);
        return Outcome::Ignored;
    };
    let mut call = BridgeCall {
        ctx: &mut *ctx,
        entity: &mut *state,
    };
    let outcome = Outcome::from(op(&mut call, args));
    if outcome.is_ignored() {
        debug!(
            "[Undercroft scripts] {}: ignored malformed call to '{}'",
            call.entity.script_name, name
        );
    }
    outcome
}

/// Runs a catalog operation by name without going through Lua.
#[cfg(test)]
pub fn call_native(call: &mut BridgeCall<'_>, name: &str, args: &BridgeArgs) -> Outcome {
    CATALOG
        .iter()
        .find(|(op_name, _)| *op_name == name)
        .map(|(_, op)| Outcome::from(op(call, args)))
        .unwrap_or(Outcome::Ignored)
}

fn add_sample(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (sample,) = args.exact::<(String,)>()?;
    call.entity.samples.push(sample.clone());
    call.effect(ScriptEffect::SampleAdded { sample });
    Some(Reply::Nothing)
}

fn play_sample(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (sample, volume) = args.exact::<(String, f32)>()?;
    call.effect(ScriptEffect::SamplePlayed { sample, volume });
    Some(Reply::Nothing)
}

fn debug(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (message,) = args.exact::<(String,)>()?;
    info!("[Undercroft scripts] {}: {}", call.entity.script_name, message);
    Some(Reply::Nothing)
}

fn boom(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (x, y, intensity) = args.exact::<(f32, f32, f32)>()?;
    call.effect(ScriptEffect::Boom { x, y, intensity });
    Some(Reply::Nothing)
}

fn play_detonation_animation(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (x, y) = args.exact::<(f32, f32)>()?;
    call.effect(ScriptEffect::DetonationAnimation { x, y });
    Some(Reply::Nothing)
}

fn add_shape_circle(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (radius, x, y) = args.exact::<(f32, f32, f32)>()?;
    call.entity.shapes.push(Shape::circle(radius, Vec2::new(x, y)));
    Some(Reply::Nothing)
}

/// Width and height are half extents.
fn add_shape_rect(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (width, height, x, y) = args.exact::<(f32, f32, f32, f32)>()?;
    call.entity.shapes.push(Shape::rect(width, height, Vec2::new(x, y)));
    Some(Reply::Nothing)
}

fn add_shape_poly(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    if args.len() < 6 || args.len() % 2 != 0 {
        return None;
    }
    let vertices = vertex_pairs(&args.numbers_from(0)?);
    call.entity.shapes.push(Shape::Polygon { vertices });
    Some(Reply::Nothing)
}

fn vertex_pairs(numbers: &[f64]) -> Vec<Vec2> {
    numbers
        .chunks_exact(2)
        .map(|p| Vec2::new(p[0] as f32, p[1] as f32))
        .collect()
}

fn add_sprite(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    args.exact::<()>()?;
    call.entity.sprites.push(SpriteSlot::default());
    Some(Reply::Nothing)
}

fn set_sprite_origin(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (id, x, y) = args.exact::<(usize, f32, f32)>()?;
    call.entity.sprites.get_mut(id)?.origin = Vec2::new(x, y);
    Some(Reply::Nothing)
}

fn set_sprite_offset(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (id, x, y) = args.exact::<(usize, f32, f32)>()?;
    call.entity.sprites.get_mut(id)?.offset = Vec2::new(x, y);
    Some(Reply::Nothing)
}

fn update_sprite_rect(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (id, x, y, width, height) = args.exact::<(usize, i32, i32, i32, i32)>()?;
    call.entity.sprites.get_mut(id)?.rect = Some(TextureRect {
        x,
        y,
        width,
        height,
    });
    Some(Reply::Nothing)
}

fn set_z(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (z,) = args.exact::<(i32,)>()?;
    call.entity.z = z;
    Some(Reply::Nothing)
}

fn damage(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (amount, force_x, force_y) = args.exact::<(i32, f32, f32)>()?;
    let ctx = &mut *call.ctx;
    ctx.player.damage(&mut ctx.world, amount, Vec2::new(force_x, force_y));
    Some(Reply::Nothing)
}

/// Hurts the player when they are within `radius` pixels of the origin. The push is the
/// offset from the origin to the player.
fn damage_radius(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (amount, x, y, radius) = args.exact::<(i32, f32, f32, f32)>()?;
    let ctx = &mut *call.ctx;
    let offset = ctx.player.pixel_position() - Vec2::new(x, y);
    if offset.length() <= radius {
        ctx.player.damage(&mut ctx.world, amount, offset);
    }
    Some(Reply::Nothing)
}

fn die(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    args.exact::<()>()?;
    call.entity.die(&mut call.ctx.world);
    Some(Reply::Nothing)
}

fn get_linear_velocity(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    args.exact::<()>()?;
    let velocity = call
        .body()
        .and_then(|b| call.ctx.world.body(b))
        .map(|b| b.linear_velocity)
        .unwrap_or(Vec2::ZERO);
    Some(Reply::Numbers(vec![f64::from(velocity.x), f64::from(velocity.y)]))
}

fn set_linear_velocity(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (vx, vy) = args.exact::<(f32, f32)>()?;
    let body = call.body()?;
    call.ctx.world.set_linear_velocity(body, Vec2::new(vx, vy));
    Some(Reply::Nothing)
}

fn set_transform(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (x, y, angle) = args.exact::<(f32, f32, f32)>()?;
    let body = call.body()?;
    let position = Vec2::new(x, y) * call.meters_per_pixel();
    call.ctx.world.set_transform(body, position, angle);
    Some(Reply::Nothing)
}

fn set_gravity_scale(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (scale,) = args.exact::<(f32,)>()?;
    let body = call.body()?;
    call.ctx.world.set_gravity_scale(body, scale);
    Some(Reply::Nothing)
}

fn set_active(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (active,) = args.exact::<(bool,)>()?;
    let body = call.body()?;
    call.ctx.world.set_active(body, active);
    Some(Reply::Nothing)
}

fn make_dynamic(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    args.exact::<()>()?;
    let body = call.body()?;
    call.ctx.world.set_body_type(body, BodyType::Dynamic);
    Some(Reply::Nothing)
}

fn make_static(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    args.exact::<()>()?;
    let body = call.body()?;
    call.ctx.world.set_body_type(body, BodyType::Static);
    Some(Reply::Nothing)
}

fn set_damage(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (amount,) = args.exact::<(i32,)>()?;
    let body = call.body()?;
    let body = call.ctx.world.body_mut(body)?;
    for node in body.fixtures_mut().iter_mut().filter_map(|f| f.node.as_mut()) {
        node.properties.set("damage", amount);
    }
    Some(Reply::Nothing)
}

fn pixel_box(call: &BridgeCall<'_>, args: &BridgeArgs) -> Option<(Vec2, Vec2)> {
    let (x1, y1, x2, y2) = args.exact::<(i64, i64, i64, i64)>()?;
    let mpp = call.meters_per_pixel();
    Some((
        Vec2::new(x1 as f32, y1 as f32) * mpp,
        Vec2::new(x2 as f32, y2 as f32) * mpp,
    ))
}

/// Number of distinct bodies overlapping a pixel box.
fn query_aabb(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (lower, upper) = pixel_box(call, args)?;
    let bodies: BTreeSet<BodyHandle> = call
        .ctx
        .world
        .query_aabb(Aabb::new(lower, upper))
        .into_iter()
        .map(|f| f.body)
        .collect();
    Some(Reply::Int(bodies.len() as i64))
}

/// Number of distinct bodies crossed by a pixel segment.
fn query_ray_cast(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (from, to) = pixel_box(call, args)?;
    let bodies: BTreeSet<BodyHandle> = call
        .ctx
        .world
        .ray_cast(from, to)
        .into_iter()
        .map(|hit| hit.fixture.body)
        .collect();
    Some(Reply::Int(bodies.len() as i64))
}

fn is_physics_path_clear(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (x0, y0, x1, y1) = args.exact::<(f32, f32, f32, f32)>()?;
    let cell = call.ctx.config.pixels_per_physics_tile.max(1.0);
    let to_cell = |x: f32, y: f32| IVec2::new((x / cell) as i32, (y / cell) as i32);
    let collides = call.ctx.grid.line_collides(to_cell(x0, y0), to_cell(x1, y1));
    Some(Reply::Bool(!collides))
}

/// `type, interval, damage` with an optional circle radius or polygon vertex pairs.
fn add_weapon(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (kind, interval_ms, damage) = args.prefix::<(i64, i64, i32)>()?;
    let weapon_type = WeaponType::from_index(kind)?;
    let shape = match args.len() {
        3 => ProjectileShape::Circle {
            radius: call.ctx.config.projectile_radius,
        },
        4 => ProjectileShape::Circle {
            radius: args.get(3)?.as_number()? as f32,
        },
        n if n >= 5 && (n - 3) % 2 == 0 => {
            let vertices = vertex_pairs(&args.numbers_from(3)?);
            if vertices.len() < 3 {
                return None;
            }
            ProjectileShape::Polygon { vertices }
        }
        _ => return None,
    };
    call.entity
        .weapons
        .push(Weapon::new(weapon_type, interval_ms.max(0) as u64, damage, shape));
    Some(Reply::Nothing)
}

/// `index, x, y` in pixels and the projectile velocity in meters per second.
fn fire_weapon(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (index, x, y, dir_x, dir_y) = args.exact::<(usize, f32, f32, f32, f32)>()?;
    let position = Vec2::new(x, y) * call.meters_per_pixel();
    call.entity.weapons.get_mut(index)?.fire(FireRequest {
        position,
        velocity: Vec2::new(dir_x, dir_y),
    });
    Some(Reply::Nothing)
}

fn update_projectile_texture(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let texture = match args.len() {
        2 => {
            let (_, path) = args.exact::<(usize, String)>()?;
            ProjectileTexture { path, rect: None }
        }
        6 => {
            let (_, path, x, y, width, height) =
                args.exact::<(usize, String, i32, i32, i32, i32)>()?;
            ProjectileTexture {
                path,
                rect: Some(TextureRect {
                    x,
                    y,
                    width,
                    height,
                }),
            }
        }
        _ => return None,
    };
    let (index,) = args.prefix::<(usize,)>()?;
    call.entity.weapons.get_mut(index)?.texture = Some(texture);
    Some(Reply::Nothing)
}

fn update_projectile_animation(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (
        index,
        path,
        frame_width,
        frame_height,
        origin_x,
        origin_y,
        seconds_per_frame,
        frame_count,
        frames_per_row,
        start_frame,
    ) = args.exact::<(usize, String, u32, u32, f32, f32, f32, u32, u32, u32)>()?;
    call.entity.weapons.get_mut(index)?.animation = Some(FrameAnimation {
        path,
        frame_width,
        frame_height,
        origin: Vec2::new(origin_x, origin_y),
        seconds_per_frame,
        frame_count,
        frames_per_row,
        start_frame,
    });
    Some(Reply::Nothing)
}

fn register_hit_animation(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (
        index,
        path,
        frame_width,
        frame_height,
        seconds_per_frame,
        frame_count,
        frames_per_row,
        start_frame,
    ) = args.exact::<(usize, String, u32, u32, f32, u32, u32, u32)>()?;
    call.entity.weapons.get_mut(index)?.hit_animation = Some(FrameAnimation {
        path,
        frame_width,
        frame_height,
        origin: Vec2::ZERO,
        seconds_per_frame,
        frame_count,
        frames_per_row,
        start_frame,
    });
    Some(Reply::Nothing)
}

fn timer(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (delay_ms, timer_id) = args.exact::<(i64, i64)>()?;
    call.ctx.timers.schedule(
        delay_ms.max(0) as u64,
        TimerAction::ScriptTimeout {
            entity: call.entity.id,
            timer_id,
        },
    );
    Some(Reply::Nothing)
}

fn update_keys_pressed(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    let (keys,) = args.exact::<(u32,)>()?;
    call.entity.keys_pressed = keys;
    Some(Reply::Nothing)
}

fn update_properties(call: &mut BridgeCall<'_>, args: &BridgeArgs) -> Option<Reply> {
    if args.len() != 1 {
        return None;
    }
    for (key, value) in property_pairs(args.get(0)?)? {
        call.entity.properties.set(key, value);
    }
    call.entity.synchronize_properties();
    Some(Reply::Nothing)
}
