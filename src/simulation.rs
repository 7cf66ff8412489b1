//! Fixed-step game core: mechanisms, physics, contact side effects, scripted entities and timers.

use bevy::prelude::*;
use serde::Serialize;

use crate::components::{EntityId, GameConfig};
use crate::contact::{ContactAction, ContactClassifier};
use crate::events::GameEventBus;
use crate::level::Level;
use crate::level_loader::LevelCatalog;
use crate::mechanisms::Mechanisms;
use crate::player::{DeathReason, PlayerEvent};
use crate::scripting::{ScriptEffect, ScriptError, ScriptNode, SharedContext, SimulationContext};
use crate::timer::TimerAction;

/// What one step produced for the presentation layers.
#[derive(Debug, Default)]
pub struct StepReport {
    pub effects: Vec<(EntityId, ScriptEffect)>,
    pub player_events: Vec<PlayerEvent>,
    /// Set on the step the player died, later steps stay empty until the next level starts.
    pub death: Option<DeathReason>,
}

#[derive(Serialize)]
struct PlayerDied {
    reason: DeathReason,
}

pub struct Simulation {
    context: SharedContext,
    classifier: ContactClassifier,
    mechanisms: Mechanisms,
    nodes: Vec<ScriptNode>,
    next_entity: u64,
    death: Option<DeathReason>,
    steps: u64,
}

impl Simulation {
    pub fn new(config: GameConfig) -> Self {
        Self {
            classifier: ContactClassifier::new(&config),
            context: SimulationContext::shared(config),
            mechanisms: Mechanisms::default(),
            nodes: Vec::new(),
            next_entity: 0,
            death: None,
            steps: 0,
        }
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    pub fn entity_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Replaces the running level: static geometry, mechanisms, the player and one script node
    /// per enemy description. Any script failure aborts the start.
    pub fn start_level(&mut self, level: &Level) -> Result<(), ScriptError> {
        self.nodes.clear();
        self.classifier.reset();
        self.death = None;
        self.steps = 0;
        {
            let mut ctx = self.context.borrow_mut();
            let ctx = &mut *ctx;
            self.mechanisms.clear(&mut ctx.world);
            ctx.clear_level();
            ctx.grid = level.grid.clone();
            level.spawn_static_geometry(&mut ctx.world, &ctx.config);
            for mechanism in &level.description.mechanisms {
                self.mechanisms.spawn(&mut ctx.world, mechanism, &ctx.config);
            }
            let start = level.player_start_px(&ctx.config);
            ctx.player.spawn_body(&mut ctx.world, start, &ctx.config);
        }

        for enemy in &level.description.enemies {
            self.next_entity += 1;
            let id = EntityId(self.next_entity);
            let path = level.script_path(&enemy.script);
            let node = ScriptNode::load(id, &path, enemy, &self.context)?;
            debug!("[Undercroft simulation] Spawned {} as entity {}", node.name(), id.0);
            self.nodes.push(node);
        }

        info!(
            "[Undercroft simulation] Level '{}' started: {} scripted entities, {} mechanisms",
            level.description.filename,
            self.nodes.len(),
            self.mechanisms.len()
        );
        Ok(())
    }

    fn node(&self, entity: EntityId) -> Option<&ScriptNode> {
        self.nodes.iter().find(|node| node.id() == entity)
    }

    pub fn step(&mut self, dt: f32) -> Result<StepReport, ScriptError> {
        if self.death.is_some() {
            return Ok(StepReport::default());
        }
        self.steps += 1;

        {
            let mut ctx = self.context.borrow_mut();
            let ctx = &mut *ctx;
            self.mechanisms.update(&mut ctx.world, dt);
            ctx.world.step(dt, &mut self.classifier);
        }
        for action in self.classifier.drain_actions() {
            self.apply_contact_action(action)?;
        }
        {
            let mut ctx = self.context.borrow_mut();
            let ctx = &mut *ctx;
            ctx.player.ride(&mut ctx.world, self.classifier.counters(), dt);
            ctx.player.sync_from_body(&ctx.world);
        }

        for node in &self.nodes {
            if node.is_alive() {
                node.update(dt)?;
            }
        }

        let due = self.context.borrow_mut().timers.advance(dt);
        for action in due {
            match action {
                TimerAction::ScriptTimeout { entity, timer_id } => {
                    if let Some(node) = self.node(entity) {
                        node.timeout(timer_id)?;
                    }
                }
                TimerAction::RemoveProjectile(projectile) => {
                    let mut ctx = self.context.borrow_mut();
                    let ctx = &mut *ctx;
                    ctx.projectiles.remove(&mut ctx.world, projectile);
                    self.classifier.forget_projectile(projectile);
                }
            }
        }

        let (alive, dead): (Vec<_>, Vec<_>) = std::mem::take(&mut self.nodes)
            .into_iter()
            .partition(ScriptNode::is_alive);
        self.nodes = alive;

        let mut ctx = self.context.borrow_mut();
        for node in dead {
            debug!(
                "[Undercroft simulation] {} died at {:?}",
                node.name(),
                node.state().position
            );
            ctx.timers.cancel_entity(node.id());
        }

        let death = ctx.player.check_dead(&self.classifier);
        self.death = death;
        Ok(StepReport {
            effects: std::mem::take(&mut ctx.effects),
            player_events: ctx.player.drain_events(),
            death,
        })
    }

    fn apply_contact_action(&mut self, action: ContactAction) -> Result<(), ScriptError> {
        match action {
            ContactAction::ScriptHit { entity, damage } => {
                if let Some(node) = self.node(entity) {
                    node.hit(damage)?;
                }
            }
            ContactAction::CollisionWithPlayer { entity } => {
                if let Some(node) = self.node(entity) {
                    node.collision_with_player()?;
                }
            }
            action => {
                let mut ctx = self.context.borrow_mut();
                let ctx = &mut *ctx;
                match action {
                    ContactAction::DamagePlayer { amount } => {
                        ctx.player.damage(&mut ctx.world, amount, Vec2::ZERO);
                    }
                    ContactAction::RemoveProjectile {
                        projectile,
                        delay_ms,
                    } => ctx
                        .timers
                        .schedule(delay_ms, TimerAction::RemoveProjectile(projectile)),
                    ContactAction::DeactivateProjectile { projectile } => {
                        ctx.projectiles.deactivate(&mut ctx.world, projectile);
                    }
                    ContactAction::SetGroundBody { body } => ctx.player.set_ground_body(body),
                    ContactAction::SetPlatformBody { body } => ctx.player.set_platform_body(body),
                    ContactAction::ActivateBouncer { mechanism } => {
                        if self.mechanisms.activate_bouncer(mechanism) {
                            let speed = ctx.config.bouncer_speed;
                            ctx.player.bounce(&mut ctx.world, speed);
                        }
                    }
                    ContactAction::PlayerImpulse { impulse } => {
                        ctx.player.impulse(&mut ctx.world, impulse);
                    }
                    ContactAction::ScriptHit { .. } | ContactAction::CollisionWithPlayer { .. } => {}
                }
            }
        }
        Ok(())
    }
}

/// Script failures have no recovery path, the process stops.
pub fn exit_on_script_error(err: &ScriptError) -> ! {
    error!("[Undercroft scripts] {}", err);
    std::process::exit(1)
}

fn step_simulation(
    time: Res<Time<Fixed>>,
    mut simulation: NonSendMut<Simulation>,
    mut bus: ResMut<GameEventBus>,
    mut catalog: ResMut<LevelCatalog>,
) {
    let report = match simulation.step(time.delta_secs()) {
        Ok(report) => report,
        Err(err) => exit_on_script_error(&err),
    };
    publish_report(&report, &mut bus);
    if let Some(reason) = report.death {
        info!("[Undercroft simulation] Player died: {:?}", reason);
        catalog.request_reload();
    }
}

fn publish_report(report: &StepReport, bus: &mut GameEventBus) {
    for (entity, effect) in &report.effects {
        bus.emit_serialized(effect.event_name(), effect, Some(entity.0));
    }
    for event in &report.player_events {
        bus.emit_serialized(event.event_name(), event, None);
    }
    if let Some(reason) = report.death {
        bus.emit_serialized("player_died", &PlayerDied { reason }, None);
    }
}

pub struct SimulationPlugin;

impl Plugin for SimulationPlugin {
    fn build(&self, app: &mut App) {
        let config = app
            .world()
            .get_resource::<GameConfig>()
            .cloned()
            .unwrap_or_default();
        app.insert_non_send_resource(Simulation::new(config))
            .add_systems(
                FixedUpdate,
                step_simulation
                    .run_if(crate::game_runtime::gameplay_systems_enabled)
                    .run_if(crate::level_loader::level_ready),
            );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    const DT: f32 = 1.0 / 60.0;

    struct LevelDir(PathBuf);

    impl LevelDir {
        fn new(tag: &str) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "undercroft_sim_{}_{}",
                tag,
                std::process::id()
            ));
            std::fs::create_dir_all(&dir).expect("temp dir");
            std::fs::write(
                dir.join("crypt.tmx"),
                r#"<map width="4" height="4" tilewidth="24" tileheight="24">
                     <layer name="level" width="4" height="4"><data encoding="csv">
                       0,0,0,0,
                       0,0,0,0,
                       0,0,0,0,
                       1,1,1,1
                     </data></layer>
                   </map>"#,
            )
            .expect("write map");
            Self(dir)
        }

        fn path(&self) -> &Path {
            &self.0
        }

        fn script(&self, name: &str, source: &str) {
            std::fs::write(self.0.join(name), source).expect("write script");
        }

        fn level(&self, description: &str, config: &GameConfig) -> Level {
            std::fs::write(self.0.join("crypt.json"), description).expect("write description");
            Level::load(self.0.join("crypt.json"), config).expect("level")
        }
    }

    impl Drop for LevelDir {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.0).ok();
        }
    }

    fn config() -> GameConfig {
        GameConfig {
            gravity: 0.0,
            ..Default::default()
        }
    }

    const SKELETON: &str = r#"
        function initialize() addShapeRect(0.05, 0.05, 0, 0.15) end
        function retrieveProperties() updateProperties({ damage = 7, staticBody = true, sensor = true }) end
        function update(dt) end
        function timeout(id) end
        function collisionWithPlayer() boom(1, 2, 3) end
    "#;

    #[test]
    fn enemy_touch_hurts_the_player_and_reaches_the_script() {
        let dir = LevelDir::new("touch");
        dir.script("skeleton.lua", SKELETON);
        let config = config();
        let level = dir.level(
            r#"{"filename": "crypt.tmx", "startposition": [1, 1],
                "enemies": [{"script": "skeleton.lua", "startposition": [1, 1]}]}"#,
            &config,
        );

        let mut sim = Simulation::new(config);
        sim.start_level(&level).expect("start");
        assert_eq!(sim.entity_count(), 1);

        let report = sim.step(DT).expect("step");
        assert_eq!(sim.context().borrow().player.health, 93);
        assert_eq!(
            report.effects,
            vec![(
                EntityId(1),
                ScriptEffect::Boom {
                    x: 1.0,
                    y: 2.0,
                    intensity: 3.0
                }
            )]
        );
        assert!(report
            .player_events
            .iter()
            .any(|e| matches!(e, PlayerEvent::DamageTaken { amount: 7, .. })));
        assert_eq!(report.death, None);
    }

    #[test]
    fn timeouts_run_and_dead_entities_leave() {
        let dir = LevelDir::new("timeout");
        dir.script(
            "wisp.lua",
            r#"
            function initialize() timer(10, 3); timer(5000, 4) end
            function retrieveProperties() end
            function update(dt) end
            function timeout(id) boom(id, 0, 0); die() end
            "#,
        );
        let config = config();
        let level = dir.level(
            r#"{"filename": "crypt.tmx", "enemies": [{"script": "wisp.lua", "startposition": [2, 1]}]}"#,
            &config,
        );

        let mut sim = Simulation::new(config);
        sim.start_level(&level).expect("start");
        assert_eq!(sim.context().borrow().timers.len(), 2);

        let report = sim.step(DT).expect("step");
        assert_eq!(report.effects.len(), 1);
        assert!(matches!(
            report.effects[0].1,
            ScriptEffect::Boom { x, .. } if x == 3.0
        ));
        assert_eq!(sim.entity_count(), 0);
        // the pending timer of the removed entity is gone as well
        assert!(sim.context().borrow().timers.is_empty());
    }

    #[test]
    fn deadly_mechanism_kills_once() {
        let dir = LevelDir::new("deadly");
        let config = config();
        let level = dir.level(
            r#"{"filename": "crypt.tmx", "startposition": [1, 1],
                "mechanisms": [{"type": "deadly", "x": 24, "y": 24, "width": 24, "height": 24}]}"#,
            &config,
        );

        let mut sim = Simulation::new(config);
        sim.start_level(&level).expect("start");
        let report = sim.step(DT).expect("step");
        assert_eq!(report.death, Some(DeathReason::TouchesDeadly));

        let steps = sim.steps();
        let report = sim.step(DT).expect("step");
        assert_eq!(report.death, None);
        assert_eq!(sim.steps(), steps);

        sim.start_level(&level).expect("restart");
        assert_eq!(sim.steps(), 0);
        assert_eq!(sim.context().borrow().player.health, 100);
    }

    #[test]
    fn script_failures_surface_as_errors() {
        let dir = LevelDir::new("errors");
        dir.script(
            "broken.lua",
            &SKELETON.replace("function update(dt) end", "function update(dt) error('cracked') end"),
        );
        let config = config();
        let level = dir.level(
            r#"{"filename": "crypt.tmx", "enemies": [{"script": "broken.lua", "startposition": [3, 0]}]}"#,
            &config,
        );
        let mut sim = Simulation::new(config.clone());
        sim.start_level(&level).expect("start");
        let err = sim.step(DT).err().expect("update error");
        assert!(matches!(err, ScriptError::Callback { .. }));
        assert!(err.to_string().contains("cracked"));

        let missing = dir.level(
            r#"{"filename": "crypt.tmx", "enemies": [{"script": "absent.lua", "startposition": [3, 0]}]}"#,
            &config,
        );
        let err = sim.start_level(&missing).err().expect("missing script");
        assert!(matches!(err, ScriptError::Io { .. }));
        assert!(dir.path().join("broken.lua").exists());
    }

    #[test]
    fn reports_become_game_events() {
        let mut bus = GameEventBus::default();
        let report = StepReport {
            effects: vec![(
                EntityId(4),
                ScriptEffect::SamplePlayed {
                    sample: "growl.wav".into(),
                    volume: 0.5,
                },
            )],
            player_events: vec![PlayerEvent::Bounced { speed: 9.0 }],
            death: Some(DeathReason::Smashed),
        };
        publish_report(&report, &mut bus);

        let sample = bus.named("sample_played").next().expect("sample event");
        assert_eq!(sample.source_entity, Some(4));
        assert_eq!(sample.data["sample"], "growl.wav");
        assert_eq!(bus.named("bounced").count(), 1);
        let died = bus.named("player_died").next().expect("death event");
        assert_eq!(died.data["reason"], "Smashed");
    }
}
