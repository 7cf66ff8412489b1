use std::collections::VecDeque;

use bevy::prelude::*;
use serde::Serialize;

const EVENT_CAPACITY: usize = 500;

#[derive(Serialize, Clone, Debug)]
pub struct GameEvent {
    pub name: String,
    pub data: serde_json::Value,
    pub frame: u64,
    pub source_entity: Option<u64>,
}

/// Bounded log of gameplay events for the presentation layers (audio, effects, hud). Once full,
/// each new event pushes out the oldest one.
#[derive(Resource, Default)]
pub struct GameEventBus {
    pub recent: VecDeque<GameEvent>,
    pub frame: u64,
    overflowed: bool,
}

impl GameEventBus {
    pub fn emit(
        &mut self,
        name: impl Into<String>,
        data: serde_json::Value,
        source_entity: Option<u64>,
    ) {
        if self.recent.len() >= EVENT_CAPACITY {
            self.recent.pop_front();
            if !self.overflowed {
                self.overflowed = true;
                warn!(
                    "[Undercroft events] Event log full, only the last {} events are kept",
                    EVENT_CAPACITY
                );
            }
        }
        self.recent.push_back(GameEvent {
            name: name.into(),
            data,
            frame: self.frame,
            source_entity,
        });
    }

    /// Emits a serializable payload, events that fail to serialize are logged and skipped.
    pub fn emit_serialized<T: Serialize>(
        &mut self,
        name: impl Into<String>,
        payload: &T,
        source_entity: Option<u64>,
    ) {
        let name = name.into();
        match serde_json::to_value(payload) {
            Ok(data) => self.emit(name, data, source_entity),
            Err(err) => warn!("[Undercroft events] Could not serialize '{}': {}", name, err),
        }
    }

    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a GameEvent> + 'a {
        self.recent.iter().filter(move |ev| ev.name == name)
    }
}

pub struct GameEventsPlugin;

impl Plugin for GameEventsPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(GameEventBus::default()).add_systems(
            FixedUpdate,
            tick_event_frame.run_if(crate::game_runtime::gameplay_systems_enabled),
        );
    }
}

fn tick_event_frame(mut bus: ResMut<GameEventBus>) {
    bus.frame = bus.frame.saturating_add(1);
}
