use bevy::prelude::*;
use bevy::utils::Instant;

use crate::events::GameEventBus;

#[derive(States, Default, Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum GameFlowState {
    #[default]
    Loading,
    Playing,
    Paused,
    GameOver,
}

impl GameFlowState {
    fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "loading" => Some(Self::Loading),
            "playing" => Some(Self::Playing),
            "paused" => Some(Self::Paused),
            "gameover" | "game_over" => Some(Self::GameOver),
            _ => None,
        }
    }
}

#[derive(Resource, Clone)]
pub struct RuntimeState {
    pub state: GameFlowState,
    entered_at: Instant,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            state: GameFlowState::Loading,
            entered_at: Instant::now(),
        }
    }
}

impl RuntimeState {
    pub fn set_state(&mut self, to: GameFlowState) {
        if self.state == to {
            return;
        }
        info!(
            "[Undercroft runtime] {:?} -> {:?} after {:.1}s",
            self.state,
            to,
            self.entered_at.elapsed().as_secs_f32()
        );
        self.state = to;
        self.entered_at = Instant::now();
    }

    pub fn is_gameplay_active(&self) -> bool {
        self.state == GameFlowState::Playing
    }
}

pub fn gameplay_systems_enabled(
    state: Option<Res<State<GameFlowState>>>,
    runtime: Option<Res<RuntimeState>>,
) -> bool {
    if let Some(state) = state {
        return *state.get() == GameFlowState::Playing;
    }
    runtime.map(|r| r.is_gameplay_active()).unwrap_or(false)
}

/// Systems that turn bus events into flow state changes.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuntimeSystems;

#[derive(Resource, Default)]
struct RuntimeEventCursor {
    last_frame: u64,
    processed_in_frame: usize,
}

fn sync_bevy_state_from_runtime(
    runtime: Res<RuntimeState>,
    state: Res<State<GameFlowState>>,
    mut next_state: ResMut<NextState<GameFlowState>>,
) {
    if state.get() != &runtime.state {
        next_state.set(runtime.state);
    }
}

fn apply_runtime_events(
    bus: Res<GameEventBus>,
    mut runtime: ResMut<RuntimeState>,
    mut cursor: ResMut<RuntimeEventCursor>,
) {
    let mut count_in_frame = 0usize;
    for ev in bus.recent.iter() {
        if ev.frame < cursor.last_frame {
            continue;
        }
        if ev.frame == cursor.last_frame {
            count_in_frame = count_in_frame.saturating_add(1);
            if count_in_frame <= cursor.processed_in_frame {
                continue;
            }
        } else {
            count_in_frame = 1;
        }

        match ev.name.as_str() {
            "game_pause" if runtime.state == GameFlowState::Playing => {
                runtime.set_state(GameFlowState::Paused);
            }
            "game_resume" if runtime.state == GameFlowState::Paused => {
                runtime.set_state(GameFlowState::Playing);
            }
            "level_loading" => runtime.set_state(GameFlowState::Loading),
            "level_ready" => runtime.set_state(GameFlowState::Playing),
            "game_over" => runtime.set_state(GameFlowState::GameOver),
            "game_transition" => {
                let to = ev
                    .data
                    .get("to")
                    .and_then(|v| v.as_str())
                    .and_then(GameFlowState::from_label);
                match to {
                    Some(to) => runtime.set_state(to),
                    None => warn!("[Undercroft runtime] Ignoring transition to unknown state"),
                }
            }
            _ => {}
        }

        cursor.last_frame = ev.frame;
        cursor.processed_in_frame = count_in_frame;
    }
}

pub struct RuntimeStatePlugin;

impl Plugin for RuntimeStatePlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(RuntimeState::default())
            .insert_resource(RuntimeEventCursor::default())
            .init_state::<GameFlowState>()
            .add_systems(
                Update,
                (apply_runtime_events, sync_bevy_state_from_runtime)
                    .chain()
                    .in_set(RuntimeSystems),
            );
    }
}
