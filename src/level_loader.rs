//! Level list bookkeeping and background level loading.
//!
//! Parsing a level (description, tile map, collision grid) runs on a worker thread and hands the
//! result back over a channel that the main loop polls once per frame. Starting the level in the
//! simulation happens on the main thread because script states are not `Send`.

use std::path::{Path, PathBuf};

use bevy::prelude::*;
use crossbeam_channel::{Receiver, TryRecvError};

use crate::components::GameConfig;
use crate::events::GameEventBus;
use crate::level::{Level, LevelError, LevelList};
use crate::simulation::{exit_on_script_error, Simulation};

/// Levels listed in `levels.json` and which one should run next.
#[derive(Resource)]
pub struct LevelCatalog {
    base_dir: PathBuf,
    levels: LevelList,
    current: usize,
    requested: Option<usize>,
}

impl LevelCatalog {
    /// Level names resolve relative to the list file.
    pub fn new(list_path: &Path, levels: LevelList, start_index: usize) -> Self {
        Self {
            base_dir: list_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            levels,
            current: start_index,
            requested: Some(start_index),
        }
    }

    pub fn load(list_path: &Path, start_index: usize) -> Result<Self, LevelError> {
        let levels = LevelList::load(list_path)?;
        levels.get(start_index)?;
        Ok(Self::new(list_path, levels, start_index))
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn request_reload(&mut self) {
        self.requested = Some(self.current);
    }

    fn take_request(&mut self) -> Option<usize> {
        self.requested.take()
    }

    pub fn description_path(&self, index: usize) -> Result<PathBuf, LevelError> {
        let item = self.levels.get(index)?;
        Ok(self.base_dir.join(&item.levelname))
    }
}

/// One level parse running on a worker thread.
pub struct LevelLoadTask {
    path: PathBuf,
    receiver: Receiver<Result<Level, LevelError>>,
}

impl LevelLoadTask {
    pub fn spawn(path: PathBuf, config: GameConfig) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let worker_path = path.clone();
        std::thread::spawn(move || {
            let result = Level::load(&worker_path, &config);
            // the receiver is gone when a newer load replaced this one
            sender.send(result).ok();
        });
        Self { path, receiver }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` while the worker is still busy.
    pub fn poll(&self) -> Option<Result<Level, LevelError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(LevelError::LoaderStopped(
                self.path.display().to_string(),
            ))),
        }
    }
}

#[derive(Default)]
pub enum LevelLoadState {
    #[default]
    Idle,
    Loading(LevelLoadTask),
    Ready,
}

#[derive(Resource, Default)]
pub struct LevelLoader {
    pub state: LevelLoadState,
}

impl LevelLoader {
    pub fn is_ready(&self) -> bool {
        matches!(self.state, LevelLoadState::Ready)
    }
}

/// Run condition for systems that need a started level.
pub fn level_ready(loader: Option<Res<LevelLoader>>) -> bool {
    loader.is_some_and(|l| l.is_ready())
}

fn exit_on_level_error(err: &LevelError) -> ! {
    error!("[Undercroft level] {}", err);
    std::process::exit(1)
}

fn start_requested_level(
    mut catalog: ResMut<LevelCatalog>,
    mut loader: ResMut<LevelLoader>,
    config: Res<GameConfig>,
    mut bus: ResMut<GameEventBus>,
) {
    let Some(index) = catalog.take_request() else {
        return;
    };
    let path = match catalog.description_path(index) {
        Ok(path) => path,
        Err(err) => exit_on_level_error(&err),
    };
    catalog.current = index;
    info!("[Undercroft level] Loading level {} from {}", index, path.display());
    bus.emit(
        "level_loading",
        serde_json::json!({ "index": index, "path": path.display().to_string() }),
        None,
    );
    loader.state = LevelLoadState::Loading(LevelLoadTask::spawn(path, config.clone()));
}

fn finish_level_load(
    mut loader: ResMut<LevelLoader>,
    mut simulation: NonSendMut<Simulation>,
    catalog: Res<LevelCatalog>,
    mut bus: ResMut<GameEventBus>,
) {
    let LevelLoadState::Loading(task) = &loader.state else {
        return;
    };
    let Some(result) = task.poll() else {
        return;
    };
    let path = task.path().display().to_string();
    let level = match result {
        Ok(level) => level,
        Err(err) => exit_on_level_error(&err),
    };
    if let Err(err) = simulation.start_level(&level) {
        exit_on_script_error(&err);
    }
    loader.state = LevelLoadState::Ready;
    info!("[Undercroft level] {} ready", path);
    bus.emit(
        "level_ready",
        serde_json::json!({
            "index": catalog.current(),
            "entities": simulation.entity_count(),
        }),
        None,
    );
}

pub struct LevelPlugin;

impl Plugin for LevelPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<LevelLoader>().add_systems(
            Update,
            (start_requested_level, finish_level_load)
                .chain()
                .before(crate::game_runtime::RuntimeSystems),
        );
    }
}
