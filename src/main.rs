mod components;
mod contact;
mod events;
mod game_runtime;
mod level;
mod level_loader;
mod mechanisms;
mod physics_world;
mod player;
mod property;
mod raycast;
mod scripting;
mod simulation;
mod timer;
mod tmx;
mod weapons;

use std::path::PathBuf;

use bevy::prelude::*;
use components::{GameConfig, HeadlessMode};

#[derive(serde::Deserialize, Default)]
struct StartupConfig {
    window_title: Option<String>,
    window_width: Option<f32>,
    window_height: Option<f32>,
    background_color: Option<[f32; 3]>,
    levels: Option<String>,
    start_level: Option<usize>,
    #[serde(default)]
    game: GameConfig,
}

fn load_startup_config() -> StartupConfig {
    let path = std::env::var("UNDERCROFT_GAME_CONFIG")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "game.json".to_string());
    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<StartupConfig>(&contents) {
            Ok(cfg) => {
                println!("[Undercroft] Loaded startup config from {}", path);
                cfg
            }
            Err(e) => {
                eprintln!("[Undercroft] Failed to parse {}: {}", path, e);
                StartupConfig::default()
            }
        },
        Err(_) => StartupConfig::default(),
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let headless = args.iter().any(|a| a == "--headless");

    let startup_config = load_startup_config();
    // Env vars override game.json values
    let levels_path = std::env::var("UNDERCROFT_LEVELS")
        .ok()
        .filter(|s| !s.is_empty())
        .or(startup_config.levels)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data/config/levels.json"));
    let start_level = std::env::var("UNDERCROFT_START_LEVEL")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .or(startup_config.start_level)
        .unwrap_or(0);

    let catalog = match level_loader::LevelCatalog::load(&levels_path, start_level) {
        Ok(catalog) => catalog,
        Err(e) => {
            eprintln!("[Undercroft] Cannot use level list {}: {}", levels_path.display(), e);
            std::process::exit(1);
        }
    };

    let game_config = startup_config.game;
    let mut app = App::new();

    app.insert_resource(HeadlessMode(headless));

    if headless {
        app.add_plugins(MinimalPlugins);
        app.add_plugins(bevy::state::app::StatesPlugin);
        app.add_plugins(bevy::log::LogPlugin::default());
        println!("[Undercroft] Starting in HEADLESS mode");
    } else {
        let window_title = startup_config
            .window_title
            .unwrap_or_else(|| "Undercroft".to_string());
        let window_width = startup_config.window_width.unwrap_or(960.0);
        let window_height = startup_config.window_height.unwrap_or(540.0);

        app.add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: window_title,
                resolution: (window_width, window_height).into(),
                present_mode: bevy::window::PresentMode::AutoVsync,
                ..default()
            }),
            ..default()
        }));
        let bg = startup_config.background_color.unwrap_or([0.05, 0.04, 0.08]);
        app.insert_resource(ClearColor(Color::srgb(bg[0], bg[1], bg[2])));
        println!("[Undercroft] Starting in WINDOWED mode");
    }

    app.insert_resource(Time::<Fixed>::from_hz(game_config.fixed_hz))
        .insert_resource(game_config)
        .insert_resource(catalog)
        .add_plugins(game_runtime::RuntimeStatePlugin)
        .add_plugins(events::GameEventsPlugin)
        .add_plugins(simulation::SimulationPlugin)
        .add_plugins(level_loader::LevelPlugin);

    app.run();
}
