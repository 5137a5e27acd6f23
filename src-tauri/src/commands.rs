use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tauri::Manager;
use tracing::{error, info};

use crate::assets::{save_image_to_disk, ImageAsset};
use crate::gemini::GeminiClient;
use crate::logging::init_logging;
use crate::session::{SessionController, SessionView};
use crate::settings::{ensure_settings_file, Settings};
use crate::utils::{ensure_data_dir, log_dir};

#[derive(Clone)]
struct AppState {
    session: Arc<SessionController<GeminiClient>>,
    data_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct AppHealth {
    ok: bool,
    data_dir: String,
    model: String,
}

// ===== Tauri Commands =====

#[tauri::command]
async fn health(state: tauri::State<'_, AppState>) -> Result<AppHealth, String> {
    Ok(AppHealth {
        ok: true,
        data_dir: state.data_dir.display().to_string(),
        model: state.session.editor().model().to_string(),
    })
}

#[tauri::command]
fn get_session(state: tauri::State<'_, AppState>) -> SessionView {
    state.session.snapshot()
}

/// Accepts a selected image and lets the asset protocol serve that one file
/// for its preview. The configured scope is empty.
fn select_image(app: &tauri::AppHandle, path: String) -> Result<ImageAsset, String> {
    let asset = ImageAsset::from_path(path).map_err(|e| e.user_message())?;
    if let Some(file) = asset.file_path() {
        app.asset_protocol_scope()
            .allow_file(file)
            .map_err(|e| e.to_string())?;
    }
    Ok(asset)
}

#[tauri::command]
fn set_primary_image(
    app: tauri::AppHandle,
    state: tauri::State<'_, AppState>,
    path: String,
) -> Result<SessionView, String> {
    let asset = select_image(&app, path)?;
    Ok(state.session.set_primary_image(asset))
}

#[tauri::command]
fn set_garment_image(
    app: tauri::AppHandle,
    state: tauri::State<'_, AppState>,
    path: String,
) -> Result<SessionView, String> {
    let asset = select_image(&app, path)?;
    Ok(state.session.set_garment_image(asset))
}

#[tauri::command]
fn clear_garment_image(state: tauri::State<'_, AppState>) -> SessionView {
    state.session.clear_garment_image()
}

#[tauri::command]
fn set_instruction(state: tauri::State<'_, AppState>, instruction: String) -> SessionView {
    state.session.set_instruction(instruction)
}

/// Failures land in the returned view's `error`, not in the command result.
#[tauri::command]
async fn submit(state: tauri::State<'_, AppState>) -> Result<SessionView, String> {
    state.session.submit().await;
    Ok(state.session.snapshot())
}

#[tauri::command]
async fn save_result(state: tauri::State<'_, AppState>, path: String) -> Result<String, String> {
    let image = state
        .session
        .result_image()
        .ok_or_else(|| "no edited image to save".to_string())?;
    let saved = save_image_to_disk(&image, Path::new(&path))
        .await
        .map_err(|e| e.to_string())?;
    info!(path = %saved.display(), "saved edited image");
    Ok(saved.display().to_string())
}

// ===== Startup and Main =====

fn startup(data_dir: PathBuf) -> Result<AppState> {
    ensure_settings_file(&data_dir)?;
    let settings = Settings::from_env(&data_dir)?;
    info!(model = %settings.model, base_url = %settings.api_base_url, "settings loaded");

    Ok(AppState {
        session: Arc::new(SessionController::new(GeminiClient::new(settings))),
        data_dir,
    })
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let data_dir = ensure_data_dir().expect("data dir unavailable");
    let _log_guard = init_logging(&log_dir(&data_dir)).expect("logging init failed");

    let state = match startup(data_dir) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "startup failed");
            panic!("startup failed: {e:#}");
        }
    };

    tauri::Builder::default()
        .manage(state)
        .plugin(tauri_plugin_opener::init())
        .invoke_handler(tauri::generate_handler![
            health,
            get_session,
            set_primary_image,
            set_garment_image,
            clear_garment_image,
            set_instruction,
            submit,
            save_result
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
