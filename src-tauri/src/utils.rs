use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

pub fn app_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("app", "provador", "provador")
        .ok_or_else(|| anyhow!("cannot resolve project dirs"))
}

pub fn ensure_data_dir() -> Result<PathBuf> {
    let dirs = app_dirs()?;
    let data_dir = dirs.data_dir().to_path_buf();
    fs::create_dir_all(&data_dir).context("create data dir")?;
    Ok(data_dir)
}

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

pub fn now_iso() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
