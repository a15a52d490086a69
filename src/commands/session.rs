use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EXAMPLE_CONFIG, GuardToolConfig, default_config_path, load_config};
use crate::guard::{FileStore, GuardRunner, SessionGuard, SystemClock, complete_session};

/// Load the configuration, falling back to defaults when no file exists.
pub fn resolve_config(path: Option<PathBuf>) -> Result<GuardToolConfig> {
    let path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if path.exists() {
        load_config(&path)
    } else {
        Ok(GuardToolConfig::default())
    }
}

/// Write the example configuration file.
pub fn init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match config_path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if path.exists() && !force {
        anyhow::bail!(
            "configuration file already exists: {}\nUse --force to overwrite",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;
    }

    std::fs::write(&path, EXAMPLE_CONFIG)
        .with_context(|| format!("failed to write config file: {}", path.display()))?;

    println!("✓ Created configuration file: {}", path.display());
    Ok(())
}

fn make_guard(config: &GuardToolConfig, key: &str, duration_secs: u64) -> Result<SessionGuard> {
    let store = Arc::new(FileStore::new(&config.storage_dir()?));
    Ok(SessionGuard::new(
        key,
        duration_secs,
        store,
        Arc::new(SystemClock),
        config.guard_config(),
    ))
}

/// Start (or resume) the countdown for a session.
pub fn start(config: &GuardToolConfig, key: &str, duration_secs: u64) -> Result<()> {
    let mut guard = make_guard(config, key, duration_secs)?;
    let session = guard.start()?;
    let remaining = guard.tick()?;

    println!(
        "Session {} running since {}",
        key,
        session.start_time.to_rfc3339()
    );
    println!("{remaining} seconds remaining");
    Ok(())
}

/// Show remaining time for a session without starting one.
pub fn status(config: &GuardToolConfig, key: &str, duration_secs: u64) -> Result<()> {
    let mut guard = make_guard(config, key, duration_secs)?;

    match guard.restore()? {
        Some(session) => {
            let remaining = guard.tick()?;
            if remaining == 0 {
                println!("Session {key} has expired");
            } else {
                println!(
                    "Session {} running since {}",
                    key,
                    session.start_time.to_rfc3339()
                );
                println!("{remaining} seconds remaining");
            }
        }
        None => println!("No persisted session for {key}"),
    }

    Ok(())
}

/// Run the countdown until it expires.
pub async fn watch(config: &GuardToolConfig, key: &str, duration_secs: u64) -> Result<()> {
    let mut guard = make_guard(config, key, duration_secs)?;
    guard.start()?;

    let session_key = key.to_string();
    guard.on_expire(move || {
        println!("Time is up for session {session_key} - submit now");
    });

    let remaining = guard.tick()?;
    println!("Watching session {key}: {remaining} seconds remaining");

    let runner = GuardRunner::new(guard, Duration::from_secs(config.tick_interval_secs.max(1)));
    runner.start().await?;

    while runner.is_running().await {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    Ok(())
}

/// Clear persisted state for a finished or abandoned session.
pub fn complete(config: &GuardToolConfig, key: &str) -> Result<()> {
    let store = FileStore::new(&config.storage_dir()?);
    complete_session(&store, key)?;
    println!("Cleared session {key}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> GuardToolConfig {
        GuardToolConfig {
            storage_dir: Some(dir.to_path_buf()),
            ..GuardToolConfig::default()
        }
    }

    #[test]
    fn test_start_then_complete_clears_state() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        start(&config, "user1_round42", 600).unwrap();

        let mut guard = make_guard(&config, "user1_round42", 600).unwrap();
        assert!(guard.restore().unwrap().is_some());

        complete(&config, "user1_round42").unwrap();

        let mut guard = make_guard(&config, "user1_round42", 600).unwrap();
        assert!(guard.restore().unwrap().is_none());
    }

    #[test]
    fn test_status_without_session_is_ok() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        status(&config, "user1_round42", 600).unwrap();
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("round-guard.yaml");

        init(Some(path.clone()), false).unwrap();
        assert!(init(Some(path.clone()), false).is_err());
        init(Some(path), true).unwrap();
    }

    #[test]
    fn test_resolve_config_defaults_when_missing() {
        let dir = tempdir().unwrap();
        let config = resolve_config(Some(dir.path().join("absent.yaml"))).unwrap();
        assert_eq!(config.tick_interval_secs, 1);
    }
}
