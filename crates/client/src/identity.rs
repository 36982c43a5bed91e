//! Durable per-install state id.
//!
//! Generated once, stored under `~/.coinstreak/`, and reused on every later
//! load so the same server record is picked up. If the home directory is
//! unavailable or unwritable we fall back to an ephemeral id: the game still
//! runs, it just won't find its old record next time.

use std::fs;
use std::path::PathBuf;

use tracing::warn;
use uuid::Uuid;

const ID_FILE: &str = "client-id";

pub fn load_or_create_state_id() -> String {
    let Some(path) = id_path() else {
        warn!("no home directory; using ephemeral state id");
        return Uuid::new_v4().to_string();
    };

    if let Ok(existing) = fs::read_to_string(&path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return existing.to_string();
        }
    }

    let id = Uuid::new_v4().to_string();
    if let Some(dir) = path.parent() {
        if let Err(e) = fs::create_dir_all(dir) {
            warn!("cannot create {}: {e}; state id is ephemeral", dir.display());
            return id;
        }
    }
    if let Err(e) = fs::write(&path, &id) {
        warn!("cannot write {}: {e}; state id is ephemeral", path.display());
    }
    id
}

fn id_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".coinstreak").join(ID_FILE))
}
