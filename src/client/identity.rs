//! Client identity: display name, persistent UUID and assigned color.

use crate::protocol::ColorTag;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

/// Who this client is for the duration of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub display_name: String,
    /// Hyphenated, 36 characters, stable across runs.
    pub uuid: String,
    /// Assigned by the server from its arrival order.
    pub display_color: ColorTag,
}

/// Read this client's UUID from `path`, generating and saving a new one if
/// the file is missing or does not hold a valid UUID.
pub fn load_or_create_uuid(path: &Path) -> io::Result<Uuid> {
    match fs::read_to_string(path) {
        Ok(contents) => match Uuid::parse_str(contents.trim()) {
            Ok(uuid) => {
                debug!(path = %path.display(), %uuid, "Loaded client uuid");
                return Ok(uuid);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid uuid file, regenerating");
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let uuid = Uuid::new_v4();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, format!("{}\n", uuid.hyphenated()))?;
    debug!(path = %path.display(), %uuid, "Generated client uuid");
    Ok(uuid)
}

/// Normalize a typed display name: drop the line ending and surrounding
/// whitespace.
pub fn clean_name(raw: &str) -> String {
    raw.trim_end_matches(['\n', '\r']).trim().to_string()
}
