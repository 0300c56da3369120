//! Charm state that outlives a single hook invocation.

use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use error_stack::Report;
use error_stack::ResultExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::CharmError;
use crate::error::CharmResult;

/// A record of type `T` persisted as JSON in one file.
///
/// The record is loaded once when the store is opened and written back only
/// when an [`update`](Self::update) actually changes it. New files are
/// created readable by the owner only, since the record may hold key material.
pub struct StateStore<T> {
    path: PathBuf,
    state: Mutex<T>,
}

impl<T> StateStore<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + PartialEq,
{
    /// Loads `path`, or starts from `T::default()` if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> CharmResult<Self> {
        let path = path.into();
        let state = if path.exists() {
            let raw = fs::read_to_string(&path).change_context_lazy(|| state_failed(&path, "read"))?;
            serde_json::from_str(&raw).change_context_lazy(|| state_failed(&path, "parse"))?
        } else {
            debug!(path = %path.display(), "no persisted state yet");
            T::default()
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> CharmResult<T> {
        let state = self
            .state
            .lock()
            .map_err(|_| Report::new(state_failed(&self.path, "lock")))?;
        Ok(state.clone())
    }

    /// Applies `f` to the record and saves it if anything changed.
    /// Returns whether it was saved.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> CharmResult<bool> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Report::new(state_failed(&self.path, "lock")))?;

        let mut next = state.clone();
        f(&mut next);
        if next == *state {
            return Ok(false);
        }

        let raw =
            serde_json::to_string_pretty(&next).change_context_lazy(|| state_failed(&self.path, "serialize"))?;
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).change_context_lazy(|| state_failed(&self.path, "create"))?;
        }
        write_private(&self.path, raw.as_bytes())
            .change_context_lazy(|| state_failed(&self.path, "write"))?;
        *state = next;
        debug!(path = %self.path.display(), "saved state");
        Ok(true)
    }
}

fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn state_failed(path: &Path, action: &str) -> CharmError {
    CharmError::State {
        message: format!("failed to {action} {}", path.display()),
    }
}
