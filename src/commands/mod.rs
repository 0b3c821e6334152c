/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes three top-level command modules:

- `serve`    — Run the engine's periodic sweep until interrupted
- `sweep`    — One-shot expiry sweep pass
- `sessions` — Inspect stored sessions

These handlers are intentionally small and use the library components:
the session store, the buffer, and the sweep.
*/

pub mod serve;
pub mod sessions;
pub mod sweep;

use crate::buffer::MessageBuffer;
use crate::config::Config;
use crate::session::SessionStore;
use directories::ProjectDirs;
use std::path::PathBuf;

/// Open the session store the configuration points at
pub(crate) fn open_store(config: &Config) -> anyhow::Result<SessionStore> {
    let store = match &config.database.path {
        Some(path) => SessionStore::new_with_path(path)?,
        None => SessionStore::new()?,
    };
    Ok(store)
}

/// Open the pre-accept buffer the configuration points at
///
/// Falls back to the in-process backing when no usable sled directory
/// can be determined; `MessageBuffer::open` logs the degradation.
pub(crate) fn open_buffer(config: &Config) -> MessageBuffer {
    let ttl = config.pending_window();
    if config.buffer.in_memory {
        return MessageBuffer::in_memory(ttl);
    }

    let path: Option<PathBuf> = config
        .buffer
        .path
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| {
            ProjectDirs::from("io", "consultd", "consultd").map(|dirs| dirs.data_dir().join("buffer"))
        });

    MessageBuffer::open(path.as_deref(), ttl)
}
