//! Client side of the vault: the typed HTTP API wrapper, the
//! change-signal listener and the interactive shell.

pub mod api;
pub mod listener;
pub mod shell;
