//! Input injection collaborators.
//!
//! Sessions never drive the platform input API directly; they hand decoded
//! events to an [`InputInjector`]. The server shares one injector across all
//! sessions behind a mutex — platform input simulation is not assumed
//! reentrant.

pub mod simulate;

use anyhow::Result;

use crate::protocol::{KeyboardEvent, MouseEvent};

/// Injection collaborator: replays mouse and keyboard events on the local
/// desktop.
pub trait InputInjector: Send {
    fn mouse(&mut self, event: &MouseEvent) -> Result<()>;
    fn keyboard(&mut self, event: &KeyboardEvent) -> Result<()>;
}
