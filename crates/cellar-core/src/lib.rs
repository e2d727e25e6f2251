//! Cellar Core — domain models, error taxonomy, repository traits and
//! the static tier policy shared by every other crate.

pub mod clock;
pub mod error;
pub mod models;
pub mod repository;
pub mod tier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CellarError, CellarResult};
pub use tier::{Feature, TierLimits};
