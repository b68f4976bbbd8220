//! Dashboard resource names and the typed server settings.

pub mod resource;
pub mod settings;

pub use resource::Resource;
pub use settings::{Interval, Settings, StatsToggles};
