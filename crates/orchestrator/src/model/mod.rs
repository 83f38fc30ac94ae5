//! Data model: jobs, units of work, resources, and their status machine

mod job;
mod params;
mod resource;
mod status;
mod unit;

pub use job::{Job, JobKind, NewJob};
pub use params::{PipelineParams, PixelPreset};
pub use resource::{Resource, ResourceKind};
pub use status::TaskStatus;
pub use unit::{NewUnit, Platform, Unit, UnitKind};
