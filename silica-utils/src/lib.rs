//! Shared utilities for the silica scheduling backend.
mod errors;
mod id;
mod math;
mod namegenerator;

pub use errors::{Error, SilicaResult};
pub use id::{GSym, Id};
pub use math::bits_needed_for;
pub use namegenerator::NameGenerator;
