// Queries over the built index: import resolution, closure, navigation

pub mod closure;
pub mod imports;
pub mod navigator;

pub use closure::{ClosureResolver, ClosureResult};
pub use navigator::{navigate, Navigation};
