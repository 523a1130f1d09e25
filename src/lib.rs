// Matchday - backend building blocks for the Matchday football service
//
// This library re-exports the workspace crates behind feature flags so
// applications can depend on a single crate.

// Re-export optional crates
#[cfg(feature = "cache")]
pub use matchday_cache as cache;

// Prelude for common imports
#[cfg(feature = "cache")]
pub mod prelude {
    pub use matchday_cache::prelude::*;
}
