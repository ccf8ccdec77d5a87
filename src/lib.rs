// Searchkit - typed repositories and bulk indexing for OpenSearch
//
// This crate bundles the repository layer and the logging macros it uses.

// Re-export the repository layer
pub use searchkit_repository::*;

// Re-export logging
pub use searchkit_log as log;

/// Prelude for common imports.
pub mod prelude {
    pub use searchkit_repository::prelude::*;
}
