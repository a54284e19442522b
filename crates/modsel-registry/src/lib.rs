//! Installed module metadata for Modsel: identities, version descriptors,
//! the local registry, manifest loading and the reference dependency resolver.

mod builtin;
mod id;
mod module;
mod registry;
mod resolver;
mod scan;
mod store_json;

pub use builtin::*;
pub use id::*;
pub use module::*;
pub use registry::*;
pub use resolver::*;
pub use scan::*;
pub use store_json::*;

pub use semver::Version;
