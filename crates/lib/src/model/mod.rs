//! Package data model.
//!
//! Immutable value types shared by every stage of the pipeline:
//! - `PackageId`: the `(namespace, name, version)` identity tuple
//! - `Package`: an identity plus its type tag and declared dependencies
//! - `Artifact`: one build of a package, keyed additionally by build number

mod types;

pub use types::{Artifact, ArtifactKey, Dependencies, DependencyKind, Package, PackageId, ParsePackageIdError};
