//! Core library for rdep.
//!
//! A [`Session`] lets a running process declare Maven coordinates on demand,
//! resolve them transitively against an ordered [`RepositoryChain`], settle
//! version clashes with a [`ConflictPolicy`], and download the result into a
//! local [`ArtifactCache`]. The [`LoadedArtifactLedger`] remembers what was
//! already handed to the host so repeated resolutions never load a file twice.

pub mod cache;
pub mod chain;
pub mod config;
pub mod descriptor;
pub mod io;
pub mod ledger;
pub mod metadata;
pub mod paths;
pub mod policy;
pub mod pom;
pub mod reporter;
pub mod resolver;
pub mod session;

pub use cache::ArtifactCache;
pub use chain::{DuplicateRepositoryError, RepositoryChain};
pub use config::{ConfigError, SessionConfig};
pub use descriptor::{OverrideMediator, VirtualModuleDescriptor};
pub use io::transport::{HttpTransport, Transport, TransportError};
pub use ledger::LoadedArtifactLedger;
pub use paths::*;
pub use policy::{ConflictError, ConflictPolicy};
pub use reporter::{NullReporter, Reporter};
pub use resolver::ResolveError;
pub use session::{ResolveOptions, Session, SessionError};

pub use rdep_schema as schema;

/// User Agent string for repository requests
pub const USER_AGENT: &str = concat!("rdep/", env!("CARGO_PKG_VERSION"));
