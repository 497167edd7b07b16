//! Shared domain model and wire types for the nekoproxy controller/agent fleet.
//!
//! Every entity the Controller's record store owns, the JSON shapes that
//! cross the Controller <-> Agent boundary, and the `config_version`
//! derivation live here so both binaries (and the store crate) depend on one
//! canonical definition.

pub mod model;
pub mod version;
pub mod wire;

pub use model::*;
pub use version::{config_version, VersionInputs};
pub use wire::*;
