mod errors;

pub mod binding;
pub mod blobstore;
pub mod context;
pub mod idcache;
pub mod ids;
pub mod layout;
pub mod lookup;
pub mod maintenance;
pub mod metadata;
pub mod node;
pub mod options;
pub mod propagator;
pub mod quota;
pub mod registry;
pub mod spaces;
pub mod tree;

pub use context::{RequestContext, User};
pub use errors::Error;
pub use ids::{NodeId, Reference, ResourceId, SpaceId};
pub use node::{Node, NodeType};
pub use options::Options;
pub use tree::Tree;

#[cfg(test)]
mod fixtures;
#[cfg(test)]
mod tests;
#[cfg(test)]
#[allow(clippy::single_component_path_imports)]
use rstest_reuse;
