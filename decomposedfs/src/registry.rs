//! Routing of spaces to the trees storing them.
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{
    context::RequestContext,
    errors::Error,
    ids::{Reference, SpaceId},
    node::Node,
    spaces::{CreateSpace, Space, SpaceFilter, SpaceType},
    tree::Tree,
};

struct Provider {
    id: String,
    space_types: Vec<SpaceType>,
    tree: Arc<Tree>,
}

/// A space together with the provider storing it.
pub struct ResolvedSpace {
    pub provider_id: String,
    pub tree: Arc<Tree>,
    pub space: Space,
}

/// Knows all providers and which space types each of them accepts.
#[derive(Default)]
pub struct SpaceRegistry {
    providers: Vec<Provider>,
}

impl SpaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tree` as provider `id`, accepting new spaces of
    /// `space_types`. Rules are evaluated in registration order.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        space_types: impl IntoIterator<Item = SpaceType>,
        tree: Arc<Tree>,
    ) -> Result<(), Error> {
        let id = id.into();
        if self.providers.iter().any(|p| p.id == id) {
            return Err(Error::AlreadyExists(format!("provider {id}")));
        }
        self.providers.push(Provider {
            id,
            space_types: space_types.into_iter().collect(),
            tree,
        });
        Ok(())
    }

    /// The first provider accepting spaces of `space_type`.
    pub fn provider_for(&self, space_type: SpaceType) -> Result<(&str, &Arc<Tree>), Error> {
        self.providers
            .iter()
            .find(|p| p.space_types.contains(&space_type))
            .map(|p| (p.id.as_str(), &p.tree))
            .ok_or_else(|| {
                Error::NotSupported(format!("no provider for spaces of type {space_type}"))
            })
    }

    #[instrument(skip_all, err, fields(space = %space_id))]
    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        space_id: &SpaceId,
    ) -> Result<ResolvedSpace, Error> {
        for provider in &self.providers {
            match provider.tree.read_space(ctx, space_id).await {
                Ok(space) => {
                    return Ok(ResolvedSpace {
                        provider_id: provider.id.clone(),
                        tree: provider.tree.clone(),
                        space,
                    })
                }
                Err(e) if e.is_not_found() => {
                    debug!(provider = %provider.id, "space not stored by provider");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::NotFound(format!("space {space_id}")))
    }

    /// Resolves the space of `r` and the node it points to.
    pub async fn resolve_reference(
        &self,
        ctx: &RequestContext,
        r: &Reference,
    ) -> Result<(ResolvedSpace, Node), Error> {
        let resolved = self.resolve(ctx, &r.resource_id.space_id).await?;
        let node = resolved.tree.lookup().node_from_resource(r)?;
        Ok((resolved, node))
    }

    /// Lists the spaces of all providers that may hold spaces matching
    /// `filter`.
    pub async fn list_spaces(
        &self,
        ctx: &RequestContext,
        filter: &SpaceFilter,
    ) -> Result<Vec<Space>, Error> {
        let mut spaces = Vec::new();
        for provider in &self.providers {
            if let Some(t) = filter.space_type {
                if !provider.space_types.contains(&t) {
                    continue;
                }
            }
            spaces.extend(provider.tree.list_spaces(ctx, filter).await?);
        }
        Ok(spaces)
    }

    /// Creates a space in the provider accepting its type.
    pub async fn create_space(
        &self,
        ctx: &RequestContext,
        req: CreateSpace,
    ) -> Result<ResolvedSpace, Error> {
        let (provider_id, tree) = self.provider_for(req.space_type)?;
        let space = tree.create_space(ctx, req).await?;
        Ok(ResolvedSpace {
            provider_id: provider_id.to_string(),
            tree: tree.clone(),
            space,
        })
    }
}
