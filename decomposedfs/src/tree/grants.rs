use tracing::instrument;

use super::Tree;
use crate::{
    context::RequestContext,
    errors::Error,
    node::{
        grants::{read_grants, Grant, Grantee},
        Node,
    },
};

impl Tree {
    /// Adds or replaces the grant of `grant.grantee` on `node`.
    #[instrument(skip_all, err, fields(node.id = %node.id, grantee = ?grant.grantee))]
    pub async fn add_grant(&self, ctx: &RequestContext, node: &Node, grant: &Grant) -> Result<(), Error> {
        if !node.exists {
            return Err(Error::NotFound(format!("node {}", node.id)));
        }
        self.check_lock(ctx, node).await?;
        let _guard = self.lookup.locks().lock(node.internal_path()).await;
        self.lookup
            .set_attr(node, &grant.grantee.attr_key(), grant.encode()?)
    }

    #[instrument(skip_all, err, fields(node.id = %node.id, grantee = ?grantee))]
    pub async fn remove_grant(
        &self,
        ctx: &RequestContext,
        node: &Node,
        grantee: &Grantee,
    ) -> Result<(), Error> {
        if !node.exists {
            return Err(Error::NotFound(format!("node {}", node.id)));
        }
        self.check_lock(ctx, node).await?;
        let _guard = self.lookup.locks().lock(node.internal_path()).await;
        self.lookup.remove_attr(node, &grantee.attr_key())
    }

    pub async fn list_grants(&self, _ctx: &RequestContext, node: &Node) -> Result<Vec<Grant>, Error> {
        read_grants(&self.lookup.attrs(node)?)
    }
}
