//! Storage spaces: independent trees with their own root, trash and quota.
use std::{fmt, io, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::{
    context::RequestContext,
    errors::Error,
    ids::{validate_name, NodeId, SpaceId},
    layout::Layout,
    metadata::keys,
    node::{Node, NodeType},
    tree::Tree,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceType {
    Personal,
    Project,
    #[serde(rename = "mountpoint")]
    ShareMountpoint,
    Grant,
    PublicLink,
    Virtual,
}

impl SpaceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SpaceType::Personal => "personal",
            SpaceType::Project => "project",
            SpaceType::ShareMountpoint => "mountpoint",
            SpaceType::Grant => "grant",
            SpaceType::PublicLink => "publiclink",
            SpaceType::Virtual => "virtual",
        }
    }

    pub const ALL: [SpaceType; 6] = [
        SpaceType::Personal,
        SpaceType::Project,
        SpaceType::ShareMountpoint,
        SpaceType::Grant,
        SpaceType::PublicLink,
        SpaceType::Virtual,
    ];
}

impl fmt::Display for SpaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpaceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpaceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidRequest(format!("unknown space type {s:?}")))
    }
}

/// A space as described by the attributes of its root node.
#[derive(Clone, Debug, Serialize)]
pub struct Space {
    pub id: SpaceId,
    pub space_type: SpaceType,
    pub name: String,
    pub owner: Option<String>,
    /// None means unlimited.
    pub quota: Option<u64>,
    pub tree_size: u64,
    pub mtime: Option<DateTime<Utc>>,
    pub disabled: bool,
    #[serde(skip)]
    pub root: Node,
}

#[derive(Clone, Debug)]
pub struct CreateSpace {
    pub space_type: SpaceType,
    pub name: String,
    pub owner: Option<String>,
    pub quota: Option<u64>,
    /// Defaults to the owner id for personal spaces and to a random id
    /// otherwise.
    pub id: Option<SpaceId>,
}

impl CreateSpace {
    pub fn new(space_type: SpaceType, name: impl Into<String>) -> Self {
        Self {
            space_type,
            name: name.into(),
            owner: None,
            quota: None,
            id: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_quota(mut self, quota: u64) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn with_id(mut self, id: SpaceId) -> Self {
        self.id = Some(id);
        self
    }

    fn space_id(&self) -> Result<SpaceId, Error> {
        if let Some(id) = &self.id {
            return Ok(id.clone());
        }
        match (&self.space_type, &self.owner) {
            (SpaceType::Personal, Some(owner)) => Ok(NodeId::try_from(owner.as_str())?),
            (SpaceType::Personal, None) => Err(Error::InvalidRequest(
                "personal spaces need an owner".into(),
            )),
            _ => Ok(NodeId::new_random()),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SpaceFilter {
    pub space_type: Option<SpaceType>,
    pub include_disabled: bool,
}

impl SpaceFilter {
    pub fn matches(&self, space: &Space) -> bool {
        (self.include_disabled || !space.disabled)
            && self.space_type.map_or(true, |t| t == space.space_type)
    }
}

impl Tree {
    /// Creates a space with an empty root directory and registers it in the
    /// by-type index.
    #[instrument(skip_all, err, fields(space.type = %req.space_type, space.name = %req.name))]
    pub async fn create_space(&self, ctx: &RequestContext, req: CreateSpace) -> Result<Space, Error> {
        validate_name(&req.name)?;
        let id = req.space_id()?;
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let layout = self.lookup().layout();
        let root = Node::new(
            layout,
            id.clone(),
            id.clone(),
            None,
            &req.name,
            NodeType::Container,
        );
        if let Some(dir) = root.internal_path().parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::create_dir(root.internal_path())
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => Error::AlreadyExists(format!("space {id}")),
                _ => e.into(),
            })?;

        if let Err(e) = self.init_space_root(layout, &root, &req).await {
            self.remove_orphan(&root).await;
            return Err(e);
        }
        self.read_space(ctx, &id).await
    }

    async fn init_space_root(
        &self,
        layout: &Layout,
        root: &Node,
        req: &CreateSpace,
    ) -> Result<(), Error> {
        let mut attrs = root.node_metadata();
        attrs
            .set_u64(keys::TREE_SIZE, 0)
            .set_time(keys::MTIME, &Utc::now())
            .set_str(keys::SPACE_NAME, &req.name)
            .set_str(keys::SPACE_TYPE, req.space_type.as_str());
        if self.options().propagation_enabled() {
            attrs.set_str(keys::PROPAGATION, "1");
        }
        if let Some(owner) = &req.owner {
            attrs.set_str(keys::OWNER_ID, owner);
        }
        if let Some(quota) = req.quota {
            attrs.set_u64(keys::QUOTA, quota);
        }
        self.lookup().set_attrs(root, &attrs)?;

        let index_dir = layout.type_index_dir(req.space_type.as_str());
        tokio::fs::create_dir_all(&index_dir).await?;
        tokio::fs::symlink(
            Layout::type_index_target(&root.space_id),
            layout.type_index_link(req.space_type.as_str(), &root.space_id),
        )
        .await?;
        Ok(())
    }

    /// Reads the space `id` from its root node.
    pub async fn read_space(&self, _ctx: &RequestContext, id: &SpaceId) -> Result<Space, Error> {
        let root = self.lookup().node_from_space_id(id)?;
        let attrs = self.lookup().attrs(&root)?;
        let space_type = attrs
            .get_str(keys::SPACE_TYPE)
            .ok_or_else(|| Error::corrupt(id, "missing space type"))?
            .parse()?;

        Ok(Space {
            id: id.clone(),
            space_type,
            name: attrs
                .get_str(keys::SPACE_NAME)
                .unwrap_or(root.name.as_str())
                .to_string(),
            owner: attrs.get_str(keys::OWNER_ID).map(str::to_string),
            quota: attrs.get_u64(keys::QUOTA).filter(|q| *q > 0),
            tree_size: attrs.tree_size().unwrap_or_default(),
            mtime: attrs.tmtime().or_else(|| attrs.mtime()),
            disabled: attrs.contains(keys::DTIME),
            root,
        })
    }

    /// Lists the spaces of this tree matching `filter`, using the by-type
    /// index.
    pub async fn list_spaces(
        &self,
        ctx: &RequestContext,
        filter: &SpaceFilter,
    ) -> Result<Vec<Space>, Error> {
        let types = match filter.space_type {
            Some(t) => vec![t],
            None => SpaceType::ALL.to_vec(),
        };

        let mut spaces = Vec::new();
        for space_type in types {
            let dir = self.lookup().layout().type_index_dir(space_type.as_str());
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let Ok(id) = NodeId::try_from(name.to_string_lossy().as_ref()) else {
                    warn!(entry = %entry.path().display(), "skipping invalid index entry");
                    continue;
                };
                match self.read_space(ctx, &id).await {
                    Ok(space) if filter.matches(&space) => spaces.push(space),
                    Ok(_) => {}
                    Err(e) => warn!(err = %e, space = %id, "skipping unreadable space"),
                }
            }
        }
        Ok(spaces)
    }

    /// Marks the space as disabled. Its data stays untouched.
    #[instrument(skip_all, err, fields(space = %id))]
    pub async fn disable_space(&self, ctx: &RequestContext, id: &SpaceId) -> Result<(), Error> {
        let space = self.read_space(ctx, id).await?;
        self.lookup()
            .set_attr(&space.root, keys::DTIME, crate::layout::format_time(&Utc::now()))
    }
}
