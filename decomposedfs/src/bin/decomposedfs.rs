use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use decomposedfs::blobstore;
use decomposedfs::maintenance;
use decomposedfs::metadata::Backend;
use decomposedfs::options::{SizeAccounting, DEFAULT_ID_CACHE_CAPACITY, DEFAULT_MAX_CONCURRENCY};
use decomposedfs::spaces::{CreateSpace, SpaceFilter, SpaceType};
use decomposedfs::tree::TouchOptions;
use decomposedfs::{Error, Node, NodeType, Options, RequestContext, SpaceId, Tree, User};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::InspectReader;
use tracing::{info, instrument, Level, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

/// Inspect and modify a decomposed filesystem storage root.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Whether to log in JSON
    #[arg(long)]
    json: bool,

    #[arg(long)]
    log_level: Option<Level>,

    /// The storage root all spaces live below.
    #[arg(long, env = "DECOMPOSEDFS_ROOT")]
    root: PathBuf,

    /// Attribute backend, detected from the storage root if unset.
    #[arg(long, env = "DECOMPOSEDFS_METADATA_BACKEND")]
    metadata_backend: Option<Backend>,

    /// Where blobs are stored, defaults to `fs://<root>/blobs`.
    #[arg(long, env = "DECOMPOSEDFS_BLOBSTORE_ADDR")]
    blobstore_addr: Option<String>,

    #[arg(long, env = "DECOMPOSEDFS_MAX_CONCURRENCY", default_value_t = DEFAULT_MAX_CONCURRENCY)]
    max_concurrency: usize,

    #[arg(long, env = "DECOMPOSEDFS_ID_CACHE_CAPACITY", default_value_t = DEFAULT_ID_CACHE_CAPACITY)]
    id_cache_capacity: usize,

    /// Recompute directory sizes from their children instead of applying deltas.
    #[arg(long, env = "DECOMPOSEDFS_RECOUNT")]
    recount: bool,

    /// User id requests are executed for. Children denied to this user are
    /// hidden from listings.
    #[arg(long, env = "DECOMPOSEDFS_USER")]
    user: Option<String>,

    /// Lock token to present for locked nodes.
    #[arg(long)]
    lock_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Creates the directory structure of an empty storage root.
    Init,
    /// Creates a new space and prints its id.
    CreateSpace {
        #[arg(long, default_value = "project")]
        space_type: SpaceType,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        quota: Option<u64>,
        /// Space id, generated if unset.
        #[arg(long)]
        id: Option<SpaceId>,
        name: String,
    },
    /// Lists the spaces of the storage root.
    Spaces {
        #[arg(long)]
        space_type: Option<SpaceType>,
        #[arg(long)]
        include_disabled: bool,
    },
    Mkdir {
        space: SpaceId,
        path: String,
    },
    Touch {
        space: SpaceId,
        path: String,
    },
    /// Uploads a local file, creating a new revision if the target exists.
    Put {
        space: SpaceId,
        path: String,
        #[clap(value_name = "FILE")]
        src: PathBuf,
    },
    /// Writes the content of a file to stdout.
    Cat {
        space: SpaceId,
        path: String,
    },
    Ls {
        space: SpaceId,
        #[arg(default_value = "")]
        path: String,
    },
    Mv {
        space: SpaceId,
        from: String,
        to: String,
    },
    /// Moves a node to the trash.
    Rm {
        space: SpaceId,
        path: String,
    },
    #[command(subcommand)]
    Trash(TrashCommands),
    /// Recomputes the tree sizes of a space and reports inconsistencies.
    CheckTreesize {
        space: SpaceId,
        /// Write the recomputed sizes back.
        #[arg(long)]
        repair: bool,
    },
    #[command(subcommand)]
    Metadata(MetadataCommands),
}

#[derive(Subcommand)]
enum TrashCommands {
    List {
        space: SpaceId,
        key: Option<String>,
        #[arg(long, default_value = "")]
        path: String,
    },
    Restore {
        space: SpaceId,
        key: String,
        #[arg(long, default_value = "")]
        path: String,
        /// Restore to this path instead of the original location.
        #[arg(long)]
        target: Option<String>,
    },
    Purge {
        space: SpaceId,
        key: String,
        #[arg(long, default_value = "")]
        path: String,
    },
}

#[derive(Subcommand)]
enum MetadataCommands {
    /// Prints all attributes of a node.
    Dump { space: SpaceId, path: String },
    Get {
        space: SpaceId,
        path: String,
        key: String,
    },
    Set {
        space: SpaceId,
        path: String,
        key: String,
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let tracing_handle = decomposedfs_tracing::TracingBuilder::default()
        .level(cli.log_level.unwrap_or(Level::INFO))
        .json(cli.json)
        .enable_progressbar()
        .build()?;

    let tree = open_tree(&cli).await?;
    let ctx = request_context(&cli);
    let mut out = tracing_handle.get_stdout_writer();

    match cli.command {
        Commands::Init => {
            info!(root = %tree.options().root.display(), "storage root initialized");
        }
        Commands::CreateSpace {
            space_type,
            owner,
            quota,
            id,
            name,
        } => {
            let mut req = CreateSpace::new(space_type, name);
            req.owner = owner;
            req.quota = quota;
            req.id = id;
            let space = tree.create_space(&ctx, req).await?;
            print(&mut out, cli.json, &space, |s| s.id.to_string())?;
        }
        Commands::Spaces {
            space_type,
            include_disabled,
        } => {
            let filter = SpaceFilter {
                space_type,
                include_disabled,
            };
            for space in tree.list_spaces(&ctx, &filter).await? {
                print(&mut out, cli.json, &space, |s| {
                    format!("{}\t{}\t{}\t{}", s.id, s.space_type, s.tree_size, s.name)
                })?;
            }
        }
        Commands::Mkdir { space, path } => {
            let (parent, name) = resolve_parent(&tree, &space, &path)?;
            let node = tree.create_dir(&ctx, &parent, &name).await?;
            print(&mut out, cli.json, &tree.node_info(&node)?, |n| n.id.to_string())?;
        }
        Commands::Touch { space, path } => {
            let (parent, name) = resolve_parent(&tree, &space, &path)?;
            let node = tree
                .touch_file(&ctx, &parent, &name, TouchOptions::default())
                .await?;
            print(&mut out, cli.json, &tree.node_info(&node)?, |n| n.id.to_string())?;
        }
        Commands::Put { space, path, src } => {
            let (parent, name) = resolve_parent(&tree, &space, &path)?;
            let node = put_file(&tree, &ctx, &parent, &name, &src).await?;
            print(&mut out, cli.json, &tree.node_info(&node)?, |n| {
                format!("{}\t{}", n.id, n.size)
            })?;
        }
        Commands::Cat { space, path } => {
            let node = resolve(&tree, &space, &path)?;
            if !node.is_file() {
                return Err(Error::InvalidRequest(format!("{path} is not a file")).into());
            }
            let mut reader = tree.read_blob(&node).await?;
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut reader, &mut stdout).await?;
            stdout.flush().await?;
        }
        Commands::Ls { space, path } => {
            let dir = resolve(&tree, &space, &path)?;
            let mut children = tree.list_folder(&ctx, &dir).await?;
            children.sort_by(|a, b| a.name.cmp(&b.name));
            for child in children {
                print(&mut out, cli.json, &tree.node_info(&child)?, |n| {
                    let suffix = if n.node_type == NodeType::Container { "/" } else { "" };
                    format!("{}\t{}\t{}{}", n.id, n.size, n.name, suffix)
                })?;
            }
        }
        Commands::Mv { space, from, to } => {
            let old = resolve(&tree, &space, &from)?;
            let (new_parent, new_name) = resolve_parent(&tree, &space, &to)?;
            let new = tree.lookup().child(&new_parent, &new_name)?;
            let node = tree.move_node(&ctx, &old, &new).await?;
            info!(node.id = %node.id, from = from, to = to, "moved");
        }
        Commands::Rm { space, path } => {
            let node = resolve(&tree, &space, &path)?;
            let item = tree.delete(&ctx, &node).await?;
            print(&mut out, cli.json, &item, |i| i.key.clone())?;
        }
        Commands::Trash(TrashCommands::List { space, key, path }) => {
            for item in tree
                .list_recycle(&ctx, &space, key.as_deref(), &path)
                .await?
            {
                print(&mut out, cli.json, &item, |i| {
                    let key = if i.path.is_empty() {
                        i.key.clone()
                    } else {
                        format!("{}{}", i.key, i.path)
                    };
                    format!("{}\t{}\t{}\t{}", key, i.deletion_time, i.size, i.origin)
                })?;
            }
        }
        Commands::Trash(TrashCommands::Restore {
            space,
            key,
            path,
            target,
        }) => {
            let target = match target {
                Some(target) => {
                    let (parent, name) = resolve_parent(&tree, &space, &target)?;
                    Some(tree.lookup().child(&parent, &name)?)
                }
                None => None,
            };
            let node = tree
                .restore_recycle_item_func(&ctx, &space, &key, &path, target)
                .await?
                .run()
                .await?;
            info!(node.id = %node.id, name = node.name, "restored");
        }
        Commands::Trash(TrashCommands::Purge { space, key, path }) => {
            tree.purge_recycle_item(&ctx, &space, &key, &path).await?;
            info!(key = key, path = path, "purged");
        }
        Commands::CheckTreesize { space, repair } => {
            let mismatches = maintenance::check_tree_size(&tree, &ctx, &space, repair).await?;
            for m in &mismatches {
                print(&mut out, cli.json, m, |m| {
                    let stored = m.stored.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
                    format!("{}\t{}\t{}\t{}", m.node_id, stored, m.computed, m.path)
                })?;
            }
            if !mismatches.is_empty() && !repair {
                std::process::exit(1);
            }
        }
        Commands::Metadata(MetadataCommands::Dump { space, path }) => {
            let node = resolve(&tree, &space, &path)?;
            let attrs = tree.lookup().attrs(&node)?;
            if cli.json {
                let map: serde_json::Map<String, serde_json::Value> = attrs
                    .iter()
                    .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v).into()))
                    .collect();
                writeln!(out, "{}", serde_json::to_string(&map)?)?;
            } else {
                for (k, v) in attrs.iter() {
                    writeln!(out, "{}={}", k, String::from_utf8_lossy(v))?;
                }
            }
        }
        Commands::Metadata(MetadataCommands::Get { space, path, key }) => {
            let node = resolve(&tree, &space, &path)?;
            let attrs = tree.lookup().attrs(&node)?;
            let value = attrs
                .get(&key)
                .ok_or_else(|| Error::NotFound(format!("attribute {key}")))?;
            writeln!(out, "{}", String::from_utf8_lossy(value))?;
        }
        Commands::Metadata(MetadataCommands::Set {
            space,
            path,
            key,
            value,
        }) => {
            let node = resolve(&tree, &space, &path)?;
            let _guard = tree.lookup().locks().lock(node.internal_path()).await;
            tree.lookup().set_attr(&node, &key, value.as_bytes())?;
            info!(node.id = %node.id, key = key, "attribute set");
        }
    }

    Ok(())
}

async fn open_tree(cli: &Cli) -> Result<Tree, Error> {
    tokio::fs::create_dir_all(&cli.root).await?;
    let root = tokio::fs::canonicalize(&cli.root).await?;

    let metadata_backend = cli
        .metadata_backend
        .or_else(|| maintenance::detect_backend_on_disk(&root))
        .unwrap_or_default();

    let blobstore_addr = match &cli.blobstore_addr {
        Some(addr) => addr.clone(),
        None => format!("fs://{}", root.join("blobs").display()),
    };
    let blobstore = blobstore::from_addr(&blobstore_addr).await?;

    let options = Options {
        root,
        size_accounting: if cli.recount {
            SizeAccounting::Recount
        } else {
            SizeAccounting::Delta
        },
        max_concurrency: cli.max_concurrency,
        id_cache_capacity: cli.id_cache_capacity,
        metadata_backend,
        ..Options::default()
    };
    Tree::open(options, blobstore).await
}

fn request_context(cli: &Cli) -> RequestContext {
    let mut ctx = RequestContext::new();
    if let Some(user) = &cli.user {
        ctx = ctx.with_user(User::new(user));
    }
    if let Some(lock_id) = &cli.lock_id {
        ctx = ctx.with_lock_id(lock_id);
    }
    ctx
}

fn resolve(tree: &Tree, space: &SpaceId, path: &str) -> Result<Node, Error> {
    let root = tree.lookup().node_from_space_id(space)?;
    let node = tree.lookup().walk_path(root, path)?;
    if !node.exists {
        return Err(Error::NotFound(path.to_string()));
    }
    Ok(node)
}

/// Resolves all but the last segment of `path`, returning the parent and
/// the remaining name.
fn resolve_parent(tree: &Tree, space: &SpaceId, path: &str) -> Result<(Node, String), Error> {
    let path = path.trim_matches('/');
    let (dir, name) = path.rsplit_once('/').unwrap_or(("", path));
    if name.is_empty() {
        return Err(Error::InvalidRequest("path must name a child".into()));
    }
    Ok((resolve(tree, space, dir)?, name.to_string()))
}

#[instrument(skip_all, fields(name = name, indicatif.pb_show=1))]
async fn put_file(
    tree: &Tree,
    ctx: &RequestContext,
    parent: &Node,
    name: &str,
    src: &Path,
) -> Result<Node, Error> {
    let file = tokio::fs::File::open(src).await?;
    let len = file.metadata().await?.len();

    let span = Span::current();
    span.pb_set_style(&decomposedfs_tracing::PB_PROGRESS_STYLE);
    span.pb_set_message(&format!("Uploading {}", src.display()));
    span.pb_set_length(len);
    span.pb_start();

    let mut reader = InspectReader::new(file, |d| span.pb_inc(d.len() as u64));
    tree.upload(ctx, parent, name, &mut reader, Some(len)).await
}

fn print<T: Serialize>(
    out: &mut impl Write,
    json: bool,
    value: &T,
    plain: impl FnOnce(&T) -> String,
) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        writeln!(out, "{}", serde_json::to_string(value)?)?;
    } else {
        writeln!(out, "{}", plain(value))?;
    }
    Ok(())
}
