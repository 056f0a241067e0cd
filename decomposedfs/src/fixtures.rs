use bytes::Bytes;
use lazy_static::lazy_static;

use crate::{
    ids::NodeId,
    layout::Layout,
    node::{Node, NodeType},
};

lazy_static! {
    /// 100 bytes, the size used throughout the tree scenarios.
    pub static ref BLOB_A: Bytes = vec![0x61; 100].into();
    /// 50 bytes.
    pub static ref BLOB_C: Bytes = vec![0x63; 50].into();
    /// Larger than a single read buffer.
    pub static ref BLOB_B: Bytes = {
        let mut data = vec![];
        for i in 0..(1u32 << 20) + 3 {
            data.push((i % 251) as u8);
        }
        data.into()
    };

    pub static ref SPACE_ID: NodeId = NodeId::try_from("space-0000-fixture").unwrap();
}

/// A file node that is not backed by anything on disk.
pub fn file_node(blob_id: Option<String>) -> Node {
    let mut node = Node::new(
        &Layout::new("/nonexistent"),
        SPACE_ID.clone(),
        NodeId::new_random(),
        Some(SPACE_ID.clone()),
        "blob.bin",
        NodeType::File,
    );
    node.blob_id = blob_id;
    node
}
