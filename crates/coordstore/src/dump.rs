//! Debug rendering of a store subtree with box-drawing characters.
//!
//! ```text
//! /apps/guestbook
//! ├─┬ locks
//! │ └── customer%2342 = /apps/guestbook/txids/tx0000000001
//! └─┬ txids
//!   └─┬ tx0000000001 = 1700000000.000000
//!     └── lockpath = /apps/guestbook/locks/customer%2342
//! ```

use crate::client::CoordinationClient;
use crate::error::{Error, Result};
use crate::path;
use futures::future::{BoxFuture, FutureExt};

/// One rendered node: its label and its children
#[derive(Debug, Clone)]
pub struct DumpNode {
    pub label: String,
    pub children: Vec<DumpNode>,
}

impl DumpNode {
    fn render_children(&self, output: &mut String, prefix: &str) {
        let count = self.children.len();
        for (index, child) in self.children.iter().enumerate() {
            let last = index + 1 == count;
            let connector = match (child.children.is_empty(), last) {
                (true, true) => "└──",
                (true, false) => "├──",
                (false, true) => "└─┬",
                (false, false) => "├─┬",
            };
            output.push_str(prefix);
            output.push_str(connector);
            output.push(' ');
            output.push_str(&child.label);
            output.push('\n');

            let continuation = if last { ' ' } else { '│' };
            child.render_children(output, &format!("{prefix}{continuation} "));
        }
    }
}

impl std::fmt::Display for DumpNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut output = format!("{}\n", self.label);
        self.render_children(&mut output, "");
        write!(f, "{output}")
    }
}

fn label(name: &str, value: &[u8]) -> String {
    if value.is_empty() {
        name.to_string()
    } else {
        format!("{name} = {}", String::from_utf8_lossy(value))
    }
}

fn collect<'a>(
    client: &'a dyn CoordinationClient,
    node_path: String,
    name: String,
) -> BoxFuture<'a, Result<Option<DumpNode>>> {
    async move {
        // Nodes may vanish between listing and reading; skip them
        let value = match client.get(&node_path, false).await {
            Ok((value, _)) => value,
            Err(Error::NoNode(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let names = match client.get_children(&node_path, false).await {
            Ok(names) => names,
            Err(Error::NoNode(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut children = Vec::with_capacity(names.len());
        for child in names {
            let child_path = path::join(&node_path, &child);
            if let Some(node) = collect(client, child_path, child).await? {
                children.push(node);
            }
        }
        Ok(Some(DumpNode {
            label: label(&name, &value),
            children,
        }))
    }
    .boxed()
}

/// Read the subtree rooted at `root` into a `DumpNode`
pub async fn dump_tree(client: &dyn CoordinationClient, root: &str) -> Result<DumpNode> {
    collect(client, root.to_string(), root.to_string())
        .await?
        .ok_or_else(|| Error::no_node(root))
}
