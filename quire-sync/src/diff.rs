//! Unified diff of an item's remote copy against its local bytes, for
//! `quire diff`.

use similar::TextDiff;

use quire_core::{ContentSource, PublishableItem, QuireConfig, RemoteError, RemoteRepository};

use crate::SyncError;

/// Diff for one item. `unified_diff` is empty when both sides match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDiff {
    pub item: PublishableItem,
    pub remote_path: String,
    /// `None` when the item has never been published.
    pub remote_version: Option<String>,
    pub unified_diff: String,
}

impl ItemDiff {
    pub fn is_empty(&self) -> bool {
        self.unified_diff.is_empty()
    }
}

/// Compare what is on the remote with what would be published. Nothing is
/// written.
pub async fn diff_item(
    content: &dyn ContentSource,
    remote: &dyn RemoteRepository,
    config: &QuireConfig,
    item: &PublishableItem,
) -> Result<ItemDiff, SyncError> {
    let local = normalize_line_endings(&String::from_utf8_lossy(
        &content.read_content(item).await?,
    ));
    let remote_path = config.remote_path_for(&item.path);
    let existing = match remote.get_object(&remote_path).await {
        Ok(object) => object,
        Err(RemoteError::NotFound { .. }) => None,
        Err(err) => return Err(err.into()),
    };
    let remote_text = existing
        .as_ref()
        .map(|o| normalize_line_endings(&String::from_utf8_lossy(&o.bytes)))
        .unwrap_or_default();

    let unified_diff = if remote_text == local {
        String::new()
    } else {
        let old_header = format!("a/{remote_path}");
        let new_header = format!("b/{}", item.path);
        TextDiff::from_lines(&remote_text, &local)
            .unified_diff()
            .header(&old_header, &new_header)
            .context_radius(3)
            .to_string()
    };

    Ok(ItemDiff {
        item: item.clone(),
        remote_path,
        remote_version: existing.map(|o| o.version),
        unified_diff,
    })
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n")
}
