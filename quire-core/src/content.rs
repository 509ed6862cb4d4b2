//! Local content sources.
//!
//! [`ContentSource`] is the seam the status engine and publisher read local
//! items through. Two implementations ship here: [`FsContentSource`] for a
//! notes directory on disk and [`MemoryContentSource`] for tests and
//! embedders that keep notes elsewhere.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{content_io_err, ContentError};
use crate::types::{Attachment, PublishableItem};

/// Enumerates and reads local items.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Every managed item, eligible or not, in a stable order.
    async fn list_publishable_items(&self) -> Result<Vec<PublishableItem>, ContentError>;

    async fn read_content(&self, item: &PublishableItem) -> Result<Vec<u8>, ContentError>;

    /// Whether the item's metadata marks it for publication.
    async fn is_publish_eligible(&self, item: &PublishableItem) -> Result<bool, ContentError>;

    /// Files that travel with the item.
    async fn attachments(&self, _item: &PublishableItem) -> Result<Vec<Attachment>, ContentError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    #[serde(default)]
    publish: bool,
    #[serde(default)]
    attachments: Vec<String>,
}

/// Notes directory on disk.
///
/// Files with the configured extension are items; hidden directories
/// (`.quire`, `.git`, ...) are skipped. An item is eligible when its YAML
/// front matter sets `publish: true`. Front matter may also list
/// `attachments:` relative to the note's directory.
#[derive(Debug, Clone)]
pub struct FsContentSource {
    root: PathBuf,
    extension: String,
}

impl FsContentSource {
    pub fn new(root: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            root: root.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn local_path(&self, item: &PublishableItem) -> PathBuf {
        item.path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }

    fn read_bytes(&self, item: &PublishableItem) -> Result<Vec<u8>, ContentError> {
        let path = self.local_path(item);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(ContentError::NotFound {
                path: item.path.clone(),
            }),
            Err(err) => Err(content_io_err(path, err)),
        }
    }

    fn front_matter(&self, item: &PublishableItem) -> Result<FrontMatter, ContentError> {
        let bytes = self.read_bytes(item)?;
        let text = String::from_utf8_lossy(&bytes);
        let Some(block) = extract_front_matter(&text) else {
            return Ok(FrontMatter::default());
        };
        if block.trim().is_empty() {
            return Ok(FrontMatter::default());
        }
        serde_yaml::from_str(&block).map_err(|source| ContentError::FrontMatter {
            path: self.local_path(item),
            source,
        })
    }

    /// Resolve `rel` against the note's directory. The result must stay
    /// under the root, both lexically and after following symlinks.
    fn attachment_path(&self, item: &PublishableItem, rel: &str) -> Result<PathBuf, ContentError> {
        let outside = || ContentError::AttachmentOutsideRoot {
            path: item.path.clone(),
            attachment: rel.to_string(),
        };

        let mut parts: Vec<&str> = item.path.split('/').filter(|p| !p.is_empty()).collect();
        parts.pop();
        let mut resolved = self.root.clone();
        for part in &parts {
            resolved.push(part);
        }
        let mut depth = parts.len();
        for component in Path::new(rel).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir if depth > 0 => {
                    resolved.pop();
                    depth -= 1;
                }
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(outside());
                }
            }
        }

        let root = self
            .root
            .canonicalize()
            .map_err(|e| content_io_err(&self.root, e))?;
        let real = resolved
            .canonicalize()
            .map_err(|e| content_io_err(&resolved, e))?;
        if !real.starts_with(&root) {
            return Err(outside());
        }
        Ok(real)
    }

    fn collect(&self, dir: &Path, out: &mut Vec<String>) -> Result<(), ContentError> {
        let mut entries: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| content_io_err(dir, e))?
            .filter_map(|e| e.ok())
            .collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| content_io_err(&path, e))?;
            if file_type.is_dir() {
                self.collect(&path, out)?;
            } else if file_type.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str())
            {
                if let Ok(relative) = path.strip_prefix(&self.root) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    out.push(key);
                }
            }
        }
        Ok(())
    }
}

/// Text between a leading `---` line and the next `---` line.
fn extract_front_matter(text: &str) -> Option<String> {
    let mut lines = text.lines();
    if lines.next().map(|l| l.trim_end_matches('\r')) != Some("---") {
        return None;
    }
    let mut block = Vec::new();
    for line in lines {
        let line = line.trim_end_matches('\r');
        if line == "---" {
            return Some(block.join("\n"));
        }
        block.push(line);
    }
    None
}

#[async_trait]
impl ContentSource for FsContentSource {
    async fn list_publishable_items(&self) -> Result<Vec<PublishableItem>, ContentError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        self.collect(&self.root, &mut paths)?;
        paths.sort();
        Ok(paths.into_iter().map(PublishableItem::new).collect())
    }

    async fn read_content(&self, item: &PublishableItem) -> Result<Vec<u8>, ContentError> {
        self.read_bytes(item)
    }

    async fn is_publish_eligible(&self, item: &PublishableItem) -> Result<bool, ContentError> {
        Ok(self.front_matter(item)?.publish)
    }

    async fn attachments(&self, item: &PublishableItem) -> Result<Vec<Attachment>, ContentError> {
        let front = self.front_matter(item)?;

        let mut out = Vec::with_capacity(front.attachments.len());
        for rel in front.attachments {
            let path = self.attachment_path(item, &rel)?;
            let bytes = std::fs::read(&path).map_err(|e| content_io_err(&path, e))?;
            let name = Path::new(&rel)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(rel);
            out.push(Attachment { name, bytes });
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MemoryNote {
    bytes: Vec<u8>,
    eligible: bool,
    attachments: Vec<Attachment>,
}

/// Notes held in memory, listed in path order.
#[derive(Debug, Default)]
pub struct MemoryContentSource {
    notes: Mutex<BTreeMap<String, MemoryNote>>,
}

impl MemoryContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an eligible note.
    pub fn put(&self, path: &str, bytes: impl Into<Vec<u8>>) -> PublishableItem {
        self.put_with(path, bytes, true)
    }

    pub fn put_with(&self, path: &str, bytes: impl Into<Vec<u8>>, eligible: bool) -> PublishableItem {
        let mut notes = self.lock();
        let attachments = notes
            .get(path)
            .map(|n| n.attachments.clone())
            .unwrap_or_default();
        notes.insert(
            path.to_string(),
            MemoryNote {
                bytes: bytes.into(),
                eligible,
                attachments,
            },
        );
        PublishableItem::new(path)
    }

    pub fn set_eligible(&self, path: &str, eligible: bool) {
        if let Some(note) = self.lock().get_mut(path) {
            note.eligible = eligible;
        }
    }

    pub fn attach(&self, path: &str, name: &str, bytes: impl Into<Vec<u8>>) {
        if let Some(note) = self.lock().get_mut(path) {
            note.attachments.push(Attachment {
                name: name.to_string(),
                bytes: bytes.into(),
            });
        }
    }

    pub fn remove(&self, path: &str) {
        self.lock().remove(path);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, MemoryNote>> {
        // Notes are plain data; a panic mid-update cannot leave them torn.
        self.notes.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn note(&self, item: &PublishableItem) -> Result<MemoryNote, ContentError> {
        self.lock()
            .get(&item.path)
            .cloned()
            .ok_or_else(|| ContentError::NotFound {
                path: item.path.clone(),
            })
    }
}

#[async_trait]
impl ContentSource for MemoryContentSource {
    async fn list_publishable_items(&self) -> Result<Vec<PublishableItem>, ContentError> {
        Ok(self.lock().keys().map(|k| PublishableItem::new(k.as_str())).collect())
    }

    async fn read_content(&self, item: &PublishableItem) -> Result<Vec<u8>, ContentError> {
        Ok(self.note(item)?.bytes)
    }

    async fn is_publish_eligible(&self, item: &PublishableItem) -> Result<bool, ContentError> {
        Ok(self.note(item)?.eligible)
    }

    async fn attachments(&self, item: &PublishableItem) -> Result<Vec<Attachment>, ContentError> {
        Ok(self.note(item)?.attachments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[tokio::test]
    async fn fs_lists_markdown_sorted_and_skips_hidden() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "notes/b.md", "b");
        write(tmp.path(), "notes/a.md", "a");
        write(tmp.path(), "notes/img.png", "png");
        write(tmp.path(), ".quire/ignored.md", "x");
        write(tmp.path(), "top.md", "t");

        let source = FsContentSource::new(tmp.path(), "md");
        let items = source.list_publishable_items().await.unwrap();
        let paths: Vec<_> = items.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["notes/a.md", "notes/b.md", "top.md"]);
    }

    #[tokio::test]
    async fn fs_eligibility_from_front_matter() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "yes.md", "---\ntitle: Yes\npublish: true\n---\nbody\n");
        write(tmp.path(), "no.md", "---\npublish: false\n---\nbody\n");
        write(tmp.path(), "plain.md", "no front matter\n");
        write(tmp.path(), "crlf.md", "---\r\npublish: true\r\n---\r\nbody\r\n");
        write(tmp.path(), "empty.md", "---\n---\nbody\n");

        let source = FsContentSource::new(tmp.path(), ".md");
        for (path, expected) in [
            ("yes.md", true),
            ("no.md", false),
            ("plain.md", false),
            ("crlf.md", true),
            ("empty.md", false),
        ] {
            let eligible = source
                .is_publish_eligible(&PublishableItem::new(path))
                .await
                .unwrap();
            assert_eq!(eligible, expected, "{path}");
        }
    }

    #[tokio::test]
    async fn fs_bad_front_matter_is_an_error() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "bad.md", "---\npublish: [\n---\n");
        let source = FsContentSource::new(tmp.path(), "md");
        let err = source
            .is_publish_eligible(&PublishableItem::new("bad.md"))
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::FrontMatter { .. }));
    }

    #[tokio::test]
    async fn fs_missing_item_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let source = FsContentSource::new(tmp.path(), "md");
        let err = source
            .read_content(&PublishableItem::new("gone.md"))
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::NotFound { .. }));
    }

    #[tokio::test]
    async fn fs_attachments_resolve_relative_to_note() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "notes/a.md",
            "---\npublish: true\nattachments:\n  - img/pic.png\n---\n",
        );
        write(tmp.path(), "notes/img/pic.png", "PNG");
        let source = FsContentSource::new(tmp.path(), "md");
        let attachments = source
            .attachments(&PublishableItem::new("notes/a.md"))
            .await
            .unwrap();
        assert_eq!(
            attachments,
            vec![Attachment {
                name: "pic.png".into(),
                bytes: b"PNG".to_vec()
            }]
        );
    }

    #[tokio::test]
    async fn fs_attachments_may_climb_within_the_root() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "notes/a.md",
            "---\nattachments:\n  - ../shared/./logo.png\n---\n",
        );
        write(tmp.path(), "shared/logo.png", "LOGO");
        let source = FsContentSource::new(tmp.path(), "md");
        let attachments = source
            .attachments(&PublishableItem::new("notes/a.md"))
            .await
            .unwrap();
        assert_eq!(attachments[0].name, "logo.png");
        assert_eq!(attachments[0].bytes, b"LOGO".to_vec());
    }

    #[tokio::test]
    async fn fs_attachments_outside_the_root_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("site");
        write(tmp.path(), "secret.txt", "TOP-SECRET");
        let absolute = tmp.path().join("secret.txt");

        let source = FsContentSource::new(root.clone(), "md");
        for rel in [
            "../../secret.txt".to_string(),
            "img/../../../secret.txt".to_string(),
            absolute.display().to_string(),
        ] {
            write(
                &root,
                "notes/a.md",
                &format!("---\nattachments:\n  - '{rel}'\n---\n"),
            );
            let err = source
                .attachments(&PublishableItem::new("notes/a.md"))
                .await
                .unwrap_err();
            match err {
                ContentError::AttachmentOutsideRoot { path, attachment } => {
                    assert_eq!(path, "notes/a.md");
                    assert_eq!(attachment, rel);
                }
                other => panic!("expected rejection of {rel}, got {other:?}"),
            }
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fs_attachment_symlinks_leaving_the_root_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("site");
        write(tmp.path(), "secret.txt", "TOP-SECRET");
        write(&root, "a.md", "---\nattachments:\n  - link.txt\n---\n");
        std::os::unix::fs::symlink(tmp.path().join("secret.txt"), root.join("link.txt")).unwrap();

        let source = FsContentSource::new(root.clone(), "md");
        let err = source
            .attachments(&PublishableItem::new("a.md"))
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::AttachmentOutsideRoot { .. }));
    }

    #[tokio::test]
    async fn memory_source_tracks_eligibility() {
        let source = MemoryContentSource::new();
        let item = source.put("notes/a.md", "hello");
        source.put_with("notes/b.md", "draft", false);
        assert!(source.is_publish_eligible(&item).await.unwrap());
        source.set_eligible("notes/a.md", false);
        assert!(!source.is_publish_eligible(&item).await.unwrap());
        assert_eq!(source.list_publishable_items().await.unwrap().len(), 2);
        source.remove("notes/a.md");
        assert!(source.read_content(&item).await.is_err());
    }
}
