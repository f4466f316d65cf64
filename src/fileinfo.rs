use percent_encoding::percent_decode_str;

use crate::dom::{Document, NodeId};

pub const CLASS_FILE_INFO: &str = "file-info";
pub const CLASS_FILE_DATA: &str = "file-data";
pub const CLASS_THUMB_HREF: &str = "file-thumb-href";

const EXTS_IMAGE: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "webp"];
const EXTS_VIDEO: &[&str] = &["mp4", "webm"];
const EXTS_AUDIO: &[&str] = &["mp3", "wav", "ogg", "oga", "opus", "flac"];
const EXTS_TRACKER: &[&str] = &["mod", "xm", "it", "s3m", "med"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Image,
    Video,
    Audio,
    TrackerModule,
    /// Flash content, played through the plugin runtime.
    PluginEmbed,
    /// Server-provided markup carried inline in the post.
    GenericEmbed,
    Pdf,
    /// Unrecognised or missing extension.
    Unknown,
}

impl FileKind {
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.to_ascii_lowercase();
        let ext = ext.as_str();
        if EXTS_IMAGE.contains(&ext) {
            FileKind::Image
        } else if EXTS_VIDEO.contains(&ext) {
            FileKind::Video
        } else if EXTS_AUDIO.contains(&ext) {
            FileKind::Audio
        } else if EXTS_TRACKER.contains(&ext) {
            FileKind::TrackerModule
        } else if ext == "swf" {
            FileKind::PluginEmbed
        } else if ext == "pdf" {
            FileKind::Pdf
        } else {
            FileKind::Unknown
        }
    }

    /// Kinds that share one expanded-at-a-time slot across the document.
    pub fn is_exclusive(&self) -> bool {
        matches!(
            self,
            FileKind::Video | FileKind::Audio | FileKind::TrackerModule | FileKind::PluginEmbed
        )
    }

    /// Video and audio render beside the thumbnail anchor, in its parent.
    pub fn renders_in_parent(&self) -> bool {
        matches!(self, FileKind::Video | FileKind::Audio)
    }

    pub fn is_image(&self) -> bool {
        matches!(self, FileKind::Image)
    }
}

/// File metadata of a post. When `inline_payload` is set it drives rendering and
/// `kind` is always [`FileKind::GenericEmbed`]; otherwise `source_url` does.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub kind: FileKind,
    pub source_url: String,
    pub inline_payload: Option<String>,
    pub info_block: Option<NodeId>,
    pub thumb_anchor: Option<NodeId>,
}

/// Extracts file metadata from a post subtree. Returns `None` when the post has no
/// file section. Nested preview overlays are not looked into.
pub fn resolve(doc: &Document, post: NodeId) -> Option<FileInfo> {
    let info_block = first_own(doc, post, CLASS_FILE_INFO);
    let data_block = first_own(doc, post, CLASS_FILE_DATA);
    let thumb_anchor = first_own(doc, post, CLASS_THUMB_HREF);
    if info_block.is_none() && data_block.is_none() && thumb_anchor.is_none() {
        return None;
    }

    let inline_payload = data_block
        .map(|node| doc.text_content(node))
        .map(|raw| percent_decode_str(raw.trim()).decode_utf8_lossy().into_owned())
        .filter(|payload| !payload.is_empty());
    let source_url = thumb_anchor
        .and_then(|node| doc.attr(node, "href"))
        .unwrap_or_default()
        .to_string();

    let kind = if inline_payload.is_some() {
        FileKind::GenericEmbed
    } else {
        extension(&source_url)
            .map(|ext| FileKind::from_extension(&ext))
            .unwrap_or(FileKind::Unknown)
    };

    Some(FileInfo {
        kind,
        source_url,
        inline_payload,
        info_block,
        thumb_anchor,
    })
}

/// Lower-cased last `.` segment of the URL path.
pub fn extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let name = path.rsplit('/').next().unwrap_or_default();
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn first_own(doc: &Document, post: NodeId, class: &str) -> Option<NodeId> {
    doc.find_first(post, |doc, node| {
        doc.has_class(node, class) && !inside_preview(doc, post, node)
    })
}

fn inside_preview(doc: &Document, post: NodeId, node: NodeId) -> bool {
    let mut current = doc.parent(node);
    while let Some(id) = current {
        if id == post {
            return false;
        }
        if doc.has_class(id, "post-preview") {
            return true;
        }
        current = doc.parent(id);
    }
    false
}
