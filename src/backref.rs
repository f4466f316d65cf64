//! "Referenced by" links.
//!
//! Reference links inside posts are grouped by the post they point at, and each
//! target that is present in the document gets one backreference per distinct
//! source post, appended to its info block. Only the given scopes are scanned, so
//! a batch of new replies never re-indexes posts that were indexed before.

use std::collections::HashMap;

use tracing::{debug, debug_span};

use crate::dom::{Document, Listener, NodeId};

pub const CLASS_BACKREFERENCE: &str = "backreference";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub added: usize,
    pub not_found: usize,
}

struct Source {
    post_id: String,
    link: NodeId,
}

pub fn index(doc: &mut Document, scopes: &[NodeId]) -> IndexStats {
    let _span = debug_span!("backreferences", scopes = scopes.len()).entered();

    let mut order: Vec<String> = Vec::new();
    let mut targets: HashMap<String, Vec<Source>> = HashMap::new();
    for &scope in scopes {
        for link in doc.find_all(scope, |doc, node| doc.is_tag(node, "a") && doc.has_class(node, "reference")) {
            let Some(source) = source_post(doc, link) else {
                continue;
            };
            let (Some(board_id), Some(id)) = (doc.data(link, "board_id"), doc.data(link, "id")) else {
                continue;
            };
            let target = format!("{board_id}-{id}");
            let sources = targets.entry(target.clone()).or_insert_with(|| {
                order.push(target);
                Vec::new()
            });
            if !sources.iter().any(|s| s.post_id == source) {
                sources.push(Source {
                    post_id: source,
                    link,
                });
            }
        }
    }

    let mut stats = IndexStats::default();
    for target in order {
        let Some(sources) = targets.remove(&target) else {
            continue;
        };
        let info = doc
            .get_element_by_id(&target)
            .and_then(|post| doc.first_by_class(post, "post-info"));
        let Some(info) = info else {
            stats.not_found += 1;
            continue;
        };
        for source in sources {
            append_backreference(doc, info, &source);
            stats.added += 1;
        }
    }
    debug!(added = stats.added, not_found = stats.not_found, "backreferences indexed");
    stats
}

/// Element id of the post containing `link`, skipping links inside previews.
fn source_post(doc: &Document, link: NodeId) -> Option<String> {
    if doc
        .closest(link, |doc, node| doc.has_class(node, "post-preview"))
        .is_some()
    {
        return None;
    }
    let post = doc.closest(link, |doc, node| doc.has_class(node, "post"))?;
    if doc.has_class(post, "preview") {
        return None;
    }
    doc.element_id(post).map(str::to_string)
}

fn append_backreference(doc: &mut Document, info: NodeId, source: &Source) {
    let board_id = doc.data(source.link, "board_id").unwrap_or_default().to_string();
    let parent_id = doc.data(source.link, "parent_id").map(str::to_string);
    let post_id = source
        .post_id
        .split('-')
        .nth(1)
        .unwrap_or_default()
        .to_string();

    let anchor = doc.create_element("a");
    doc.add_class(anchor, CLASS_BACKREFERENCE);
    match parent_id {
        None => {
            doc.set_attr(anchor, "href", &format!("/{board_id}/{post_id}/"));
            doc.set_data(anchor, "parent_id", &post_id);
        }
        Some(parent_id) => {
            doc.set_attr(
                anchor,
                "href",
                &format!("/{board_id}/{parent_id}/#{board_id}-{post_id}"),
            );
            doc.set_data(anchor, "parent_id", &parent_id);
        }
    }
    doc.set_data(anchor, "board_id", &board_id);
    doc.set_data(anchor, "id", &post_id);
    doc.set_text(anchor, &format!(">>{post_id}"));
    doc.bind(anchor, Listener::ReferenceEnter);
    doc.bind(anchor, Listener::ReferenceLeave);

    let space = doc.create_text(" ");
    doc.append_child(info, space);
    doc.append_child(info, anchor);
}
