//! Hover previews of referenced posts.
//!
//! The first hover over a reference fetches the post's markup; later hovers are
//! served from the page-wide cache. A fetch still running when the pointer
//! leaves is cancelled and its result is never rendered.

use tracing::{debug, warn};

use crate::context::{AsyncResponse, PageContext, PendingPreview, PostKey};
use crate::dom::{Document, Listener, NodeId};
use crate::hashid;
use crate::net::{CancelToken, FetchError, Response};
use crate::overlay::{self, Side};

pub const CLASS_REFERENCE: &str = "reference";
pub const CLASS_PREVIEW: &str = "post-preview";

pub fn init_reference_links(doc: &mut Document, scope: NodeId) {
    for link in doc.by_class(scope, CLASS_REFERENCE) {
        doc.bind(link, Listener::ReferenceEnter);
        doc.bind(link, Listener::ReferenceLeave);
    }
}

/// Pointer entered a reference link.
pub fn show(ctx: &mut PageContext, anchor: NodeId) {
    ctx.previews.hovering = true;
    let Some(key) = PostKey::from_dataset(&ctx.doc, anchor) else {
        return;
    };

    if let Some(content) = ctx.previews.cache.get(&key).cloned() {
        render(ctx, anchor, &key, &content);
        return;
    }
    if let Some(pending) = ctx.previews.pending.get_mut(&key) {
        pending.anchor = anchor;
        return;
    }

    let request_id = ctx.next_request_id();
    let cancel = CancelToken::new();
    ctx.previews.pending.insert(
        key.clone(),
        PendingPreview {
            request_id,
            cancel: cancel.clone(),
            anchor,
        },
    );
    debug!(path = %key.path(), "fetching preview");
    ctx.spawn(move |transport| {
        let result = transport.get(&key.path(), &cancel);
        AsyncResponse::Preview {
            request_id,
            key,
            result,
        }
    });
}

/// Pointer left a reference link: drop outstanding fetches and remove every
/// preview nested under it.
pub fn hide(ctx: &mut PageContext, anchor: NodeId) {
    ctx.previews.hovering = false;
    for (_, pending) in ctx.previews.pending.drain() {
        pending.cancel.cancel();
    }
    for preview in ctx.doc.by_class(anchor, CLASS_PREVIEW) {
        // Nested previews go with their outer one.
        if ctx.doc.contains(anchor, preview) {
            ctx.doc.release(preview);
        }
    }
}

pub fn apply_fetch(
    ctx: &mut PageContext,
    request_id: u64,
    key: PostKey,
    result: Result<Response, FetchError>,
) {
    let Some(pending) = ctx.previews.pending.get(&key) else {
        return;
    };
    if pending.request_id != request_id || pending.cancel.is_cancelled() {
        return;
    }
    let anchor = pending.anchor;
    ctx.previews.pending.remove(&key);
    if !ctx.previews.hovering {
        return;
    }

    match result.and_then(Response::error_for_status) {
        Ok(response) => {
            ctx.previews.cache.insert(key.clone(), response.body.clone());
            if ctx.doc.is_connected(anchor) {
                render(ctx, anchor, &key, &response.body);
            }
        }
        Err(FetchError::Cancelled) => {}
        Err(FetchError::Status { status, body }) => {
            warn!(status, path = %key.path(), "preview request rejected");
            let content = if body.is_empty() {
                format!("Preview failed: HTTP {status}")
            } else {
                body
            };
            ctx.error_window(&content);
        }
        Err(err) => {
            warn!(error = %err, path = %key.path(), "preview request failed");
            ctx.error_window(&err.to_string());
        }
    }
}

fn render(ctx: &mut PageContext, anchor: NodeId, key: &PostKey, content: &str) -> NodeId {
    let doc = &mut ctx.doc;
    let div = doc.create_element("div");
    doc.set_data(div, "board_id", &key.board_id);
    doc.set_data(div, "parent_id", &key.parent_id);
    doc.set_data(div, "id", &key.id);
    doc.add_class(div, CLASS_PREVIEW);
    for (prop, value) in [("left", "0"), ("top", "0"), ("right", "auto"), ("bottom", "auto")] {
        doc.set_style(div, prop, value);
    }
    doc.set_inner_html(div, content);
    doc.append_child(anchor, div);

    let anchor_rect = ctx.layout.rect(&ctx.doc, anchor);
    let size = ctx.layout.measure(&ctx.doc, div);
    let placed = overlay::place(anchor_rect, size, Side::Right, &ctx.viewport, false);
    let doc = &mut ctx.doc;
    doc.set_style(div, "left", &placed.left.css());
    doc.set_style(div, "top", &placed.top.css());
    doc.set_style(div, "right", &placed.right.css());
    doc.set_style(div, "bottom", &placed.bottom.css());

    init_reference_links(doc, div);
    hashid::init_hashids(doc, div);
    div
}
