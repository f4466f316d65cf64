//! Address-hash behaviour and composer text helpers.
//!
//! `#<id>` highlights a reply. `#q<id>` quotes a post into the message field,
//! together with any text selected inside that post, and then clears the hash
//! so the same link works again.

use tracing::warn;

use crate::context::PageContext;
use crate::dom::{Document, NodeId};

pub const CLASS_HIGHLIGHT: &str = "highlight";
const MESSAGE_FIELD: &str = "form-post-message";

pub fn apply_hash(ctx: &mut PageContext) {
    let hash = ctx.location.hash.clone();
    if let Some(id) = hash.strip_prefix("#q") {
        quote_post(ctx, id);
        if let Err(err) = ctx.navigator.replace_history("./") {
            warn!(error = ?err, "could not reset address");
        }
        ctx.location.hash.clear();
    } else if hash.len() > 1 {
        highlight(&mut ctx.doc, &hash[1..]);
    }
}

/// The address hash changed after load.
pub fn on_hash_change(ctx: &mut PageContext, hash: &str) {
    ctx.location.hash = hash.to_string();
    apply_hash(ctx);
}

pub fn highlight(doc: &mut Document, id: &str) {
    let root = doc.root();
    for node in doc.by_class(root, CLASS_HIGHLIGHT) {
        doc.remove_class(node, CLASS_HIGHLIGHT);
    }
    if let Some(post) = doc.get_element_by_id(id) {
        if doc.has_class(post, "reply") {
            doc.add_class(post, CLASS_HIGHLIGHT);
        }
    }
}

/// The message field, preferring the quick-reply copy.
pub fn message_field(doc: &Document) -> Option<NodeId> {
    doc.get_element_by_id(&format!("form-reply::{MESSAGE_FIELD}"))
        .or_else(|| doc.get_element_by_id(MESSAGE_FIELD))
}

/// Inserts `>>id` and a newline at the caret.
pub fn insert_reference(doc: &mut Document, id: &str) {
    let Some(field) = message_field(doc) else {
        return;
    };
    let text = doc.text_content(field);
    let caret = selection(doc, field, "selection-end", &text);
    let reference = format!(">>{id}\n");
    let value = format!("{}{}{}", &text[..caret], reference, &text[caret..]);
    doc.set_text(field, &value);
    set_caret(doc, field, caret + reference.len());
}

/// Inserts a reference to post `id`, then appends the current selection as
/// `>`-quoted lines when it lies inside that post.
pub fn quote_post(ctx: &mut PageContext, id: &str) {
    insert_reference(&mut ctx.doc, id);
    let Some(quote) = selected_quote(ctx, id) else {
        return;
    };
    let Some(field) = message_field(&ctx.doc) else {
        return;
    };
    let text = ctx.doc.text_content(field);
    ctx.doc.set_text(field, &format!("{text}{quote}"));
}

fn selected_quote(ctx: &PageContext, id: &str) -> Option<String> {
    let selection = ctx.selection.as_ref().filter(|s| !s.text.is_empty())?;
    let suffix = format!("-{id}");
    let doc = &ctx.doc;
    let post = doc.find_first(doc.root(), |doc, node| {
        doc.has_class(node, "post") && doc.element_id(node).is_some_and(|eid| eid.ends_with(&suffix))
    })?;
    if !doc.contains(post, selection.anchor) {
        return None;
    }
    let quoted = selection.text.split('\n').collect::<Vec<_>>().join("\n>");
    Some(format!(">{}\n", quoted.trim()))
}

/// Wraps the selection in `[tag]...[/tag]`, leaving the caret after the opening tag.
pub fn insert_format(doc: &mut Document, tag: &str) {
    let Some(field) = message_field(doc) else {
        return;
    };
    let text = doc.text_content(field);
    let end = selection(doc, field, "selection-end", &text);
    let start = selection(doc, field, "selection-start", &text).min(end);
    let value = format!(
        "{}[{tag}]{}[/{tag}]{}",
        &text[..start],
        &text[start..end],
        &text[end..]
    );
    doc.set_text(field, &value);
    set_caret(doc, field, start + tag.len() + 2);
}

/// Byte offset of a caret stored as a character index, clamped to the text.
fn selection(doc: &Document, field: NodeId, key: &str, text: &str) -> usize {
    let chars = text.chars().count();
    let index = doc
        .data(field, key)
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(chars)
        .min(chars);
    text.char_indices()
        .nth(index)
        .map(|(offset, _)| offset)
        .unwrap_or(text.len())
}

fn set_caret(doc: &mut Document, field: NodeId, byte_offset: usize) {
    let text = doc.text_content(field);
    let index = text[..byte_offset.min(text.len())].chars().count().to_string();
    doc.set_data(field, "selection-start", &index);
    doc.set_data(field, "selection-end", &index);
}
