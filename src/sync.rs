//! Thread auto-update.
//!
//! A thread view polls `<thread>/replies/?post_id_after=<id>` on a fixed
//! interval. A batch is accepted only when its last post id advances past the
//! last one seen, which also filters out responses replayed by caches.

use std::time::Instant;

use tracing::{debug, debug_span, info, warn};

use crate::backref;
use crate::context::{AsyncResponse, Interval, PageContext, SyncState};
use crate::dom::{Document, NodeId};
use crate::expand;
use crate::hashid;
use crate::menu;
use crate::net::{CancelToken, FetchError, Response};
use crate::preview;

pub const CLASS_THREAD: &str = "thread";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Empty,
    /// The batch did not advance past the last seen post.
    Stale,
    NoThread,
    Appended { posts: usize, last_id: i64 },
}

/// Whether the page is a thread view (`#mode` reads "Reply").
pub fn is_thread_view(doc: &Document) -> bool {
    doc.get_element_by_id("mode")
        .is_some_and(|mode| doc.text_content(mode).trim() == "Reply")
}

pub fn init_sync(ctx: &mut PageContext, now: Instant) {
    if !is_thread_view(&ctx.doc) {
        return;
    }
    let root = ctx.doc.root();
    let enabled = ctx.settings.thread_auto_update;
    let last_seen = last_post_id(&ctx.doc, root);
    let timer = enabled.then(|| Interval::starting_at(ctx.settings.sync_interval, now));
    debug!(enabled, ?last_seen, "thread sync initialised");
    ctx.sync = Some(SyncState {
        enabled,
        last_seen,
        timer,
        in_flight: None,
        torn_down: false,
    });
}

/// Id of the last non-preview post under `scope`.
///
/// With a `.thread` container the last element child decides; otherwise the
/// last post in document order.
pub fn last_post_id(doc: &Document, scope: NodeId) -> Option<i64> {
    let is_post = |doc: &Document, node: NodeId| doc.has_class(node, "post") && !doc.has_class(node, "preview");
    let post = match doc.first_by_class(scope, CLASS_THREAD) {
        Some(thread) => {
            let last = doc.last_element_child(thread)?;
            if is_post(doc, last) {
                Some(last)
            } else {
                doc.find_first(last, is_post)
            }
        }
        None => doc.find_all(scope, is_post).pop(),
    }?;
    parse_post_id(doc.element_id(post)?)
}

/// Numeric part of a `board-id` element id; leading digits only.
fn parse_post_id(element_id: &str) -> Option<i64> {
    let raw = element_id.split('-').nth(1)?;
    let digits: String = raw.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

pub fn replies_path(ctx: &PageContext) -> Option<String> {
    let sync = ctx.sync.as_ref()?;
    Some(format!(
        "{}/replies/?post_id_after={}",
        ctx.location.path.trim_end_matches('/'),
        sync.last_seen.unwrap_or(0)
    ))
}

pub fn tick(ctx: &mut PageContext, now: Instant) {
    let due = match ctx.sync.as_mut() {
        Some(sync) if sync.enabled && !sync.torn_down => {
            sync.timer.as_mut().is_some_and(|timer| timer.fire(now))
        }
        _ => false,
    };
    if !due {
        return;
    }
    if ctx.sync.as_ref().and_then(|sync| sync.in_flight).is_some() {
        debug!("previous reply poll still running");
        return;
    }
    request_batch(ctx);
}

pub fn request_batch(ctx: &mut PageContext) {
    let Some(path) = replies_path(ctx) else {
        return;
    };
    let request_id = ctx.next_request_id();
    if let Some(sync) = ctx.sync.as_mut() {
        sync.in_flight = Some(request_id);
    }
    debug!(path = %path, "polling for replies");
    ctx.spawn(move |transport| AsyncResponse::Replies {
        request_id,
        result: transport.get(&path, &CancelToken::new()),
    });
}

pub fn apply_replies(ctx: &mut PageContext, request_id: u64, result: Result<Response, FetchError>) {
    let Some(sync) = ctx.sync.as_mut() else {
        return;
    };
    if sync.in_flight != Some(request_id) {
        return;
    }
    sync.in_flight = None;
    if sync.torn_down {
        debug!("discarding replies after teardown");
        return;
    }

    match result.and_then(Response::error_for_status) {
        Ok(response) => {
            let outcome = apply_batch(ctx, &response.body);
            debug!(?outcome, "reply poll finished");
        }
        Err(err) => warn!(error = %err, "reply poll failed"),
    }
}

/// Validates a batch of reply markup and appends it to the thread.
pub fn apply_batch(ctx: &mut PageContext, markup: &str) -> BatchOutcome {
    if markup.is_empty() {
        return BatchOutcome::Empty;
    }
    let last_seen = ctx.sync.as_ref().and_then(|sync| sync.last_seen).unwrap_or(0);
    let doc = &mut ctx.doc;
    let fragment = doc.parse_fragment(markup);
    let last_id = match last_post_id(doc, fragment) {
        Some(id) if id > last_seen => id,
        _ => {
            doc.release(fragment);
            return BatchOutcome::Stale;
        }
    };
    let root = doc.root();
    let Some(thread) = doc.first_by_class(root, CLASS_THREAD) else {
        doc.release(fragment);
        return BatchOutcome::NoThread;
    };

    {
        let _span = debug_span!("init_batch").entered();
        expand::init_thumb_links(doc, fragment);
        menu::init_menu_buttons(doc, fragment);
        preview::init_reference_links(doc, fragment);
        hashid::init_hashids(doc, fragment);
    }

    let separator = doc.create_element("hr");
    doc.append_child(thread, separator);
    let posts = doc.element_children(fragment);
    for &post in &posts {
        doc.append_child(thread, post);
    }
    doc.release(fragment);
    backref::index(doc, &posts);

    if let Some(sync) = ctx.sync.as_mut() {
        sync.last_seen = Some(last_id);
    }
    info!(posts = posts.len(), last_id, "appended new replies");
    BatchOutcome::Appended {
        posts: posts.len(),
        last_id,
    }
}

/// Stops polling. A request still running completes but is discarded.
pub fn teardown(ctx: &mut PageContext) {
    if let Some(sync) = ctx.sync.as_mut() {
        sync.timer = None;
        sync.torn_down = true;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::Settings;
    use crate::dom::Listener;
    use crate::testutil::{file_post, Harness};

    fn reply(id: u32, body: &str) -> String {
        format!(
            r#"<div class="post-container"><div class="post reply" id="b-{id}"><div class="post-info">#{id}</div><div class="post-message">{body}</div></div></div>"#
        )
    }

    fn reference(id: u32) -> String {
        format!(r#"<a class="reference" data-board_id="b" data-parent_id="10" data-id="{id}">&gt;&gt;{id}</a>"#)
    }

    fn thread_page() -> String {
        format!(
            r#"<div id="mode">Reply</div><div class="thread" id="thread_b-10">{}<hr>{}</div>"#,
            reply(10, ""),
            reply(11, &reference(10))
        )
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn backref_labels(h: &Harness, post: &str) -> Vec<String> {
        let post = h.by_id(post);
        h.ctx
            .doc
            .by_class(post, backref::CLASS_BACKREFERENCE)
            .into_iter()
            .map(|a| h.ctx.doc.text_content(a))
            .collect()
    }

    #[test]
    fn init_reads_last_post_and_starts_timer() {
        let h = Harness::new(&thread_page());
        let sync = h.ctx.sync.as_ref().unwrap();
        assert!(sync.enabled);
        assert_eq!(sync.last_seen, Some(11));
        assert_eq!(sync.timer.map(|t| t.period), Some(Duration::from_secs(10)));
    }

    #[test]
    fn non_thread_views_have_no_sync() {
        let h = Harness::new(&reply(3, ""));
        assert!(h.ctx.sync.is_none());
    }

    #[test]
    fn disabled_auto_update_keeps_state_without_timer() {
        let settings = Settings {
            thread_auto_update: false,
            ..Settings::default()
        };
        let mut h = Harness::with_settings("https://board.example/b/10/", &thread_page(), settings);
        assert!(h.ctx.sync.as_ref().unwrap().timer.is_none());
        tick(&mut h.ctx, later());
        assert!(h.transport.calls().is_empty());
    }

    #[test]
    fn tick_appends_new_replies_and_indexes_only_the_batch() {
        let mut h = Harness::new(&thread_page());
        let batch = format!("{}{}", reply(12, &reference(10)), file_post("b", 13, "clip.webm"));
        h.transport
            .respond("/b/10/replies/?post_id_after=11", 200, &batch);

        tick(&mut h.ctx, Instant::now());
        assert!(h.transport.calls().is_empty());
        tick(&mut h.ctx, later());
        h.poll();

        assert_eq!(h.transport.calls(), vec!["GET /b/10/replies/?post_id_after=11"]);
        assert_eq!(h.ctx.sync.as_ref().unwrap().last_seen, Some(13));
        let thread = h.by_id("thread_b-10");
        let tags: Vec<String> = h
            .ctx
            .doc
            .element_children(thread)
            .into_iter()
            .map(|node| h.ctx.doc.tag(node).unwrap_or_default().to_string())
            .collect();
        assert_eq!(tags, vec!["div", "hr", "div", "hr", "div", "div"]);
        assert_eq!(backref_labels(&h, "b-10"), vec![">>11", ">>12"]);

        let anchor = h.by_id("anchor-13");
        assert!(h.ctx.doc.listeners(anchor).contains(&Listener::ThumbClick));
    }

    #[test]
    fn stale_batches_leave_the_thread_untouched() {
        let mut h = Harness::new(&thread_page());
        h.transport
            .respond("/b/10/replies/?post_id_after=11", 200, &reply(11, ""));
        tick(&mut h.ctx, later());
        h.poll();
        let thread = h.by_id("thread_b-10");
        assert_eq!(h.ctx.doc.element_children(thread).len(), 3);
        assert_eq!(h.ctx.sync.as_ref().unwrap().last_seen, Some(11));
    }

    #[test]
    fn rejected_batches_do_not_grow_the_document() {
        let mut h = Harness::new(&thread_page());
        let stale = format!("{}{}", reply(10, ""), reply(11, &reference(10)));
        assert_eq!(apply_batch(&mut h.ctx, &stale), BatchOutcome::Stale);
        let live = h.ctx.doc.live_nodes();
        for _ in 0..5 {
            assert_eq!(apply_batch(&mut h.ctx, &stale), BatchOutcome::Stale);
        }
        assert_eq!(h.ctx.doc.live_nodes(), live);

        let mut orphan = Harness::new(r#"<div id="mode">Reply</div>"#);
        assert_eq!(apply_batch(&mut orphan.ctx, &reply(4, "")), BatchOutcome::NoThread);
        let live = orphan.ctx.doc.live_nodes();
        assert_eq!(apply_batch(&mut orphan.ctx, &reply(5, "")), BatchOutcome::NoThread);
        assert_eq!(orphan.ctx.doc.live_nodes(), live);
    }

    #[test]
    fn empty_and_unparsable_batches_are_ignored() {
        let mut h = Harness::new(&thread_page());
        assert_eq!(apply_batch(&mut h.ctx, ""), BatchOutcome::Empty);
        let outcome = apply_batch(&mut h.ctx, r#"<div class="post" id="b-abc"></div>"#);
        assert_eq!(outcome, BatchOutcome::Stale);
    }

    #[test]
    fn only_one_poll_runs_at_a_time() {
        let mut h = Harness::new(&thread_page());
        let start = Instant::now();
        tick(&mut h.ctx, start + Duration::from_secs(11));
        tick(&mut h.ctx, start + Duration::from_secs(22));
        assert_eq!(h.transport.calls().len(), 1);
        h.poll();
        tick(&mut h.ctx, start + Duration::from_secs(33));
        assert_eq!(h.transport.calls().len(), 2);
    }

    #[test]
    fn teardown_discards_the_running_poll() {
        let mut h = Harness::new(&thread_page());
        h.transport
            .respond("/b/10/replies/?post_id_after=11", 200, &reply(12, ""));
        tick(&mut h.ctx, later());
        teardown(&mut h.ctx);
        h.poll();
        assert!(h.ctx.doc.get_element_by_id("b-12").is_none());
        tick(&mut h.ctx, later() + Duration::from_secs(60));
        assert_eq!(h.transport.calls().len(), 1);
    }

    #[test]
    fn last_post_id_uses_thread_tail() {
        let h = Harness::new(&format!(
            r#"<div class="thread">{}<div class="post-container"><div class="post preview" id="b-99"></div><div class="post reply" id="b-7x"></div></div></div>"#,
            reply(5, "")
        ));
        let root = h.ctx.doc.root();
        assert_eq!(last_post_id(&h.ctx.doc, root), Some(7));
    }
}
