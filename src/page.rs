//! Page lifecycle: feature bootstrap, event dispatch, timers and the
//! async response pump.

use std::time::Instant;

use tracing::{debug, debug_span};

use crate::backref;
use crate::context::{AsyncResponse, PageContext, TextSelection};
use crate::dom::{Listener, NodeId};
use crate::expand;
use crate::forms;
use crate::hashid;
use crate::location;
use crate::menu;
use crate::preview;
use crate::sync;

pub const MENUBAR_ID: &str = "menubar";
pub const CLASS_MENUBAR_DETACHED: &str = "menubar-detached";

/// Input events delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Click,
    MouseEnter,
    MouseLeave,
    /// Focus left the target; `related` is where it went.
    Blur { related: Option<NodeId> },
    Ended,
    Submit,
    /// The host changed a field's `value`.
    Input,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Propagation {
    Continue,
    Stop,
}

/// Runs every feature initializer over the loaded document.
pub fn bootstrap(ctx: &mut PageContext) {
    let root = ctx.doc.root();
    {
        let _span = debug_span!("init_settings").entered();
        apply_menubar(ctx);
    }
    if !skips_post_features(&ctx.location.path) {
        {
            let _span = debug_span!("init_post_thumb_links").entered();
            expand::init_thumb_links(&mut ctx.doc, root);
        }
        {
            let _span = debug_span!("init_post_reference_links").entered();
            preview::init_reference_links(&mut ctx.doc, root);
        }
        {
            let _span = debug_span!("init_post_backreference_links").entered();
            backref::index(&mut ctx.doc, &[root]);
        }
        {
            let _span = debug_span!("init_location_hash").entered();
            location::apply_hash(ctx);
        }
    }
    {
        let _span = debug_span!("init_dropdown_menu_buttons").entered();
        menu::init_menu_buttons(&mut ctx.doc, root);
    }
    {
        let _span = debug_span!("init_post_hashid_features").entered();
        hashid::init_hashids(&mut ctx.doc, root);
    }
    {
        let _span = debug_span!("init_post_form").entered();
        forms::init_post_form(ctx, "");
        if ctx.settings.thread_quickreply {
            forms::init_post_form(ctx, forms::QUICK_REPLY_PREFIX);
        }
    }
    {
        let _span = debug_span!("init_delete_form").entered();
        forms::init_delete_form(&mut ctx.doc);
    }
    {
        let _span = debug_span!("init_thread_features").entered();
        sync::init_sync(ctx, Instant::now());
    }
}

/// Catalog and moderation pages list posts without the per-post features.
fn skips_post_features(path: &str) -> bool {
    path.contains("/catalog/") || path.contains("/manage/")
}

/// Detaches the menu bar from the page flow, or docks it back.
pub fn apply_menubar(ctx: &mut PageContext) {
    let Some(menubar) = ctx.doc.get_element_by_id(MENUBAR_ID) else {
        return;
    };
    let root = ctx.doc.root();
    if ctx.settings.menubar_detach {
        ctx.doc.add_class(menubar, CLASS_MENUBAR_DETACHED);
        ctx.doc.set_style(root, "padding", "40px 8px 8px 8px");
    } else {
        ctx.doc.remove_class(menubar, CLASS_MENUBAR_DETACHED);
        ctx.doc.set_style(root, "padding", "8px 8px 8px 8px");
    }
}

/// Delivers `event` to `target`. Clicks bubble through the ancestors the
/// target had when the event started; everything else fires on the target only.
pub fn dispatch(ctx: &mut PageContext, target: NodeId, event: Event) {
    if event != Event::Click {
        for listener in ctx.doc.listeners(target).to_vec() {
            fire_on_target(ctx, target, listener, event);
        }
        return;
    }

    let mut path = vec![target];
    let mut current = ctx.doc.parent(target);
    while let Some(node) = current {
        path.push(node);
        current = ctx.doc.parent(node);
    }
    for node in path {
        let mut propagation = Propagation::Continue;
        for listener in ctx.doc.listeners(node).to_vec() {
            if click(ctx, node, target, listener) == Propagation::Stop {
                propagation = Propagation::Stop;
            }
        }
        if propagation == Propagation::Stop {
            return;
        }
    }
}

fn click(ctx: &mut PageContext, node: NodeId, target: NodeId, listener: Listener) -> Propagation {
    match listener {
        Listener::ThumbClick => {
            expand::on_thumb_click(ctx, node, target);
            Propagation::Stop
        }
        Listener::ShrinkClick => {
            expand::on_shrink_click(ctx, node);
            Propagation::Stop
        }
        Listener::SwallowClick => Propagation::Stop,
        Listener::MenuButtonClick => {
            menu::on_button_click(ctx, node);
            Propagation::Continue
        }
        Listener::MenuItemClick => {
            menu::on_item_click(ctx, node);
            Propagation::Continue
        }
        Listener::FormatClick => {
            forms::on_format_click(ctx, node);
            Propagation::Continue
        }
        _ => Propagation::Continue,
    }
}

fn fire_on_target(ctx: &mut PageContext, target: NodeId, listener: Listener, event: Event) {
    match (event, listener) {
        (Event::MouseEnter, Listener::ReferenceEnter) => preview::show(ctx, target),
        (Event::MouseLeave, Listener::ReferenceLeave) => preview::hide(ctx, target),
        (Event::Blur { related }, Listener::MenuButtonBlur) => menu::on_button_blur(ctx, related),
        (Event::Ended, Listener::MediaEnded) => expand::on_media_ended(ctx, target),
        (Event::Submit, Listener::FormSubmit) => forms::submit(ctx, target),
        (Event::Input, Listener::PasswordInput) => forms::on_password_input(ctx, target),
        _ => {}
    }
}

/// Advances the page timers.
pub fn tick(ctx: &mut PageContext, now: Instant) {
    sync::tick(ctx, now);
    expand::poll_tracker(ctx, now);
}

/// Applies every finished network response. Returns whether any was applied.
pub fn poll_async(ctx: &mut PageContext) -> bool {
    let mut applied = false;
    while let Some(response) = ctx.try_recv() {
        applied = true;
        match response {
            AsyncResponse::Preview {
                request_id,
                key,
                result,
            } => preview::apply_fetch(ctx, request_id, key, result),
            AsyncResponse::Replies { request_id, result } => {
                sync::apply_replies(ctx, request_id, result)
            }
            AsyncResponse::Hide {
                board_id,
                id,
                result,
            } => menu::apply_hide(ctx, &board_id, &id, result),
            AsyncResponse::Form {
                request_id,
                form,
                result,
            } => forms::apply_outcome(ctx, request_id, form, result),
        }
    }
    if applied {
        debug!("applied async responses");
    }
    applied
}

/// A bootstrapped page and the loop-facing operations the host drives.
pub struct Page {
    ctx: PageContext,
}

impl Page {
    pub fn new(mut ctx: PageContext) -> Self {
        bootstrap(&mut ctx);
        Self { ctx }
    }

    pub fn context(&self) -> &PageContext {
        &self.ctx
    }

    pub fn is_thread_view(&self) -> bool {
        self.ctx.sync.is_some()
    }

    pub fn dispatch(&mut self, target: NodeId, event: Event) {
        dispatch(&mut self.ctx, target, event);
    }

    /// Records what the user has selected, or clears it.
    pub fn set_selection(&mut self, selection: Option<TextSelection>) {
        self.ctx.selection = selection;
    }

    pub fn hash_changed(&mut self, hash: &str) {
        location::on_hash_change(&mut self.ctx, hash);
    }

    pub fn tick(&mut self, now: Instant) {
        tick(&mut self.ctx, now);
    }

    pub fn poll_async(&mut self) -> bool {
        poll_async(&mut self.ctx)
    }

    /// Stops background work before the view goes away.
    pub fn teardown(&mut self) {
        sync::teardown(&mut self.ctx);
        let anchors: Vec<NodeId> = self.ctx.expansions.keys().copied().collect();
        for anchor in anchors {
            expand::shrink(&mut self.ctx, anchor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::testutil::{file_post, Harness};

    #[test]
    fn bootstrap_binds_every_feature() {
        let body = format!(
            r#"{}<form id="form-post"><textarea id="form-post-message"></textarea></form><form id="deleteform"></form>"#,
            file_post("b", 1, "a.png")
        );
        let h = Harness::new(&body);
        let doc = &h.ctx.doc;
        assert_eq!(doc.listeners(h.by_id("anchor-1")), &[Listener::ThumbClick]);
        let button = h.by_class(menu::CLASS_MENU_BUTTON);
        assert_eq!(
            doc.listeners(button),
            &[Listener::MenuButtonClick, Listener::MenuButtonBlur]
        );
        assert_eq!(doc.listeners(h.by_id("form-post")), &[Listener::FormSubmit]);
        assert_eq!(doc.listeners(h.by_id("deleteform")), &[Listener::FormSubmit]);
        assert!(doc.style(h.by_class(hashid::CLASS_HASHID), "color").is_some());
    }

    #[test]
    fn catalog_and_manage_pages_skip_post_features() {
        let body = format!(
            r#"{}<div class="post reply" id="b-12"><a class="reference" id="ref" data-board_id="b" data-parent_id="10" data-id="11">&gt;&gt;11</a></div>"#,
            file_post("b", 11, "a.png")
        );
        for url in ["https://board.example/b/catalog/", "https://board.example/manage/b/"] {
            let h = Harness::at(url, &body);
            let doc = &h.ctx.doc;
            assert!(!doc.listeners(h.by_id("anchor-11")).contains(&Listener::ThumbClick));
            assert!(doc.listeners(h.by_id("ref")).is_empty());
            assert_eq!(h.count_class(backref::CLASS_BACKREFERENCE), 0);
            let button = h.by_class(menu::CLASS_MENU_BUTTON);
            assert!(doc.listeners(button).contains(&Listener::MenuButtonClick));
        }

        let h = Harness::at("https://board.example/b/10/", &body);
        assert!(h.ctx.doc.listeners(h.by_id("anchor-11")).contains(&Listener::ThumbClick));
        assert!(h.ctx.doc.listeners(h.by_id("ref")).contains(&Listener::ReferenceEnter));
        assert_eq!(h.count_class(backref::CLASS_BACKREFERENCE), 1);
    }

    #[test]
    fn menubar_follows_detach_setting() {
        let body = r#"<div id="menubar"></div>"#;
        let h = Harness::new(body);
        let doc = &h.ctx.doc;
        assert!(doc.has_class(h.by_id(MENUBAR_ID), CLASS_MENUBAR_DETACHED));
        assert_eq!(doc.style(doc.root(), "padding"), Some("40px 8px 8px 8px"));

        let settings = Settings {
            menubar_detach: false,
            ..Settings::default()
        };
        let mut h = Harness::with_settings("https://board.example/b/10/", body, settings);
        let menubar = h.by_id(MENUBAR_ID);
        h.ctx.doc.add_class(menubar, CLASS_MENUBAR_DETACHED);
        apply_menubar(&mut h.ctx);
        let doc = &h.ctx.doc;
        assert!(!doc.has_class(menubar, CLASS_MENUBAR_DETACHED));
        assert_eq!(doc.style(doc.root(), "padding"), Some("8px 8px 8px 8px"));
    }

    #[test]
    fn catalog_and_manage_pages_ignore_the_hash() {
        let body = r#"<form id="form-post"><textarea id="form-post-message"></textarea></form>"#;
        let h = Harness::at("https://board.example/b/catalog/#q5", body);
        assert_eq!(h.ctx.doc.text_content(h.by_id("form-post-message")), "");
        assert!(h.nav_calls().is_empty());
        let h = Harness::at("https://board.example/manage/#q5", body);
        assert_eq!(h.ctx.doc.text_content(h.by_id("form-post-message")), "");
    }

    #[test]
    fn swallowed_clicks_do_not_reach_ancestors() {
        let body = r#"<div id="menu-host"><a class="dd-menu-btn" id="btn" data-cmd="post-menu" data-board_id="b" data-id="3">
            <span id="inner">x</span></a></div>"#;
        let mut h = Harness::new(body);
        let inner = h.by_id("inner");
        h.ctx.doc.bind(inner, Listener::SwallowClick);
        h.click(inner);
        assert!(h.ctx.menu.is_none());

        let button = h.by_id("btn");
        h.click(button);
        assert!(h.ctx.menu.is_some());
    }

    #[test]
    fn non_click_events_do_not_bubble() {
        let body = r#"<a class="reference" data-board_id="b" data-parent_id="10" data-id="7"><span id="inner">&gt;&gt;7</span></a>"#;
        let mut h = Harness::new(body);
        let inner = h.by_id("inner");
        h.fire(inner, Event::MouseEnter);
        assert!(h.transport.calls().is_empty());
        assert!(!h.poll());
    }

    #[test]
    fn page_teardown_stops_sync_and_collapses_media() {
        let body = format!(
            r#"<div id="mode">Reply</div><div class="thread">{}</div>"#,
            file_post("b", 1, "v.webm")
        );
        let h = Harness::new(&body);
        let mut page = Page { ctx: h.ctx };
        assert!(page.is_thread_view());
        let thumb = page.context().doc.get_element_by_id("thumb-b-1").unwrap();
        page.dispatch(thumb, Event::Click);
        assert_eq!(page.context().expansions.len(), 1);

        page.teardown();
        assert!(page.context().expansions.is_empty());
        assert!(page.context().sync.as_ref().unwrap().torn_down);
    }
}
