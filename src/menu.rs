//! Post context menus. At most one menu is open in the document.

use tracing::{debug, warn};

use crate::context::{AsyncResponse, OpenMenu, PageContext};
use crate::dom::{Document, Listener, NodeId};
use crate::fileinfo::{self, FileKind};
use crate::net::{CancelToken, FetchError, Response};
use crate::overlay::{self, Side};

pub const CLASS_MENU: &str = "dd-menu";
pub const CLASS_MENU_BUTTON: &str = "dd-menu-btn";
pub const CLASS_MENU_BUTTON_OPEN: &str = "dd-menu-btn-open";

const REPORT_WINDOW_FEATURES: &str = "location=true,status=true,width=480,height=640";

const SEARCH_ENGINES: &[(&str, &str)] = &[
    ("SauceNAO", "https://saucenao.com/search.php?url="),
    ("IQDB", "http://iqdb.org/?url="),
    ("IQDB 3D", "http://3d.iqdb.org/?url="),
    ("ASCII2D", "https://ascii2d.net/search/url/"),
    ("TinEye", "https://tineye.com/search?url="),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    Report,
    Hide,
    Download,
    Annotate { url: String },
    AlbumArt { url: String },
    SearchThumb { engine: String },
}

impl MenuAction {
    fn cmd(&self) -> &'static str {
        match self {
            MenuAction::Report => "report",
            MenuAction::Hide => "hide",
            MenuAction::Download => "file_download",
            MenuAction::Annotate { .. } => "tegaki_open",
            MenuAction::AlbumArt { .. } => "audio_album",
            MenuAction::SearchThumb { .. } => "search_thumb",
        }
    }

    fn url(&self) -> Option<&str> {
        match self {
            MenuAction::Annotate { url } | MenuAction::AlbumArt { url } => Some(url.as_str()),
            MenuAction::SearchThumb { engine } => Some(engine.as_str()),
            _ => None,
        }
    }

    fn from_item(doc: &Document, item: NodeId) -> Option<Self> {
        let url = || doc.data(item, "url").map(str::to_string);
        Some(match doc.data(item, "cmd")? {
            "report" => MenuAction::Report,
            "hide" => MenuAction::Hide,
            "file_download" => MenuAction::Download,
            "tegaki_open" => MenuAction::Annotate { url: url()? },
            "audio_album" => MenuAction::AlbumArt { url: url()? },
            "search_thumb" => MenuAction::SearchThumb { engine: url()? },
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub label: String,
    pub action: MenuAction,
}

impl MenuItem {
    fn new(label: impl Into<String>, action: MenuAction) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

pub fn init_menu_buttons(doc: &mut Document, scope: NodeId) {
    for button in doc.by_class(scope, CLASS_MENU_BUTTON) {
        doc.bind(button, Listener::MenuButtonClick);
        doc.bind(button, Listener::MenuButtonBlur);
    }
}

/// Items offered for a post, in display order.
pub fn post_menu_items(
    doc: &Document,
    path: &str,
    board_id: &str,
    parent_id: Option<&str>,
    id: &str,
) -> Vec<MenuItem> {
    let mut items = vec![MenuItem::new("Report post", MenuAction::Report)];
    if parent_id.is_none() {
        let label = if path.contains("/hidden/") {
            "Unhide thread"
        } else {
            "Hide thread"
        };
        items.push(MenuItem::new(label, MenuAction::Hide));
    }

    let file = doc
        .get_element_by_id(&format!("{board_id}-{id}"))
        .and_then(|post| fileinfo::resolve(doc, post));
    if let Some(file) = file.as_ref() {
        if file.kind != FileKind::GenericEmbed {
            items.push(MenuItem::new("Download original", MenuAction::Download));
        }
        if file.kind.is_image() {
            items.push(MenuItem::new(
                "Tegaki: Open image",
                MenuAction::Annotate {
                    url: file.source_url.clone(),
                },
            ));
        }
    }

    let album = doc
        .get_element_by_id(&format!("album-{board_id}-{id}"))
        .map(|node| doc.text_content(node).trim().to_string())
        .filter(|text| !text.is_empty());
    if let Some(url) = album {
        items.push(MenuItem::new("Audio: Album art", MenuAction::AlbumArt { url }));
    }

    if thumb_src(doc, board_id, id).is_some() {
        for (name, engine) in SEARCH_ENGINES {
            items.push(MenuItem::new(
                format!("Search: {name}"),
                MenuAction::SearchThumb {
                    engine: engine.to_string(),
                },
            ));
        }
    }
    items
}

/// Thumbnail source of a post, unless it is a placeholder from `/static/`.
fn thumb_src(doc: &Document, board_id: &str, id: &str) -> Option<String> {
    doc.get_element_by_id(&format!("thumb-{board_id}-{id}"))
        .and_then(|thumb| doc.attr(thumb, "src"))
        .filter(|src| !src.contains("/static/"))
        .map(str::to_string)
}

/// Menu button clicked: opens its menu, or closes it when already open.
pub fn on_button_click(ctx: &mut PageContext, button: NodeId) {
    let id = ctx.doc.data(button, "id").unwrap_or_default().to_string();
    if ctx.doc.has_class(button, CLASS_MENU_BUTTON_OPEN) {
        close(ctx, Some(&id));
        return;
    }
    if ctx.doc.data(button, "cmd") != Some("post-menu") {
        return;
    }
    let board_id = ctx.doc.data(button, "board_id").unwrap_or_default().to_string();
    let parent_id = ctx.doc.data(button, "parent_id").map(str::to_string);
    let items = post_menu_items(
        &ctx.doc,
        &ctx.location.path,
        &board_id,
        parent_id.as_deref(),
        &id,
    );
    open(ctx, button, &board_id, parent_id.as_deref(), &id, &items);
}

/// Focus left a menu button without landing anywhere.
pub fn on_button_blur(ctx: &mut PageContext, related: Option<NodeId>) {
    if related.is_none() {
        close(ctx, None);
    }
}

pub fn open(
    ctx: &mut PageContext,
    button: NodeId,
    board_id: &str,
    parent_id: Option<&str>,
    id: &str,
    items: &[MenuItem],
) -> NodeId {
    close(ctx, None);

    let doc = &mut ctx.doc;
    doc.add_class(button, CLASS_MENU_BUTTON_OPEN);
    let menu = doc.create_element("div");
    doc.add_class(menu, CLASS_MENU);
    doc.set_data(menu, "board_id", board_id);
    if let Some(parent_id) = parent_id {
        doc.set_data(menu, "parent_id", parent_id);
    }
    doc.set_data(menu, "id", id);
    doc.set_attr(menu, "tabindex", "-1");

    let list = doc.create_element("ul");
    for item in items {
        let li = doc.create_element("li");
        doc.set_data(li, "cmd", item.action.cmd());
        if let Some(url) = item.action.url() {
            doc.set_data(li, "url", url);
        }
        doc.set_data(li, "board_id", board_id);
        doc.set_data(li, "id", id);
        doc.set_text(li, &item.label);
        doc.bind(li, Listener::MenuItemClick);
        doc.append_child(list, li);
    }
    doc.append_child(menu, list);
    let root = doc.root();
    doc.append_child(root, menu);

    let anchor = ctx.layout.rect(&ctx.doc, button);
    let size = ctx.layout.measure(&ctx.doc, menu);
    let placed = overlay::place(anchor, size, Side::Below, &ctx.viewport, false);
    ctx.doc.set_style(menu, "left", &placed.left.css());
    ctx.doc.set_style(menu, "top", &placed.top.css());

    debug!(board_id, id, items = items.len(), "menu opened");
    ctx.menu = Some(OpenMenu {
        id: id.to_string(),
        button,
        element: menu,
    });
    menu
}

/// Closes the menu of post `id`, or every menu when `id` is `None`.
pub fn close(ctx: &mut PageContext, id: Option<&str>) {
    let matches = |menu_id: Option<&str>| id.is_none() || menu_id == id;
    if let Some(menu) = ctx.menu.take() {
        if matches(Some(menu.id.as_str())) {
            ctx.doc.release(menu.element);
        } else {
            ctx.menu = Some(menu);
        }
    }
    let root = ctx.doc.root();
    for button in ctx.doc.by_class(root, CLASS_MENU_BUTTON) {
        if matches(ctx.doc.data(button, "id")) {
            ctx.doc.remove_class(button, CLASS_MENU_BUTTON_OPEN);
        }
    }
}

/// Runs the clicked menu item, then closes the menu.
pub fn on_item_click(ctx: &mut PageContext, item: NodeId) {
    let board_id = ctx.doc.data(item, "board_id").unwrap_or_default().to_string();
    let id = ctx.doc.data(item, "id").unwrap_or_default().to_string();
    match MenuAction::from_item(&ctx.doc, item) {
        Some(action) => run_action(ctx, &action, &board_id, &id),
        None => warn!(cmd = ?ctx.doc.data(item, "cmd"), "unhandled menu command"),
    }
    close(ctx, Some(&id));
}

fn run_action(ctx: &mut PageContext, action: &MenuAction, board_id: &str, id: &str) {
    let result = match action {
        MenuAction::Report => ctx.navigator.open_window(
            &format!("/{board_id}/{id}/report"),
            Some(REPORT_WINDOW_FEATURES),
        ),
        MenuAction::Hide => {
            let path = format!("/{board_id}/{id}/hide");
            let (board_id, id) = (board_id.to_string(), id.to_string());
            ctx.spawn(move |transport| AsyncResponse::Hide {
                result: transport.post(&path, &CancelToken::new()),
                board_id,
                id,
            });
            Ok(())
        }
        MenuAction::Download => ctx.navigator.assign(&format!("/{board_id}/{id}/download")),
        MenuAction::Annotate { url } => ctx.navigator.open_annotation(url),
        MenuAction::AlbumArt { url } => ctx.navigator.open_window(url, None),
        MenuAction::SearchThumb { engine } => match thumb_src(&ctx.doc, board_id, id) {
            Some(src) => {
                let target = format!("{engine}{}", ctx.location.absolute(&src));
                ctx.navigator.open_window(&target, None)
            }
            None => Ok(()),
        },
    };
    if let Err(err) = result {
        warn!(error = ?err, cmd = action.cmd(), "menu action failed");
    }
}

/// Completion of a hide request: drops the thread and its trailing divider.
pub fn apply_hide(
    ctx: &mut PageContext,
    board_id: &str,
    id: &str,
    result: Result<Response, FetchError>,
) {
    if let Err(err) = result.and_then(Response::error_for_status) {
        warn!(error = %err, board_id, id, "hide request failed");
        return;
    }
    let Some(thread) = ctx.doc.get_element_by_id(&format!("thread_{board_id}-{id}")) else {
        return;
    };
    if let Some(divider) = ctx.doc.next_element_sibling(thread) {
        if ctx.doc.is_tag(divider, "hr") {
            ctx.doc.remove(divider);
        }
    }
    ctx.doc.remove(thread);
    debug!(board_id, id, "thread hidden");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Event;
    use crate::testutil::{file_post, Harness, NavCall};

    fn labels(items: &[MenuItem]) -> Vec<&str> {
        items.iter().map(|item| item.label.as_str()).collect()
    }

    fn menu_button(h: &Harness, id: &str) -> NodeId {
        let doc = &h.ctx.doc;
        doc.find_first(doc.root(), |doc, node| {
            doc.has_class(node, CLASS_MENU_BUTTON) && doc.data(node, "id") == Some(id)
        })
        .unwrap()
    }

    #[test]
    fn image_reply_offers_download_annotation_and_search() {
        let h = Harness::new(&file_post("b", 5, "pic.jpg"));
        let items = post_menu_items(&h.ctx.doc, "/b/10/", "b", Some("10"), "5");
        assert_eq!(
            labels(&items),
            vec![
                "Report post",
                "Download original",
                "Tegaki: Open image",
                "Search: SauceNAO",
                "Search: IQDB",
                "Search: IQDB 3D",
                "Search: ASCII2D",
                "Search: TinEye",
            ]
        );
    }

    #[test]
    fn thread_roots_get_hide_or_unhide() {
        let h = Harness::new(r#"<div class="post" id="b-10"><div class="post-info"></div></div>
            <span id="album-b-10">https://art.example/cover.jpg</span>
            <img id="thumb-b-10" src="/static/audio.png">"#);
        let items = post_menu_items(&h.ctx.doc, "/b/", "b", None, "10");
        assert_eq!(labels(&items), vec!["Report post", "Hide thread", "Audio: Album art"]);
        let items = post_menu_items(&h.ctx.doc, "/b/hidden/", "b", None, "10");
        assert_eq!(items[1].label, "Unhide thread");
        assert_eq!(items[1].action, MenuAction::Hide);
    }

    #[test]
    fn opening_a_second_menu_closes_the_first() {
        let body = format!("{}{}", file_post("b", 1, "a.png"), file_post("b", 2, "b.png"));
        let mut h = Harness::new(&body);
        let first = menu_button(&h, "1");
        let second = menu_button(&h, "2");
        h.click(first);
        h.click(second);
        assert_eq!(h.count_class(CLASS_MENU), 1);
        assert_eq!(h.ctx.menu.as_ref().map(|m| m.id.as_str()), Some("2"));
        assert!(!h.ctx.doc.has_class(first, CLASS_MENU_BUTTON_OPEN));
        assert!(h.ctx.doc.has_class(second, CLASS_MENU_BUTTON_OPEN));

        h.click(second);
        assert_eq!(h.count_class(CLASS_MENU), 0);
        assert!(!h.ctx.doc.has_class(second, CLASS_MENU_BUTTON_OPEN));
    }

    #[test]
    fn closed_menus_free_their_nodes() {
        let mut h = Harness::new(&file_post("b", 1, "a.png"));
        let button = menu_button(&h, "1");
        h.click(button);
        h.click(button);
        let live = h.ctx.doc.live_nodes();
        for _ in 0..5 {
            h.click(button);
            assert_eq!(h.count_class(CLASS_MENU), 1);
            h.click(button);
        }
        assert_eq!(h.ctx.doc.live_nodes(), live);
        assert!(h.ctx.menu.is_none());
    }

    #[test]
    fn blur_without_new_focus_closes_everything() {
        let mut h = Harness::new(&file_post("b", 1, "a.png"));
        let button = menu_button(&h, "1");
        h.click(button);
        let menu = h.ctx.menu.as_ref().unwrap().element;
        h.fire(button, Event::Blur { related: Some(menu) });
        assert_eq!(h.count_class(CLASS_MENU), 1);
        h.fire(button, Event::Blur { related: None });
        assert_eq!(h.count_class(CLASS_MENU), 0);
        assert!(h.ctx.menu.is_none());
    }

    #[test]
    fn report_and_search_actions_navigate_and_close() {
        let mut h = Harness::new(&file_post("b", 1, "a.png"));
        let button = menu_button(&h, "1");
        h.click(button);
        let menu = h.ctx.menu.as_ref().unwrap().element;
        let items = h.ctx.doc.find_all(menu, |doc, node| doc.is_tag(node, "li"));
        h.click(items[0]);
        assert!(h.ctx.menu.is_none());

        h.click(button);
        let menu = h.ctx.menu.as_ref().unwrap().element;
        let tineye = h
            .ctx
            .doc
            .find_first(menu, |doc, node| doc.text_content(node) == "Search: TinEye")
            .unwrap();
        h.click(tineye);
        assert_eq!(
            h.nav_calls(),
            vec![
                NavCall::OpenWindow(
                    "/b/1/report".into(),
                    Some("location=true,status=true,width=480,height=640".into())
                ),
                NavCall::OpenWindow(
                    "https://tineye.com/search?url=https://board.example/thumb/b/1.png".into(),
                    None
                ),
            ]
        );
    }

    #[test]
    fn successful_hide_removes_thread_and_divider() {
        let body = r#"<div class="thread" id="thread_b-77"><div class="post" id="b-77">
            <div class="post-info"><a class="dd-menu-btn" data-cmd="post-menu" data-board_id="b" data-id="77">m</a></div></div></div>
            <hr id="divider"><div class="thread" id="thread_b-78"></div>"#;
        let mut h = Harness::at("https://board.example/b/", body);
        h.transport.respond("/b/77/hide", 200, "");
        let button = menu_button(&h, "77");
        h.click(button);
        let menu = h.ctx.menu.as_ref().unwrap().element;
        let hide = h
            .ctx
            .doc
            .find_first(menu, |doc, node| doc.text_content(node) == "Hide thread")
            .unwrap();
        h.click(hide);
        assert!(h.ctx.doc.get_element_by_id("thread_b-77").is_some());
        h.poll();
        assert!(h.ctx.doc.get_element_by_id("thread_b-77").is_none());
        assert!(h.ctx.doc.get_element_by_id("divider").is_none());
        assert!(h.ctx.doc.get_element_by_id("thread_b-78").is_some());
        assert!(!h.nav_calls().contains(&NavCall::Reload));
        assert_eq!(h.transport.calls(), vec!["POST /b/77/hide"]);
    }

    #[test]
    fn failed_hide_keeps_thread() {
        let body = r#"<div class="thread" id="thread_b-77"></div><hr>"#;
        let mut h = Harness::at("https://board.example/b/", body);
        h.transport.respond("/b/77/hide", 403, "");
        apply_hide(&mut h.ctx, "b", "77", Err(FetchError::Cancelled));
        assert!(h.ctx.doc.get_element_by_id("thread_b-77").is_some());
    }
}
