//! Per-view state shared by every page feature.
//!
//! A [`PageContext`] is built when a view initializes and handed by reference to
//! every controller. It owns the document, the user settings, the state each
//! controller keeps between events, and the host collaborators. Network work is
//! handed to [`PageContext::spawn`] and its results come back as
//! [`AsyncResponse`] messages drained by the page.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use url::Url;

use crate::config::Settings;
use crate::dom::{Document, Layout, NodeId};
use crate::fileinfo::FileKind;
use crate::media::{PluginHandle, PluginRuntime, TrackerFactory, TrackerPlayer};
use crate::net::{CancelToken, FetchError, Navigator, Response, Transport};
use crate::overlay::Viewport;
use crate::storage::Store;

/// How spawned network jobs run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// On a worker thread; results arrive whenever the worker finishes.
    Threaded,
    /// On the calling thread; the result is queued before `spawn` returns.
    Inline,
}

/// Identity of a previewable post, taken from a reference link's dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PostKey {
    pub board_id: String,
    pub parent_id: String,
    pub id: String,
}

impl PostKey {
    pub fn from_dataset(doc: &Document, node: NodeId) -> Option<Self> {
        Some(Self {
            board_id: doc.data(node, "board_id")?.to_string(),
            parent_id: doc.data(node, "parent_id")?.to_string(),
            id: doc.data(node, "id")?.to_string(),
        })
    }

    pub fn path(&self) -> String {
        format!("/{}/{}/{}", self.board_id, self.parent_id, self.id)
    }
}

/// Fixed-period timer polled by the page's tick.
///
/// A period too long to represent as an `Instant` never fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub period: Duration,
    next_due: Option<Instant>,
}

impl Interval {
    pub fn starting_at(period: Duration, now: Instant) -> Self {
        Self {
            period,
            next_due: now.checked_add(period),
        }
    }

    /// Whether the timer fired by `now`. Firing schedules the next deadline one
    /// period after `now`; missed periods are not replayed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                self.next_due = now.checked_add(self.period);
                true
            }
            _ => false,
        }
    }
}

/// Text the user selected in the page and the node the selection starts in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSelection {
    pub text: String,
    pub anchor: NodeId,
}

/// An expanded file, keyed in [`PageContext::expansions`] by its thumbnail anchor.
#[derive(Debug, Clone)]
pub struct Expansion {
    pub kind: FileKind,
    pub post: NodeId,
    pub thumb: NodeId,
    /// Thumbnail style property changed on expansion, with its prior value.
    pub thumb_style: Option<(&'static str, Option<String>)>,
    pub injected: NodeId,
    pub shrink_link: Option<NodeId>,
    pub plugin: Option<PluginHandle>,
}

/// The one tracker-module player of the page and the post that owns it.
#[derive(Default)]
pub struct TrackerSlot {
    pub player: Option<Box<dyn TrackerPlayer>>,
    pub owner: Option<NodeId>,
    pub slider: Option<NodeId>,
    pub poll: Option<Interval>,
}

#[derive(Debug, Clone)]
pub struct OpenMenu {
    pub id: String,
    pub button: NodeId,
    pub element: NodeId,
}

pub struct PendingPreview {
    pub request_id: u64,
    pub cancel: CancelToken,
    pub anchor: NodeId,
}

#[derive(Default)]
pub struct PreviewState {
    /// Raw markup per post, kept for the lifetime of the page.
    pub cache: HashMap<PostKey, String>,
    pub pending: HashMap<PostKey, PendingPreview>,
    pub hovering: bool,
}

#[derive(Debug, Clone)]
pub struct SyncState {
    pub enabled: bool,
    pub last_seen: Option<i64>,
    pub timer: Option<Interval>,
    pub in_flight: Option<u64>,
    pub torn_down: bool,
}

#[derive(Debug, Clone)]
pub struct PendingForm {
    pub request_id: u64,
    pub submit_button: Option<NodeId>,
}

/// Address of the loaded view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub origin: String,
    pub path: String,
    pub hash: String,
}

impl Location {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let url = Url::parse(raw)?;
        let origin = url.origin().ascii_serialization();
        let hash = url
            .fragment()
            .map(|fragment| format!("#{fragment}"))
            .unwrap_or_default();
        Ok(Self {
            origin,
            path: url.path().to_string(),
            hash,
        })
    }

    /// Resolves `target` against the view's origin.
    pub fn absolute(&self, target: &str) -> String {
        Url::parse(&self.origin)
            .and_then(|base| base.join(target))
            .map(|url| url.to_string())
            .unwrap_or_else(|_| target.to_string())
    }
}

pub enum AsyncResponse {
    Preview {
        request_id: u64,
        key: PostKey,
        result: Result<Response, FetchError>,
    },
    Replies {
        request_id: u64,
        result: Result<Response, FetchError>,
    },
    Hide {
        board_id: String,
        id: String,
        result: Result<Response, FetchError>,
    },
    Form {
        request_id: u64,
        form: NodeId,
        result: Result<Response, FetchError>,
    },
}

pub struct Services {
    pub transport: Arc<dyn Transport>,
    pub navigator: Box<dyn Navigator>,
    pub plugins: Box<dyn PluginRuntime>,
    pub trackers: Box<dyn TrackerFactory>,
    pub layout: Box<dyn Layout>,
    /// Remembered per-user values such as the post password.
    pub store: Option<Store>,
}

pub struct PageContext {
    pub doc: Document,
    pub settings: Settings,
    pub viewport: Viewport,
    pub location: Location,
    /// Current selection, kept up to date by the host.
    pub selection: Option<TextSelection>,

    pub expansions: HashMap<NodeId, Expansion>,
    pub tracker: TrackerSlot,
    pub menu: Option<OpenMenu>,
    pub previews: PreviewState,
    pub sync: Option<SyncState>,
    pub forms: HashMap<NodeId, PendingForm>,

    pub transport: Arc<dyn Transport>,
    pub navigator: Box<dyn Navigator>,
    pub plugins: Box<dyn PluginRuntime>,
    pub trackers: Box<dyn TrackerFactory>,
    pub layout: Box<dyn Layout>,
    pub store: Option<Store>,

    dispatch: Dispatch,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    next_request_id: u64,
}

impl PageContext {
    pub fn new(
        doc: Document,
        settings: Settings,
        location: Location,
        services: Services,
        dispatch: Dispatch,
    ) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            doc,
            settings,
            viewport: Viewport::default(),
            location,
            selection: None,
            expansions: HashMap::new(),
            tracker: TrackerSlot::default(),
            menu: None,
            previews: PreviewState::default(),
            sync: None,
            forms: HashMap::new(),
            transport: services.transport,
            navigator: services.navigator,
            plugins: services.plugins,
            trackers: services.trackers,
            layout: services.layout,
            store: services.store,
            dispatch,
            response_tx,
            response_rx,
            next_request_id: 1,
        }
    }

    pub fn next_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    /// Runs `job` against the transport and queues what it returns.
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce(&dyn Transport) -> AsyncResponse + Send + 'static,
    {
        let tx = self.response_tx.clone();
        let transport = Arc::clone(&self.transport);
        match self.dispatch {
            Dispatch::Threaded => {
                thread::spawn(move || {
                    let _ = tx.send(job(transport.as_ref()));
                });
            }
            Dispatch::Inline => {
                let _ = tx.send(job(transport.as_ref()));
            }
        }
    }

    pub fn try_recv(&self) -> Option<AsyncResponse> {
        self.response_rx.try_recv().ok()
    }

    /// Shows `content` (markup) in the page's error window, replacing any
    /// window already open.
    pub fn error_window(&mut self, content: &str) -> NodeId {
        if let Some(existing) = self.doc.get_element_by_id("errorwindow") {
            self.doc.release(existing);
        }
        let window = self.doc.create_element("div");
        self.doc.set_attr(window, "id", "errorwindow");
        self.doc.add_class(window, "window");
        let title = self.doc.create_element("div");
        self.doc.add_class(title, "window-title");
        self.doc.set_text(title, "Error");
        self.doc.append_child(window, title);
        let body = self.doc.create_element("div");
        self.doc.add_class(body, "window-content");
        self.doc.set_inner_html(body, content);
        self.doc.append_child(window, body);
        let root = self.doc.root();
        self.doc.append_child(root, window);

        let size = self.layout.measure(&self.doc, window);
        let left = self.viewport.width * 0.5 - size.width * 0.5;
        let top = self.viewport.height * 0.5 - size.height * 0.5;
        self.doc.set_style(window, "left", &format!("{left}px"));
        self.doc.set_style(window, "top", &format!("{top}px"));
        window
    }
}
