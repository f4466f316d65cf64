//! Recording collaborators and a page harness for unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use crate::config::Settings;
use crate::context::{Dispatch, Location, PageContext, Services};
use crate::dom::{Document, EstimatedLayout, NodeId};
use crate::media::{
    PluginHandle, PluginRuntime, TrackerFactory, TrackerMetadata, TrackerPlayer,
};
use crate::net::{CancelToken, FetchError, Navigator, Response, Transport};
use crate::overlay::Size;
use crate::page::{self, Event};
use crate::storage::Store;

#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<HashMap<String, Result<Response, String>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn respond(&self, path: &str, status: u16, body: &str) {
        self.responses.lock().insert(
            path.to_string(),
            Ok(Response {
                status,
                body: body.to_string(),
            }),
        );
    }

    pub fn fail(&self, path: &str, message: &str) {
        self.responses
            .lock()
            .insert(path.to_string(), Err(message.to_string()));
    }

    /// Requests seen so far, as `"METHOD path"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn answer(&self, method: &str, path: &str, cancel: &CancelToken) -> Result<Response, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        self.calls.lock().push(format!("{method} {path}"));
        match self.responses.lock().get(path) {
            Some(Ok(response)) => Ok(response.clone()),
            Some(Err(message)) => Err(FetchError::InvalidUrl(message.clone())),
            None => Ok(Response {
                status: 404,
                body: String::new(),
            }),
        }
    }
}

impl Transport for FakeTransport {
    fn get(&self, path: &str, cancel: &CancelToken) -> Result<Response, FetchError> {
        self.answer("GET", path, cancel)
    }

    fn post(&self, path: &str, cancel: &CancelToken) -> Result<Response, FetchError> {
        self.answer("POST", path, cancel)
    }

    fn post_form(
        &self,
        action: &str,
        fields: &[(String, String)],
        cancel: &CancelToken,
    ) -> Result<Response, FetchError> {
        let summary: Vec<String> = fields.iter().map(|(k, v)| format!("{k}={v}")).collect();
        self.calls.lock().push(format!("FORM {action} {}", summary.join("&")));
        self.answer("POST", action, cancel)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NavCall {
    Assign(String),
    OpenWindow(String, Option<String>),
    Reload,
    ReplaceHistory(String),
    Annotate(String),
}

#[derive(Clone, Default)]
pub struct RecordingNavigator(pub Arc<Mutex<Vec<NavCall>>>);

impl Navigator for RecordingNavigator {
    fn assign(&mut self, url: &str) -> Result<()> {
        self.0.lock().push(NavCall::Assign(url.to_string()));
        Ok(())
    }

    fn open_window(&mut self, url: &str, features: Option<&str>) -> Result<()> {
        self.0
            .lock()
            .push(NavCall::OpenWindow(url.to_string(), features.map(str::to_string)));
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        self.0.lock().push(NavCall::Reload);
        Ok(())
    }

    fn replace_history(&mut self, url: &str) -> Result<()> {
        self.0.lock().push(NavCall::ReplaceHistory(url.to_string()));
        Ok(())
    }

    fn open_annotation(&mut self, image_url: &str) -> Result<()> {
        self.0.lock().push(NavCall::Annotate(image_url.to_string()));
        Ok(())
    }
}

/// Shared log of player calls, e.g. `"create 100"`, `"load /a.xm"`, `"stop"`.
pub type PlayerLog = Arc<Mutex<Vec<String>>>;

#[derive(Clone, Default)]
pub struct RecordingTrackers(pub PlayerLog);

impl TrackerFactory for RecordingTrackers {
    fn create(&mut self, stereo_separation: f64) -> Result<Box<dyn TrackerPlayer>> {
        self.0.lock().push(format!("create {stereo_separation}"));
        Ok(Box::new(RecordingTracker {
            log: self.0.clone(),
            loaded: None,
            playing: false,
        }))
    }
}

struct RecordingTracker {
    log: PlayerLog,
    loaded: Option<String>,
    playing: bool,
}

impl TrackerPlayer for RecordingTracker {
    fn load(&mut self, url: &str) -> Result<()> {
        self.log.lock().push(format!("load {url}"));
        self.loaded = Some(url.to_string());
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        self.log.lock().push("play".to_string());
        self.playing = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.log.lock().push("stop".to_string());
        self.playing = false;
    }

    fn metadata(&self) -> TrackerMetadata {
        TrackerMetadata {
            title: self.loaded.clone().unwrap_or_default(),
            tracker: "test".to_string(),
            type_long: "FastTracker 2".to_string(),
        }
    }

    fn duration(&self) -> f64 {
        120.0
    }

    fn current_time(&self) -> Option<f64> {
        self.playing.then_some(42.0)
    }
}

#[derive(Clone, Default)]
pub struct RecordingPlugins {
    pub log: PlayerLog,
    next: Arc<Mutex<u64>>,
}

impl PluginRuntime for RecordingPlugins {
    fn create_player(&mut self, url: &str, max_size: Size) -> Result<PluginHandle> {
        let mut next = self.next.lock();
        *next += 1;
        self.log.lock().push(format!(
            "create {url} {}x{}",
            max_size.width, max_size.height
        ));
        Ok(PluginHandle(*next))
    }

    fn set_volume(&mut self, handle: PluginHandle, volume: f64) -> Result<()> {
        self.log.lock().push(format!("volume {} {volume}", handle.0));
        Ok(())
    }

    fn destroy(&mut self, handle: PluginHandle) {
        self.log.lock().push(format!("destroy {}", handle.0));
    }
}

pub struct Harness {
    pub ctx: PageContext,
    pub transport: Arc<FakeTransport>,
    pub nav: Arc<Mutex<Vec<NavCall>>>,
    pub trackers: PlayerLog,
    pub plugins: PlayerLog,
    pub store: Store,
}

impl Harness {
    pub fn new(body: &str) -> Self {
        Self::at("https://board.example/b/10/", body)
    }

    pub fn at(url: &str, body: &str) -> Self {
        Self::with_settings(url, body, Settings::default())
    }

    pub fn with_settings(url: &str, body: &str, settings: Settings) -> Self {
        let store = match Store::open_in_memory() {
            Ok(store) => store,
            Err(err) => panic!("in-memory store: {err}"),
        };
        Self::with_store(url, body, settings, store)
    }

    pub fn with_store(url: &str, body: &str, settings: Settings, store: Store) -> Self {
        let doc = Document::from_html(&format!("<html><body>{body}</body></html>"));
        let transport = Arc::new(FakeTransport::default());
        let navigator = RecordingNavigator::default();
        let trackers = RecordingTrackers::default();
        let plugins = RecordingPlugins::default();
        let nav = navigator.0.clone();
        let tracker_log = trackers.0.clone();
        let plugin_log = plugins.log.clone();
        let location = match Location::parse(url) {
            Ok(location) => location,
            Err(err) => panic!("bad harness url {url}: {err}"),
        };
        let mut ctx = PageContext::new(
            doc,
            settings,
            location,
            Services {
                transport: transport.clone(),
                navigator: Box::new(navigator),
                plugins: Box::new(plugins),
                trackers: Box::new(trackers),
                layout: Box::new(EstimatedLayout::default()),
                store: Some(store.clone()),
            },
            Dispatch::Inline,
        );
        page::bootstrap(&mut ctx);
        Self {
            ctx,
            transport,
            nav,
            trackers: tracker_log,
            plugins: plugin_log,
            store,
        }
    }

    pub fn by_id(&self, id: &str) -> NodeId {
        match self.ctx.doc.get_element_by_id(id) {
            Some(node) => node,
            None => panic!("no element #{id}"),
        }
    }

    /// First element with `class` under the document root.
    pub fn by_class(&self, class: &str) -> NodeId {
        let doc = &self.ctx.doc;
        match doc.first_by_class(doc.root(), class) {
            Some(node) => node,
            None => panic!("no element .{class}"),
        }
    }

    pub fn count_class(&self, class: &str) -> usize {
        let doc = &self.ctx.doc;
        doc.by_class(doc.root(), class).len()
    }

    pub fn fire(&mut self, target: NodeId, event: Event) {
        page::dispatch(&mut self.ctx, target, event);
    }

    pub fn click(&mut self, target: NodeId) {
        self.fire(target, Event::Click);
    }

    pub fn poll(&mut self) -> bool {
        page::poll_async(&mut self.ctx)
    }

    pub fn nav_calls(&self) -> Vec<NavCall> {
        self.nav.lock().clone()
    }

    pub fn tracker_calls(&self) -> Vec<String> {
        self.trackers.lock().clone()
    }

    pub fn plugin_calls(&self) -> Vec<String> {
        self.plugins.lock().clone()
    }
}

/// Markup of a reply post with an attached file.
pub fn file_post(board: &str, id: u32, file: &str) -> String {
    format!(
        r#"<div class="post-container"><div class="post reply" id="{board}-{id}">
  <div class="post-info"><span class="post-hashid-hash">abcd</span>
    <a class="dd-menu-btn" data-cmd="post-menu" data-board_id="{board}" data-parent_id="10" data-id="{id}">&#9654;</a></div>
  <div class="file-info" id="finfo-{id}">{file}</div>
  <a class="file-thumb-href" id="anchor-{id}" href="/src/{board}/{file}"><img class="file-thumb" id="thumb-{board}-{id}" src="/thumb/{board}/{id}.png" width="200"></a>
  <div class="post-message"></div>
</div></div>"#
    )
}
