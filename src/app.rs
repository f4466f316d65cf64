use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::config::{self, Config, Settings};
use crate::context::{Dispatch, Location, PageContext, Services};
use crate::dom::{Document, EstimatedLayout};
use crate::media::{ProcessPlugins, ProcessTrackerFactory};
use crate::net::{BrowserNavigator, CancelToken, ClientConfig, HttpTransport, Transport};
use crate::page::Page;
use crate::storage;

const LOOP_INTERVAL: Duration = Duration::from_millis(100);

static THREAD_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/[^/]+/\d+/?$").expect("valid thread path regex"));

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
    pub thread_url: Option<String>,
}

pub fn run(options: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: options.config_file,
        env_prefix: None,
    })
    .context("load config")?;

    let store = storage::Store::open(storage::Options::default()).context("open storage")?;
    let mut settings = Settings::from_config(&cfg);
    settings
        .apply_overrides(&store)
        .context("apply stored settings")?;

    let url = match options.thread_url {
        Some(url) => url,
        None if !cfg.board.base_url.trim().is_empty() => cfg.board.base_url.clone(),
        None => bail!("no thread to watch; pass --watch <thread-url>"),
    };

    let mut page = open_page(&cfg, settings, Some(store), &url)?;
    if !page.is_thread_view() {
        warn!(url = %url, "page is not a thread view, nothing to watch");
        return Ok(());
    }
    info!(url = %url, "watching thread");

    loop {
        page.poll_async();
        page.tick(Instant::now());
        thread::sleep(LOOP_INTERVAL);
    }
}

/// Fetches a thread page and bootstraps it with the live collaborators.
pub fn open_page(
    cfg: &Config,
    settings: Settings,
    store: Option<storage::Store>,
    url: &str,
) -> Result<Page> {
    let location = Location::parse(url).with_context(|| format!("parse address {url:?}"))?;
    if !THREAD_PATH_RE.is_match(&location.path) {
        bail!("{url} is not a thread address (expected /<board>/<thread>/)");
    }

    let transport = HttpTransport::new(ClientConfig {
        base_url: location.origin.clone(),
        user_agent: cfg.board.user_agent.clone(),
        timeout: Some(cfg.board.request_timeout),
        http_client: None,
    })?;
    let base_url = transport.base_url().clone();

    let response = transport
        .get(&location.path, &CancelToken::new())
        .and_then(|response| response.error_for_status())
        .with_context(|| format!("fetch {url}"))?;
    let doc = Document::from_html(&response.body);

    let services = Services {
        transport: Arc::new(transport),
        navigator: Box::new(BrowserNavigator::new(base_url.clone())),
        plugins: Box::new(ProcessPlugins::new(
            cfg.player.plugin_command.clone(),
            base_url.clone(),
        )),
        trackers: Box::new(ProcessTrackerFactory {
            command: cfg.player.tracker_command.clone(),
            base_url,
        }),
        layout: Box::new(EstimatedLayout::default()),
        store,
    };
    let ctx = PageContext::new(doc, settings, location, services, Dispatch::Threaded);
    Ok(Page::new(ctx))
}
