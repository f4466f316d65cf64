//! Inline expansion of post files.
//!
//! Each thumbnail anchor is either collapsed or expanded; expanded ones are
//! recorded in [`PageContext::expansions`]. Video, audio, tracker modules and
//! plugin content share one expanded-at-a-time slot, except that an expanded
//! plugin item is never collapsed by another expansion.

use std::time::Instant;

use tracing::{debug, warn};

use crate::context::{Expansion, Interval, PageContext};
use crate::dom::{Document, Listener, NodeId};
use crate::fileinfo::{self, FileInfo, FileKind, CLASS_THUMB_HREF};
use crate::overlay::Size;

pub const CLASS_SHRINK_HREF: &str = "file-shrink-href";

/// Binds thumbnail clicks for every file anchor under `scope`.
pub fn init_thumb_links(doc: &mut Document, scope: NodeId) {
    for anchor in doc.by_class(scope, CLASS_THUMB_HREF) {
        doc.bind(anchor, Listener::ThumbClick);
    }
}

pub fn is_expanded(ctx: &PageContext, anchor: NodeId) -> bool {
    ctx.expansions.contains_key(&anchor)
}

/// Toggles the file behind `anchor`. Only clicks that land on the thumbnail
/// image count.
pub fn on_thumb_click(ctx: &mut PageContext, anchor: NodeId, target: NodeId) {
    if !ctx.doc.is_tag(target, "img") {
        return;
    }
    match ctx.expansions.get(&anchor).map(|exp| exp.kind) {
        None => expand(ctx, anchor),
        // Plugin content only collapses through its own shrink link.
        Some(FileKind::PluginEmbed) => {}
        Some(_) => shrink(ctx, anchor),
    }
}

pub fn on_shrink_click(ctx: &mut PageContext, link: NodeId) {
    let anchor = ctx
        .expansions
        .iter()
        .find(|(_, exp)| exp.shrink_link == Some(link))
        .map(|(anchor, _)| *anchor);
    if let Some(anchor) = anchor {
        shrink(ctx, anchor);
    }
}

/// A media element finished playing without looping.
pub fn on_media_ended(ctx: &mut PageContext, media: NodeId) {
    let anchor = ctx
        .expansions
        .iter()
        .find(|(_, exp)| exp.injected == media)
        .map(|(anchor, _)| *anchor);
    if let Some(anchor) = anchor {
        shrink(ctx, anchor);
    }
}

fn post_of(doc: &Document, anchor: NodeId) -> Option<NodeId> {
    doc.closest(anchor, |doc, node| doc.has_class(node, "post"))
        .or_else(|| doc.parent(anchor).and_then(|parent| doc.parent(parent)))
}

pub fn expand(ctx: &mut PageContext, anchor: NodeId) {
    if is_expanded(ctx, anchor) {
        return;
    }
    let Some(post) = post_of(&ctx.doc, anchor) else {
        return;
    };
    let Some(info) = fileinfo::resolve(&ctx.doc, post) else {
        debug!("post has no file section");
        return;
    };
    let Some(thumb) = ctx.doc.first_element_child(anchor) else {
        return;
    };

    if info.kind.is_exclusive() {
        let others: Vec<NodeId> = ctx
            .expansions
            .iter()
            .filter(|(other, exp)| {
                **other != anchor && exp.kind.is_exclusive() && exp.kind != FileKind::PluginEmbed
            })
            .map(|(other, _)| *other)
            .collect();
        for other in others {
            shrink(ctx, other);
        }
    }

    let mut plugin = None;
    let (injected, thumb_style) = match info.kind {
        FileKind::Video => inject_video(ctx, anchor, thumb, &info),
        FileKind::Audio => inject_audio(ctx, anchor, thumb, &info),
        FileKind::TrackerModule => (inject_tracker(ctx, anchor, thumb, &info), None),
        FileKind::PluginEmbed => {
            let (node, style, handle) = inject_plugin(ctx, anchor, thumb, &info);
            plugin = handle;
            (node, style)
        }
        FileKind::GenericEmbed => inject_embed(ctx, anchor, thumb, &info),
        FileKind::Pdf => inject_pdf(ctx, anchor, thumb, &info),
        FileKind::Image | FileKind::Unknown => inject_image(ctx, anchor, thumb, &info),
    };

    let shrink_link = info.info_block.map(|block| {
        let link = ctx.doc.create_element("a");
        ctx.doc.set_attr(link, "href", "");
        ctx.doc.add_class(link, CLASS_SHRINK_HREF);
        ctx.doc.set_text(link, "[-]");
        ctx.doc.bind(link, Listener::ShrinkClick);
        ctx.doc.prepend_child(block, link);
        link
    });

    debug!(kind = ?info.kind, url = %info.source_url, "expanded file");
    ctx.expansions.insert(
        anchor,
        Expansion {
            kind: info.kind,
            post,
            thumb,
            thumb_style,
            injected,
            shrink_link,
            plugin,
        },
    );
}

pub fn shrink(ctx: &mut PageContext, anchor: NodeId) {
    let Some(exp) = ctx.expansions.remove(&anchor) else {
        return;
    };

    match exp.kind {
        FileKind::TrackerModule if ctx.tracker.owner == Some(anchor) => {
            ctx.tracker.poll = None;
            if let Some(player) = ctx.tracker.player.as_mut() {
                player.stop();
            }
            ctx.tracker.owner = None;
            ctx.tracker.slider = None;
        }
        FileKind::PluginEmbed => {
            if let Some(handle) = exp.plugin {
                ctx.plugins.destroy(handle);
            }
        }
        _ => {}
    }

    ctx.doc.remove(exp.injected);
    if let Some(link) = exp.shrink_link {
        ctx.doc.remove(link);
    }
    if let Some((prop, previous)) = exp.thumb_style {
        match previous {
            Some(value) => ctx.doc.set_style(exp.thumb, prop, &value),
            None => ctx.doc.remove_style(exp.thumb, prop),
        }
    }
    debug!(kind = ?exp.kind, "collapsed file");
}

/// Advances the tracker position slider when its poll interval is due.
pub fn poll_tracker(ctx: &mut PageContext, now: Instant) {
    let Some(poll) = ctx.tracker.poll.as_mut() else {
        return;
    };
    if !poll.fire(now) {
        return;
    }
    let position = ctx
        .tracker
        .player
        .as_ref()
        .and_then(|player| player.current_time());
    if let (Some(position), Some(slider)) = (position, ctx.tracker.slider) {
        ctx.doc.set_attr(slider, "value", &format!("{position}"));
    }
}

type ThumbStyle = Option<(&'static str, Option<String>)>;

fn hide_thumb(doc: &mut Document, thumb: NodeId) -> ThumbStyle {
    let previous = doc.style(thumb, "display").map(str::to_string);
    doc.set_style(thumb, "display", "none");
    Some(("display", previous))
}

fn thumb_width(doc: &Document, thumb: NodeId) -> Option<String> {
    doc.attr(thumb, "width").map(|width| format!("{width}px"))
}

fn inject_image(
    ctx: &mut PageContext,
    anchor: NodeId,
    thumb: NodeId,
    info: &FileInfo,
) -> (NodeId, ThumbStyle) {
    let doc = &mut ctx.doc;
    let style = hide_thumb(doc, thumb);
    let img = doc.create_element("img");
    doc.set_attr(img, "src", &info.source_url);
    doc.set_attr(img, "loading", "lazy");
    doc.set_style(img, "max-width", "100%");
    doc.set_style(img, "max-height", "85vh");
    doc.set_style(img, "height", "auto");
    doc.append_child(anchor, img);
    (img, style)
}

fn inject_pdf(
    ctx: &mut PageContext,
    anchor: NodeId,
    thumb: NodeId,
    info: &FileInfo,
) -> (NodeId, ThumbStyle) {
    let doc = &mut ctx.doc;
    let style = hide_thumb(doc, thumb);
    let embed = doc.create_element("embed");
    doc.set_attr(embed, "type", "application/pdf");
    doc.set_attr(embed, "src", &info.source_url);
    doc.set_style(embed, "width", "85vw");
    doc.set_style(embed, "height", "85vh");
    doc.append_child(anchor, embed);
    (embed, style)
}

// The payload is server-rendered markup and is inserted as-is.
fn inject_embed(
    ctx: &mut PageContext,
    anchor: NodeId,
    thumb: NodeId,
    info: &FileInfo,
) -> (NodeId, ThumbStyle) {
    let doc = &mut ctx.doc;
    let style = hide_thumb(doc, thumb);
    let container = doc.create_element("div");
    doc.bind(container, Listener::SwallowClick);
    doc.set_inner_html(container, info.inline_payload.as_deref().unwrap_or_default());
    doc.set_style(container, "min-width", "50vw");
    doc.set_style(container, "max-width", "85vw");
    doc.set_style(container, "height", "50vh");
    if let Some(first) = doc.first_element_child(container) {
        doc.set_attr(first, "width", "100%");
        doc.set_attr(first, "height", "100%");
    }
    doc.append_child(anchor, container);
    (container, style)
}

fn media_element(
    ctx: &mut PageContext,
    tag: &str,
    volume: f64,
    looping: bool,
    autoclose: bool,
) -> NodeId {
    let doc = &mut ctx.doc;
    let media = doc.create_element(tag);
    doc.bind(media, Listener::SwallowClick);
    doc.set_attr(media, "autoplay", "true");
    doc.set_attr(media, "controls", "true");
    doc.set_data(media, "volume", &format!("{volume}"));
    if looping {
        doc.set_attr(media, "loop", "true");
    } else if autoclose {
        doc.bind(media, Listener::MediaEnded);
    }
    doc.set_style(media, "cursor", "default");
    media
}

fn inject_video(
    ctx: &mut PageContext,
    anchor: NodeId,
    thumb: NodeId,
    info: &FileInfo,
) -> (NodeId, ThumbStyle) {
    let style = hide_thumb(&mut ctx.doc, thumb);
    let settings = &ctx.settings;
    let (volume, looping, autoclose) = (
        settings.video_volume,
        settings.video_loop,
        settings.video_autoclose,
    );
    let video = media_element(ctx, "video", volume, looping, autoclose);
    let doc = &mut ctx.doc;
    let source = doc.create_element("source");
    doc.set_attr(source, "src", &info.source_url);
    doc.append_child(video, source);
    doc.set_style(video, "max-width", "100%");
    doc.set_style(video, "max-height", "85vh");
    doc.set_style(video, "height", "auto");
    append_beside(doc, anchor, video);
    (video, style)
}

fn inject_audio(
    ctx: &mut PageContext,
    anchor: NodeId,
    thumb: NodeId,
    info: &FileInfo,
) -> (NodeId, ThumbStyle) {
    let previous = ctx.doc.style(thumb, "min-width").map(str::to_string);
    ctx.doc.set_style(thumb, "min-width", "270px");
    let settings = &ctx.settings;
    let (volume, looping, autoclose) = (
        settings.audio_volume,
        settings.audio_loop,
        settings.audio_autoclose,
    );
    let audio = media_element(ctx, "audio", volume, looping, autoclose);
    let doc = &mut ctx.doc;
    doc.set_attr(audio, "src", &info.source_url);
    if let Some(width) = thumb_width(doc, thumb) {
        doc.set_style(audio, "width", &width);
    }
    append_beside(doc, anchor, audio);
    (audio, Some(("min-width", previous)))
}

// Media elements misbehave inside the anchor, so they go next to it.
fn append_beside(doc: &mut Document, anchor: NodeId, node: NodeId) {
    match doc.parent(anchor) {
        Some(parent) => doc.append_child(parent, node),
        None => doc.append_child(anchor, node),
    }
}

fn inject_tracker(
    ctx: &mut PageContext,
    anchor: NodeId,
    thumb: NodeId,
    info: &FileInfo,
) -> NodeId {
    let width = thumb_width(&ctx.doc, thumb);
    let doc = &mut ctx.doc;
    let wrapper = doc.create_element("div");
    doc.bind(wrapper, Listener::SwallowClick);
    doc.set_style(wrapper, "cursor", "default");
    let meta = doc.create_element("div");
    doc.set_style(meta, "overflow", "hidden");
    doc.set_style(meta, "white-space", "nowrap");
    doc.append_child(wrapper, meta);
    let slider = doc.create_element("input");
    doc.set_attr(slider, "type", "range");
    doc.append_child(wrapper, slider);
    if let Some(width) = width.as_deref() {
        for node in [wrapper, meta, slider] {
            doc.set_style(node, "width", width);
        }
    }
    doc.append_child(anchor, wrapper);

    match ctx.tracker.player.as_mut() {
        Some(player) => player.stop(),
        None => match ctx.trackers.create(ctx.settings.mod_stereo * 100.0) {
            Ok(player) => ctx.tracker.player = Some(player),
            Err(err) => {
                warn!(error = ?err, "tracker player unavailable");
                return wrapper;
            }
        },
    }
    ctx.tracker.owner = Some(anchor);
    ctx.tracker.slider = Some(slider);

    let Some(player) = ctx.tracker.player.as_mut() else {
        return wrapper;
    };
    if let Err(err) = player.load(&info.source_url).and_then(|_| player.play()) {
        warn!(error = ?err, url = %info.source_url, "tracker playback failed");
        return wrapper;
    }
    let marquee_text = player.metadata().marquee();
    let duration = player.duration();

    let doc = &mut ctx.doc;
    let marquee = doc.create_element("div");
    doc.set_style(marquee, "display", "inline-block");
    doc.set_style(marquee, "animation", "marquee 10s linear infinite");
    doc.set_text(marquee, &marquee_text);
    doc.append_child(meta, marquee);
    doc.set_attr(slider, "min", "0");
    doc.set_attr(slider, "max", &format!("{duration}"));
    doc.set_attr(slider, "value", "0");
    ctx.tracker.poll = Some(Interval::starting_at(
        ctx.settings.tracker_poll,
        Instant::now(),
    ));
    wrapper
}

fn inject_plugin(
    ctx: &mut PageContext,
    anchor: NodeId,
    thumb: NodeId,
    info: &FileInfo,
) -> (NodeId, ThumbStyle, Option<crate::media::PluginHandle>) {
    let style = hide_thumb(&mut ctx.doc, thumb);
    let max = Size {
        width: ctx.viewport.width * 0.85,
        height: ctx.viewport.height * 0.85,
    };
    let doc = &mut ctx.doc;
    let player_node = doc.create_element("ruffle-player");
    doc.set_style(player_node, "max-width", &format!("{}px", max.width));
    doc.set_style(player_node, "max-height", &format!("{}px", max.height));
    doc.append_child(anchor, player_node);

    let handle = match ctx.plugins.create_player(&info.source_url, max) {
        Ok(handle) => handle,
        Err(err) => {
            warn!(error = ?err, url = %info.source_url, "plugin player unavailable");
            return (player_node, style, None);
        }
    };
    if let Err(err) = ctx.plugins.set_volume(handle, ctx.settings.swf_volume) {
        warn!(error = ?err, "plugin volume not applied");
    }
    (player_node, style, Some(handle))
}
