use sha1::{Digest, Sha1};

use crate::dom::{Document, NodeId};

pub const CLASS_HASHID: &str = "post-hashid-hash";

/// Colours every poster hash id under `scope`.
pub fn init_hashids(doc: &mut Document, scope: NodeId) {
    for node in doc.by_class(scope, CLASS_HASHID) {
        let (background, foreground) = colors(&doc.text_content(node));
        doc.set_style(node, "background-color", &background);
        doc.set_style(node, "color", foreground);
    }
}

/// Background `#rrggbb` derived from `text`, and a readable text colour for it.
pub fn colors(text: &str) -> (String, &'static str) {
    let digest = Sha1::digest(text.as_bytes());
    let rgb = &digest[..3];
    let luminance =
        0.2126 * f64::from(rgb[0]) + 0.7152 * f64::from(rgb[1]) + 0.0722 * f64::from(rgb[2]);
    let foreground = if luminance < 100.0 { "#ffffff" } else { "#000000" };
    (format!("#{}", hex::encode(rgb)), foreground)
}
