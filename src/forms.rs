//! Post and delete form submission.
//!
//! Forms are posted as multipart bodies. The board answers with JSON: a
//! `redirect_url` on success, otherwise an `error_message`. Anything that is
//! not JSON is shown to the user verbatim.

use serde::Deserialize;
use tracing::{info, warn};

use crate::context::{AsyncResponse, PageContext, PendingForm};
use crate::dom::{Document, Listener, NodeId};
use crate::location;
use crate::net::{CancelToken, FetchError, Response};

pub const POST_FORM_ID: &str = "form-post";
pub const QUICK_REPLY_PREFIX: &str = "form-reply::";
pub const DELETE_FORM_ID: &str = "deleteform";
pub const PASSWORD_KEY: &str = "password";
const PASSWORD_FIELD_ID: &str = "form-post-password";
const DELETE_PASSWORD_FIELD_ID: &str = "deleteform-password";

#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    Unreadable(String),
    #[error(transparent)]
    Transport(#[from] FetchError),
}

#[derive(Debug, Deserialize)]
struct FormReply {
    redirect_url: Option<String>,
    error_message: Option<String>,
}

/// Interprets the board's answer to a submission, yielding the redirect target.
pub fn parse_outcome(response: &Response) -> Result<String, FormError> {
    let reply: FormReply = serde_json::from_str(&response.body)
        .map_err(|_| FormError::Unreadable(response.body.clone()))?;
    match reply.redirect_url {
        Some(url) if response.status == 200 => Ok(url),
        _ => Err(FormError::Rejected(reply.error_message.unwrap_or_default())),
    }
}

/// Binds submission and formatting buttons of the post form (`prefix` selects
/// the quick-reply copy) and restores the remembered password.
pub fn init_post_form(ctx: &mut PageContext, prefix: &str) {
    let doc = &mut ctx.doc;
    let Some(form) = doc.get_element_by_id(&format!("{prefix}{POST_FORM_ID}")) else {
        return;
    };
    doc.bind(form, Listener::FormSubmit);
    for button in doc.by_class(form, "format-btn") {
        doc.bind(button, Listener::FormatClick);
    }
    init_password(ctx, prefix);
}

fn init_password(ctx: &mut PageContext, prefix: &str) {
    let Some(field) = ctx.doc.get_element_by_id(&format!("{prefix}{PASSWORD_FIELD_ID}")) else {
        return;
    };
    let stored = match ctx.store.as_ref().map(|store| store.get_var(PASSWORD_KEY)) {
        Some(Ok(password)) => password,
        Some(Err(err)) => {
            warn!(error = ?err, "could not read remembered password");
            None
        }
        None => None,
    };
    if let Some(password) = stored {
        ctx.doc.set_attr(field, "value", &password);
        set_delete_password(&mut ctx.doc, &password);
    }
    ctx.doc.bind(field, Listener::PasswordInput);
}

/// The post form's password changed: remember it and use it for deletions too.
pub fn on_password_input(ctx: &mut PageContext, field: NodeId) {
    let password = ctx.doc.attr(field, "value").unwrap_or_default().to_string();
    if let Some(store) = &ctx.store {
        if let Err(err) = store.set_var(PASSWORD_KEY, &password) {
            warn!(error = ?err, "could not remember password");
        }
    }
    set_delete_password(&mut ctx.doc, &password);
}

fn set_delete_password(doc: &mut Document, password: &str) {
    if let Some(field) = doc.get_element_by_id(DELETE_PASSWORD_FIELD_ID) {
        doc.set_attr(field, "value", password);
    }
}

pub fn init_delete_form(doc: &mut Document) {
    if let Some(form) = doc.get_element_by_id(DELETE_FORM_ID) {
        doc.bind(form, Listener::FormSubmit);
    }
}

pub fn on_format_click(ctx: &mut PageContext, button: NodeId) {
    if let Some(tag) = ctx.doc.data(button, "format").map(str::to_string) {
        location::insert_format(&mut ctx.doc, &tag);
    }
}

/// Named, successful controls of `form` in document order.
pub fn collect_fields(doc: &Document, form: NodeId) -> Vec<(String, String)> {
    let controls = doc.find_all(form, |doc, node| {
        matches!(doc.tag(node), Some("input" | "textarea" | "select"))
            && doc.attr(node, "name").is_some()
            && doc.attr(node, "disabled").is_none()
    });
    let mut fields = Vec::new();
    for control in controls {
        let name = doc.attr(control, "name").unwrap_or_default().to_string();
        let value = match doc.tag(control) {
            Some("textarea") => doc.text_content(control),
            Some("select") => {
                let options = doc.find_all(control, |doc, node| doc.is_tag(node, "option"));
                let chosen = options
                    .iter()
                    .copied()
                    .find(|option| doc.attr(*option, "selected").is_some())
                    .or_else(|| options.first().copied());
                match chosen {
                    Some(option) => doc
                        .attr(option, "value")
                        .map(str::to_string)
                        .unwrap_or_else(|| doc.text_content(option)),
                    None => continue,
                }
            }
            _ => {
                let kind = doc.attr(control, "type").unwrap_or("text");
                match kind {
                    "submit" | "button" | "reset" | "file" | "image" => continue,
                    "checkbox" | "radio" if doc.attr(control, "checked").is_none() => continue,
                    "checkbox" | "radio" => doc.attr(control, "value").unwrap_or("on").to_string(),
                    _ => doc.attr(control, "value").unwrap_or_default().to_string(),
                }
            }
        };
        fields.push((name, value));
    }
    fields
}

fn submit_button(doc: &Document, form: NodeId) -> Option<NodeId> {
    doc.find_first(form, |doc, node| {
        doc.is_tag(node, "input") && doc.attr(node, "type") == Some("submit")
    })
}

pub fn submit(ctx: &mut PageContext, form: NodeId) {
    let fields = collect_fields(&ctx.doc, form);
    let action = ctx
        .doc
        .attr(form, "action")
        .map(str::to_string)
        .unwrap_or_else(|| ctx.location.path.clone());
    let button = submit_button(&ctx.doc, form);
    if let Some(button) = button {
        ctx.doc.set_attr(button, "disabled", "true");
    }

    let request_id = ctx.next_request_id();
    ctx.forms.insert(
        form,
        PendingForm {
            request_id,
            submit_button: button,
        },
    );
    info!(action = %action, fields = fields.len(), "submitting form");
    ctx.spawn(move |transport| AsyncResponse::Form {
        request_id,
        form,
        result: transport.post_form(&action, &fields, &CancelToken::new()),
    });
}

pub fn apply_outcome(
    ctx: &mut PageContext,
    request_id: u64,
    form: NodeId,
    result: Result<Response, FetchError>,
) {
    let Some(pending) = ctx.forms.get(&form) else {
        return;
    };
    if pending.request_id != request_id {
        return;
    }
    let button = pending.submit_button;
    ctx.forms.remove(&form);

    let outcome = result
        .map_err(FormError::from)
        .and_then(|response| parse_outcome(&response));
    match outcome {
        Ok(redirect) => {
            let target = format!("{}{}", ctx.location.origin, redirect);
            info!(target = %target, "form accepted");
            let navigated = ctx
                .navigator
                .assign(&target)
                .and_then(|_| ctx.navigator.reload());
            if let Err(err) = navigated {
                warn!(error = ?err, "could not follow redirect");
                enable(ctx, button);
            }
        }
        Err(err) => {
            warn!(error = %err, "form rejected");
            ctx.error_window(&err.to_string());
            enable(ctx, button);
        }
    }
}

fn enable(ctx: &mut PageContext, button: Option<NodeId>) {
    if let Some(button) = button {
        ctx.doc.remove_attr(button, "disabled");
    }
}
