//! HTML presentation of a pairing session.
//!
//! The first challenge opens a streamed `200 text/html` response. Later
//! challenges, the success acknowledgement, and late timeouts or failures
//! are appended to that same stream. If the session ends before any
//! challenge, a complete `504` or `500` page is sent instead.

use crate::controller::Presenter;
use crate::machine::Outcome;
use crate::render::render_challenge;
use async_trait::async_trait;
use axum::http::StatusCode;
use qrlink_core::config::PageConfig;
use qrlink_core::error::PairError;
use qrlink_core::event::Challenge;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// The response an HTTP handler should produce.
#[derive(Debug)]
pub enum Reply {
    /// A complete page.
    Page { status: StatusCode, body: String },
    /// A `200` page that keeps growing: `first` now, then every chunk from
    /// `rest` until the sender is dropped.
    Stream {
        first: String,
        rest: mpsc::UnboundedReceiver<String>,
    },
}

/// [`Presenter`] that turns a session into one HTTP reply.
pub struct HtmlPresenter {
    page: PageConfig,
    head: Option<oneshot::Sender<Reply>>,
    tail: Option<mpsc::UnboundedSender<String>>,
}

impl HtmlPresenter {
    /// Create a presenter and the receiver its single [`Reply`] arrives on.
    pub fn new(page: PageConfig) -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                page,
                head: Some(tx),
                tail: None,
            },
            rx,
        )
    }

    /// Whether the reply has been committed.
    #[cfg(test)]
    pub fn responded(&self) -> bool {
        self.head.is_none()
    }

    fn push(&mut self, chunk: String) {
        if let Some(tail) = &self.tail {
            if tail.send(chunk).is_err() {
                debug!("client went away, dropping page updates");
                self.tail = None;
            }
        }
    }
}

#[async_trait]
impl Presenter for HtmlPresenter {
    async fn challenge(&mut self, challenge: &Challenge) -> Result<(), PairError> {
        let image = render_challenge(&challenge.token, self.page.image_size)?;
        match self.head.take() {
            Some(head) => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.tail = Some(tx);
                let _ = head.send(Reply::Stream {
                    first: qr_page_open(&self.page, &image),
                    rest: rx,
                });
            }
            None => self.push(swap_image_fragment(&image)),
        }
        Ok(())
    }

    async fn conclude(&mut self, outcome: &Outcome) {
        match self.head.take() {
            Some(head) => {
                let reply = match outcome {
                    Outcome::TimedOut => Reply::Page {
                        status: StatusCode::GATEWAY_TIMEOUT,
                        body: timeout_page(&self.page),
                    },
                    Outcome::Failed(failure) => Reply::Page {
                        status: StatusCode::INTERNAL_SERVER_ERROR,
                        body: error_page(&self.page, &failure.to_string()),
                    },
                    Outcome::Linked { .. } => Reply::Page {
                        status: StatusCode::OK,
                        body: linked_page(&self.page),
                    },
                };
                let _ = head.send(reply);
            }
            None => {
                let fragment = match outcome {
                    Outcome::Linked { .. } => success_fragment(&self.page),
                    Outcome::TimedOut => notice_fragment(TIMEOUT_NOTICE),
                    Outcome::Failed(failure) => {
                        notice_fragment(&format!("Error: {}", escape_html(&failure.to_string())))
                    }
                };
                self.push(fragment);
                self.push(PAGE_CLOSE.to_string());
            }
        }
        // Dropping the sender ends the streamed body.
        self.tail = None;
    }
}

const TIMEOUT_NOTICE: &str = "The scan took too long. Please refresh the page to try again.";
const PAGE_CLOSE: &str = "</body>\n</html>\n";

/// Escape text for inclusion in HTML element content or attributes.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape text for a double-quoted JavaScript string inside `<script>`.
fn escape_js(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            _ => out.push(c),
        }
    }
    out
}

fn head(page: &PageConfig, refresh: bool) -> String {
    let refresh = if refresh && page.refresh_secs > 0 {
        format!(
            "    <meta http-equiv=\"refresh\" content=\"{}\">\n",
            page.refresh_secs
        )
    } else {
        String::new()
    };
    let accent = escape_html(&page.accent);
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n    <meta charset=\"utf-8\">\n{refresh}    \
         <title>{title}</title>\n    <style>\n        \
         body {{ font-family: sans-serif; text-align: center; padding: 20px; }}\n        \
         img {{ border: 5px solid {accent}; border-radius: 10px; margin: 20px 0; }}\n        \
         .instruction {{ background: #f0f0f0; padding: 10px; border-radius: 5px; display: inline-block; }}\n        \
         .notice {{ color: #b00020; font-weight: bold; }}\n    \
         </style>\n</head>\n<body>\n",
        title = escape_html(&page.title),
    )
}

/// Opening of the streamed QR page; the body is left open for updates.
pub fn qr_page_open(page: &PageConfig, image: &str) -> String {
    let size = page.image_size;
    let instructions: String = page
        .instructions
        .iter()
        .map(|line| format!("        <p>{}</p>\n", escape_html(line)))
        .collect();
    format!(
        "{head}    <h1>{heading}</h1>\n    \
         <img id=\"qr\" src=\"{image}\" width=\"{size}\" height=\"{size}\" alt=\"pairing QR code\"/>\n    \
         <br>\n    <div class=\"instruction\">\n{instructions}    </div>\n    \
         <p><b>If successful, the session file will be sent to your WhatsApp.</b></p>\n",
        head = head(page, true),
        heading = escape_html(&page.heading),
    )
}

/// Replace the shown QR image with a newer challenge.
pub fn swap_image_fragment(image: &str) -> String {
    format!(
        "<script>document.getElementById(\"qr\").src = \"{}\";</script>\n",
        escape_js(image)
    )
}

fn success_fragment(page: &PageConfig) -> String {
    format!(
        "<script>alert(\"{}\");</script>\n",
        escape_js(&page.success_message)
    )
}

fn notice_fragment(text: &str) -> String {
    format!("<p class=\"notice\">{text}</p>\n")
}

/// `504` body: no challenge was shown before the deadline.
pub fn timeout_page(page: &PageConfig) -> String {
    format!(
        "{}    <h1>Timeout</h1>\n    <p>{}</p>\n{PAGE_CLOSE}",
        head(page, false),
        escape_html(TIMEOUT_NOTICE)
    )
}

/// `500` body with the error message.
pub fn error_page(page: &PageConfig, message: &str) -> String {
    format!(
        "{}    <h1>Error</h1>\n    <pre>{}</pre>\n{PAGE_CLOSE}",
        head(page, false),
        escape_html(message)
    )
}

/// Linked without ever showing a challenge (backend reused a session).
fn linked_page(page: &PageConfig) -> String {
    format!(
        "{}    <h1>Linked</h1>\n    <p>{}</p>\n{PAGE_CLOSE}",
        head(page, false),
        escape_html(&page.success_message)
    )
}

/// `404` body for an unknown profile.
pub fn not_found_page(page: &PageConfig, profile: &str, known: &[String]) -> String {
    let list: String = known
        .iter()
        .map(|n| format!("        <li><a href=\"/scan/{0}\">{0}</a></li>\n", escape_html(n)))
        .collect();
    format!(
        "{}    <h1>Unknown profile</h1>\n    <p>No profile named <code>{}</code>.</p>\n    \
         <ul>\n{list}    </ul>\n{PAGE_CLOSE}",
        head(page, false),
        escape_html(profile)
    )
}
