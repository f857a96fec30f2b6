//! Canonical text rendering for forwarded messages
//!
//! Every inbound event becomes one block of text with a metadata header:
//!
//! ```text
//! [Discord | Rust Community | #announcements]
//! alice: release is out
//! 🖼️ https://cdn.example/banner.png
//! 🔗 https://blog.example/release
//! ```
//!
//! Edits get an `[EDITED]` line on top. Deletions carry no body and render as
//! a single synthetic line, since the destination copy of the original
//! message is not tracked.

use crate::types::{AttachmentKind, EventAttachment, InboundEvent};

/// Rendering switches derived from a route's filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    pub include_images: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            include_images: true,
        }
    }
}

/// Render `event` with default options
pub fn format_event(event: &InboundEvent) -> String {
    format_event_with(event, FormatOptions::default())
}

/// Render `event` into canonical text
pub fn format_event_with(event: &InboundEvent, options: FormatOptions) -> String {
    let author = author_label(event);

    if event.is_delete {
        return format!("[DELETED] message from {} was deleted", author);
    }

    let mut lines = Vec::with_capacity(3 + event.attachments.len());
    if event.is_edit {
        lines.push("[EDITED]".to_string());
    }
    lines.push(header(event));

    let body = event.text.trim();
    if body.is_empty() {
        lines.push(format!("{}:", author));
    } else {
        lines.push(format!("{}: {}", author, body));
    }

    lines.extend(
        event
            .attachments
            .iter()
            .filter(|a| options.include_images || a.kind != AttachmentKind::Image)
            .map(attachment_line),
    );

    lines.join("\n")
}

fn header(event: &InboundEvent) -> String {
    let origin = non_empty(event.origin_name.as_deref()).unwrap_or(&event.source_channel_id);
    match non_empty(event.channel_name.as_deref()) {
        Some(channel) => format!(
            "[{} | {} | #{}]",
            event.platform.display_name(),
            origin,
            channel
        ),
        None => format!("[{} | {}]", event.platform.display_name(), origin),
    }
}

fn author_label(event: &InboundEvent) -> &str {
    non_empty(Some(event.author_name.as_str()))
        .or_else(|| non_empty(Some(event.author_id.as_str())))
        .unwrap_or("unknown")
}

fn attachment_line(attachment: &EventAttachment) -> String {
    let target = non_empty(attachment.url.as_deref())
        .or_else(|| non_empty(attachment.name.as_deref()));

    let icon = match attachment.kind {
        AttachmentKind::Image => "🖼️",
        AttachmentKind::Video => "🎥",
        AttachmentKind::Document | AttachmentKind::File => "📄",
        AttachmentKind::Embed => "📌",
        AttachmentKind::Sticker => "🏷️",
        AttachmentKind::Link => "🔗",
    };

    match target {
        Some(target) => format!("{} {}", icon, target),
        // Bare media without a reference still shows that something was attached
        None => format!("{} {}", icon, kind_label(attachment.kind)),
    }
}

fn kind_label(kind: AttachmentKind) -> &'static str {
    match kind {
        AttachmentKind::Image => "image attached",
        AttachmentKind::Video => "video attached",
        AttachmentKind::Document => "document attached",
        AttachmentKind::File => "file attached",
        AttachmentKind::Embed => "embed",
        AttachmentKind::Sticker => "sticker",
        AttachmentKind::Link => "link",
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Whether `text` contains something that looks like a URL
pub fn contains_url(text: &str) -> bool {
    text.split_whitespace().any(|word| {
        let lower = word.to_ascii_lowercase();
        let lower = lower.trim_start_matches(|c: char| "([<\"'".contains(c));
        lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www.")
    })
}
