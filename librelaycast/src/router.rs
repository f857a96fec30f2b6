//! Event router
//!
//! Matches a normalized inbound event against the active routes for its
//! source channel, runs each route's filters and queues one formatted
//! forward per accepted route. Route bookkeeping is left to the queue.

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::formatter::{contains_url, format_event_with, FormatOptions};
use crate::queue::{OutboundQueue, QueuedForward};
use crate::store::RouteStore;
use crate::types::{InboundEvent, Route};

/// Why a route declined an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterRejection {
    Username,
    Link,
    Keyword,
    Reply,
    Repost,
}

impl FilterRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Link => "link",
            Self::Keyword => "keyword",
            Self::Reply => "reply",
            Self::Repost => "repost",
        }
    }
}

/// Run `route`'s filters in order, stopping at the first rejection
///
/// `canonical` is the formatted text for this route; the link filter looks
/// at it so attachment URLs count too. Keywords are matched against the raw
/// event text.
pub fn apply_filters(
    route: &Route,
    event: &InboundEvent,
    canonical: &str,
) -> std::result::Result<(), FilterRejection> {
    let filters = &route.filters;

    if let Some(username) = route.source_username.as_deref() {
        if event.author_name != username {
            return Err(FilterRejection::Username);
        }
    }

    if !filters.include_links && contains_url(canonical) {
        return Err(FilterRejection::Link);
    }

    // Blank keywords are ignored; a set of only blanks filters nothing
    let keywords: Vec<String> = filters
        .keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(str::to_lowercase)
        .collect();
    if !keywords.is_empty() {
        let text = event.text.to_lowercase();
        if !keywords.iter().any(|k| text.contains(k.as_str())) {
            return Err(FilterRejection::Keyword);
        }
    }

    if event.is_reply && !filters.include_replies {
        return Err(FilterRejection::Reply);
    }
    if event.is_repost && !filters.include_reposts {
        return Err(FilterRejection::Repost);
    }

    Ok(())
}

pub struct EventRouter {
    routes: Arc<dyn RouteStore>,
    queue: Arc<OutboundQueue>,
}

impl EventRouter {
    pub fn new(routes: Arc<dyn RouteStore>, queue: Arc<OutboundQueue>) -> Self {
        Self { routes, queue }
    }

    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }

    /// Route one inbound event
    ///
    /// Returns how many routes the event was queued for. Events with no
    /// matching route are dropped silently.
    ///
    /// # Errors
    ///
    /// Fails only when the route lookup itself fails.
    pub async fn handle(&self, event: &InboundEvent) -> Result<usize> {
        let routes = self
            .routes
            .find_active_by_source(event.platform, &event.source_channel_id)
            .await?;

        if routes.is_empty() {
            debug!(
                platform = %event.platform,
                channel = %event.source_channel_id,
                "no active route for event"
            );
            return Ok(0);
        }

        let mut queued = 0;
        for route in routes {
            let options = FormatOptions {
                include_images: route.filters.include_images,
            };
            let text = format_event_with(event, options);

            if let Err(rejection) = apply_filters(&route, event, &text) {
                debug!(route_id = %route.id, filter = rejection.as_str(), "event filtered out");
                continue;
            }

            let route_id = route.id.clone();
            let accepted = self
                .queue
                .enqueue(QueuedForward {
                    route,
                    text,
                    source_message_id: event.source_message_id.clone(),
                })
                .await;
            if accepted {
                queued += 1;
            } else {
                debug!(route_id = %route_id, "forward not queued");
            }
        }

        if queued > 0 {
            info!(
                platform = %event.platform,
                channel = %event.source_channel_id,
                routes = queued,
                "event queued for delivery"
            );
        }
        Ok(queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttachmentKind, EventAttachment, SourcePlatform};

    fn route() -> Route {
        Route::new(
            "owner".to_string(),
            "mirror".to_string(),
            SourcePlatform::Telegram,
            "-100".to_string(),
            "sealed".to_string(),
        )
    }

    fn event(author: &str, text: &str) -> InboundEvent {
        InboundEvent::message(SourcePlatform::Telegram, "-100", author, text)
    }

    fn check(route: &Route, event: &InboundEvent) -> std::result::Result<(), FilterRejection> {
        let options = FormatOptions {
            include_images: route.filters.include_images,
        };
        apply_filters(route, event, &format_event_with(event, options))
    }

    #[test]
    fn test_defaults_accept_plain_message() {
        assert_eq!(check(&route(), &event("alice", "hello")), Ok(()));
    }

    #[test]
    fn test_username_filter_is_exact() {
        let mut route = route();
        route.source_username = Some("releasebot".to_string());

        assert_eq!(check(&route, &event("releasebot", "v2")), Ok(()));
        assert_eq!(check(&route, &event("ReleaseBot", "v2")), Err(FilterRejection::Username));
        assert_eq!(check(&route, &event("mallory", "v2")), Err(FilterRejection::Username));
    }

    #[test]
    fn test_link_filter() {
        let mut route = route();
        route.filters.include_links = false;

        assert_eq!(
            check(&route, &event("alice", "read https://example.org")),
            Err(FilterRejection::Link)
        );
        assert_eq!(check(&route, &event("alice", "no links")), Ok(()));

        // Attachment URLs end up in the canonical text as well
        let mut with_embed = event("alice", "see embed");
        with_embed.attachments = vec![EventAttachment::new(
            AttachmentKind::Link,
            Some("https://example.org/post"),
            None,
        )];
        assert_eq!(check(&route, &with_embed), Err(FilterRejection::Link));
    }

    #[test]
    fn test_link_filter_ignores_omitted_images() {
        let mut route = route();
        route.filters.include_links = false;
        route.filters.include_images = false;

        let mut photo = event("alice", "sunset");
        photo.attachments = vec![EventAttachment::new(
            AttachmentKind::Image,
            Some("https://cdn.example/sunset.jpg"),
            None,
        )];
        assert_eq!(check(&route, &photo), Ok(()));
    }

    #[test]
    fn test_keyword_filter_is_case_insensitive() {
        let mut route = route();
        route.filters.keywords = vec!["Release".to_string(), "security".to_string()];

        assert_eq!(check(&route, &event("a", "new RELEASE tonight")), Ok(()));
        assert_eq!(check(&route, &event("a", "Security advisory")), Ok(()));
        assert_eq!(check(&route, &event("a", "lunch?")), Err(FilterRejection::Keyword));
    }

    #[test]
    fn test_blank_keywords_are_ignored() {
        let mut route = route();
        route.filters.keywords = vec!["".to_string(), "   ".to_string()];
        assert_eq!(check(&route, &event("a", "anything at all")), Ok(()));

        route.filters.keywords.push(" deploy ".to_string());
        assert_eq!(check(&route, &event("a", "deploy done")), Ok(()));
        assert_eq!(check(&route, &event("a", "anything at all")), Err(FilterRejection::Keyword));
    }

    #[test]
    fn test_keywords_do_not_match_header() {
        let mut route = route();
        route.filters.keywords = vec!["telegram".to_string()];
        assert_eq!(check(&route, &event("a", "hello")), Err(FilterRejection::Keyword));
    }

    #[test]
    fn test_filter_order_username_first() {
        let mut route = route();
        route.source_username = Some("bot".to_string());
        route.filters.include_links = false;
        route.filters.keywords = vec!["deploy".to_string()];

        assert_eq!(
            check(&route, &event("human", "https://x.example")),
            Err(FilterRejection::Username)
        );
        assert_eq!(
            check(&route, &event("bot", "https://x.example")),
            Err(FilterRejection::Link)
        );
    }

    #[test]
    fn test_replies_and_reposts_toggles() {
        let mut route = route();
        let mut reply = event("a", "agreed");
        reply.is_reply = true;
        let mut repost = event("a", "worth reading");
        repost.is_repost = true;

        assert_eq!(check(&route, &reply), Err(FilterRejection::Reply));
        assert_eq!(check(&route, &repost), Err(FilterRejection::Repost));

        route.filters.include_replies = true;
        route.filters.include_reposts = true;
        assert_eq!(check(&route, &reply), Ok(()));
        assert_eq!(check(&route, &repost), Ok(()));
    }
}
