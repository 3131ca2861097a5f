//! Direct one-to-one channel patterns.
//!
//! A direct call skips the coordinator: the request goes straight to the
//! handler context and the reply comes back on the same send.
//!
//! | Pattern               | Prefix   | Handler        | Callers        | Send          |
//! |-----------------------|----------|----------------|----------------|---------------|
//! | `ContentToBackground` | `cs2bg:` | background     | content script | extension     |
//! | `PageToBackground`    | `ep2bg:` | background     | extension page | extension     |
//! | `BackgroundToContent` | `bg2cs:` | content script | background     | one tab       |
//! | `PageToContent`       | `ep2cs:` | content script | extension page | one tab       |

use tabrelay_core::{ContextKind, EventName, SenderCategory};

/// One prefixed direct route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelPattern {
    ContentToBackground,
    PageToBackground,
    BackgroundToContent,
    PageToContent,
}

impl ChannelPattern {
    pub const ALL: [Self; 4] = [
        Self::ContentToBackground,
        Self::PageToBackground,
        Self::BackgroundToContent,
        Self::PageToContent,
    ];

    /// Event name prefix that selects this pattern.
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::ContentToBackground => "cs2bg:",
            Self::PageToBackground => "ep2bg:",
            Self::BackgroundToContent => "bg2cs:",
            Self::PageToContent => "ep2cs:",
        }
    }

    /// Pattern selected by an event name's prefix.
    pub fn from_event(event: &EventName) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|pattern| event.strip_prefix(pattern.prefix()).is_some())
    }

    /// Whether handlers of this pattern live in contexts of `kind`.
    pub const fn served_by(self, kind: &ContextKind) -> bool {
        match self {
            Self::ContentToBackground | Self::PageToBackground => kind.is_background(),
            Self::BackgroundToContent | Self::PageToContent => {
                matches!(kind, ContextKind::ContentScript { .. })
            }
        }
    }

    /// Whether contexts of `kind` may dispatch on this pattern.
    pub const fn dispatchable_from(self, kind: &ContextKind) -> bool {
        match self {
            Self::ContentToBackground => matches!(kind, ContextKind::ContentScript { .. }),
            Self::PageToBackground | Self::PageToContent => {
                matches!(kind, ContextKind::ExtensionPage { .. })
            }
            Self::BackgroundToContent => kind.is_background(),
        }
    }

    /// Coarse origin filter on incoming requests.
    pub const fn accepts(self, sender: SenderCategory) -> bool {
        match self {
            Self::ContentToBackground => matches!(sender, SenderCategory::ContentScript),
            Self::PageToBackground | Self::BackgroundToContent | Self::PageToContent => {
                matches!(sender, SenderCategory::Extension)
            }
        }
    }

    /// Whether the dispatcher must name a target tab.
    pub const fn needs_target(self) -> bool {
        matches!(self, Self::BackgroundToContent | Self::PageToContent)
    }
}

impl std::fmt::Display for ChannelPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.prefix().trim_end_matches(':'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabrelay_core::{Surface, TabId};

    fn content() -> ContextKind {
        ContextKind::ContentScript {
            tab_id: TabId::new(1),
        }
    }

    fn popup() -> ContextKind {
        ContextKind::ExtensionPage {
            surface: Surface::Popup,
        }
    }

    #[test]
    fn test_pattern_from_prefix() {
        let event = EventName::new("ep2cs:highlight").ok();
        assert_eq!(
            event.as_ref().and_then(ChannelPattern::from_event),
            Some(ChannelPattern::PageToContent)
        );
        let plain = EventName::new("greeting").ok();
        assert_eq!(plain.as_ref().and_then(ChannelPattern::from_event), None);
    }

    #[test]
    fn test_handler_sides() {
        assert!(ChannelPattern::ContentToBackground.served_by(&ContextKind::Background));
        assert!(!ChannelPattern::ContentToBackground.served_by(&content()));
        assert!(ChannelPattern::PageToContent.served_by(&content()));
        assert!(!ChannelPattern::PageToContent.served_by(&popup()));
    }

    #[test]
    fn test_dispatch_sides() {
        assert!(ChannelPattern::ContentToBackground.dispatchable_from(&content()));
        assert!(!ChannelPattern::ContentToBackground.dispatchable_from(&popup()));
        assert!(ChannelPattern::BackgroundToContent.dispatchable_from(&ContextKind::Background));
        assert!(ChannelPattern::PageToBackground.dispatchable_from(&popup()));
    }

    #[test]
    fn test_origin_filter() {
        assert!(ChannelPattern::ContentToBackground.accepts(SenderCategory::ContentScript));
        assert!(!ChannelPattern::ContentToBackground.accepts(SenderCategory::Extension));
        assert!(ChannelPattern::PageToBackground.accepts(SenderCategory::Extension));
        assert!(!ChannelPattern::PageToBackground.accepts(SenderCategory::ContentScript));
        assert!(ChannelPattern::ALL
            .iter()
            .all(|p| !p.accepts(SenderCategory::Unknown)));
    }

    #[test]
    fn test_target_required_only_for_tab_routes() {
        assert!(ChannelPattern::BackgroundToContent.needs_target());
        assert!(ChannelPattern::PageToContent.needs_target());
        assert!(!ChannelPattern::ContentToBackground.needs_target());
        assert_eq!(ChannelPattern::PageToBackground.to_string(), "ep2bg");
    }
}
