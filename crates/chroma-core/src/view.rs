//! ---
//! chroma_section: "01-core-functionality"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Operator-facing projection of telemetry and previews."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
//! Read-only projection of what the operator sees.
//!
//! Nothing here talks to the network; pumps in [`crate::client`] feed it.

use std::collections::VecDeque;
use std::time::Duration;

use chroma_common::ConsoleConfig;
use chroma_msg::{
    ImageKind, LogLevel, LogLine, SemanticState, SemanticTone, StatsSnapshot, ViewportFrame,
};
use chroma_net::{BackendError, Endpoints};
use serde::Serialize;
use url::Url;

/// One rendered console line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub text: String,
}

/// Append-only log console with scroll-back aware auto-scroll.
///
/// Geometry is tracked in pixels: each line is `line_height_px` tall and the
/// visible area is `viewport_height_px`. A new line scrolls the console to
/// the bottom only when the reader was within `scroll_threshold_px` of it.
#[derive(Debug, Clone)]
pub struct LogConsole {
    lines: VecDeque<LogEntry>,
    scroll_top: u64,
    config: ConsoleConfig,
}

impl LogConsole {
    pub fn new(config: ConsoleConfig) -> Self {
        Self {
            lines: VecDeque::new(),
            scroll_top: 0,
            config,
        }
    }

    fn scroll_height(&self) -> u64 {
        self.lines.len() as u64 * u64::from(self.config.line_height_px)
    }

    fn max_scroll_top(&self) -> u64 {
        self.scroll_height()
            .saturating_sub(u64::from(self.config.viewport_height_px))
    }

    /// Whether the reader is close enough to the bottom to follow new lines.
    pub fn near_bottom(&self) -> bool {
        let remaining = self.scroll_height() as i128
            - i128::from(self.config.viewport_height_px)
            - self.scroll_top as i128;
        remaining <= i128::from(self.config.scroll_threshold_px)
    }

    /// Append a line; returns whether the console followed it.
    pub fn append(&mut self, line: &LogLine) -> bool {
        let follow = self.near_bottom();
        self.lines.push_back(LogEntry {
            level: line.level.clone(),
            text: line.render(),
        });
        if self.lines.len() > self.config.max_lines {
            self.lines.pop_front();
            self.scroll_top = self
                .scroll_top
                .saturating_sub(u64::from(self.config.line_height_px));
        }
        if follow {
            self.scroll_top = self.max_scroll_top();
        }
        follow
    }

    /// Manual scroll, clamped to the content.
    pub fn scroll_to(&mut self, scroll_top: u64) {
        self.scroll_top = scroll_top.min(self.max_scroll_top());
    }

    pub fn scroll_top(&self) -> u64 {
        self.scroll_top
    }

    pub fn lines(&self) -> impl Iterator<Item = &LogEntry> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Latest stats snapshot; no history.
#[derive(Debug, Clone, Default)]
pub struct StatsPanel {
    latest: Option<StatsSnapshot>,
}

impl StatsPanel {
    pub fn apply(&mut self, snapshot: StatsSnapshot) {
        self.latest = Some(snapshot);
    }

    pub fn latest(&self) -> Option<&StatsSnapshot> {
        self.latest.as_ref()
    }

    /// Elapsed run time when the label is a well formed `HH:MM:SS`.
    pub fn elapsed(&self) -> Option<Duration> {
        self.latest.as_ref().and_then(StatsSnapshot::elapsed_duration)
    }
}

/// Current semantic state label.
#[derive(Debug, Clone, Default)]
pub struct SemanticBadge {
    current: Option<SemanticState>,
}

impl SemanticBadge {
    pub fn apply(&mut self, state: SemanticState) {
        self.current = Some(state);
    }

    pub fn current(&self) -> Option<&SemanticState> {
        self.current.as_ref()
    }

    pub fn tone(&self) -> Option<SemanticTone> {
        self.current.as_ref().map(SemanticState::tone)
    }
}

/// Live capture pane. Shows a loader until the first frame arrives.
#[derive(Debug, Clone, Default)]
pub struct ViewportPane {
    frame: Option<ViewportFrame>,
    replaced: u64,
}

impl ViewportPane {
    /// Show `frame`, discarding whatever was displayed. Returns `true` for
    /// the first frame, which hides the loader.
    pub fn apply(&mut self, frame: ViewportFrame) -> bool {
        let first = self.frame.is_none();
        if !first {
            self.replaced += 1;
        }
        self.frame = Some(frame);
        first
    }

    pub fn frame(&self) -> Option<&ViewportFrame> {
        self.frame.as_ref()
    }

    pub fn loader_visible(&self) -> bool {
        self.frame.is_none()
    }

    /// Frames that were displaced by a newer one.
    pub fn replaced(&self) -> u64 {
        self.replaced
    }
}

/// Original and processed capture previews.
#[derive(Debug, Clone, Default)]
pub struct ImagePreview {
    original: Option<Url>,
    modified: Option<Url>,
    refreshed_at: Option<i64>,
}

impl ImagePreview {
    /// Point both previews at URLs stamped with `unix_millis`.
    pub fn refresh(&mut self, endpoints: &Endpoints, unix_millis: i64) -> Result<(), BackendError> {
        self.original = Some(endpoints.image(ImageKind::Original, unix_millis)?);
        self.modified = Some(endpoints.image(ImageKind::Modified, unix_millis)?);
        self.refreshed_at = Some(unix_millis);
        Ok(())
    }

    pub fn url(&self, kind: ImageKind) -> Option<&Url> {
        match kind {
            ImageKind::Original => self.original.as_ref(),
            ImageKind::Modified => self.modified.as_ref(),
        }
    }

    pub fn refreshed_at(&self) -> Option<i64> {
        self.refreshed_at
    }
}

/// Everything rendered from telemetry, discarded wholesale on reinitialization.
#[derive(Debug, Clone)]
pub struct ClientView {
    pub console: LogConsole,
    pub stats: StatsPanel,
    pub semantic: SemanticBadge,
    pub viewport: ViewportPane,
    pub preview: ImagePreview,
}

impl ClientView {
    pub fn new(console: ConsoleConfig) -> Self {
        Self {
            console: LogConsole::new(console),
            stats: StatsPanel::default(),
            semantic: SemanticBadge::default(),
            viewport: ViewportPane::default(),
            preview: ImagePreview::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn console(max_lines: usize) -> LogConsole {
        LogConsole::new(ConsoleConfig {
            scroll_threshold_px: 20,
            line_height_px: 10,
            viewport_height_px: 50,
            max_lines,
        })
    }

    fn fill(console: &mut LogConsole, count: usize) {
        for index in 0..count {
            console.append(&LogLine::plain(&format!("line {index}")));
        }
    }

    #[test]
    fn console_follows_while_at_bottom() {
        let mut console = console(100);
        fill(&mut console, 10);
        assert_eq!(console.scroll_top(), 50);
        assert!(console.near_bottom());
    }

    #[test]
    fn scroll_back_is_preserved() {
        let mut console = console(100);
        fill(&mut console, 10);
        console.scroll_to(20);
        assert!(!console.append(&LogLine::parse(r#"{"level":"WARN","message":"low hp"}"#)));
        assert_eq!(console.scroll_top(), 20);
        assert_eq!(console.lines().last().unwrap().text, "[WARN] low hp");

        // Within the 20 px threshold the console follows again.
        console.scroll_to(40);
        assert!(console.append(&LogLine::plain("next")));
        assert_eq!(console.scroll_top(), 70);
    }

    #[test]
    fn eviction_keeps_the_reader_on_the_same_line() {
        let mut console = console(10);
        fill(&mut console, 10);
        console.scroll_to(10);
        console.append(&LogLine::plain("overflow"));
        assert_eq!(console.len(), 10);
        assert_eq!(console.lines().next().unwrap().text, "line 1");
        assert_eq!(console.scroll_top(), 0);
    }

    #[test]
    fn viewport_keeps_only_newest_frame() {
        let mut pane = ViewportPane::default();
        assert!(pane.loader_visible());
        assert!(pane.apply(ViewportFrame {
            image_data: "data:image/png;base64,AAA".into()
        }));
        assert!(!pane.apply(ViewportFrame {
            image_data: "data:image/png;base64,BBB".into()
        }));
        assert!(!pane.loader_visible());
        assert_eq!(pane.frame().unwrap().image_data, "data:image/png;base64,BBB");
        assert_eq!(pane.replaced(), 1);
    }

    #[test]
    fn preview_urls_share_one_timestamp() {
        let endpoints = Endpoints::new("http://127.0.0.1:8080").unwrap();
        let mut preview = ImagePreview::default();
        preview.refresh(&endpoints, 1234).unwrap();
        assert_eq!(
            preview.url(ImageKind::Original).unwrap().as_str(),
            "http://127.0.0.1:8080/api/originalImage?t=1234"
        );
        assert_eq!(
            preview.url(ImageKind::Modified).unwrap().as_str(),
            "http://127.0.0.1:8080/api/modifiedImage?t=1234"
        );
        assert_eq!(preview.refreshed_at(), Some(1234));
    }

    #[test]
    fn stats_and_semantic_replace_previous_values() {
        let mut stats = StatsPanel::default();
        stats.apply(StatsSnapshot {
            elapsed: "00:00:05".into(),
            cycles: 1,
            input_count: 2,
            object_count: 3,
        });
        stats.apply(StatsSnapshot {
            elapsed: "01:02:03".into(),
            cycles: 9,
            input_count: 8,
            object_count: 7,
        });
        assert_eq!(stats.latest().unwrap().cycles, 9);
        assert_eq!(stats.elapsed(), Some(Duration::from_secs(3723)));

        let mut badge = SemanticBadge::default();
        badge.apply(SemanticState {
            label: "Searching".into(),
            style_class: "primary".into(),
        });
        badge.apply(SemanticState {
            label: "Dancing".into(),
            style_class: "sparkle".into(),
        });
        assert_eq!(badge.current().unwrap().label, "Dancing");
        assert_eq!(badge.tone(), Some(SemanticTone::Neutral));
    }
}
