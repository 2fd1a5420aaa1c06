//! Audio-synced progressive text reveal.
//!
//! While a reply is being spoken, the bubble UI shows a prefix of the text
//! proportional to audio progress. On playback end or error the fraction
//! snaps to 1, so the displayed text always converges to the complete reply
//! even if playback dies midway.

/// Cursor glyph appended while a reveal is in progress.
pub const CURSOR: char = '▌';

/// Tracks which message is being revealed and how far along it is.
#[derive(Debug, Default)]
pub struct RevealTracker {
    active_id: Option<String>,
    fraction: f32,
}

impl RevealTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the tracker to a message at fraction 0. Must happen before the
    /// message becomes visible, or the full text flashes for one frame.
    pub fn begin(&mut self, id: &str) {
        self.active_id = Some(id.to_string());
        self.fraction = 0.0;
    }

    /// Feed an audio time-update. Fraction is 0 while duration is unknown
    /// and clamped to [0,1] — some audio backends report positions past the
    /// duration near the end of a clip.
    pub fn on_time(&mut self, position_secs: f64, duration_secs: f64) {
        if self.active_id.is_none() {
            return;
        }
        self.fraction = if duration_secs > 0.0 {
            (position_secs / duration_secs).clamp(0.0, 1.0) as f32
        } else {
            0.0
        };
    }

    /// Snap to fully revealed and clear the binding. Called on playback end
    /// and on playback error alike.
    pub fn finish(&mut self) {
        self.fraction = 1.0;
        self.active_id = None;
    }

    pub fn fraction(&self) -> f32 {
        self.fraction
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn is_active_for(&self, id: &str) -> bool {
        self.active_id.as_deref() == Some(id)
    }

    /// Text to display for a message. The active message shows
    /// `floor(chars * fraction)` characters (minimum 1) plus the cursor;
    /// everything else shows in full.
    pub fn display_text(&self, id: &str, content: &str) -> String {
        if !self.is_active_for(id) || self.fraction >= 1.0 {
            return content.to_string();
        }
        let chars: Vec<char> = content.chars().collect();
        if chars.is_empty() {
            return String::from(CURSOR);
        }
        let visible = ((chars.len() as f32 * self.fraction).floor() as usize)
            .max(1)
            .min(chars.len());
        let mut text: String = chars[..visible].iter().collect();
        text.push(CURSOR);
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_duration_reveals_nothing_extra() {
        let mut r = RevealTracker::new();
        r.begin("m-1");
        r.on_time(3.0, 0.0);
        assert_eq!(r.fraction(), 0.0);
    }

    #[test]
    fn fraction_tracks_playback() {
        let mut r = RevealTracker::new();
        r.begin("m-1");
        r.on_time(1.0, 4.0);
        assert_eq!(r.fraction(), 0.25);
    }

    #[test]
    fn fraction_is_clamped_past_duration() {
        let mut r = RevealTracker::new();
        r.begin("m-1");
        r.on_time(5.5, 4.0);
        assert_eq!(r.fraction(), 1.0);
    }

    #[test]
    fn finish_snaps_to_one_and_clears() {
        let mut r = RevealTracker::new();
        r.begin("m-1");
        r.on_time(0.5, 10.0);
        r.finish();
        assert_eq!(r.fraction(), 1.0);
        assert_eq!(r.active_id(), None);
        // Previously active message now shows in full.
        assert_eq!(r.display_text("m-1", "hello"), "hello");
    }

    #[test]
    fn minimum_one_char_once_started() {
        let mut r = RevealTracker::new();
        r.begin("m-1");
        assert_eq!(r.display_text("m-1", "hello"), format!("h{CURSOR}"));
    }

    #[test]
    fn partial_reveal_floors_char_count() {
        let mut r = RevealTracker::new();
        r.begin("m-1");
        r.on_time(1.0, 2.0); // fraction 0.5
        // 5 chars * 0.5 = 2.5 → 2 visible
        assert_eq!(r.display_text("m-1", "hello"), format!("he{CURSOR}"));
    }

    #[test]
    fn inactive_messages_show_in_full() {
        let mut r = RevealTracker::new();
        r.begin("m-2");
        assert_eq!(r.display_text("m-1", "hello"), "hello");
    }

    #[test]
    fn multibyte_text_is_sliced_by_chars() {
        let mut r = RevealTracker::new();
        r.begin("m-1");
        r.on_time(1.0, 2.0);
        // 4 chars * 0.5 = 2 visible, no byte-boundary panic
        assert_eq!(r.display_text("m-1", "héllo".trim_end_matches('o')), format!("hé{CURSOR}"));
    }

    #[test]
    fn time_updates_without_binding_are_ignored() {
        let mut r = RevealTracker::new();
        r.on_time(1.0, 2.0);
        assert_eq!(r.fraction(), 0.0);
    }
}
