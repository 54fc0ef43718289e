//! In-memory network event log for one capture session.
//!
//! Every observed request/response is appended in arrival order. Free-text
//! fields are truncated before storage and the log caps its event count,
//! so memory stays bounded regardless of page payload size.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum stored length for headers and body text.
const MAX_FIELD_LEN: usize = 2_048;

/// Maximum events retained per session; later arrivals are counted but
/// not stored.
const MAX_EVENTS: usize = 4_096;

/// Which side of the wire an event was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Request,
    Response,
}

/// One observed network event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub captured_at: DateTime<Utc>,
    pub direction: Direction,
    pub url: String,
    pub method: String,
    /// Response status; absent for requests.
    pub status: Option<u16>,
    /// Serialized headers, truncated.
    pub headers: String,
    /// Request body text, truncated. Empty for responses.
    pub body: String,
}

/// Keyword sets tested against every event URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionKeywords {
    /// Header-bidding activity markers.
    pub bidding: Vec<String>,
    /// Ad-serving endpoint markers.
    pub ad_serving: Vec<String>,
}

impl Default for DetectionKeywords {
    fn default() -> Self {
        Self {
            bidding: ["prebid", "pbjs", "hb_pb", "bidder"]
                .map(String::from)
                .to_vec(),
            ad_serving: ["doubleclick", "googlesyndication", "adsystem", "adserver"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl DetectionKeywords {
    fn matches_bidding(&self, url: &str) -> bool {
        self.bidding.iter().any(|k| url.contains(k.as_str()))
    }

    fn matches_ad_serving(&self, url: &str) -> bool {
        self.ad_serving.iter().any(|k| url.contains(k.as_str()))
    }
}

/// Detection flags for one session. Monotone: once set they stay set
/// until the session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionFlags {
    pub bidding: bool,
    pub ad_serving: bool,
}

impl DetectionFlags {
    /// OR-fold with another set of flags.
    pub fn merge(self, other: Self) -> Self {
        Self {
            bidding: self.bidding || other.bidding,
            ad_serving: self.ad_serving || other.ad_serving,
        }
    }
}

/// The bounded event sequence for one session.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<NetworkEvent>,
    overflow: usize,
    matched: usize,
    flags: DetectionFlags,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event: truncate its free-text fields, update the
    /// detection flags, and drop the record (but keep counting) once the
    /// storage cap is reached.
    pub fn push(&mut self, mut event: NetworkEvent, keywords: &DetectionKeywords) {
        let bid = keywords.matches_bidding(&event.url);
        let ad = keywords.matches_ad_serving(&event.url);
        self.flags.bidding |= bid;
        self.flags.ad_serving |= ad;
        if bid || ad {
            self.matched += 1;
        }

        if self.events.len() >= MAX_EVENTS {
            self.overflow += 1;
            return;
        }
        truncate_in_place(&mut event.headers);
        truncate_in_place(&mut event.body);
        self.events.push(event);
    }

    /// Record events observed but lost before storage (channel lag).
    pub fn note_dropped(&mut self, n: usize) {
        self.overflow += n;
    }

    /// Total events observed, stored or not.
    pub fn total_observed(&self) -> usize {
        self.events.len() + self.overflow
    }

    /// Events whose URL matched either keyword set.
    pub fn matched(&self) -> usize {
        self.matched
    }

    pub fn flags(&self) -> DetectionFlags {
        self.flags
    }

    pub fn events(&self) -> &[NetworkEvent] {
        &self.events
    }

    /// Consume the log into its stored events.
    pub fn into_events(self) -> Vec<NetworkEvent> {
        self.events
    }
}

/// Truncate on a char boundary at `MAX_FIELD_LEN` bytes.
fn truncate_in_place(text: &mut String) {
    if text.len() <= MAX_FIELD_LEN {
        return;
    }
    let mut cut = MAX_FIELD_LEN;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(url: &str) -> NetworkEvent {
        NetworkEvent {
            captured_at: Utc::now(),
            direction: Direction::Request,
            url: url.to_string(),
            method: "GET".to_string(),
            status: None,
            headers: String::new(),
            body: String::new(),
        }
    }

    #[test]
    fn test_flags_are_monotone() {
        let kw = DetectionKeywords::default();
        let mut log = EventLog::new();
        log.push(event("https://cdn.example.com/prebid.js"), &kw);
        assert!(log.flags().bidding);
        // A non-matching event never clears the flag.
        log.push(event("https://example.com/style.css"), &kw);
        assert!(log.flags().bidding);
        assert!(!log.flags().ad_serving);
    }

    #[test]
    fn test_matched_count() {
        let kw = DetectionKeywords::default();
        let mut log = EventLog::new();
        log.push(event("https://securepubads.g.doubleclick.net/gpt.js"), &kw);
        log.push(event("https://example.com/app.js"), &kw);
        log.push(event("https://example.com/pbjs/config"), &kw);
        assert_eq!(log.matched(), 2);
        assert_eq!(log.total_observed(), 3);
    }

    #[test]
    fn test_field_truncation() {
        let kw = DetectionKeywords::default();
        let mut log = EventLog::new();
        let mut ev = event("https://example.com/");
        ev.headers = "h".repeat(10_000);
        ev.body = "b".repeat(10_000);
        log.push(ev, &kw);
        assert_eq!(log.events()[0].headers.len(), MAX_FIELD_LEN);
        assert_eq!(log.events()[0].body.len(), MAX_FIELD_LEN);
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        let kw = DetectionKeywords::default();
        let mut log = EventLog::new();
        let mut ev = event("https://example.com/");
        // Multibyte char straddling the cut point must not split.
        ev.body = "é".repeat(MAX_FIELD_LEN);
        log.push(ev, &kw);
        assert!(log.events()[0].body.len() <= MAX_FIELD_LEN);
        assert!(std::str::from_utf8(log.events()[0].body.as_bytes()).is_ok());
    }

    #[test]
    fn test_overflow_counts_but_does_not_store() {
        let kw = DetectionKeywords::default();
        let mut log = EventLog::new();
        for _ in 0..(MAX_EVENTS + 10) {
            log.push(event("https://example.com/a"), &kw);
        }
        assert_eq!(log.events().len(), MAX_EVENTS);
        assert_eq!(log.total_observed(), MAX_EVENTS + 10);
    }

    #[test]
    fn test_overflow_still_updates_flags() {
        let kw = DetectionKeywords::default();
        let mut log = EventLog::new();
        for _ in 0..MAX_EVENTS {
            log.push(event("https://example.com/a"), &kw);
        }
        log.push(event("https://ads.adserver.net/bid"), &kw);
        assert!(log.flags().ad_serving);
    }
}
