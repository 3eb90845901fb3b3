//! Voice command vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of commands the dispatcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Intent {
    ToggleOverlay,
    Hide,
    Next,
    Previous,
    Pause,
    Play,
    Like,
}

/// Checked in order; the first match wins.
const PHRASES: &[(&str, Intent)] = &[
    ("show spotify", Intent::ToggleOverlay),
    ("hide spotify", Intent::Hide),
    ("next song", Intent::Next),
    ("skip", Intent::Next),
    ("previous song", Intent::Previous),
    ("pause music", Intent::Pause),
    ("play music", Intent::Play),
    ("like this song", Intent::Like),
];

impl Intent {
    /// Case-insensitive substring match against the phrase table.
    ///
    /// ```
    /// use core_service::Intent;
    ///
    /// assert_eq!(Intent::from_utterance("Hey, SKIP this one"), Some(Intent::Next));
    /// assert_eq!(Intent::from_utterance("what's the weather"), None);
    /// ```
    pub fn from_utterance(text: &str) -> Option<Intent> {
        let normalized = text.to_lowercase();
        PHRASES
            .iter()
            .find(|(phrase, _)| normalized.contains(phrase))
            .map(|(_, intent)| *intent)
    }

    /// Whether the intent calls the remote player.
    pub fn is_remote(self) -> bool {
        !matches!(self, Intent::ToggleOverlay | Intent::Hide)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::ToggleOverlay => "toggleOverlay",
            Intent::Hide => "hide",
            Intent::Next => "next",
            Intent::Previous => "previous",
            Intent::Pause => "pause",
            Intent::Play => "play",
            Intent::Like => "like",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary() {
        let cases = [
            ("show spotify", Intent::ToggleOverlay),
            ("Hide Spotify please", Intent::Hide),
            ("next song", Intent::Next),
            ("skip", Intent::Next),
            ("go to the previous song", Intent::Previous),
            ("PAUSE MUSIC", Intent::Pause),
            ("play music", Intent::Play),
            ("I like this song", Intent::Like),
        ];

        for (text, expected) in cases {
            assert_eq!(Intent::from_utterance(text), Some(expected), "{text}");
        }
    }

    #[test]
    fn test_unrelated_speech_is_ignored() {
        assert_eq!(Intent::from_utterance(""), None);
        assert_eq!(Intent::from_utterance("play"), None);
        assert_eq!(Intent::from_utterance("turn it up"), None);
    }

    #[test]
    fn test_remote_intents() {
        assert!(!Intent::ToggleOverlay.is_remote());
        assert!(!Intent::Hide.is_remote());
        assert!(Intent::Like.is_remote());
        assert!(Intent::Play.is_remote());
    }

    #[test]
    fn test_serde_names_match_display() {
        for intent in [Intent::ToggleOverlay, Intent::Like, Intent::Previous] {
            let json = serde_json::to_string(&intent).unwrap();
            assert_eq!(json, format!("\"{}\"", intent));
        }
    }
}
