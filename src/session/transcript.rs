//! Ordered log of what was said, by whom.

use std::time::SystemTime;

/// One finalized utterance in the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub text: String,
    /// True for transcribed user speech, false for assistant responses.
    pub is_user: bool,
    pub timestamp: SystemTime,
}

/// Conversation transcript for one session.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, returning a clone for event fan-out.
    pub fn push(&mut self, text: impl Into<String>, is_user: bool) -> TranscriptEntry {
        let entry = TranscriptEntry {
            text: text.into(),
            is_user,
            timestamp: SystemTime::now(),
        };
        self.entries.push(entry.clone());
        entry
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Last transcribed user utterance, if any.
    pub fn last_user(&self) -> Option<&TranscriptEntry> {
        self.entries.iter().rev().find(|e| e.is_user)
    }

    /// Last assistant response, if any.
    pub fn last_assistant(&self) -> Option<&TranscriptEntry> {
        self.entries.iter().rev().find(|e| !e.is_user)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_preserves_order() {
        let mut transcript = Transcript::new();
        transcript.push("salom", true);
        transcript.push("Salom! Qandaysiz?", false);
        transcript.push("yaxshi", true);

        let texts: Vec<&str> = transcript.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["salom", "Salom! Qandaysiz?", "yaxshi"]);
    }

    #[test]
    fn test_last_user_and_assistant() {
        let mut transcript = Transcript::new();
        assert!(transcript.last_user().is_none());
        assert!(transcript.last_assistant().is_none());

        transcript.push("first question", true);
        transcript.push("first answer", false);
        transcript.push("second question", true);

        assert_eq!(transcript.last_user().unwrap().text, "second question");
        assert_eq!(transcript.last_assistant().unwrap().text, "first answer");
    }

    #[test]
    fn test_clear_empties_log() {
        let mut transcript = Transcript::new();
        transcript.push("hello", true);
        assert_eq!(transcript.len(), 1);

        transcript.clear();
        assert!(transcript.is_empty());
    }

    #[test]
    fn test_push_returns_the_stored_entry() {
        let mut transcript = Transcript::new();
        let entry = transcript.push("hi", true);
        assert_eq!(&entry, &transcript.entries()[0]);
        assert!(entry.is_user);
    }
}
