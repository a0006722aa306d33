//! Session layer: the controller state machine and conversation log.

pub mod controller;
pub mod transcript;

pub use controller::{
    CaptureControl, EngineCaptureControl, SessionEvent, SessionHandle, spawn_session,
};
pub use transcript::{Transcript, TranscriptEntry};

/// Human-readable name for a supported language tag. Unknown tags come
/// back unchanged.
pub fn language_display_name(tag: &str) -> &str {
    match tag {
        "uz-UZ" => "O'zbekcha",
        "ru-RU" => "Русский",
        "en-US" => "English",
        other => other,
    }
}

/// Canned phrase used when previewing a voice in the given language.
pub fn preview_text(tag: &str) -> &'static str {
    match tag {
        "ru-RU" => "Здравствуйте! Так звучит этот голос.",
        "en-US" => "Hello! This is how this voice sounds.",
        _ => "Assalomu alaykum! Bu ovoz shunday eshitiladi.",
    }
}
