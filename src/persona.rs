//! # Voice Personas and Languages
//!
//! The persona/language inputs a live session is opened with. Presets ship
//! with the backend; custom personas are produced by the vocal-cloning flow
//! (`remote::VoiceStudio`) and carry the analyzed vocal profile that steers
//! the synthesis model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A conversation language offered to the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Language {
    /// BCP 47 tag, e.g. "en-US"
    pub code: String,
    pub name: String,
    pub native_name: String,
}

/// A voice identity the model can speak with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoicePersona {
    pub id: String,
    pub name: String,
    /// Base voice identifier understood by the synthesis model
    pub voice: String,
    pub description: String,
    pub accent: String,
    /// Default language code for this persona
    pub language: String,
    pub is_custom: bool,
    /// Analyzed vocal characteristics, present on cloned personas only
    pub vocal_profile: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// The built-in persona presets.
pub fn preset_personas() -> Vec<VoicePersona> {
    vec![
        preset(
            "zephyr-persona",
            "Zephyr",
            "Zephyr",
            "Energetic and friendly support agent with a clear California accent.",
            "American",
        ),
        preset(
            "puck-persona",
            "Puck",
            "Puck",
            "Youthful and playful conversational companion for casual chats.",
            "British",
        ),
        preset(
            "kore-persona",
            "Kore",
            "Kore",
            "Professional, calm and highly analytical executive assistant.",
            "Mid-Atlantic",
        ),
        preset(
            "charon-persona",
            "Charon",
            "Charon",
            "Deep, resonant, and wisdom-filled storyteller with a seasoned voice.",
            "Received Pronunciation",
        ),
        preset(
            "fenrir-persona",
            "Fenrir",
            "Fenrir",
            "Gravelly, intense narrator suited to drama and announcements.",
            "Scandinavian",
        ),
    ]
}

fn preset(id: &str, name: &str, voice: &str, description: &str, accent: &str) -> VoicePersona {
    VoicePersona {
        id: id.to_string(),
        name: name.to_string(),
        voice: voice.to_string(),
        description: description.to_string(),
        accent: accent.to_string(),
        language: "en-US".to_string(),
        is_custom: false,
        vocal_profile: None,
        created_at: None,
    }
}

/// Languages supported by the live model.
pub fn languages() -> Vec<Language> {
    [
        ("en-US", "English", "English"),
        ("es-ES", "Spanish", "Español"),
        ("fr-FR", "French", "Français"),
        ("de-DE", "German", "Deutsch"),
        ("it-IT", "Italian", "Italiano"),
        ("pt-BR", "Portuguese", "Português"),
        ("ja-JP", "Japanese", "日本語"),
        ("ko-KR", "Korean", "한국어"),
        ("zh-CN", "Chinese", "中文"),
        ("hi-IN", "Hindi", "हिन्दी"),
    ]
    .iter()
    .map(|(code, name, native)| Language {
        code: code.to_string(),
        name: name.to_string(),
        native_name: native.to_string(),
    })
    .collect()
}

pub fn find_language(code: &str) -> Option<Language> {
    languages().into_iter().find(|l| l.code == code)
}

pub fn default_language() -> Language {
    Language {
        code: "en-US".to_string(),
        name: "English".to_string(),
        native_name: "English".to_string(),
    }
}

/// Build the system instruction for a live session from its persona and
/// language inputs.
///
/// Cloned personas contribute their analyzed vocal profile; presets fall
/// back to their description.
pub fn system_instruction(persona: &VoicePersona, language: &Language) -> String {
    let characteristics = persona
        .vocal_profile
        .as_deref()
        .unwrap_or(&persona.description);

    format!(
        "You are currently using the voice clone of: {}. \
         Vocal characteristics to mimic: {}. \
         Respond to the user naturally in {}. Be helpful and professional.",
        persona.name, characteristics, language.name
    )
}

/// Build the steering instruction for one-shot speech synthesis.
///
/// Cloned personas are driven by their analyzed profile; presets by their
/// persona description.
pub fn synthesis_instruction(persona: &VoicePersona) -> String {
    match &persona.vocal_profile {
        Some(profile) => format!(
            "Adopt the following vocal characteristics: {}. \
             Speak the text precisely in this tone and accent.",
            profile
        ),
        None => format!(
            "Use the persona of {}: {}",
            persona.name, persona.description
        ),
    }
}

/// Construct a custom persona from an analyzed vocal profile.
pub fn cloned_persona(profile: String, clone_number: usize, language: &str) -> VoicePersona {
    VoicePersona {
        id: format!("clone-{}", Uuid::new_v4()),
        name: format!("Neural Clone #{}", clone_number),
        // Base voice used for synthesis modulation
        voice: "Zephyr".to_string(),
        description: format!("Custom cloned voice: {}", profile),
        accent: "Custom Cloned".to_string(),
        language: language.to_string(),
        is_custom: true,
        vocal_profile: Some(profile),
        created_at: Some(Utc::now()),
    }
}
