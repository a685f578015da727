//! # Remote Voice Services
//!
//! The two opaque remote collaborators of the voice studio: vocal analysis
//! (audio sample -> descriptive text profile) and speech synthesis
//! (text -> inline base64 audio). Both are fail-fast: a transport failure or
//! an empty payload aborts the operation, resets its busy flag and surfaces a
//! user-visible error. No retries.
//!
//! `VoiceStudio` is the orchestration layer the REST handlers talk to: it
//! owns the persona vault and the in-memory synthesis gallery.

use crate::audio::codec::EncodedChunk;
use crate::config::RemoteConfig;
use crate::error::SessionError;
use crate::persona::{self, VoicePersona};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Instruction given to the analysis model alongside the vocal sample.
const ANALYSIS_INSTRUCTION: &str =
    "Analyze this vocal sample. Provide a detailed description of the voice \
     including: pitch (high/low), tone (raspy/smooth/warm/cold), accent \
     (specific region if possible), cadence, and any unique characteristics. \
     This description will be used to guide a TTS model to clone the voice. \
     Output the description only.";

/// Turns a vocal sample into a descriptive text profile.
pub trait VoiceAnalyzer: Send + Sync {
    fn analyze<'a>(
        &'a self,
        sample: &'a [u8],
        mime: &'a str,
    ) -> BoxFuture<'a, Result<String, SessionError>>;
}

/// Turns text into synthesized audio (base64 16-bit PCM).
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize<'a>(
        &'a self,
        text: &'a str,
        voice: &'a str,
        instruction: &'a str,
    ) -> BoxFuture<'a, Result<EncodedChunk, SessionError>>;
}

/// HTTP client for an OpenAI-compatible voice API.
pub struct RemoteVoiceClient {
    base_url: String,
    api_key: String,
    analysis_model: String,
    synthesis_model: String,
    client: reqwest::Client,
}

impl RemoteVoiceClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| SessionError::Device(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            analysis_model: config.analysis_model.clone(),
            synthesis_model: config.synthesis_model.clone(),
            client,
        })
    }
}

impl VoiceAnalyzer for RemoteVoiceClient {
    fn analyze<'a>(
        &'a self,
        sample: &'a [u8],
        mime: &'a str,
    ) -> BoxFuture<'a, Result<String, SessionError>> {
        Box::pin(async move {
            let url = format!("{}/audio/analysis", self.base_url);
            let body = serde_json::json!({
                "model": self.analysis_model,
                "instruction": ANALYSIS_INSTRUCTION,
                "sample": {
                    "data": BASE64.encode(sample),
                    "mime_type": mime,
                },
            });

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| SessionError::Analysis(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(SessionError::Analysis(format!(
                    "analysis API error {}: {}",
                    status, body
                )));
            }

            let value: serde_json::Value = response
                .json()
                .await
                .map_err(|e| SessionError::Analysis(e.to_string()))?;

            match value.get("profile").and_then(|v| v.as_str()) {
                Some(profile) if !profile.trim().is_empty() => Ok(profile.to_string()),
                _ => Err(SessionError::Analysis(
                    "analysis returned an empty vocal profile".to_string(),
                )),
            }
        })
    }
}

impl SpeechSynthesizer for RemoteVoiceClient {
    fn synthesize<'a>(
        &'a self,
        text: &'a str,
        voice: &'a str,
        instruction: &'a str,
    ) -> BoxFuture<'a, Result<EncodedChunk, SessionError>> {
        Box::pin(async move {
            let url = format!("{}/audio/speech", self.base_url);
            let body = serde_json::json!({
                "model": self.synthesis_model,
                "voice": voice,
                "instruction": instruction,
                "input": text,
            });

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| SessionError::Synthesis(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(SessionError::Synthesis(format!(
                    "synthesis API error {}: {}",
                    status, body
                )));
            }

            let value: serde_json::Value = response
                .json()
                .await
                .map_err(|e| SessionError::Synthesis(e.to_string()))?;

            match value.get("audio").and_then(|v| v.as_str()) {
                Some(audio) if !audio.is_empty() => Ok(EncodedChunk::from_base64(audio)),
                _ => Err(SessionError::Synthesis(
                    "synthesis returned an empty audio payload".to_string(),
                )),
            }
        })
    }
}

/// A synthesized audio asset in the gallery.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisAsset {
    pub id: String,
    pub text: String,
    /// Base64 16-bit PCM, exactly as returned by the synthesis service
    pub audio_data: String,
    pub persona_name: String,
    pub created_at: DateTime<Utc>,
}

/// Orchestrates the cloning and synthesis flows for the dashboard.
///
/// ## Busy Flags:
/// One analysis and one synthesis may run at a time; a second request is
/// rejected instead of queued. The flag is cleared on every exit path,
/// including failures, so one bad remote call never wedges the studio.
pub struct VoiceStudio {
    analyzer: Box<dyn VoiceAnalyzer>,
    synthesizer: Box<dyn SpeechSynthesizer>,
    personas: RwLock<Vec<VoicePersona>>,
    gallery: RwLock<Vec<SynthesisAsset>>,
    analyzing: AtomicBool,
    synthesizing: AtomicBool,
}

impl VoiceStudio {
    pub fn new(analyzer: Box<dyn VoiceAnalyzer>, synthesizer: Box<dyn SpeechSynthesizer>) -> Self {
        Self {
            analyzer,
            synthesizer,
            personas: RwLock::new(persona::preset_personas()),
            gallery: RwLock::new(Vec::new()),
            analyzing: AtomicBool::new(false),
            synthesizing: AtomicBool::new(false),
        }
    }

    /// All personas, custom clones first.
    pub fn personas(&self) -> Vec<VoicePersona> {
        self.personas.read().unwrap().clone()
    }

    pub fn find_persona(&self, id: &str) -> Option<VoicePersona> {
        self.personas.read().unwrap().iter().find(|p| p.id == id).cloned()
    }

    pub fn remove_persona(&self, id: &str) -> bool {
        let mut personas = self.personas.write().unwrap();
        let before = personas.len();
        // Presets are permanent; only clones can be deleted
        personas.retain(|p| !(p.is_custom && p.id == id));
        personas.len() != before
    }

    /// Analyze a vocal sample and add the resulting clone to the vault.
    pub async fn clone_from_sample(
        &self,
        sample: &[u8],
        mime: &str,
        language: &str,
    ) -> Result<VoicePersona, SessionError> {
        if self.analyzing.swap(true, Ordering::SeqCst) {
            return Err(SessionError::InvalidState(
                "vocal analysis already in progress".to_string(),
            ));
        }

        let result = self.analyzer.analyze(sample, mime).await;
        // Reset the busy flag on every exit path
        self.analyzing.store(false, Ordering::SeqCst);
        let profile = result?;

        let clone_number = {
            let personas = self.personas.read().unwrap();
            personas.iter().filter(|p| p.is_custom).count() + 1
        };

        let persona = persona::cloned_persona(profile, clone_number, language);
        self.personas.write().unwrap().insert(0, persona.clone());
        info!(persona = %persona.name, "Vocal clone created");
        Ok(persona)
    }

    /// Synthesize speech in a persona's voice and store the asset.
    pub async fn synthesize(
        &self,
        text: &str,
        persona: &VoicePersona,
    ) -> Result<SynthesisAsset, SessionError> {
        if self.synthesizing.swap(true, Ordering::SeqCst) {
            return Err(SessionError::InvalidState(
                "synthesis already in progress".to_string(),
            ));
        }

        let instruction = persona::synthesis_instruction(persona);
        let result = self
            .synthesizer
            .synthesize(text, &persona.voice, &instruction)
            .await;
        self.synthesizing.store(false, Ordering::SeqCst);
        let audio = result?;

        let asset = SynthesisAsset {
            id: format!("syn-{}", Uuid::new_v4()),
            text: text.to_string(),
            audio_data: audio.data,
            persona_name: persona.name.clone(),
            created_at: Utc::now(),
        };

        self.gallery.write().unwrap().insert(0, asset.clone());
        info!(asset = %asset.id, persona = %persona.name, "Synthesis asset created");
        Ok(asset)
    }

    /// Gallery snapshot, newest first.
    pub fn gallery(&self) -> Vec<SynthesisAsset> {
        self.gallery.read().unwrap().clone()
    }

    pub fn find_asset(&self, id: &str) -> Option<SynthesisAsset> {
        self.gallery.read().unwrap().iter().find(|a| a.id == id).cloned()
    }

    pub fn clear_gallery(&self) {
        self.gallery.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAnalyzer {
        profile: Option<String>,
    }

    impl VoiceAnalyzer for FixedAnalyzer {
        fn analyze<'a>(
            &'a self,
            _sample: &'a [u8],
            _mime: &'a str,
        ) -> BoxFuture<'a, Result<String, SessionError>> {
            Box::pin(async move {
                match &self.profile {
                    Some(profile) => Ok(profile.clone()),
                    None => Err(SessionError::Analysis("remote analysis failed".to_string())),
                }
            })
        }
    }

    struct FixedSynthesizer {
        audio: Option<String>,
    }

    impl SpeechSynthesizer for FixedSynthesizer {
        fn synthesize<'a>(
            &'a self,
            _text: &'a str,
            _voice: &'a str,
            _instruction: &'a str,
        ) -> BoxFuture<'a, Result<EncodedChunk, SessionError>> {
            Box::pin(async move {
                match &self.audio {
                    Some(audio) => Ok(EncodedChunk::from_base64(audio.clone())),
                    None => Err(SessionError::Synthesis("remote synthesis failed".to_string())),
                }
            })
        }
    }

    fn studio(profile: Option<&str>, audio: Option<&str>) -> VoiceStudio {
        VoiceStudio::new(
            Box::new(FixedAnalyzer {
                profile: profile.map(String::from),
            }),
            Box::new(FixedSynthesizer {
                audio: audio.map(String::from),
            }),
        )
    }

    #[tokio::test]
    async fn test_clone_creates_custom_persona() {
        let studio = studio(Some("warm, low pitch, measured cadence"), None);
        let preset_count = studio.personas().len();

        let persona = studio
            .clone_from_sample(b"fake-audio", "audio/webm", "en-US")
            .await
            .unwrap();

        assert!(persona.is_custom);
        assert_eq!(
            persona.vocal_profile.as_deref(),
            Some("warm, low pitch, measured cadence")
        );
        assert_eq!(studio.personas().len(), preset_count + 1);
        // Clones are listed first
        assert_eq!(studio.personas()[0].id, persona.id);
        assert!(studio.find_persona(&persona.id).is_some());
    }

    #[tokio::test]
    async fn test_failed_analysis_resets_busy_flag() {
        let studio = studio(None, None);

        let err = studio
            .clone_from_sample(b"fake", "audio/webm", "en-US")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Analysis(_)));

        // The busy flag was cleared, so the studio accepts another request
        let err = studio
            .clone_from_sample(b"fake", "audio/webm", "en-US")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Analysis(_)));
    }

    #[tokio::test]
    async fn test_synthesize_stores_asset_newest_first() {
        let studio = studio(None, Some("UE9N"));
        let persona = studio.personas()[0].clone();

        let first = studio.synthesize("Hello", &persona).await.unwrap();
        let second = studio.synthesize("World", &persona).await.unwrap();

        let gallery = studio.gallery();
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery[0].id, second.id);
        assert_eq!(gallery[1].id, first.id);
        assert_eq!(gallery[0].audio_data, "UE9N");
        assert!(studio.find_asset(&first.id).is_some());

        studio.clear_gallery();
        assert!(studio.gallery().is_empty());
    }

    #[tokio::test]
    async fn test_failed_synthesis_surfaces_and_resets() {
        let studio = studio(None, None);
        let persona = studio.personas()[0].clone();

        let err = studio.synthesize("Hello", &persona).await.unwrap_err();
        assert!(matches!(err, SessionError::Synthesis(_)));
        assert!(studio.gallery().is_empty());

        // Flag cleared: next attempt reaches the synthesizer again
        let err = studio.synthesize("Hello", &persona).await.unwrap_err();
        assert!(matches!(err, SessionError::Synthesis(_)));
    }

    #[tokio::test]
    async fn test_remove_persona_only_deletes_clones() {
        let studio = studio(Some("bright, quick"), None);
        let preset_id = studio.personas()[0].id.clone();
        assert!(!studio.remove_persona(&preset_id));

        let clone = studio
            .clone_from_sample(b"fake", "audio/webm", "en-US")
            .await
            .unwrap();
        assert!(studio.remove_persona(&clone.id));
        assert!(studio.find_persona(&clone.id).is_none());
    }
}
