//! # Voice Studio Handlers
//!
//! REST surface for the persona vault and the synthesis gallery: list
//! personas, clone a voice from an uploaded sample, synthesize speech, and
//! export gallery assets as WAV files.

use crate::audio::codec::{self, EncodedChunk};
use crate::error::{AppError, AppResult};
use crate::persona;
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{http::header, web, HttpResponse};
use futures_util::TryStreamExt;
use serde::Deserialize;
use serde_json::json;

/// Uploaded vocal samples beyond this size are rejected outright.
const MAX_SAMPLE_BYTES: usize = 10 * 1024 * 1024;

pub async fn list_personas(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "personas": state.studio().personas(),
        "languages": persona::languages()
    })))
}

pub async fn delete_persona(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    if !state.studio().remove_persona(&id) {
        return Err(AppError::NotFound(format!(
            "No deletable persona with id '{}' (presets cannot be removed)",
            id
        )));
    }
    Ok(HttpResponse::Ok().json(json!({ "status": "deleted", "id": id })))
}

#[derive(Debug, Deserialize)]
pub struct CloneQuery {
    /// Language tag to attach to the new clone; defaults to en-US
    pub language: Option<String>,
}

/// Clone a voice from an uploaded audio sample (multipart form, first field).
pub async fn clone_voice(
    state: web::Data<AppState>,
    query: web::Query<CloneQuery>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let mut sample: Vec<u8> = Vec::new();
    let mut mime = "audio/webm".to_string();

    if let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| AppError::BadRequest(format!("multipart error: {}", e)))?
    {
        if let Some(content_type) = field.content_type() {
            mime = content_type.to_string();
        }

        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| AppError::BadRequest(format!("multipart read error: {}", e)))?
        {
            if sample.len() + chunk.len() > MAX_SAMPLE_BYTES {
                return Err(AppError::BadRequest(format!(
                    "Vocal sample exceeds the {} byte limit",
                    MAX_SAMPLE_BYTES
                )));
            }
            sample.extend_from_slice(&chunk);
        }
    }

    if sample.is_empty() {
        return Err(AppError::BadRequest(
            "No audio sample found in the upload".to_string(),
        ));
    }

    let language = query
        .into_inner()
        .language
        .unwrap_or_else(|| persona::default_language().code);

    let persona = state
        .studio()
        .clone_from_sample(&sample, &mime, &language)
        .await?;

    Ok(HttpResponse::Created().json(json!({ "persona": persona })))
}

#[derive(Debug, Deserialize)]
pub struct SynthesizeRequest {
    pub text: String,
    pub persona_id: String,
}

pub async fn synthesize(
    state: web::Data<AppState>,
    body: web::Json<SynthesizeRequest>,
) -> AppResult<HttpResponse> {
    let request = body.into_inner();

    if request.text.trim().is_empty() {
        return Err(AppError::BadRequest("Text must not be empty".to_string()));
    }

    let studio = state.studio();
    let persona = studio
        .find_persona(&request.persona_id)
        .ok_or_else(|| AppError::NotFound(format!("No persona with id '{}'", request.persona_id)))?;

    let asset = studio.synthesize(request.text.trim(), &persona).await?;

    Ok(HttpResponse::Created().json(json!({ "asset": asset })))
}

pub async fn list_assets(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({ "assets": state.studio().gallery() })))
}

pub async fn clear_assets(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    state.studio().clear_gallery();
    Ok(HttpResponse::Ok().json(json!({ "status": "cleared" })))
}

/// Export one gallery asset as a WAV file.
///
/// The stored payload is decoded from its transport encoding and wrapped in
/// the canonical 44-byte-header PCM container at the playback rate.
pub async fn download_asset_wav(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let asset = state
        .studio()
        .find_asset(&id)
        .ok_or_else(|| AppError::NotFound(format!("No asset with id '{}'", id)))?;

    let config = state.get_config();
    let pcm = codec::decode_chunk(&EncodedChunk::from_base64(asset.audio_data.clone()))?;
    let wav_bytes = codec::package_wav(
        &pcm,
        config.audio.playback_sample_rate,
        config.audio.channels,
    )?;

    let filename = format!("VoxClone_{}_{}.wav", asset.persona_name, asset.id);
    Ok(HttpResponse::Ok()
        .content_type("audio/wav")
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ))
        .body(wav_bytes))
}
