//! system.screenshot capability.
//!
//! Captures every monitor at native size as JPEG (quality 90) and
//! uploads each to the file server. A screen that fails to capture or
//! upload is skipped with a warning; only all screens failing turns
//! into an error.

use super::upload::upload_screenshot;
use super::{
    CODE_SCREENSHOT_CAPTURE_FAILED, CODE_SCREENSHOT_UPLOAD_FAILED, CapabilityError,
    CapabilityResult,
};
use crate::options::NodeOptions;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};
use serde_json::{Map, Value, json};
use tracing::{info, warn};
use xcap::Monitor;

const JPEG_QUALITY: u8 = 90;

#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub screen_index: usize,
    pub screen_name: String,
    pub jpg_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Capture all screens to JPEG. Individual screens may be skipped; an
/// empty result is an error.
pub fn capture_all_to_jpg() -> Result<Vec<CaptureResult>, String> {
    info!("system.screenshot capture all screens start");

    let monitors = Monitor::all().map_err(|e| format!("failed to enumerate screens: {e}"))?;
    if monitors.is_empty() {
        return Err("screen list is empty".to_string());
    }

    let total = monitors.len();
    let mut results = Vec::new();
    for (index, monitor) in monitors.into_iter().enumerate() {
        let image = match monitor.capture_image() {
            Ok(image) => image,
            Err(e) => {
                warn!(index, reason = %e, "capture screen skipped");
                continue;
            }
        };

        let (width, height) = (image.width(), image.height());
        let jpg_bytes = match encode_jpeg(width, height, image.into_raw()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(index, reason = %e, "capture screen skipped");
                continue;
            }
        };
        if jpg_bytes.is_empty() {
            warn!(index, reason = "empty image bytes", "capture screen skipped");
            continue;
        }

        results.push(CaptureResult {
            screen_index: index,
            screen_name: monitor.name().to_string(),
            jpg_bytes,
            width,
            height,
        });
    }

    if results.is_empty() {
        return Err("failed to capture all screens".to_string());
    }

    info!(
        success = results.len(),
        total,
        "system.screenshot capture all screens done"
    );
    Ok(results)
}

/// Encode raw RGBA pixels as JPEG at the capture's native size.
fn encode_jpeg(width: u32, height: u32, rgba: Vec<u8>) -> Result<Vec<u8>, String> {
    let image = RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| "captured image buffer has the wrong size".to_string())?;
    let rgb = DynamicImage::ImageRgba8(image).into_rgb8();

    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| format!("failed to encode screenshot as jpg: {e}"))?;
    Ok(encoded)
}

/// Capture every screen and upload each; the payload is one entry per
/// uploaded screen.
pub async fn run(options: &NodeOptions) -> CapabilityResult {
    let captures = capture_all_to_jpg().map_err(|message| {
        CapabilityError::with_code(CODE_SCREENSHOT_CAPTURE_FAILED, message)
    })?;

    let client = reqwest::Client::new();
    let mut uploaded = Vec::new();
    for capture in captures {
        let file_url = match upload_screenshot(
            &client,
            capture.jpg_bytes.clone(),
            &options.file_server_uri,
            &options.file_server_token,
        )
        .await
        {
            Ok(url) => url,
            Err(reason) => {
                warn!(index = capture.screen_index, reason = %reason, "upload screen skipped");
                continue;
            }
        };
        info!(index = capture.screen_index, url = %file_url, "upload done");
        uploaded.push(payload_entry(&capture, &file_url));
    }

    if uploaded.is_empty() {
        return Err(CapabilityError::with_code(
            CODE_SCREENSHOT_UPLOAD_FAILED,
            "failed to upload screenshots for all screens",
        ));
    }
    Ok(Value::Array(uploaded))
}

fn payload_entry(capture: &CaptureResult, file_url: &str) -> Value {
    let mut entry = Map::new();
    entry.insert("format".to_string(), json!("jpg"));
    entry.insert("mimeType".to_string(), json!("image/jpeg"));
    entry.insert("url".to_string(), json!(file_url));
    entry.insert("width".to_string(), json!(capture.width));
    entry.insert("height".to_string(), json!(capture.height));
    entry.insert("screenIndex".to_string(), json!(capture.screen_index));
    if !capture.screen_name.trim().is_empty() {
        entry.insert("screenName".to_string(), json!(capture.screen_name));
    }
    Value::Object(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_encoding_produces_a_jfif_stream() {
        let rgba = vec![128u8; 4 * 4 * 4];
        let encoded = encode_jpeg(4, 4, rgba).unwrap();
        assert!(encoded.len() > 2);
        // JPEG SOI marker.
        assert_eq!(&encoded[..2], &[0xff, 0xd8]);
    }

    #[test]
    fn jpeg_encoding_rejects_mismatched_buffers() {
        assert!(encode_jpeg(10, 10, vec![0u8; 8]).is_err());
    }

    #[test]
    fn payload_entry_shape_matches_the_contract() {
        let capture = CaptureResult {
            screen_index: 1,
            screen_name: "DP-1".to_string(),
            jpg_bytes: vec![0xff, 0xd8],
            width: 1920,
            height: 1080,
        };
        let entry = payload_entry(&capture, "https://files.example/files/shot.jpg");
        assert_eq!(entry["format"], "jpg");
        assert_eq!(entry["mimeType"], "image/jpeg");
        assert_eq!(entry["url"], "https://files.example/files/shot.jpg");
        assert_eq!(entry["width"], 1920);
        assert_eq!(entry["height"], 1080);
        assert_eq!(entry["screenIndex"], 1);
        assert_eq!(entry["screenName"], "DP-1");
    }

    #[test]
    fn payload_entry_omits_a_blank_screen_name() {
        let capture = CaptureResult {
            screen_index: 0,
            screen_name: "  ".to_string(),
            jpg_bytes: vec![0xff, 0xd8],
            width: 800,
            height: 600,
        };
        let entry = payload_entry(&capture, "https://files.example/files/s.jpg");
        assert!(entry.get("screenName").is_none());
    }
}
