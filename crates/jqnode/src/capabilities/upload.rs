//! Screenshot upload against the file-server HTTP contract.
//!
//! `PUT <base>/upload/<name>` with `Content-Type: image/jpeg` and
//! `X-Token`; success is any 2xx status. The returned access URL is
//! `<base>/files/<name>`, fully encoded.

use chrono::Local;
use url::Url;
use uuid::Uuid;

/// Trim the base path to a canonical `/segments` form: no trailing
/// slash, a leading slash when non-empty, empty for the root.
pub fn normalize_base_path(path: &str) -> String {
    let mut normalized = path.trim().to_string();
    if normalized == "/" {
        normalized.clear();
    }
    while normalized.ends_with('/') {
        normalized.pop();
    }
    if normalized.is_empty() {
        return String::new();
    }
    if !normalized.starts_with('/') {
        normalized.insert(0, '/');
    }
    normalized
}

/// Build `<base>/<segment>/<file_name>` on top of the server URI.
pub fn build_file_server_url(
    base_uri: &str,
    segment: &str,
    file_name: &str,
) -> Result<Url, String> {
    let mut url =
        Url::parse(base_uri.trim()).map_err(|_| format!("invalid file server {segment} url"))?;
    let base_path = normalize_base_path(url.path());
    url.set_path(&format!("{base_path}/{segment}/{file_name}"));
    Ok(url)
}

/// `screenshot-<yyyyMMdd_HHmmsszzz>-<uuid>.jpg`
pub fn generate_screenshot_file_name() -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S%3f");
    format!("screenshot-{}-{}.jpg", timestamp, Uuid::new_v4())
}

/// Upload one screenshot; returns the access URL on success.
pub async fn upload_screenshot(
    client: &reqwest::Client,
    image_bytes: Vec<u8>,
    file_server_uri: &str,
    file_server_token: &str,
) -> Result<String, String> {
    let uri = file_server_uri.trim();
    if uri.is_empty() {
        return Err("file server uri is empty".to_string());
    }
    let token = file_server_token.trim();
    if token.is_empty() {
        return Err("file server token is empty".to_string());
    }

    let file_name = generate_screenshot_file_name();
    let upload_url = build_file_server_url(uri, "upload", &file_name)?;

    let response = client
        .put(upload_url)
        .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
        .header("X-Token", token)
        .body(image_bytes)
        .send()
        .await
        .map_err(|e| format!("file upload network error: {e}"))?;

    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let body = response.text().await.unwrap_or_default();
        let body = body.trim().chars().take(200).collect::<String>();
        if body.is_empty() {
            return Err(format!("file upload failed with status code {status}"));
        }
        return Err(format!(
            "file upload failed with status code {status}: {body}"
        ));
    }

    let access_url = build_file_server_url(uri, "files", &file_name)?;
    Ok(access_url.to_string())
}
