//! Image attachments: decode or download, then upload to the file store.

use base64::Engine as _;
use http::header::{AUTHORIZATION, CONTENT_TYPE, ORIGIN, REFERER};
use reqwest::multipart::{Form, Part};

use super::http_transport::{sanitize_upstream_error, transport_error};
use crate::error::ProxyError;
use crate::protocol::zai::{FileUploadResponse, UpstreamFile};
use crate::util::truncate_on_char_boundary;

const DEFAULT_IMAGE_MIME: &str = "image/png";

#[derive(Debug)]
struct ImagePayload {
    bytes: Vec<u8>,
    content_type: String,
    filename: String,
}

fn extension_for(content_type: &str) -> &'static str {
    if content_type.contains("jpeg") || content_type.contains("jpg") {
        ".jpg"
    } else if content_type.contains("gif") {
        ".gif"
    } else if content_type.contains("webp") {
        ".webp"
    } else {
        ".png"
    }
}

fn generated_filename(content_type: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", &id[..12], extension_for(content_type))
}

fn decode_data_url(image_ref: &str) -> Result<ImagePayload, ProxyError> {
    let (header, payload) = image_ref
        .split_once(',')
        .ok_or_else(|| ProxyError::InvalidRequest("invalid base64 image format".into()))?;
    let content_type = header
        .strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .filter(|mime| !mime.is_empty())
        .unwrap_or(DEFAULT_IMAGE_MIME)
        .to_string();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|err| ProxyError::InvalidRequest(format!("failed to decode base64: {err}")))?;
    Ok(ImagePayload {
        bytes,
        filename: generated_filename(&content_type),
        content_type,
    })
}

fn filename_from_url(image_url: &str, content_type: &str) -> String {
    url::Url::parse(image_url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_owned))
        })
        .filter(|name| !name.is_empty() && name != ".")
        .unwrap_or_else(|| generated_filename(content_type))
}

async fn download_image(client: &reqwest::Client, image_url: &str) -> Result<ImagePayload, ProxyError> {
    let response = client
        .get(image_url)
        .send()
        .await
        .map_err(|err| transport_error("failed to download image", &err))?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProxyError::Upstream {
            status: status.as_u16(),
            message: format!("failed to download image: status {}", status.as_u16()),
        });
    }
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_IMAGE_MIME)
        .to_string();
    let bytes = response
        .bytes()
        .await
        .map_err(|err| transport_error("failed to read image data", &err))?;
    Ok(ImagePayload {
        bytes: bytes.to_vec(),
        filename: filename_from_url(image_url, &content_type),
        content_type,
    })
}

/// Upload one `data:` or `http(s)` image and describe it for a chat request.
///
/// # Errors
///
/// Returns an error when the image cannot be decoded, downloaded or stored.
pub async fn upload_image(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    image_ref: &str,
) -> Result<UpstreamFile, ProxyError> {
    let image = if image_ref.starts_with("data:") {
        decode_data_url(image_ref)?
    } else {
        download_image(client, image_ref).await?
    };

    let part = Part::bytes(image.bytes)
        .file_name(image.filename)
        .mime_str(&image.content_type)
        .map_err(|err| ProxyError::InvalidRequest(format!("invalid image mime type: {err}")))?;
    let form = Form::new().part("file", part);

    let base_url = base_url.trim_end_matches('/');
    let response = client
        .post(format!("{base_url}/api/v1/files/"))
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .header(ORIGIN, base_url)
        .header(REFERER, format!("{base_url}/"))
        .multipart(form)
        .send()
        .await
        .map_err(|err| transport_error("failed to upload image", &err))?;

    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|err| transport_error("failed to read upload response", &err))?;
    if !status.is_success() {
        return Err(ProxyError::Upstream {
            status: status.as_u16(),
            message: sanitize_upstream_error(&body),
        });
    }
    let uploaded: FileUploadResponse = serde_json::from_slice(&body)
        .map_err(|err| ProxyError::Internal(format!("failed to parse upload response: {err}")))?;
    Ok(UpstreamFile::uploaded_image(
        uploaded,
        uuid::Uuid::new_v4().to_string(),
    ))
}

/// Upload images in order; failures are logged and skipped.
pub async fn upload_images<'a>(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    image_refs: impl IntoIterator<Item = &'a str>,
) -> Vec<UpstreamFile> {
    let mut files = Vec::new();
    for image_ref in image_refs {
        match upload_image(client, base_url, token, image_ref).await {
            Ok(file) => files.push(file),
            Err(err) => tracing::warn!(
                target: "zai_proxy::upload",
                image = truncate_on_char_boundary(image_ref, 50),
                "failed to upload image: {err}"
            ),
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_data_url() {
        let image = decode_data_url("data:image/jpeg;base64,aGVsbG8=").unwrap();
        assert_eq!(image.bytes, b"hello");
        assert_eq!(image.content_type, "image/jpeg");
        assert!(image.filename.ends_with(".jpg"));
        assert_eq!(image.filename.len(), 16);
    }

    #[test]
    fn test_decode_data_url_defaults_and_errors() {
        let image = decode_data_url("data:;base64,aGk=").unwrap();
        assert_eq!(image.content_type, "image/png");
        assert!(decode_data_url("data:image/png;base64").is_err());
        assert!(decode_data_url("data:image/png;base64,!!!").is_err());
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://cdn.example.com/a/cat.webp?x=1", "image/webp"),
            "cat.webp"
        );
        assert!(filename_from_url("https://cdn.example.com/", "image/gif").ends_with(".gif"));
    }

    #[tokio::test]
    async fn test_failed_uploads_are_skipped() {
        let client = reqwest::Client::new();
        let files = upload_images(
            &client,
            "http://127.0.0.1:1",
            "token",
            ["data:image/png;base64,@@", "data:image/png;base64,aGk="],
        )
        .await;
        assert!(files.is_empty());
    }
}
