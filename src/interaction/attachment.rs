//! Attachment validation and download.

use reqwest::header::AUTHORIZATION;

use crate::prelude::*;

/// Allowed filename suffixes, matched case-sensitively.
const IMAGE_SUFFIXES: [(&str, ImageFormat); 4] = [(".jpg", ImageFormat::Jpeg), (".jpeg", ImageFormat::Jpeg), (".png", ImageFormat::Png), (".webp", ImageFormat::Webp)];

impl ImageFormat {
    /// Detect the image format from a filename suffix.
    pub fn from_filename(filename: &str) -> Option<Self> {
        IMAGE_SUFFIXES.iter().find(|(suffix, _)| filename.ends_with(suffix)).map(|(_, format)| *format)
    }

    /// The MIME type sent to the model alongside the bytes.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
        }
    }
}

/// Download the full body at `url`.
///
/// Sends `bearer` as an `Authorization` header when given (Slack private files need it).
/// Fails on a non-success status, or when the body exceeds `max_bytes`.
#[instrument(skip(client, bearer))]
pub async fn download(client: &reqwest::Client, url: &str, bearer: Option<&str>, max_bytes: u64) -> Res<Vec<u8>> {
    let mut request = client.get(url);

    if let Some(token) = bearer {
        request = request.header(AUTHORIZATION, format!("Bearer {token}"));
    }

    let mut response = request.send().await?.error_for_status()?;

    if let Some(length) = response.content_length()
        && length > max_bytes
    {
        return Err(anyhow!("Attachment is {length} bytes, larger than the {max_bytes} byte limit."));
    }

    // The declared length is optional (chunked bodies), so the cap is enforced while reading.
    let mut body = Vec::with_capacity(response.content_length().unwrap_or_default() as usize);

    while let Some(chunk) = response.chunk().await? {
        if (body.len() + chunk.len()) as u64 > max_bytes {
            return Err(anyhow!("Attachment exceeds the {max_bytes} byte limit."));
        }

        body.extend_from_slice(&chunk);
    }

    debug!("Downloaded {} bytes", body.len());

    Ok(body)
}

// Tests.
