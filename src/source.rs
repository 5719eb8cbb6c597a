use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{DynamicImage, GenericImageView};
use std::path::Path;

const DEFAULT_MIME: &str = "image/jpeg";
const DEFAULT_FILE_NAME: &str = "image.png";

/// The photographed problem, read once per request and shared read-only by
/// every detector.
#[derive(Debug, Clone)]
pub struct SourceImage {
    bytes: Vec<u8>,
    mime: String,
    name: Option<String>,
    image: DynamicImage,
}

impl SourceImage {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read image file: {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .map(|value| value.to_string());
        Self::from_bytes(bytes, name.as_deref())
    }

    pub fn from_bytes(bytes: Vec<u8>, name: Option<&str>) -> Result<Self> {
        let image = image::load_from_memory(&bytes).with_context(|| {
            format!(
                "failed to decode image: {}",
                name.unwrap_or(DEFAULT_FILE_NAME)
            )
        })?;
        let mime = detect_mime(&bytes, name);
        Ok(Self {
            bytes,
            mime,
            name: name.map(|value| value.to_string()),
            image,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.dimensions().0
    }

    pub fn height(&self) -> u32 {
        self.image.dimensions().1
    }

    pub fn file_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_FILE_NAME)
    }

    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, BASE64.encode(&self.bytes))
    }
}

fn detect_mime(bytes: &[u8], name: Option<&str>) -> String {
    if let Some(kind) = infer::get(bytes) {
        if kind.mime_type().starts_with("image/") {
            return kind.mime_type().to_string();
        }
    }
    name.and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .and_then(|ext| mime_from_extension(&ext.to_lowercase()))
        .unwrap_or(DEFAULT_MIME)
        .to_string()
}

fn mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}
