use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::EditError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// A user-selected file, read at submit time.
    File(PathBuf),
    /// Bytes already in memory, e.g. a generated result.
    Inline(Vec<u8>),
}

/// An image plus its declared media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub source: ImageSource,
    pub mime_type: String,
}

/// Base64 form of an [`ImageAsset`], ready for a JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub data: String,
    pub mime_type: String,
}

impl ImageAsset {
    /// Accepts a selected file only when its declared type is `image/*`.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, EditError> {
        let path = path.into();
        let mime_type = media_type_for_path(&path).ok_or_else(|| {
            EditError::Validation("Por favor, selecione um arquivo de imagem.".to_string())
        })?;
        Ok(Self {
            source: ImageSource::File(path),
            mime_type: mime_type.to_string(),
        })
    }

    pub fn inline(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            source: ImageSource::Inline(bytes),
            mime_type: mime_type.into(),
        }
    }

    /// Reference the page can preview without re-reading the file.
    pub fn preview(&self) -> Option<String> {
        match &self.source {
            ImageSource::File(p) => Some(p.display().to_string()),
            ImageSource::Inline(bytes) => Some(data_url(&self.mime_type, &B64.encode(bytes))),
        }
    }

    /// File the page is allowed to load for the preview; inline assets need none.
    pub fn file_path(&self) -> Option<&Path> {
        match &self.source {
            ImageSource::File(p) => Some(p),
            ImageSource::Inline(_) => None,
        }
    }
}

impl EncodedImage {
    pub fn data_url(&self) -> String {
        data_url(&self.mime_type, &self.data)
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        decode_base64_image(&self.data)
    }
}

/// Declared media type from the file extension; `None` for non-images.
pub fn media_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" | "jfif" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "avif" => "image/avif",
        "tif" | "tiff" => "image/tiff",
        _ => return None,
    };
    Some(mime)
}

/// Reads the asset's full content and base64-encodes it.
pub async fn encode_asset(asset: &ImageAsset) -> Result<EncodedImage, EditError> {
    let data = match &asset.source {
        ImageSource::File(path) => {
            let bytes = tokio::fs::read(path).await.map_err(|source| EditError::Io {
                path: path.clone(),
                source,
            })?;
            debug!(path = %path.display(), bytes = bytes.len(), "encoded image file");
            B64.encode(bytes)
        }
        ImageSource::Inline(bytes) => B64.encode(bytes),
    };
    Ok(EncodedImage {
        data,
        mime_type: asset.mime_type.clone(),
    })
}

pub fn data_url(mime_type: &str, b64: &str) -> String {
    format!("data:{mime_type};base64,{b64}")
}

/// Decodes plain base64 or a `data:...;base64,` URL.
pub fn decode_base64_image(s: &str) -> Result<Vec<u8>> {
    let data = match s.find(',') {
        Some(idx) if s.starts_with("data:") => &s[(idx + 1)..],
        _ => s,
    };
    B64.decode(data.trim()).map_err(|e| anyhow!("base64 decode: {e}"))
}

pub fn guess_image_extension(bytes: &[u8]) -> &'static str {
    // PNG
    if bytes.len() >= 8 && bytes[0..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
        return "png";
    }
    // JPEG
    if bytes.len() >= 3 && bytes[0..3] == [0xFF, 0xD8, 0xFF] {
        return "jpg";
    }
    // WEBP (RIFF....WEBP)
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return "webp";
    }
    "png"
}

/// Writes the edited image to `target`. A target without an extension gets
/// one sniffed from the bytes.
pub async fn save_image_to_disk(image: &EncodedImage, target: &Path) -> Result<PathBuf> {
    let bytes = image.decode()?;
    let path = if target.extension().is_some() {
        target.to_path_buf()
    } else {
        target.with_extension(guess_image_extension(&bytes))
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create {}", parent.display()))?;
    }
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn only_image_extensions_are_accepted() {
        assert_eq!(
            media_type_for_path(Path::new("me.JPG")),
            Some("image/jpeg")
        );
        assert_eq!(media_type_for_path(Path::new("a/b/shirt.webp")), Some("image/webp"));
        assert_eq!(media_type_for_path(Path::new("notes.txt")), None);
        assert_eq!(media_type_for_path(Path::new("no_extension")), None);

        let err = ImageAsset::from_path("resume.pdf").unwrap_err();
        assert!(matches!(err, EditError::Validation(_)));
    }

    #[test]
    fn only_selected_files_are_exposed_for_preview() {
        let file = ImageAsset::from_path("/home/ana/fotos/eu.png").unwrap();
        assert_eq!(file.file_path(), Some(Path::new("/home/ana/fotos/eu.png")));

        let inline = ImageAsset::inline(b"x".to_vec(), "image/png");
        assert_eq!(inline.file_path(), None);
        assert!(inline.preview().unwrap().starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn encodes_full_file_content() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("me.png");
        let mut bytes = PNG_HEADER.to_vec();
        bytes.extend((0..=255u8).cycle().take(4096));
        std::fs::write(&path, &bytes)?;

        let asset = ImageAsset::from_path(&path)?;
        let encoded = encode_asset(&asset).await?;
        assert_eq!(encoded.mime_type, "image/png");
        assert_eq!(encoded.decode()?, bytes);
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let asset = ImageAsset::from_path("/definitely/not/here.png").unwrap();
        let err = encode_asset(&asset).await.unwrap_err();
        assert!(matches!(err, EditError::Io { .. }));
    }

    #[test]
    fn decodes_data_urls_and_plain_base64() {
        let b64 = B64.encode(b"hello");
        assert_eq!(decode_base64_image(&b64).unwrap(), b"hello");
        assert_eq!(
            decode_base64_image(&data_url("image/png", &b64)).unwrap(),
            b"hello"
        );
    }

    #[test]
    fn sniffs_extension_from_magic() {
        assert_eq!(guess_image_extension(&PNG_HEADER), "png");
        assert_eq!(guess_image_extension(&[0xFF, 0xD8, 0xFF, 0xE0]), "jpg");
        assert_eq!(guess_image_extension(b"RIFF\0\0\0\0WEBPVP8 "), "webp");
    }

    #[tokio::test]
    async fn save_adds_sniffed_extension() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let image = EncodedImage {
            data: B64.encode([0xFF, 0xD8, 0xFF, 0xDB]),
            mime_type: "image/jpeg".into(),
        };
        let saved = save_image_to_disk(&image, &dir.path().join("out/look")).await?;
        assert_eq!(saved.extension().and_then(|e| e.to_str()), Some("jpg"));
        assert_eq!(std::fs::read(saved)?, vec![0xFF, 0xD8, 0xFF, 0xDB]);
        Ok(())
    }
}
