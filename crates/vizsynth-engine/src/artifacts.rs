use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use vizsynth_contracts::synthesis::GeneratedImages;

/// One of the two generated images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSlot {
    Direct,
    Synthesis,
}

impl ImageSlot {
    pub fn file_prefix(self) -> &'static str {
        match self {
            ImageSlot::Direct => "direct",
            ImageSlot::Synthesis => "synthesis",
        }
    }

    pub fn data_url(self, images: &GeneratedImages) -> &str {
        match self {
            ImageSlot::Direct => &images.direct_url,
            ImageSlot::Synthesis => &images.conglomerate_url,
        }
    }

    pub fn prompt(self, images: &GeneratedImages) -> &str {
        match self {
            ImageSlot::Direct => &images.direct_prompt,
            ImageSlot::Synthesis => &images.conglomerate_prompt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedImage {
    pub slot: ImageSlot,
    pub path: PathBuf,
    pub bytes: usize,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

pub fn decode_data_url(url: &str) -> Result<DecodedImage> {
    let Some(rest) = url.strip_prefix("data:") else {
        bail!("not a data URI");
    };
    let Some((header, data)) = rest.split_once(',') else {
        bail!("data URI has no payload separator");
    };
    let Some(mime_type) = header.strip_suffix(";base64") else {
        bail!("data URI is not base64 encoded");
    };
    let bytes = BASE64
        .decode(data.trim().as_bytes())
        .context("data URI base64 decode failed")?;
    if bytes.is_empty() {
        bail!("data URI carries no bytes");
    }
    Ok(DecodedImage {
        mime_type: mime_type.to_string(),
        bytes,
    })
}

/// `<prefix>-<topic>.png`, with characters that would escape the target
/// directory or break a file name replaced by `_`.
pub fn download_filename(slot: ImageSlot, topic: &str) -> String {
    let cleaned: String = topic
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_control() || matches!(ch, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
            {
                '_'
            } else {
                ch
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    let stem = if cleaned.is_empty() { "topic" } else { cleaned };
    format!("{}-{}.png", slot.file_prefix(), stem)
}

pub fn save_image(
    dir: &Path,
    slot: ImageSlot,
    topic: &str,
    images: &GeneratedImages,
) -> Result<SavedImage> {
    let decoded = decode_data_url(slot.data_url(images))
        .with_context(|| format!("{} image is not a usable data URI", slot.file_prefix()))?;
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(download_filename(slot, topic));
    fs::write(&path, &decoded.bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;

    let dims = image::load_from_memory(&decoded.bytes)
        .ok()
        .map(|img| (img.width(), img.height()));
    Ok(SavedImage {
        slot,
        path,
        bytes: decoded.bytes.len(),
        width: dims.map(|(width, _)| width),
        height: dims.map(|(_, height)| height),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dryrun::render_dryrun_png;

    fn images_for_test() -> anyhow::Result<GeneratedImages> {
        let png = render_dryrun_png("direct", 8, 8)?;
        Ok(GeneratedImages {
            direct_url: format!("data:image/png;base64,{}", BASE64.encode(&png)),
            conglomerate_url: "data:image/png;base64,bm90LWEtcG5n".to_string(),
            direct_prompt: "direct prompt".to_string(),
            conglomerate_prompt: "conglomerate prompt".to_string(),
        })
    }

    #[test]
    fn decode_data_url_splits_mime_and_bytes() -> anyhow::Result<()> {
        let decoded = decode_data_url("data:image/png;base64,aGVsbG8=")?;
        assert_eq!(decoded.mime_type, "image/png");
        assert_eq!(decoded.bytes, b"hello");
        Ok(())
    }

    #[test]
    fn decode_data_url_rejects_malformed_input() {
        assert!(decode_data_url("https://example.test/a.png").is_err());
        assert!(decode_data_url("data:image/png;base64").is_err());
        assert!(decode_data_url("data:image/png,raw").is_err());
        assert!(decode_data_url("data:image/png;base64,%%%").is_err());
        assert!(decode_data_url("data:image/png;base64,").is_err());
    }

    #[test]
    fn download_filename_is_topic_derived_and_contained() {
        assert_eq!(
            download_filename(ImageSlot::Direct, "Dark Matter"),
            "direct-Dark Matter.png"
        );
        assert_eq!(
            download_filename(ImageSlot::Synthesis, "../etc/passwd"),
            "synthesis-_etc_passwd.png"
        );
        assert_eq!(download_filename(ImageSlot::Direct, "  "), "direct-topic.png");
    }

    #[test]
    fn save_image_writes_file_and_probes_dimensions() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let images = images_for_test()?;

        let direct = save_image(temp.path(), ImageSlot::Direct, "The Silk Road", &images)?;
        assert_eq!(direct.path, temp.path().join("direct-The Silk Road.png"));
        assert_eq!(direct.width, Some(8));
        assert_eq!(direct.height, Some(8));
        assert_eq!(fs::read(&direct.path)?.len(), direct.bytes);

        let synthesis = save_image(temp.path(), ImageSlot::Synthesis, "The Silk Road", &images)?;
        assert_eq!(fs::read(&synthesis.path)?, b"not-a-png");
        assert_eq!(synthesis.width, None);
        Ok(())
    }

    #[test]
    fn slots_map_to_their_image_fields() -> anyhow::Result<()> {
        let images = images_for_test()?;
        assert_eq!(ImageSlot::Synthesis.prompt(&images), "conglomerate prompt");
        assert_eq!(ImageSlot::Direct.prompt(&images), "direct prompt");
        assert!(ImageSlot::Synthesis.data_url(&images).ends_with("bm90LWEtcG5n"));
        Ok(())
    }
}
