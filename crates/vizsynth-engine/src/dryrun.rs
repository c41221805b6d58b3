use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use vizsynth_contracts::synthesis::{
    GroundingLink, SearchResult, VisualizationKind, VisualizationSource,
};

use crate::error::ProviderError;
use crate::{ImageSynthesizer, TopicSearcher};

pub const DRYRUN_IMAGE_SIZE: u32 = 64;

/// Topics containing this word make the dryrun image model refuse.
pub const DRYRUN_REFUSAL_TRIGGER: &str = "refuse";

/// Offline backend: deterministic search pillars and solid-color PNGs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunBackend;

impl TopicSearcher for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn search(&self, topic: &str) -> Result<SearchResult, ProviderError> {
        let topic = topic.trim();
        let visualizations = VisualizationKind::ALL
            .iter()
            .map(|kind| dryrun_pillar(topic, *kind))
            .collect();
        Ok(SearchResult {
            summary: format!(
                "{topic} is commonly shown through maps, charts, diagrams and documentary photography."
            ),
            visualizations,
            grounding_links: vec![GroundingLink {
                title: format!("{topic} (dryrun)"),
                uri: format!("https://dryrun.invalid/{}", short_id(topic, 0)),
            }],
        })
    }
}

impl ImageSynthesizer for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn synthesize(&self, prompt: &str) -> Result<String, ProviderError> {
        if prompt.to_ascii_lowercase().contains(DRYRUN_REFUSAL_TRIGGER) {
            return Err(ProviderError::ModelRefusal(
                "The dryrun image model declined this prompt.".to_string(),
            ));
        }
        let bytes = render_dryrun_png(prompt, DRYRUN_IMAGE_SIZE, DRYRUN_IMAGE_SIZE)
            .map_err(|_| ProviderError::NoImageData)?;
        Ok(format!("data:image/png;base64,{}", BASE64.encode(bytes)))
    }
}

fn dryrun_pillar(topic: &str, kind: VisualizationKind) -> VisualizationSource {
    let (title, description) = match kind {
        VisualizationKind::Chart => (
            format!("{topic} Trend Chart"),
            format!("A line chart tracing how {topic} changed over time. Key inflection points are annotated."),
        ),
        VisualizationKind::Photo => (
            format!("{topic} Documentary Photo"),
            format!("An iconic, realistic photograph of {topic} in the style of Wikimedia Commons. Natural light and candid framing."),
        ),
        VisualizationKind::Diagram => (
            format!("{topic} Structure Diagram"),
            format!("A labeled schematic breaking {topic} into its parts. Arrows show how they connect."),
        ),
        VisualizationKind::Map => (
            format!("{topic} Map"),
            format!("A geographic map locating {topic}. Shaded regions mark where it is most visible."),
        ),
    };
    VisualizationSource {
        title,
        description,
        kind,
    }
}

pub(crate) fn render_dryrun_png(
    prompt: &str,
    width: u32,
    height: u32,
) -> image::ImageResult<Vec<u8>> {
    let (r, g, b) = color_from_prompt(prompt);
    let mut image = RgbImage::new(width, height);
    for pixel in image.pixels_mut() {
        *pixel = Rgb([r, g, b]);
    }
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png)?;
    Ok(bytes.into_inner())
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn short_id(text: &str, idx: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(idx.to_be_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}
