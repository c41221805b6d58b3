use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum number of grounding links shown to the user.
pub const GROUNDING_LINK_DISPLAY_LIMIT: usize = 5;

/// Category of a visualization pillar. The search schema enumerates exactly
/// these four values; anything else fails deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationKind {
    Chart,
    Photo,
    Diagram,
    Map,
}

impl VisualizationKind {
    pub const ALL: [VisualizationKind; 4] = [
        VisualizationKind::Chart,
        VisualizationKind::Photo,
        VisualizationKind::Diagram,
        VisualizationKind::Map,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VisualizationKind::Chart => "chart",
            VisualizationKind::Photo => "photo",
            VisualizationKind::Diagram => "diagram",
            VisualizationKind::Map => "map",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            VisualizationKind::Chart => "📊",
            VisualizationKind::Photo => "📷",
            VisualizationKind::Diagram => "📐",
            VisualizationKind::Map => "🗺️",
        }
    }
}

impl fmt::Display for VisualizationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualizationSource {
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: VisualizationKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingLink {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub summary: String,
    pub visualizations: Vec<VisualizationSource>,
    pub grounding_links: Vec<GroundingLink>,
}

impl SearchResult {
    /// Leading grounding links, in source order, capped for display.
    pub fn visible_grounding_links(&self) -> &[GroundingLink] {
        let end = self.grounding_links.len().min(GROUNDING_LINK_DISPLAY_LIMIT);
        &self.grounding_links[..end]
    }

    pub fn has_kind(&self, kind: VisualizationKind) -> bool {
        self.visualizations.iter().any(|viz| viz.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImages {
    pub direct_url: String,
    pub conglomerate_url: String,
    pub direct_prompt: String,
    pub conglomerate_prompt: String,
}
