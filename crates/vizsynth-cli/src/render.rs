use std::fmt::Write as _;

use vizsynth_contracts::synthesis::{
    GeneratedImages, PromptPair, SearchResult, SynthesisState, VisualizationSource,
    TOPIC_SUGGESTIONS,
};
use vizsynth_engine::artifacts::decode_data_url;
use vizsynth_engine::SavedImage;

const RULE: &str = "────────────────────────────────────────";

pub fn render_state(state: &SynthesisState) -> String {
    match state {
        SynthesisState::Idle => render_welcome(),
        SynthesisState::Searching { topic } => {
            format!("Searching the web for how \"{}\" is visualized...\n", topic.trim())
        }
        SynthesisState::Generating {
            topic,
            search,
            prompts,
        } => {
            let mut out = render_insights(search);
            out.push_str(&render_pending_panels(prompts));
            out.push_str(&format!(
                "Rendering both images for \"{}\"...\n",
                topic.trim()
            ));
            out
        }
        SynthesisState::Completed {
            topic,
            search,
            images,
        } => {
            let mut out = render_insights(search);
            out.push_str(&render_sources(search));
            out.push_str(&render_image_panels(images));
            out.push_str(&render_breakdown(topic, search));
            out
        }
        SynthesisState::Error { message, .. } => render_error(message),
    }
}

pub fn render_welcome() -> String {
    let mut out = String::new();
    out.push_str("What should we visualize today?\n");
    out.push_str(
        "We'll search for real-world visualization data and use it to guide the \
image model toward an informed conglomerate image.\n\n",
    );
    out.push_str(&render_suggestions());
    out
}

pub fn render_suggestions() -> String {
    let mut out = String::from("Suggestions:\n");
    for (idx, suggestion) in TOPIC_SUGGESTIONS.iter().enumerate() {
        let _ = writeln!(out, "  {}. {}", idx + 1, suggestion);
    }
    out
}

pub fn render_error(message: &str) -> String {
    format!("Error Encountered\n  {message}\n")
}

/// `📷 2. TITLE` followed by the indented description.
pub fn render_visualization_card(index: usize, viz: &VisualizationSource) -> String {
    format!(
        "{} {}. {}\n   {}\n",
        viz.kind.icon(),
        index + 1,
        viz.title.to_uppercase(),
        viz.description
    )
}

fn render_insights(search: &SearchResult) -> String {
    let mut out = String::new();
    out.push_str("SEARCH INSIGHTS\n");
    out.push_str(RULE);
    out.push('\n');
    let _ = writeln!(out, "{}\n", search.summary.trim());
    out.push_str("Visual pillars (Wikimedia style included):\n");
    for (idx, viz) in search.visualizations.iter().enumerate() {
        out.push_str(&render_visualization_card(idx, viz));
    }
    out.push('\n');
    out
}

pub fn render_sources(search: &SearchResult) -> String {
    let links = search.visible_grounding_links();
    if links.is_empty() {
        return String::new();
    }
    let mut out = String::from("Grounding sources:\n");
    for (idx, link) in links.iter().enumerate() {
        let _ = writeln!(out, "  [{}] {} <{}>", idx + 1, link.title, link.uri);
    }
    let hidden = search.grounding_links.len() - links.len();
    if hidden > 0 {
        let _ = writeln!(out, "  (+{hidden} more)");
    }
    out.push('\n');
    out
}

fn render_pending_panels(prompts: &PromptPair) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Direct Method: Rendering...\n  \"{}\"", prompts.direct);
    let _ = writeln!(
        out,
        "Synthesis Method: Synthesizing Conglomerate...\n  \"{}\"\n",
        prompts.conglomerate
    );
    out
}

fn render_image_panels(images: &GeneratedImages) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Direct Method [{}]\n  \"{}\"",
        describe_data_url(&images.direct_url),
        images.direct_prompt
    );
    let _ = writeln!(
        out,
        "Synthesis Method [{}]\n  \"{}\"\n",
        describe_data_url(&images.conglomerate_url),
        images.conglomerate_prompt
    );
    out
}

fn render_breakdown(topic: &str, search: &SearchResult) -> String {
    format!(
        "Synthesis Breakdown\n  Rather than asking for an image of \"{}\" alone, the synthesis method \
drew on {} core visual pillars of how the topic is represented in the real world, \
including documentary Wikimedia-style photography.\n",
        topic.trim(),
        search.visualizations.len()
    )
}

fn describe_data_url(url: &str) -> String {
    match decode_data_url(url) {
        Ok(decoded) => format!("{}, {}", decoded.mime_type, format_bytes(decoded.bytes.len())),
        Err(_) => "unreadable image data".to_string(),
    }
}

pub fn render_saved(saved: &[SavedImage]) -> String {
    let mut out = String::new();
    for image in saved {
        let dims = match (image.width, image.height) {
            (Some(width), Some(height)) => format!("{width}x{height}, "),
            _ => String::new(),
        };
        let _ = writeln!(
            out,
            "Saved {} image to {} ({}{})",
            image.slot.file_prefix(),
            image.path.display(),
            dims,
            format_bytes(image.bytes)
        );
    }
    out
}

fn format_bytes(bytes: usize) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    format!("{:.1} KB", bytes as f64 / 1024.0)
}
