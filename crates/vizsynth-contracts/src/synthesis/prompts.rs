use serde::{Deserialize, Serialize};

use super::types::SearchResult;

/// Topic shortcuts offered on the idle screen.
pub const TOPIC_SUGGESTIONS: [&str; 4] = [
    "The Silk Road",
    "Dark Matter",
    "Urban Sprawl",
    "Neurosurgery",
];

/// The two image prompts derived from one search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPair {
    pub direct: String,
    pub conglomerate: String,
}

impl PromptPair {
    pub fn build(topic: &str, search: &SearchResult) -> Self {
        Self {
            direct: build_direct_prompt(topic),
            conglomerate: build_conglomerate_prompt(topic, search),
        }
    }
}

/// Instruction sent to the search model. The output shape is enforced
/// separately by the response schema.
pub fn search_instruction(topic: &str) -> String {
    format!(
        "Analyze the topic \"{topic}\". Identify 4 distinct types of visualizations \
(e.g., specific charts, diagrams, maps, or photos), covering the categories chart, photo, diagram and map.\n\
CRITICAL: At least one of these must be an \"iconic personal-style photo\" typical of Wikimedia Commons \
Creative Commons media (realistic, documentary style).\n\
For each, provide a title and a vivid 2-sentence description of what the visualization looks like.\n\
Also provide a summary of the topic's visual landscape."
    )
}

pub fn build_direct_prompt(topic: &str) -> String {
    format!(
        "A high-quality artistic image representing the concept of {topic}. \
Digital art style, clean composition."
    )
}

pub fn build_conglomerate_prompt(topic: &str, search: &SearchResult) -> String {
    let viz_descriptions = search
        .visualizations
        .iter()
        .map(|viz| format!("{}: {}", viz.title, viz.description))
        .collect::<Vec<String>>()
        .join(". ");

    format!(
        "A masterfully blended conglomerate visualization of \"{topic}\".\n\
The composition MUST incorporate elements from: {viz_descriptions}.\n\
STIPULATION: Any photographic elements included must adhere to a realistic \"Wikimedia Commons\" style, \
mirroring clearly CC-licensed, documentary-style photography.\n\
The final image should be a sophisticated data-infographic synthesis that looks like it belongs in a \
high-end educational journal, showcasing the intersection of various visual data formats."
    )
}
