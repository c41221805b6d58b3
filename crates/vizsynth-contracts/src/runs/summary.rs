use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::synthesis::{GroundingLink, SynthesisState, VisualizationSource};

/// Record of one settled synthesis run, written as `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub session_id: String,
    pub run: Option<u64>,
    pub topic: Option<String>,
    pub phase: String,
    pub started_at: String,
    pub finished_at: String,
    pub summary: Option<String>,
    pub visualizations: Vec<VisualizationSource>,
    pub grounding_links: Vec<GroundingLink>,
    pub direct_prompt: Option<String>,
    pub conglomerate_prompt: Option<String>,
    pub saved_images: Vec<PathBuf>,
    pub error: Option<String>,
}

impl RunSummary {
    /// Snapshot of a session state. Image data URIs are deliberately left out;
    /// saved images are referenced by path instead.
    pub fn from_state(
        session_id: &str,
        run: Option<u64>,
        state: &SynthesisState,
        started_at: String,
        saved_images: Vec<PathBuf>,
    ) -> Self {
        let search = state.search_result();
        let images = state.images();
        Self {
            session_id: session_id.to_string(),
            run,
            topic: state.topic().map(str::to_string),
            phase: state.phase().as_str().to_string(),
            started_at,
            finished_at: now_utc_iso(),
            summary: search.map(|result| result.summary.clone()),
            visualizations: search
                .map(|result| result.visualizations.clone())
                .unwrap_or_default(),
            grounding_links: search
                .map(|result| result.grounding_links.clone())
                .unwrap_or_default(),
            direct_prompt: images.map(|images| images.direct_prompt.clone()),
            conglomerate_prompt: images.map(|images| images.conglomerate_prompt.clone()),
            saved_images,
            error: state.error_message().map(str::to_string),
        }
    }
}

pub fn write_summary(
    path: &Path,
    summary: &RunSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
