mod prompts;
mod state;
mod types;

pub use prompts::{
    build_conglomerate_prompt, build_direct_prompt, search_instruction, PromptPair,
    TOPIC_SUGGESTIONS,
};
pub use state::{
    Disposition, IgnoreReason, RunToken, SynthesisAction, SynthesisPhase, SynthesisSession,
    SynthesisState, DEFAULT_ERROR_MESSAGE,
};
pub use types::{
    GeneratedImages, GroundingLink, SearchResult, VisualizationKind, VisualizationSource,
    GROUNDING_LINK_DISPLAY_LIMIT,
};
