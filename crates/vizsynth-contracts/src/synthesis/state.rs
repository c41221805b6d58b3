use std::fmt;

use serde::Serialize;

use super::prompts::PromptPair;
use super::types::{GeneratedImages, SearchResult};

/// Identifies one accepted submission. Tokens increase monotonically within a
/// session; results carrying anything but the current token are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RunToken(u64);

impl RunToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisPhase {
    Idle,
    Searching,
    Generating,
    Completed,
    Error,
}

impl SynthesisPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SynthesisPhase::Idle => "idle",
            SynthesisPhase::Searching => "searching",
            SynthesisPhase::Generating => "generating",
            SynthesisPhase::Completed => "completed",
            SynthesisPhase::Error => "error",
        }
    }
}

impl fmt::Display for SynthesisPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session state. Each variant carries exactly the data its phase may hold:
/// a search result only while generating or completed, images only when
/// completed, an error message only in `Error`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SynthesisState {
    #[default]
    Idle,
    Searching {
        topic: String,
    },
    Generating {
        topic: String,
        search: SearchResult,
        prompts: PromptPair,
    },
    Completed {
        topic: String,
        search: SearchResult,
        images: GeneratedImages,
    },
    Error {
        topic: String,
        message: String,
    },
}

impl SynthesisState {
    pub fn phase(&self) -> SynthesisPhase {
        match self {
            SynthesisState::Idle => SynthesisPhase::Idle,
            SynthesisState::Searching { .. } => SynthesisPhase::Searching,
            SynthesisState::Generating { .. } => SynthesisPhase::Generating,
            SynthesisState::Completed { .. } => SynthesisPhase::Completed,
            SynthesisState::Error { .. } => SynthesisPhase::Error,
        }
    }

    pub fn topic(&self) -> Option<&str> {
        match self {
            SynthesisState::Idle => None,
            SynthesisState::Searching { topic }
            | SynthesisState::Generating { topic, .. }
            | SynthesisState::Completed { topic, .. }
            | SynthesisState::Error { topic, .. } => Some(topic),
        }
    }

    pub fn search_result(&self) -> Option<&SearchResult> {
        match self {
            SynthesisState::Generating { search, .. }
            | SynthesisState::Completed { search, .. } => Some(search),
            _ => None,
        }
    }

    pub fn prompts(&self) -> Option<&PromptPair> {
        match self {
            SynthesisState::Generating { prompts, .. } => Some(prompts),
            _ => None,
        }
    }

    pub fn images(&self) -> Option<&GeneratedImages> {
        match self {
            SynthesisState::Completed { images, .. } => Some(images),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            SynthesisState::Error { message, .. } => Some(message),
            _ => None,
        }
    }

    /// True while a run is searching or generating; submissions are disabled.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            SynthesisState::Searching { .. } | SynthesisState::Generating { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisAction {
    Submit {
        topic: String,
    },
    SearchSucceeded {
        run: RunToken,
        result: SearchResult,
    },
    SearchFailed {
        run: RunToken,
        message: String,
    },
    ImagesSucceeded {
        run: RunToken,
        direct_url: String,
        conglomerate_url: String,
    },
    ImagesFailed {
        run: RunToken,
        message: String,
    },
    Reset,
}

impl SynthesisAction {
    fn run(&self) -> Option<RunToken> {
        match self {
            SynthesisAction::SearchSucceeded { run, .. }
            | SynthesisAction::SearchFailed { run, .. }
            | SynthesisAction::ImagesSucceeded { run, .. }
            | SynthesisAction::ImagesFailed { run, .. } => Some(*run),
            SynthesisAction::Submit { .. } | SynthesisAction::Reset => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    BlankTopic,
    RunInFlight,
    StaleRun,
    UnexpectedPhase,
}

impl IgnoreReason {
    pub fn as_str(self) -> &'static str {
        match self {
            IgnoreReason::BlankTopic => "blank_topic",
            IgnoreReason::RunInFlight => "run_in_flight",
            IgnoreReason::StaleRun => "stale_run",
            IgnoreReason::UnexpectedPhase => "unexpected_phase",
        }
    }
}

/// What a dispatch did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Started(RunToken),
    Advanced {
        from: SynthesisPhase,
        to: SynthesisPhase,
    },
    Ignored(IgnoreReason),
}

impl Disposition {
    pub fn is_applied(self) -> bool {
        !matches!(self, Disposition::Ignored(_))
    }
}

pub const DEFAULT_ERROR_MESSAGE: &str = "An error occurred during the synthesis process.";

/// The session's state machine: one state value plus the run-token counter.
///
/// `dispatch` is the only mutator. It performs no I/O, so every transition is
/// testable without a provider or a renderer.
#[derive(Debug, Clone, Default)]
pub struct SynthesisSession {
    state: SynthesisState,
    current_run: Option<RunToken>,
    issued_runs: u64,
}

impl SynthesisSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SynthesisState {
        &self.state
    }

    pub fn phase(&self) -> SynthesisPhase {
        self.state.phase()
    }

    pub fn current_run(&self) -> Option<RunToken> {
        self.current_run
    }

    pub fn is_current(&self, run: RunToken) -> bool {
        self.current_run == Some(run)
    }

    pub fn dispatch(&mut self, action: SynthesisAction) -> Disposition {
        if let Some(run) = action.run() {
            if !self.is_current(run) {
                return Disposition::Ignored(IgnoreReason::StaleRun);
            }
        }

        let from = self.state.phase();
        match action {
            SynthesisAction::Submit { topic } => {
                if topic.trim().is_empty() {
                    return Disposition::Ignored(IgnoreReason::BlankTopic);
                }
                if self.state.is_in_flight() {
                    return Disposition::Ignored(IgnoreReason::RunInFlight);
                }
                self.issued_runs += 1;
                let run = RunToken(self.issued_runs);
                self.current_run = Some(run);
                self.state = SynthesisState::Searching { topic };
                Disposition::Started(run)
            }
            SynthesisAction::SearchSucceeded { result, .. } => {
                let SynthesisState::Searching { topic } = &self.state else {
                    return Disposition::Ignored(IgnoreReason::UnexpectedPhase);
                };
                let topic = topic.clone();
                let prompts = PromptPair::build(&topic, &result);
                self.state = SynthesisState::Generating {
                    topic,
                    search: result,
                    prompts,
                };
                self.advanced(from)
            }
            SynthesisAction::SearchFailed { message, .. } => {
                let SynthesisState::Searching { topic } = &self.state else {
                    return Disposition::Ignored(IgnoreReason::UnexpectedPhase);
                };
                self.state = SynthesisState::Error {
                    topic: topic.clone(),
                    message: non_empty_message(message),
                };
                self.advanced(from)
            }
            SynthesisAction::ImagesSucceeded {
                direct_url,
                conglomerate_url,
                ..
            } => {
                let (topic, search, prompts) = match std::mem::take(&mut self.state) {
                    SynthesisState::Generating {
                        topic,
                        search,
                        prompts,
                    } => (topic, search, prompts),
                    other => {
                        self.state = other;
                        return Disposition::Ignored(IgnoreReason::UnexpectedPhase);
                    }
                };
                self.state = SynthesisState::Completed {
                    topic,
                    search,
                    images: GeneratedImages {
                        direct_url,
                        conglomerate_url,
                        direct_prompt: prompts.direct,
                        conglomerate_prompt: prompts.conglomerate,
                    },
                };
                self.advanced(from)
            }
            SynthesisAction::ImagesFailed { message, .. } => {
                let SynthesisState::Generating { topic, .. } = &self.state else {
                    return Disposition::Ignored(IgnoreReason::UnexpectedPhase);
                };
                self.state = SynthesisState::Error {
                    topic: topic.clone(),
                    message: non_empty_message(message),
                };
                self.advanced(from)
            }
            SynthesisAction::Reset => {
                self.current_run = None;
                self.state = SynthesisState::Idle;
                self.advanced(from)
            }
        }
    }

    fn advanced(&self, from: SynthesisPhase) -> Disposition {
        Disposition::Advanced {
            from,
            to: self.state.phase(),
        }
    }
}

fn non_empty_message(message: String) -> String {
    if message.trim().is_empty() {
        DEFAULT_ERROR_MESSAGE.to_string()
    } else {
        message
    }
}
