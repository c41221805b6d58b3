use std::env;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use anyhow::{anyhow, bail, Result};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use vizsynth_contracts::chat::SaveTarget;
use vizsynth_contracts::events::{EventPayload, EventWriter};
use vizsynth_contracts::synthesis::{
    Disposition, IgnoreReason, PromptPair, RunToken, SearchResult, SynthesisAction,
    SynthesisSession, SynthesisState,
};

pub mod artifacts;
pub mod dryrun;
pub mod error;
pub mod gemini;

pub use artifacts::{ImageSlot, SavedImage};
pub use dryrun::DryrunBackend;
pub use error::ProviderError;
pub use gemini::{GeminiClient, GeminiConfig};

/// Grounded topic search: one request, one structured result.
pub trait TopicSearcher: Send + Sync {
    fn name(&self) -> &str;
    fn search(&self, topic: &str) -> Result<SearchResult, ProviderError>;
}

/// Prompt-to-image: returns a `data:` URI.
pub trait ImageSynthesizer: Send + Sync {
    fn name(&self) -> &str;
    fn synthesize(&self, prompt: &str) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTicket {
    pub run: RunToken,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Started(RunTicket),
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The run reached `Completed` or `Error`; `state` is that final state.
    Settled {
        run: RunToken,
        state: SynthesisState,
    },
    /// The session moved on (reset) before this run's results arrived.
    Superseded { run: RunToken },
    Ignored(IgnoreReason),
}

impl RunOutcome {
    pub fn state(&self) -> Option<&SynthesisState> {
        match self {
            RunOutcome::Settled { state, .. } => Some(state),
            _ => None,
        }
    }
}

/// Drives one session: search, then both image calls concurrently, applying
/// every result through the session reducer.
///
/// Clones share the session, the providers and the event log, so a clone can
/// run `drive` on a worker thread while another thread reads `snapshot` or
/// calls `reset`.
#[derive(Clone)]
pub struct SynthesisEngine {
    session: Arc<Mutex<SynthesisSession>>,
    searcher: Arc<dyn TopicSearcher>,
    images: Arc<dyn ImageSynthesizer>,
    events: EventWriter,
}

impl SynthesisEngine {
    pub fn new(
        searcher: Arc<dyn TopicSearcher>,
        images: Arc<dyn ImageSynthesizer>,
        events: EventWriter,
    ) -> Result<Self> {
        events.emit(
            "session_started",
            map_object(json!({
                "search_backend": searcher.name(),
                "image_backend": images.name(),
            })),
        )?;
        Ok(Self {
            session: Arc::new(Mutex::new(SynthesisSession::new())),
            searcher,
            images,
            events,
        })
    }

    pub fn gemini(config: GeminiConfig, events: EventWriter) -> Result<Self> {
        let client = Arc::new(GeminiClient::new(config)?);
        Self::new(client.clone(), client, events)
    }

    pub fn dryrun(events: EventWriter) -> Result<Self> {
        Self::new(Arc::new(DryrunBackend), Arc::new(DryrunBackend), events)
    }

    pub fn event_writer(&self) -> EventWriter {
        self.events.clone()
    }

    pub fn snapshot(&self) -> Result<SynthesisState> {
        Ok(self.lock_session()?.state().clone())
    }

    pub fn current_run(&self) -> Result<Option<RunToken>> {
        Ok(self.lock_session()?.current_run())
    }

    /// Accept a topic and move to `Searching`. Blank topics and submissions
    /// during an in-flight run are ignored without touching the providers.
    pub fn submit(&self, topic: &str) -> Result<Submission> {
        let (disposition, _) = self.dispatch(SynthesisAction::Submit {
            topic: topic.to_string(),
        })?;
        match disposition {
            Disposition::Started(run) => {
                info!(%run, topic, "synthesis submitted");
                self.record(
                    "synthesis_submitted",
                    map_object(json!({ "run": run.value(), "topic": topic })),
                );
                Ok(Submission::Started(RunTicket {
                    run,
                    topic: topic.to_string(),
                }))
            }
            Disposition::Ignored(reason) => {
                debug!(reason = reason.as_str(), "submission ignored");
                Ok(Submission::Ignored(reason))
            }
            Disposition::Advanced { .. } => Err(anyhow!("submit advanced without starting a run")),
        }
    }

    /// Submit and drive to completion on the calling thread.
    pub fn synthesize(&self, topic: &str) -> Result<RunOutcome> {
        match self.submit(topic)? {
            Submission::Started(ticket) => self.drive(&ticket),
            Submission::Ignored(reason) => Ok(RunOutcome::Ignored(reason)),
        }
    }

    pub fn drive(&self, ticket: &RunTicket) -> Result<RunOutcome> {
        let run = ticket.run;

        let search = match self.searcher.search(&ticket.topic) {
            Ok(search) => search,
            Err(err) => {
                warn!(%run, error = %err, "topic search failed");
                let message = err.to_string();
                let (disposition, state) = self.dispatch(SynthesisAction::SearchFailed {
                    run,
                    message: message.clone(),
                })?;
                if !disposition.is_applied() {
                    return self.discarded(run, "search_failed", disposition);
                }
                self.record(
                    "search_failed",
                    map_object(json!({
                        "run": run.value(),
                        "kind": err.kind(),
                        "error": message,
                    })),
                );
                return self.settle(run, state, "search");
            }
        };

        let viz_count = search.visualizations.len();
        let link_count = search.grounding_links.len();
        let (disposition, state) = self.dispatch(SynthesisAction::SearchSucceeded {
            run,
            result: search,
        })?;
        if !disposition.is_applied() {
            return self.discarded(run, "search_succeeded", disposition);
        }
        self.record(
            "search_completed",
            map_object(json!({
                "run": run.value(),
                "visualizations": viz_count,
                "grounding_links": link_count,
            })),
        );

        let Some(prompts) = state.prompts().cloned() else {
            let (_, state) = self.dispatch(SynthesisAction::ImagesFailed {
                run,
                message: "no image prompts were built from the search result".to_string(),
            })?;
            return self.settle(run, state, "prompts");
        };
        self.record(
            "images_requested",
            map_object(json!({
                "run": run.value(),
                "direct_prompt": prompts.direct,
                "conglomerate_prompt": prompts.conglomerate,
            })),
        );

        let (direct, conglomerate) = self.render_pair(&prompts);
        let results = [
            (ImageSlot::Direct, &direct),
            (ImageSlot::Synthesis, &conglomerate),
        ];
        for (slot, result) in results {
            match result {
                Ok(url) => self.record(
                    "image_completed",
                    map_object(json!({
                        "run": run.value(),
                        "slot": slot,
                        "data_url_len": url.len(),
                    })),
                ),
                Err(failure) => self.record(
                    "image_failed",
                    map_object(json!({
                        "run": run.value(),
                        "slot": slot,
                        "kind": failure.kind,
                        "error": failure.message,
                    })),
                ),
            };
        }

        let action = match (direct, conglomerate) {
            (Ok(direct_url), Ok(conglomerate_url)) => SynthesisAction::ImagesSucceeded {
                run,
                direct_url,
                conglomerate_url,
            },
            (Err(failure), _) | (_, Err(failure)) => SynthesisAction::ImagesFailed {
                run,
                message: failure.message,
            },
        };
        let (disposition, state) = self.dispatch(action)?;
        if !disposition.is_applied() {
            return self.discarded(run, "images_settled", disposition);
        }
        self.settle(run, state, "images")
    }

    /// Abandon whatever is in flight and return to `Idle`.
    pub fn reset(&self) -> Result<()> {
        let previous = self.current_run()?;
        self.dispatch(SynthesisAction::Reset)?;
        self.record(
            "synthesis_reset",
            map_object(json!({ "superseded_run": previous.map(RunToken::value) })),
        );
        Ok(())
    }

    /// Write the completed run's images as `<prefix>-<topic>.png` into `dir`.
    pub fn save_images(&self, dir: &Path, target: SaveTarget) -> Result<Vec<SavedImage>> {
        let state = self.snapshot()?;
        let (Some(topic), Some(images)) = (state.topic(), state.images()) else {
            bail!("no generated images to save (session is {})", state.phase());
        };
        let mut slots = Vec::new();
        if target.includes_direct() {
            slots.push(ImageSlot::Direct);
        }
        if target.includes_synthesis() {
            slots.push(ImageSlot::Synthesis);
        }

        let mut saved = Vec::new();
        for slot in slots {
            let image = artifacts::save_image(dir, slot, topic, images)?;
            self.events.emit(
                "image_saved",
                map_object(json!({
                    "slot": slot,
                    "path": image.path.to_string_lossy(),
                    "bytes": image.bytes,
                })),
            )?;
            saved.push(image);
        }
        Ok(saved)
    }

    fn render_pair(
        &self,
        prompts: &PromptPair,
    ) -> (Result<String, ImageFailure>, Result<String, ImageFailure>) {
        let images = &self.images;
        thread::scope(|scope| {
            let direct = scope.spawn(|| images.synthesize(&prompts.direct));
            let conglomerate = scope.spawn(|| images.synthesize(&prompts.conglomerate));
            (
                ImageFailure::join(direct.join()),
                ImageFailure::join(conglomerate.join()),
            )
        })
    }

    fn settle(&self, run: RunToken, state: SynthesisState, stage: &str) -> Result<RunOutcome> {
        match &state {
            SynthesisState::Completed { images, search, .. } => {
                info!(%run, "synthesis completed");
                self.record(
                    "synthesis_completed",
                    map_object(json!({
                        "run": run.value(),
                        "visualizations": search.visualizations.len(),
                        "direct_prompt": images.direct_prompt,
                        "conglomerate_prompt": images.conglomerate_prompt,
                    })),
                );
            }
            SynthesisState::Error { message, .. } => {
                warn!(%run, stage, error = %message, "synthesis failed");
                self.record(
                    "synthesis_failed",
                    map_object(json!({ "run": run.value(), "stage": stage, "error": message })),
                );
            }
            _ => {}
        }
        Ok(RunOutcome::Settled { run, state })
    }

    fn discarded(
        &self,
        run: RunToken,
        action: &str,
        disposition: Disposition,
    ) -> Result<RunOutcome> {
        let reason = match disposition {
            Disposition::Ignored(reason) => reason.as_str(),
            _ => "applied",
        };
        debug!(%run, action, reason, "discarding result from superseded run");
        self.record(
            "stale_result_discarded",
            map_object(json!({ "run": run.value(), "action": action, "reason": reason })),
        );
        Ok(RunOutcome::Superseded { run })
    }

    /// Event-log writes never abort a run: the session state has already
    /// moved, and returning early would leave it in flight.
    fn record(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.events.emit(event_type, payload) {
            warn!(
                event_type,
                error = %error_chain_text(&err, 200),
                "failed to append event"
            );
        }
    }

    fn dispatch(&self, action: SynthesisAction) -> Result<(Disposition, SynthesisState)> {
        let mut session = self.lock_session()?;
        let disposition = session.dispatch(action);
        Ok((disposition, session.state().clone()))
    }

    fn lock_session(&self) -> Result<MutexGuard<'_, SynthesisSession>> {
        self.session
            .lock()
            .map_err(|_| anyhow!("synthesis session lock poisoned"))
    }
}

#[derive(Debug)]
struct ImageFailure {
    kind: &'static str,
    message: String,
}

impl ImageFailure {
    fn join(joined: thread::Result<Result<String, ProviderError>>) -> Result<String, Self> {
        match joined {
            Ok(Ok(url)) => Ok(url),
            Ok(Err(err)) => Err(Self {
                kind: err.kind(),
                message: err.to_string(),
            }),
            Err(_) => Err(Self {
                kind: "panic",
                message: "image worker panicked".to_string(),
            }),
        }
    }
}

/// One-line rendering of an error and its causes.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn map_object(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_else(Map::new)
}
