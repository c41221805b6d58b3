use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{CommandSpec, NO_ARG_COMMANDS, SAVE_COMMAND, SUGGEST_COMMAND};
use crate::synthesis::TOPIC_SUGGESTIONS;

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub topic: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            topic: None,
            command_args: BTreeMap::new(),
        }
    }

    pub fn save_target(&self) -> Option<SaveTarget> {
        self.command_args
            .get("target")
            .and_then(Value::as_str)
            .and_then(SaveTarget::parse)
    }
}

/// Which generated image(s) a save action writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTarget {
    Direct,
    Synthesis,
    Both,
}

impl SaveTarget {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "direct" => Some(SaveTarget::Direct),
            "synthesis" | "conglomerate" => Some(SaveTarget::Synthesis),
            "both" | "all" => Some(SaveTarget::Both),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SaveTarget::Direct => "direct",
            SaveTarget::Synthesis => "synthesis",
            SaveTarget::Both => "both",
        }
    }

    pub fn includes_direct(self) -> bool {
        matches!(self, SaveTarget::Direct | SaveTarget::Both)
    }

    pub fn includes_synthesis(self) -> bool {
        matches!(self, SaveTarget::Synthesis | SaveTarget::Both)
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_save_args(arg: &str) -> (SaveTarget, Option<String>) {
    let mut parts = split_args(arg);
    let target = parts.first().and_then(|head| SaveTarget::parse(head));
    if target.is_some() {
        parts.remove(0);
    }
    let dir = if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    };
    (target.unwrap_or(SaveTarget::Both), dir)
}

fn parse_suggestion_index(arg: &str) -> Option<usize> {
    arg.trim()
        .parse::<usize>()
        .ok()
        .filter(|idx| (1..=TOPIC_SUGGESTIONS.len()).contains(idx))
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            if command == SUGGEST_COMMAND.command {
                let mut intent = Intent::new(SUGGEST_COMMAND.action, text);
                intent.command_args.insert(
                    "index".to_string(),
                    parse_suggestion_index(arg)
                        .map(|idx| Value::Number(idx.into()))
                        .unwrap_or(Value::Null),
                );
                intent
                    .command_args
                    .insert("arg".to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if command == SAVE_COMMAND.command {
                let (target, dir) = parse_save_args(arg);
                let mut intent = Intent::new(SAVE_COMMAND.action, text);
                intent.command_args.insert(
                    "target".to_string(),
                    Value::String(target.as_str().to_string()),
                );
                intent
                    .command_args
                    .insert("dir".to_string(), dir.map(Value::String).unwrap_or(Value::Null));
                return intent;
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("submit", text);
    intent.topic = Some(raw_trimmed.to_string());
    intent
}
