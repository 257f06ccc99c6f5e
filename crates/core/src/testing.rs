use crate::completion::{CompletionClient, CompletionRequest};
use crate::error::CompletionError;
use crate::models::TrialRecord;
use std::collections::VecDeque;
use std::sync::Mutex;

pub(crate) const EMPTY_ARRAY_REPLY: &str = "```json\n[]\n```";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedCall {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub seed: u64,
}

/// Replays scripted replies in order, then answers with an empty JSON array.
pub(crate) struct ScriptedClient {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedClient {
    pub fn new(replies: Vec<Result<String, CompletionError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|text| Ok(text.to_string())).collect())
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl CompletionClient for ScriptedClient {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, CompletionError> {
        self.calls.lock().unwrap().push(RecordedCall {
            model: request.model.to_string(),
            system: request.system.to_string(),
            user: request.user.to_string(),
            temperature: request.temperature,
            seed: request.seed,
        });

        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(EMPTY_ARRAY_REPLY.to_string()))
    }
}

pub(crate) fn transport_failure() -> CompletionError {
    CompletionError::Transport {
        endpoint: "http://llm.test/chat/completions".to_string(),
        details: "connection reset".to_string(),
    }
}

pub(crate) fn titled(titles: &[&str]) -> Vec<TrialRecord> {
    titles
        .iter()
        .enumerate()
        .map(|(index, title)| TrialRecord::new(index as u64, *title))
        .collect()
}
