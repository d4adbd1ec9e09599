//! Scripted collaborators for unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{collections::VecDeque, sync::Mutex};

use futures::stream;

use crate::model::{ChunkStream, GenerateRequest, ModelTransport, StreamChunk};

enum Turn {
    Chunks(Vec<StreamChunk>),
    Fail(String),
}

/// Replays one pre-baked chunk list per streaming turn and records every
/// request it receives. Turns beyond the script yield an empty stream.
pub(crate) struct ScriptedTransport {
    turns: Mutex<VecDeque<Turn>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(turns: Vec<Vec<StreamChunk>>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter().map(Turn::Chunks).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// The first turn fails with `message`.
    pub(crate) fn failing(message: &str) -> Self {
        Self {
            turns: Mutex::new(VecDeque::from([Turn::Fail(message.to_string())])),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ModelTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    fn stream_generate(&self, request: GenerateRequest) -> ChunkStream<'_> {
        self.requests.lock().unwrap().push(request);
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Turn::Chunks(Vec::new()));
        match turn {
            Turn::Chunks(chunks) => Box::pin(stream::iter(chunks.into_iter().map(Ok))),
            Turn::Fail(message) => {
                Box::pin(stream::once(async move { Err(anyhow::anyhow!(message)) }))
            },
        }
    }
}
