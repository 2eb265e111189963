use crate::fs_access::DirectoryPicker;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Picker that replays queued answers; an exhausted queue behaves like a cancel.
pub struct ScriptedPicker {
    answers: Mutex<VecDeque<Option<PathBuf>>>,
    prompts: AtomicUsize,
}

impl ScriptedPicker {
    pub fn new(answers: Vec<Option<PathBuf>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, answer: Option<PathBuf>) {
        self.answers.lock().expect("picker answers").push_back(answer);
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryPicker for ScriptedPicker {
    async fn pick_directory(&self, _hint: Option<&Path>) -> Option<PathBuf> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.answers.lock().expect("picker answers").pop_front().flatten()
    }
}
