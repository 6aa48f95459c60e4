//! The Prompt: the complete, budget-bounded request sent to the model.

use serde::{Deserialize, Serialize};

use crate::context::ContextBlock;
use crate::message::Message;
use crate::token::estimate_messages_tokens;

/// Separator placed between the task section and each context block.
pub const BLOCK_SEPARATOR: &str = "\n\n";

/// A fully-formed model request.
///
/// Built once by the prompt optimizer and never mutated. Message order is
/// system, task + context, then prior turns as assistant/user pairs, so the
/// conversation always alternates and ends on a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    system: String,
    task: String,
    blocks: Vec<ContextBlock>,
    history: Vec<Message>,
    budget: usize,
    dropped_blocks: usize,
}

impl Prompt {
    pub fn new(
        system: String,
        task: String,
        blocks: Vec<ContextBlock>,
        history: Vec<Message>,
        budget: usize,
        dropped_blocks: usize,
    ) -> Self {
        Self {
            system,
            task,
            blocks,
            history,
            budget,
            dropped_blocks,
        }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    /// The rendered task section (normalized task plus guidelines).
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Context blocks kept, in rank order.
    pub fn blocks(&self) -> &[ContextBlock] {
        &self.blocks
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// How many offered blocks did not fit.
    pub fn dropped_blocks(&self) -> usize {
        self.dropped_blocks
    }

    /// Task section followed by every kept block.
    pub fn user_content(&self) -> String {
        let mut content = self.task.clone();
        for block in &self.blocks {
            content.push_str(BLOCK_SEPARATOR);
            content.push_str(&block.render());
        }
        content
    }

    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2 + self.history.len());
        messages.push(Message::system(self.system.clone()));
        messages.push(Message::user(self.user_content()));
        messages.extend(self.history.iter().cloned());
        messages
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_messages_tokens(&self.to_messages())
    }
}
