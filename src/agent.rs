use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::action::Action;
use crate::client::{MessageRequest, ModelClient, ToolDeclaration, COMPUTER_TOOL_TYPE};
use crate::error::AgentError;
use crate::executor::{Computer, Observation};
use crate::message::{ContentBlock, Role, Turn};

pub const MAX_ITERATIONS: usize = 50;
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const COMPUTER_USE_BETA: &str = "computer-use-2025-01-24";
pub const FALLBACK_SUMMARY: &str = "Computer use task completed.";

pub const SYSTEM_PROMPT: &str = "\
You are a computer use agent. You control a desktop with a browser to complete tasks.
You can see the screen via screenshots and interact using mouse clicks, keyboard input, and scrolling.
Be methodical: look at the screen, plan your action, execute it, then verify the result.
When the task is complete, respond with a text summary of what you accomplished.
";

// ========================= Core Types =========================

/// Emitted synchronously while a run progresses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Screenshot { base64: String },
    Text { content: String },
    Action { action: Action },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Completion {
    /// The model answered without requesting another action.
    Answered { text: String },
    /// The iteration budget ran out before a final answer.
    BudgetExhausted,
    /// The cancel flag was set between iterations.
    Cancelled,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub completion: Completion,
    /// Model round trips performed.
    pub iterations: usize,
    pub history: Vec<Turn>,
}

impl RunReport {
    pub fn answer(&self) -> Option<&str> {
        match &self.completion {
            Completion::Answered { text } => Some(text),
            _ => None,
        }
    }

    /// Final answer, or a generic completion note when the model gave none.
    pub fn summary(&self) -> String {
        match self.answer().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => FALLBACK_SUMMARY.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub model: String,
    pub max_tokens: u32,
    pub max_iterations: usize,
    pub system_prompt: String,
    pub betas: Vec<String>,
    pub tool_type: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: env::var("CUA_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into()),
            max_tokens: 4096,
            max_iterations: MAX_ITERATIONS,
            system_prompt: SYSTEM_PROMPT.into(),
            betas: vec![COMPUTER_USE_BETA.into()],
            tool_type: COMPUTER_TOOL_TYPE.into(),
        }
    }
}

// ========================= Agent Loop =========================

pub struct Agent<C, M>
where
    C: Computer,
    M: ModelClient,
{
    computer: C,
    client: M,
    cfg: AgentConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl<C, M> Agent<C, M>
where
    C: Computer,
    M: ModelClient,
{
    pub fn new(computer: C, client: M, cfg: AgentConfig) -> Self {
        Self {
            computer,
            client,
            cfg,
            cancel: None,
        }
    }

    /// Checked before each model request; an in-flight request or action
    /// always runs to completion.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn computer(&self) -> &C {
        &self.computer
    }

    pub fn into_computer(self) -> C {
        self.computer
    }

    /// Runs the screenshot → model → action cycle until the model stops
    /// asking for actions or the iteration budget runs out.
    ///
    /// Model failures and executor failures abort the run. Display teardown
    /// is left to the caller.
    pub async fn execute<F>(&self, task: &str, mut on_event: F) -> Result<RunReport, AgentError>
    where
        F: FnMut(AgentEvent) + Send,
    {
        let run_id = nanoid!();
        let tools = [ToolDeclaration::computer(
            self.cfg.tool_type.clone(),
            self.computer.dimensions(),
        )];

        let initial = self.computer.screenshot().await?;
        on_event(AgentEvent::Screenshot { base64: initial.clone() });
        let mut history = vec![Turn::user(vec![
            ContentBlock::text(task),
            ContentBlock::png(initial),
        ])];

        for i in 0..self.cfg.max_iterations {
            if self.cancelled() {
                info!(run = %run_id, iteration = i, "run cancelled");
                return Ok(RunReport {
                    run_id,
                    completion: Completion::Cancelled,
                    iterations: i,
                    history,
                });
            }
            info!(run = %run_id, iteration = i + 1, "requesting model turn");

            let request = MessageRequest {
                model: &self.cfg.model,
                messages: &history,
                tools: &tools,
                system: &self.cfg.system_prompt,
                max_tokens: self.cfg.max_tokens,
                betas: &self.cfg.betas,
            };
            let mut reply = self.client.create_message(&request).await?;
            reply.role = Role::Assistant;

            // A final turn goes out as one text event equal to the answer.
            let answer = (!reply.has_tool_use()).then(|| reply.text());
            if let Some(text) = &answer {
                if reply.content.iter().any(|b| matches!(b, ContentBlock::Text { .. })) {
                    on_event(AgentEvent::Text { content: text.clone() });
                }
            }

            let mut results = Vec::new();
            for block in &reply.content {
                match block {
                    ContentBlock::Text { text } if answer.is_none() => {
                        on_event(AgentEvent::Text { content: text.clone() })
                    }
                    ContentBlock::ToolUse { id, input, .. } => {
                        results.push(self.run_tool(id, input, &mut on_event).await?);
                    }
                    _ => {}
                }
            }

            history.push(reply);

            if let Some(text) = answer {
                info!(run = %run_id, iterations = i + 1, "run answered");
                return Ok(RunReport {
                    run_id,
                    completion: Completion::Answered { text },
                    iterations: i + 1,
                    history,
                });
            }
            history.push(Turn::user(results));
        }

        warn!(run = %run_id, max = self.cfg.max_iterations, "iteration budget exhausted");
        Ok(RunReport {
            run_id,
            completion: Completion::BudgetExhausted,
            iterations: self.cfg.max_iterations,
            history,
        })
    }

    async fn run_tool<F>(
        &self,
        id: &str,
        input: &Value,
        on_event: &mut F,
    ) -> Result<ContentBlock, AgentError>
    where
        F: FnMut(AgentEvent) + Send,
    {
        let action = match Action::from_input(input) {
            Ok(action) => action,
            Err(err) => {
                warn!(tool_use = %id, error = %err, "malformed tool input");
                let shot = self.computer.screenshot().await?;
                on_event(AgentEvent::Screenshot { base64: shot.clone() });
                return Ok(ContentBlock::ToolResult {
                    tool_use_id: id.to_string(),
                    content: vec![
                        ContentBlock::text(format!("Error: {err}")),
                        ContentBlock::png(shot),
                    ],
                    is_error: true,
                });
            }
        };

        info!(tool_use = %id, action = %action.name(), "executing action");
        on_event(AgentEvent::Action { action: action.clone() });

        let content = match self.computer.execute(&action).await? {
            Observation::Screenshot(shot) => {
                on_event(AgentEvent::Screenshot { base64: shot.clone() });
                vec![ContentBlock::png(shot)]
            }
            Observation::CursorPosition(raw) => vec![ContentBlock::text(raw)],
        };
        Ok(ContentBlock::ToolResult {
            tool_use_id: id.to_string(),
            content,
            is_error: false,
        })
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}
