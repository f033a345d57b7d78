pub mod action;
pub mod agent;
pub mod client;
pub mod display;
pub mod error;
pub mod executor;
pub mod message;

pub use action::{Action, Coordinate, ScrollDirection};
pub use agent::{Agent, AgentConfig, AgentEvent, Completion, RunReport};
pub use client::{AnthropicClient, ClientConfig, ModelClient, ToolDeclaration};
pub use display::{DisplayConfig, DisplaySession};
pub use error::AgentError;
pub use executor::{ActionExecutor, Computer, Observation};
pub use message::{ContentBlock, Role, Turn};
