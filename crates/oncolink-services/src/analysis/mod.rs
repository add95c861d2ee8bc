//! Bindings of the analysis and text-extraction ports to hosted models.

#[cfg(feature = "anthropic")]
mod anthropic;
mod templates;

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use templates::PromptTemplates;
