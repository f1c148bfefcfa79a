//! Query-time context assembly
//!
//! - [`ContextRetriever`]: embeds a query and joins its nearest passages
//! - [`PromptBuilder`]: wraps context and query in the answering template

mod prompt;
mod retriever;

pub use prompt::{enrich_first_turn, PromptBuilder};
pub use retriever::{ContextRetriever, CONTEXT_SEPARATOR};
