//! Tool command layer: explicit slash-commands and LLM-chosen tools,
//! both funneled through one executor.

pub mod command;
pub mod executor;
