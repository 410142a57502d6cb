//! Answer generation for retrieval-augmented chat.
//!
//! A [`llm::GeneratorCapability`] turns queries, retrieved passages and prior
//! conversation into a stream of [`llm::GenerationEvent`]s.  Concrete model
//! backends implement [`llm::Backend`] and are wrapped by
//! [`llm::Capability`], which shares settings validation, prompt assembly
//! and event shaping across all of them.

pub mod config;
pub mod error;
pub mod llm;

pub use config::Config;
pub use error::{GeneratorError, Result};
