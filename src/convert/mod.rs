// src/convert/mod.rs

//! Orchestration of a whole conversion run.
//!
//! A [`Converter`] holds [`StepDefinition`]s, narrows them with the
//! configured `skip` / `only` lists, orders them by dependency and executes
//! each one, serially or across a [`crate::worker::WorkerPool`] with one
//! intermediate store file per worker that is merged afterwards.

pub mod definition;
pub mod runner;

pub use definition::{
    ExecutionContext, RunnableStep, StepDefinition, StepReport, StepSettings, worker_store_path,
};
pub use runner::{ConvertOptions, Converter, DEFAULT_DATABASE};
