// src/dag/mod.rs

//! Step dependency handling.
//!
//! - [`naming`] derives canonical snake_case step names from type names.
//! - [`graph`] builds the dependency graph shared by sorting and validation.
//! - [`sorter`] orders steps so dependencies always run first.
//! - [`filter`] narrows the step set from `skip` / `only` lists while keeping
//!   the dependency closure intact.

pub mod filter;
pub mod graph;
pub mod naming;
pub mod sorter;

pub use filter::filter;
pub use graph::DependencyGraph;
pub use naming::{canonical_name, default_title, short_name};
pub use sorter::{sort, sort_with_satisfied};

/// Anything that can be placed into a dependency-ordered schedule.
///
/// Types without dependencies or a priority only need to provide a name.
pub trait Scheduled {
    fn name(&self) -> &str;

    /// Names of the steps that must run before this one.
    fn dependencies(&self) -> &[String] {
        &[]
    }

    /// Lower values run earlier among ready steps; `None` sorts last.
    fn priority(&self) -> Option<u32> {
        None
    }
}

impl<T: Scheduled + ?Sized> Scheduled for &T {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn dependencies(&self) -> &[String] {
        (**self).dependencies()
    }

    fn priority(&self) -> Option<u32> {
        (**self).priority()
    }
}

impl<T: Scheduled + ?Sized> Scheduled for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn dependencies(&self) -> &[String] {
        (**self).dependencies()
    }

    fn priority(&self) -> Option<u32> {
        (**self).priority()
    }
}

/// Plain data implementation of [`Scheduled`], used for config-declared
/// steps and in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDescriptor {
    pub name: String,
    pub dependencies: Vec<String>,
    pub priority: Option<u32>,
}

impl StepDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            priority: None,
        }
    }

    pub fn after(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }
}

impl Scheduled for StepDescriptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn priority(&self) -> Option<u32> {
        self.priority
    }
}
