// src/lifecycle.rs

//! Hooks around forking worker processes.
//!
//! A [`Lifecycle`] is owned by whoever forks workers (normally the
//! [`crate::worker::WorkerPool`]) and passed explicitly; there is no
//! process-wide registry. Three hook lists exist:
//!
//! - before fork: runs in the parent right before `fork(2)`,
//! - after fork in parent: runs in the parent right after `fork(2)`,
//! - after fork in child: runs in the new child before its work starts.
//!
//! Child hooks are single-use: the parent clears the list after every fork,
//! so a hook registered for one worker never leaks into the next one.
//! [`Lifecycle::batch_forks`] runs the parent-side hooks once around a group
//! of forks instead of once per fork.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use tracing::{debug, error};

use crate::errors::{ConvoyError, Result};

/// A lifecycle hook. Errors are reported to the caller of the fork.
pub type Hook = Box<dyn FnMut() -> anyhow::Result<()> + Send>;

/// Handle returned on registration, used to remove a hook again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Exit status used by a child whose work panicked.
pub const CHILD_PANIC_EXIT_CODE: i32 = 101;

struct RegisteredHook {
    id: HookId,
    run_once: bool,
    hook: Hook,
}

#[derive(Default)]
pub struct Lifecycle {
    before_fork: Vec<RegisteredHook>,
    after_fork_parent: Vec<RegisteredHook>,
    after_fork_child: Vec<RegisteredHook>,
    batching: bool,
    next_id: u64,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("before_fork", &self.before_fork.len())
            .field("after_fork_parent", &self.after_fork_parent.len())
            .field("after_fork_child", &self.after_fork_child.len())
            .field("batching", &self.batching)
            .finish()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_fork<F>(&mut self, run_once: bool, hook: F) -> HookId
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        let entry = self.entry(run_once, Box::new(hook));
        let id = entry.id;
        self.before_fork.push(entry);
        id
    }

    pub fn after_fork_in_parent<F>(&mut self, run_once: bool, hook: F) -> HookId
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        let entry = self.entry(run_once, Box::new(hook));
        let id = entry.id;
        self.after_fork_parent.push(entry);
        id
    }

    pub fn after_fork_in_child<F>(&mut self, run_once: bool, hook: F) -> HookId
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        let entry = self.entry(run_once, Box::new(hook));
        let id = entry.id;
        self.after_fork_child.push(entry);
        id
    }

    /// Remove a previously registered hook. Returns `false` if it was not
    /// registered (or already fired as a `run_once` hook).
    pub fn remove(&mut self, id: HookId) -> bool {
        let mut removed = false;
        for list in [
            &mut self.before_fork,
            &mut self.after_fork_parent,
            &mut self.after_fork_child,
        ] {
            let before = list.len();
            list.retain(|h| h.id != id);
            removed |= list.len() != before;
        }
        removed
    }

    /// Whether forks are currently batched.
    pub fn is_batching(&self) -> bool {
        self.batching
    }

    /// Number of pending after-fork-in-child hooks.
    pub fn pending_child_hooks(&self) -> usize {
        self.after_fork_child.len()
    }

    /// Fork the current process.
    ///
    /// The child runs the after-fork-in-child hooks and then `block`, and
    /// exits with the code `block` returns; it never returns from this call.
    /// A failing child hook or a panic inside `block` makes the child exit
    /// with a non-zero status. The parent gets the child's pid back.
    pub fn fork<F>(&mut self, block: F) -> Result<Pid>
    where
        F: FnOnce() -> i32,
    {
        if !self.batching {
            run_hooks(&mut self.before_fork).map_err(ConvoyError::Lifecycle)?;
        }

        // SAFETY: the child only runs its hooks and `block`, then exits
        // without returning into the caller's stack frames.
        match unsafe { fork() }? {
            ForkResult::Child => {
                let child_hooks = &mut self.after_fork_child;
                let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
                    if let Err(err) = run_hooks(child_hooks) {
                        error!(error = %err, "after-fork child hook failed");
                        return 1;
                    }
                    block()
                }));
                let code = outcome.unwrap_or(CHILD_PANIC_EXIT_CODE);
                std::process::exit(code);
            }
            ForkResult::Parent { child } => {
                debug!(pid = %child, batched = self.batching, "forked child process");
                self.after_fork_child.clear();
                if !self.batching {
                    run_hooks(&mut self.after_fork_parent).map_err(ConvoyError::Lifecycle)?;
                }
                Ok(child)
            }
        }
    }

    /// Run `block` with batched forks.
    ///
    /// Before-fork hooks run once before `block` and after-fork-in-parent
    /// hooks once after it, whether or not it succeeded; forks inside `block`
    /// skip both. An error from `block` takes precedence over a hook error.
    pub fn batch_forks<T, F>(&mut self, block: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        if self.batching {
            return block(self);
        }

        run_hooks(&mut self.before_fork).map_err(ConvoyError::Lifecycle)?;
        self.batching = true;
        let result = block(self);
        self.batching = false;
        let hooks = run_hooks(&mut self.after_fork_parent);
        match (result, hooks) {
            (Err(err), Err(hook_err)) => {
                error!(error = %hook_err, "after-fork parent hook failed");
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(_), Err(hook_err)) => Err(ConvoyError::Lifecycle(hook_err)),
            (Ok(value), Ok(())) => Ok(value),
        }
    }

    fn entry(&mut self, run_once: bool, hook: Hook) -> RegisteredHook {
        self.next_id += 1;
        RegisteredHook {
            id: HookId(self.next_id),
            run_once,
            hook,
        }
    }
}

fn run_hooks(hooks: &mut Vec<RegisteredHook>) -> anyhow::Result<()> {
    let mut i = 0;
    while i < hooks.len() {
        (hooks[i].hook)()?;
        if hooks[i].run_once {
            hooks.remove(i);
        } else {
            i += 1;
        }
    }
    Ok(())
}

/// Block until the child `pid` exits, retrying on `EINTR`.
pub fn wait_for(pid: Pid) -> Result<WaitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => return Ok(status),
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(err.into()),
        }
    }
}

/// Whether a wait status describes a clean (`0`) exit.
pub fn exited_cleanly(status: &WaitStatus) -> bool {
    matches!(status, WaitStatus::Exited(_, 0))
}
