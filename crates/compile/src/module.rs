//! Compiled modules and the awaitable handle that delivers them.

use std::sync::mpsc::{self, TryRecvError};
use std::thread;

use crate::error::CompileError;

/// The output of a successful compilation: the lowered symbol of the entry
/// point plus the compiled image bytes (PTX for the NVRTC backend).
#[derive(Debug, Clone)]
pub struct Module {
    pub symbol: String,
    pub image: Vec<u8>,
}

enum FutureState {
    Pending(mpsc::Receiver<Result<Module, CompileError>>),
    Done(Result<Module, CompileError>),
}

/// An awaitable compilation result.
///
/// `ready` polls without blocking; `wait` blocks until the result arrives.
/// Dropping a pending future detaches the worker, whose result is then
/// discarded.
pub struct ModuleFuture {
    state: FutureState,
}

impl ModuleFuture {
    /// A future that is already resolved, for synchronous backends.
    pub fn ready_now(result: Result<Module, CompileError>) -> Self {
        ModuleFuture {
            state: FutureState::Done(result),
        }
    }

    /// Run `work` on a background thread and resolve with its result.
    pub fn spawn<F>(work: F) -> Self
    where
        F: FnOnce() -> Result<Module, CompileError> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            // the receiver may already be gone; that is a detached compile
            let _ = sender.send(work());
        });
        ModuleFuture {
            state: FutureState::Pending(receiver),
        }
    }

    /// Whether the result has arrived (successfully or not).
    pub fn ready(&mut self) -> bool {
        let resolved = match &self.state {
            FutureState::Done(_) => None,
            FutureState::Pending(receiver) => match receiver.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => Some(Err(CompileError::Disconnected)),
            },
        };
        if let Some(result) = resolved {
            self.state = FutureState::Done(result);
        }
        true
    }

    /// Block until the result is available.
    pub fn wait(&mut self) -> Result<&Module, CompileError> {
        self.resolve_blocking();
        match &self.state {
            FutureState::Done(Ok(module)) => Ok(module),
            FutureState::Done(Err(err)) => Err(err.clone()),
            FutureState::Pending(_) => Err(CompileError::Disconnected),
        }
    }

    /// Block and take ownership of the result.
    pub fn wait_owned(mut self) -> Result<Module, CompileError> {
        self.resolve_blocking();
        match self.state {
            FutureState::Done(result) => result,
            FutureState::Pending(_) => Err(CompileError::Disconnected),
        }
    }

    fn resolve_blocking(&mut self) {
        let resolved = match &self.state {
            FutureState::Done(_) => None,
            FutureState::Pending(receiver) => Some(
                receiver
                    .recv()
                    .unwrap_or(Err(CompileError::Disconnected)),
            ),
        };
        if let Some(result) = resolved {
            self.state = FutureState::Done(result);
        }
    }
}

impl std::fmt::Debug for ModuleFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.state {
            FutureState::Pending(_) => f.write_str("ModuleFuture(pending)"),
            FutureState::Done(Ok(module)) => write!(f, "ModuleFuture(ready: {})", module.symbol),
            FutureState::Done(Err(err)) => write!(f, "ModuleFuture(failed: {err})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn module(symbol: &str) -> Module {
        Module {
            symbol: symbol.to_owned(),
            image: b"image".to_vec(),
        }
    }

    #[test]
    fn resolved_futures_are_immediately_ready() {
        let mut future = ModuleFuture::ready_now(Ok(module("k")));
        assert!(future.ready());
        assert_eq!(future.wait().unwrap().symbol, "k");
    }

    #[test]
    fn spawned_futures_resolve_in_the_background() {
        let mut future = ModuleFuture::spawn(|| {
            thread::sleep(Duration::from_millis(20));
            Ok(module("bg"))
        });
        assert_eq!(future.wait().unwrap().symbol, "bg");
        assert!(future.ready());
    }

    #[test]
    fn errors_propagate_through_wait() {
        let mut future = ModuleFuture::spawn(|| {
            Err(CompileError::Failed {
                log: "boom".to_owned(),
            })
        });
        let err = future.wait().unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn dropping_a_pending_future_detaches_the_worker() {
        let future = ModuleFuture::spawn(|| {
            thread::sleep(Duration::from_millis(10));
            Ok(module("detached"))
        });
        drop(future);
        // nothing to assert beyond "no panic"; the worker outlives the handle
        thread::sleep(Duration::from_millis(30));
    }
}
