//! Cooperative cancellation.
//!
//! Every job owns a token. `Engine::cancel` trips it; the executor and the
//! methods poll it at their check points and unwind with
//! `VfsError::Cancelled`. A transfer hangs one child token per file off the
//! job token: tripping the child skips that file, tripping the job token
//! stops everything.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{VfsError, VfsResult};

struct Node {
    tripped: AtomicBool,
    parent: Option<Arc<Node>>,
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Clone)]
pub struct CancellationToken {
    /// `None` for the inert token handed to inline callers.
    node: Option<Arc<Node>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::linked(None)
    }

    /// Token that never reports cancellation; `cancel()` on it is ignored.
    pub fn dummy() -> Self {
        Self { node: None }
    }

    /// Token that is also cancelled whenever `self` is. Cancelling the
    /// child leaves `self` alone.
    pub fn child(&self) -> Self {
        Self::linked(self.node.clone())
    }

    fn linked(parent: Option<Arc<Node>>) -> Self {
        Self {
            node: Some(Arc::new(Node { tripped: AtomicBool::new(false), parent })),
        }
    }

    /// Whether this token or any ancestor was cancelled.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        let mut cur = self.node.as_deref();
        while let Some(node) = cur {
            if node.tripped.load(Ordering::Acquire) {
                return true;
            }
            cur = node.parent.as_deref();
        }
        false
    }

    /// Trip the token. Returns `true` for the call that tripped it.
    pub fn cancel(&self) -> bool {
        match &self.node {
            Some(node) => !node.tripped.swap(true, Ordering::AcqRel),
            None => false,
        }
    }

    /// `Err(Cancelled)` once cancelled.
    #[inline]
    pub fn check(&self) -> VfsResult<()> {
        if self.is_cancelled() {
            return Err(VfsError::Cancelled);
        }
        Ok(())
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(_) => write!(f, "CancellationToken(cancelled={})", self.is_cancelled()),
            None => f.write_str("CancellationToken(inert)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_cancel_wins() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.clone().check().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_child_follows_ancestors_only() {
        let job = CancellationToken::new();
        let file = job.child();
        let chunk = file.child();

        file.cancel();
        assert!(chunk.is_cancelled());
        assert!(!job.is_cancelled());

        let next = job.child();
        assert!(!next.is_cancelled());
        job.cancel();
        assert!(next.is_cancelled());
    }

    #[test]
    fn test_inert_token() {
        let token = CancellationToken::dummy();
        assert!(!token.cancel());
        assert!(token.check().is_ok());
        // children of an inert token are real tokens
        let child = token.child();
        assert!(child.cancel());
        assert!(!token.is_cancelled());
    }
}
