//! Batch results, progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Diagnostic, ErrorKind};

/// Overall outcome of an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Success,
    PartialSuccess,
    Failure,
}

/// Shared cancellation flag checked between work items.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Progress snapshot passed to callbacks after each item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    /// Item that just finished
    pub item: String,
}

/// Progress callback. Invoked from worker threads.
pub type ProgressFn<'a> = &'a (dyn Fn(Progress) + Send + Sync);

/// A per-item failure inside a batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl ItemFailure {
    pub fn new(item: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Collected results of a batch operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchOutcome<T> {
    pub successes: Vec<(String, T)>,
    pub failures: Vec<ItemFailure>,
    /// Non-fatal findings from otherwise successful items
    pub diagnostics: Vec<Diagnostic>,
    pub cancelled: bool,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
            diagnostics: Vec::new(),
            cancelled: false,
        }
    }
}

impl<T> BatchOutcome<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Failure` when nothing succeeded, `PartialSuccess` when anything
    /// failed, was skipped by cancellation, or left a warning.
    pub fn status(&self) -> OperationStatus {
        if self.successes.is_empty() && (!self.failures.is_empty() || self.cancelled) {
            OperationStatus::Failure
        } else if !self.failures.is_empty() || self.cancelled || !self.diagnostics.is_empty() {
            OperationStatus::PartialSuccess
        } else {
            OperationStatus::Success
        }
    }

    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn get(&self, item: &str) -> Option<&T> {
        self.successes
            .iter()
            .find(|(name, _)| name == item)
            .map(|(_, value)| value)
    }

    pub fn failure(&self, item: &str) -> Option<&ItemFailure> {
        self.failures.iter().find(|f| f.item == item)
    }
}

/// Run `work` over `items` in parallel on the current rayon pool.
///
/// Cancellation is checked before each item starts; items skipped that way
/// are left out of the outcome and mark it cancelled. Progress is reported
/// after every finished item, in completion order.
pub fn run_batch<I, T, L, F>(
    items: &[I],
    cancel: &CancellationToken,
    progress: Option<ProgressFn<'_>>,
    label: L,
    work: F,
) -> BatchOutcome<T>
where
    I: Sync,
    T: Send,
    L: Fn(&I) -> String + Sync,
    F: Fn(&I) -> Result<T, ItemFailure> + Sync,
{
    let total = items.len();
    let completed = AtomicUsize::new(0);
    let results: Vec<Option<(String, Result<T, ItemFailure>)>> = items
        .par_iter()
        .map(|item| {
            if cancel.is_cancelled() {
                return None;
            }
            let name = label(item);
            let result = work(item);
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(report) = progress {
                report(Progress {
                    completed: done,
                    total,
                    item: name.clone(),
                });
            }
            Some((name, result))
        })
        .collect();

    let mut outcome = BatchOutcome::new();
    for result in results {
        match result {
            Some((name, Ok(value))) => outcome.successes.push((name, value)),
            Some((_, Err(failure))) => {
                log::warn!("{} failed: {}", failure.item, failure.message);
                outcome.failures.push(failure);
            }
            None => outcome.cancelled = true,
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status() {
        let mut outcome: BatchOutcome<u32> = BatchOutcome::new();
        assert_eq!(outcome.status(), OperationStatus::Success);

        outcome.successes.push(("a".into(), 1));
        assert_eq!(outcome.status(), OperationStatus::Success);

        outcome
            .failures
            .push(ItemFailure::new("b", ErrorKind::ConversionFailure, "exit 1"));
        assert_eq!(outcome.status(), OperationStatus::PartialSuccess);

        outcome.successes.clear();
        assert_eq!(outcome.status(), OperationStatus::Failure);
        assert_eq!(outcome.failure("b").unwrap().kind, ErrorKind::ConversionFailure);
    }

    #[test]
    fn test_warnings_make_partial() {
        let mut outcome: BatchOutcome<()> = BatchOutcome::new();
        outcome.successes.push(("capture.usda".into(), ()));
        outcome.diagnostics.push(Diagnostic::warning(
            ErrorKind::BrokenReference,
            "/RootNode/meshes/b",
            "missing material",
        ));
        assert_eq!(outcome.status(), OperationStatus::PartialSuccess);
    }

    #[test]
    fn test_run_batch_collects_failures() {
        let items = vec![1, 2, 3, 4];
        let seen = std::sync::Mutex::new(Vec::new());
        let report = |p: Progress| seen.lock().unwrap().push(p.completed);
        let outcome = run_batch(
            &items,
            &CancellationToken::new(),
            Some(&report),
            |i| format!("item{}", i),
            |i| {
                if i % 2 == 0 {
                    Err(ItemFailure::new(format!("item{}", i), ErrorKind::ConversionFailure, "even"))
                } else {
                    Ok(i * 10)
                }
            },
        );
        assert_eq!(outcome.status(), OperationStatus::PartialSuccess);
        assert_eq!(outcome.get("item3"), Some(&30));
        assert_eq!(outcome.failures.len(), 2);
        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_run_batch_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let outcome = run_batch(&[1, 2], &token, None, |i| i.to_string(), |i| Ok(*i));
        assert!(outcome.cancelled);
        assert!(outcome.successes.is_empty());
        assert_eq!(outcome.status(), OperationStatus::Failure);
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
