use std::collections::VecDeque;

/// Commits an operator asked to benchmark, served first-in first-out ahead
/// of discovered and backfill work.
#[derive(Debug, Default, Clone)]
pub struct WorkQueue {
    commits: VecDeque<String>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, commit: impl Into<String>) {
        self.commits.push_back(commit.into());
    }

    pub fn pop(&mut self) -> Option<String> {
        self.commits.pop_front()
    }

    pub fn peek(&self) -> Option<&str> {
        self.commits.front().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

impl<S: Into<String>> Extend<S> for WorkQueue {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.commits.extend(iter.into_iter().map(Into::into));
    }
}

impl<S: Into<String>> FromIterator<S> for WorkQueue {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut queue = Self::new();
        queue.extend(iter);
        queue
    }
}
