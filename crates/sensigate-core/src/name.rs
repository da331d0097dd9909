//! Pattern names for dynamically created model elements and agents.
//!
//! A pattern is either a literal (`"sensor"`) or a template (`"$(sensor)"`).
//! Templates render as `sensor_0`, `sensor_1`, ... from a per-instance counter
//! shared by every caller of [`PatternName::build`].

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub struct PatternName {
    fixed: String,
    templated: bool,
    counter: AtomicUsize,
}

impl PatternName {
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        match pattern
            .strip_prefix("$(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Some(fixed) => Self {
                fixed: fixed.to_string(),
                templated: true,
                counter: AtomicUsize::new(0),
            },
            None => Self {
                fixed: pattern,
                templated: false,
                counter: AtomicUsize::new(0),
            },
        }
    }

    pub fn is_templated(&self) -> bool {
        self.templated
    }

    /// Render the next name. Concurrent callers never observe the same suffix.
    pub fn build(&self) -> String {
        if !self.templated {
            return self.fixed.clone();
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.render(n)
    }

    /// Render the most recently built name without advancing the counter.
    /// A template that was never built allocates its first suffix here.
    pub fn last(&self) -> String {
        if !self.templated {
            return self.fixed.clone();
        }
        let n = match self
            .counter
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => 0,
            Err(current) => current - 1,
        };
        self.render(n)
    }

    pub fn reset(&self) {
        self.counter.store(0, Ordering::SeqCst);
    }

    fn render(&self, n: usize) -> String {
        format!("{}_{}", self.fixed, n)
    }
}

impl std::fmt::Display for PatternName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.templated {
            write!(f, "$({})", self.fixed)
        } else {
            f.write_str(&self.fixed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn literal_is_returned_as_is() {
        let name = PatternName::new("sensor");
        assert!(!name.is_templated());
        assert_eq!(name.build(), "sensor");
        assert_eq!(name.build(), "sensor");
        assert_eq!(name.last(), "sensor");
    }

    #[test]
    fn template_counts_from_zero() {
        let name = PatternName::new("$(x)");
        let built: Vec<String> = (0..4).map(|_| name.build()).collect();
        assert_eq!(built, vec!["x_0", "x_1", "x_2", "x_3"]);
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let name = PatternName::new("$(x)");
        name.build();
        name.build();
        name.reset();
        assert_eq!(name.build(), "x_0");
    }

    #[test]
    fn last_never_advances() {
        let name = PatternName::new("$(x)");
        name.build();
        name.build();
        assert_eq!(name.last(), "x_1");
        assert_eq!(name.last(), "x_1");
        assert_eq!(name.build(), "x_2");
    }

    #[test]
    fn last_allocates_when_never_built() {
        let name = PatternName::new("$(x)");
        assert_eq!(name.last(), "x_0");
        assert_eq!(name.last(), "x_0");
        assert_eq!(name.build(), "x_1");
    }

    #[test]
    fn concurrent_builds_are_unique() {
        let name = Arc::new(PatternName::new("$(agent)"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let name = name.clone();
                std::thread::spawn(move || (0..100).map(|_| name.build()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for h in handles {
            for n in h.join().unwrap() {
                assert!(seen.insert(n), "duplicate name");
            }
        }
        assert_eq!(seen.len(), 800);
    }
}
