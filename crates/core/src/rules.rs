//! Ordered rule tables with a catch-all.
//!
//! Both the fallback-offset policy and the tool compatibility floors are
//! expressed as a [`RuleTable`]: rules are evaluated top-down, the first whose
//! predicate holds wins, and the catch-all answers when none do.

use std::fmt;

type Predicate<K> = Box<dyn Fn(&K) -> bool + Send + Sync>;

pub struct Rule<K, R> {
    pub label: String,
    predicate: Predicate<K>,
    pub result: R,
}

impl<K, R> Rule<K, R> {
    pub fn new(
        label: impl Into<String>,
        predicate: impl Fn(&K) -> bool + Send + Sync + 'static,
        result: R,
    ) -> Self {
        Self { label: label.into(), predicate: Box::new(predicate), result }
    }

    pub fn matches(&self, key: &K) -> bool {
        (self.predicate)(key)
    }
}

impl<K, R: fmt::Debug> fmt::Debug for Rule<K, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule").field("label", &self.label).field("result", &self.result).finish()
    }
}

/// Result of evaluating a table: which rule answered and with what.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict<'a, R> {
    /// Label of the matching rule, or `None` for the catch-all.
    pub label: Option<&'a str>,
    pub result: &'a R,
}

impl<'a, R> Verdict<'a, R> {
    pub fn is_catch_all(&self) -> bool {
        self.label.is_none()
    }
}

#[derive(Debug)]
pub struct RuleTable<K, R> {
    rules: Vec<Rule<K, R>>,
    catch_all: R,
}

impl<K, R> RuleTable<K, R> {
    pub fn new(catch_all: R) -> Self {
        Self { rules: Vec::new(), catch_all }
    }

    /// Append a rule; it is consulted after every rule already in the table.
    pub fn push(&mut self, rule: Rule<K, R>) -> &mut Self {
        self.rules.push(rule);
        self
    }

    pub fn with(mut self, rule: Rule<K, R>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn evaluate(&self, key: &K) -> Verdict<'_, R> {
        self.rules
            .iter()
            .find(|rule| rule.matches(key))
            .map(|rule| Verdict { label: Some(rule.label.as_str()), result: &rule.result })
            .unwrap_or(Verdict { label: None, result: &self.catch_all })
    }
}
