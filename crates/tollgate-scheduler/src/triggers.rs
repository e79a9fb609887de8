//! Trigger matching and run admission.

use tollgate_core::event::Event;
use tollgate_core::pipeline::TriggerRule;

/// Decide whether any rule admits the event.
pub fn admit(event: &Event, rules: &[TriggerRule]) -> bool {
    TriggerMatcher::new().admits(event, rules)
}

/// Matcher for determining if a run should start for an event.
pub struct TriggerMatcher;

impl TriggerMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Admission is an OR across rules. No rules admit nothing.
    pub fn admits(&self, event: &Event, rules: &[TriggerRule]) -> bool {
        rules.iter().any(|rule| self.rule_matches(rule, event))
    }

    pub fn rule_matches(&self, rule: &TriggerRule, event: &Event) -> bool {
        rule.kinds.contains(&event.kind()) && self.branch_matches(&rule.branches, event.branch())
    }

    fn branch_matches(&self, patterns: &[String], branch: &str) -> bool {
        if patterns.is_empty() {
            return true;
        }
        patterns.iter().any(|p| self.glob_match(p, branch))
    }

    fn glob_match(&self, pattern: &str, text: &str) -> bool {
        if pattern == "*" || pattern == "**" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix("/**") {
            return text
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'));
        }
        if let Some(prefix) = pattern.strip_suffix("/*") {
            return text
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('/'))
                .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'));
        }
        if let Some((head, tail)) = pattern.split_once('*') {
            if !tail.contains('*') {
                return text.len() >= head.len() + tail.len()
                    && text.starts_with(head)
                    && text.ends_with(tail);
            }
        }
        pattern == text
    }
}

impl Default for TriggerMatcher {
    fn default() -> Self {
        Self::new()
    }
}
