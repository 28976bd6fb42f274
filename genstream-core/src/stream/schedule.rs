//! Completion scheduling
//!
//! A file's content can be fully present while the UI should still show it
//! as streaming: files are released in plan order at a readable pace rather
//! than all flipping to complete in the same instant. The rule lives behind
//! [`CompletionPolicy`] so headless runs and tests can turn it off without
//! touching any parsing code.

use crate::config::CompletionConfig;
use std::time::Duration;

/// Decides when a content-complete file may report Complete.
pub trait CompletionPolicy: Send + Sync {
    /// `since_streaming` is measured from the moment the file left Pending.
    fn may_complete(&self, plan_index: usize, since_streaming: Duration) -> bool;

    /// Pause between forced completions once the stream has ended
    fn finalize_delay(&self) -> Duration;
}

/// Release a file once `min_dwell + plan_index * stagger` has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaggeredCompletion {
    pub min_dwell: Duration,
    pub stagger: Duration,
    pub finalize_delay: Duration,
}

impl StaggeredCompletion {
    pub fn from_config(config: &CompletionConfig) -> Self {
        Self {
            min_dwell: Duration::from_millis(config.min_dwell_ms),
            stagger: Duration::from_millis(config.stagger_ms),
            finalize_delay: Duration::from_millis(config.finalize_delay_ms),
        }
    }

    /// Dwell required before the file at `plan_index` may complete
    pub fn required_dwell(&self, plan_index: usize) -> Duration {
        let index = u32::try_from(plan_index).unwrap_or(u32::MAX);
        self.min_dwell
            .saturating_add(self.stagger.saturating_mul(index))
    }
}

impl CompletionPolicy for StaggeredCompletion {
    fn may_complete(&self, plan_index: usize, since_streaming: Duration) -> bool {
        since_streaming >= self.required_dwell(plan_index)
    }

    fn finalize_delay(&self) -> Duration {
        self.finalize_delay
    }
}

/// Complete files the moment their boundary closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImmediateCompletion;

impl CompletionPolicy for ImmediateCompletion {
    fn may_complete(&self, _plan_index: usize, _since_streaming: Duration) -> bool {
        true
    }

    fn finalize_delay(&self) -> Duration {
        Duration::ZERO
    }
}

/// Build the policy selected by configuration.
pub fn policy_from_config(config: &CompletionConfig) -> Box<dyn CompletionPolicy> {
    if config.staggered {
        Box::new(StaggeredCompletion::from_config(config))
    } else {
        Box::new(ImmediateCompletion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> StaggeredCompletion {
        StaggeredCompletion {
            min_dwell: Duration::from_millis(400),
            stagger: Duration::from_millis(150),
            finalize_delay: Duration::from_millis(60),
        }
    }

    #[test]
    fn test_dwell_grows_with_plan_index() {
        let p = policy();
        assert_eq!(p.required_dwell(0), Duration::from_millis(400));
        assert_eq!(p.required_dwell(2), Duration::from_millis(700));
    }

    #[test]
    fn test_may_complete_boundary() {
        let p = policy();
        assert!(!p.may_complete(1, Duration::from_millis(549)));
        assert!(p.may_complete(1, Duration::from_millis(550)));
    }

    #[test]
    fn test_immediate_always_allows() {
        assert!(ImmediateCompletion.may_complete(99, Duration::ZERO));
        assert_eq!(ImmediateCompletion.finalize_delay(), Duration::ZERO);
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = CompletionConfig::default();
        assert!(!policy_from_config(&config).may_complete(0, Duration::ZERO));
        config.staggered = false;
        assert!(policy_from_config(&config).may_complete(0, Duration::ZERO));
    }
}
