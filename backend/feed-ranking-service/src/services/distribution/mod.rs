//! Distribution stage controller
//!
//! Every item starts with a small test audience and earns wider reach through
//! its engagement rate:
//!
//! - `testing`   (< 50 impressions): expand once the rate reaches 0.15
//! - `expanding` (< 200): expand to viral once the rate reaches 0.20
//! - `viral`     (< 1000): keep serving while the rate stays at or above 0.10,
//!   otherwise freeze reach at the current impression count
//! - `saturated` (>= 1000)
//!
//! Two things are tracked separately. The *reported* stage is derived from
//! impressions and can only grow with them. The *granted* stage is the
//! persisted ratchet that decides how many impressions discovery may still
//! hand out. Neither ever moves backwards.

use serde::{Deserialize, Serialize};

use crate::models::{ItemCounters, RolloutState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionStage {
    Testing,
    Expanding,
    Viral,
    Saturated,
}

impl DistributionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionStage::Testing => "testing",
            DistributionStage::Expanding => "expanding",
            DistributionStage::Viral => "viral",
            DistributionStage::Saturated => "saturated",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "testing" => Some(DistributionStage::Testing),
            "expanding" => Some(DistributionStage::Expanding),
            "viral" => Some(DistributionStage::Viral),
            "saturated" => Some(DistributionStage::Saturated),
            _ => None,
        }
    }
}

impl std::fmt::Display for DistributionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sample sizes and engagement thresholds for the rollout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionConfig {
    pub testing_size: u64,
    pub expanding_size: u64,
    pub viral_size: u64,
    pub max_reach: u64,
    pub testing_to_expanding: f64,
    pub expanding_to_viral: f64,
    pub minimum_viable: f64,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            testing_size: 50,
            expanding_size: 200,
            viral_size: 1000,
            max_reach: 10_000,
            testing_to_expanding: 0.15,
            expanding_to_viral: 0.20,
            minimum_viable: 0.10,
        }
    }
}

/// Interaction tallies the engagement rate is computed from
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngagementSnapshot {
    pub impressions: u64,
    pub reactions: u64,
    pub comments: u64,
    pub shares: u64,
    pub video_completions: u64,
}

impl From<&ItemCounters> for EngagementSnapshot {
    fn from(counters: &ItemCounters) -> Self {
        Self {
            impressions: counters.impressions,
            reactions: counters.likes,
            comments: counters.comments,
            shares: counters.shares,
            video_completions: counters.video_completions,
        }
    }
}

/// Weighted interactions per impression. Zero impressions means a rate of 0.
pub fn engagement_rate(snapshot: &EngagementSnapshot) -> f64 {
    if snapshot.impressions == 0 {
        return 0.0;
    }

    let weighted = snapshot.reactions as f64
        + snapshot.comments as f64 * 2.0
        + snapshot.shares as f64 * 3.0
        + snapshot.video_completions as f64 * 1.5;

    weighted / snapshot.impressions as f64
}

/// Outcome of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "to", rename_all = "camelCase")]
pub enum RolloutAction {
    /// Grant the next stage's audience
    Expand(DistributionStage),
    /// Viral item still above the minimum viable rate
    Continue,
    /// Viral item fell below the minimum viable rate
    Freeze,
    /// Not enough engagement to expand yet
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutDecision {
    /// Stage reported for the item (impressions-derived, never below granted)
    pub stage: DistributionStage,
    pub engagement_rate: f64,
    pub action: RolloutAction,
    pub audience_cap: u64,
    pub next_state: RolloutState,
}

impl RolloutDecision {
    pub fn changed(&self, previous: &RolloutState) -> bool {
        self.next_state != *previous
    }
}

#[derive(Debug, Clone, Default)]
pub struct DistributionController {
    config: DistributionConfig,
}

impl DistributionController {
    pub fn new(config: DistributionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DistributionConfig {
        &self.config
    }

    /// Stage implied by the impression count alone
    pub fn stage_for_impressions(&self, impressions: u64) -> DistributionStage {
        if impressions < self.config.testing_size {
            DistributionStage::Testing
        } else if impressions < self.config.expanding_size {
            DistributionStage::Expanding
        } else if impressions < self.config.viral_size {
            DistributionStage::Viral
        } else {
            DistributionStage::Saturated
        }
    }

    /// Reported stage: the larger of the impressions-derived and granted stage
    pub fn current_stage(&self, impressions: u64, state: &RolloutState) -> DistributionStage {
        self.stage_for_impressions(impressions).max(state.granted)
    }

    /// Total impressions discovery may hand out under the given state
    pub fn audience_cap(&self, state: &RolloutState, impressions: u64) -> u64 {
        if state.throttled {
            return impressions;
        }
        match state.granted {
            DistributionStage::Testing => self.config.testing_size,
            DistributionStage::Expanding => self.config.expanding_size,
            DistributionStage::Viral | DistributionStage::Saturated => self.config.max_reach,
        }
    }

    /// Whether discovery (non-follower) selection may still show the item
    pub fn has_remaining_reach(&self, state: &RolloutState, impressions: u64) -> bool {
        !state.throttled && impressions < self.audience_cap(state, impressions)
    }

    /// Evaluate fresh interaction data against the persisted rollout state.
    ///
    /// Thresholds apply to the effective stage (`current_stage`), so an item
    /// that already reached an audience is judged against that audience's
    /// threshold. The returned `next_state` never grants less than `state` did.
    pub fn evaluate(&self, snapshot: &EngagementSnapshot, state: &RolloutState) -> RolloutDecision {
        let rate = engagement_rate(snapshot);
        let mut next_state = *state;

        let action = match self.current_stage(snapshot.impressions, state) {
            DistributionStage::Testing if rate >= self.config.testing_to_expanding => {
                RolloutAction::Expand(DistributionStage::Expanding)
            }
            DistributionStage::Expanding if rate >= self.config.expanding_to_viral => {
                RolloutAction::Expand(DistributionStage::Viral)
            }
            DistributionStage::Testing | DistributionStage::Expanding => RolloutAction::Hold,
            DistributionStage::Viral | DistributionStage::Saturated => {
                if rate >= self.config.minimum_viable {
                    RolloutAction::Continue
                } else {
                    RolloutAction::Freeze
                }
            }
        };

        match action {
            RolloutAction::Expand(stage) => next_state.granted = next_state.granted.max(stage),
            RolloutAction::Continue => next_state.throttled = false,
            RolloutAction::Freeze => next_state.throttled = true,
            RolloutAction::Hold => {}
        }

        RolloutDecision {
            stage: self.current_stage(snapshot.impressions, &next_state),
            engagement_rate: rate,
            action,
            audience_cap: self.audience_cap(&next_state, snapshot.impressions),
            next_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(impressions: u64, reactions: u64, comments: u64, shares: u64) -> EngagementSnapshot {
        EngagementSnapshot {
            impressions,
            reactions,
            comments,
            shares,
            video_completions: 0,
        }
    }

    fn state(granted: DistributionStage, throttled: bool) -> RolloutState {
        RolloutState { granted, throttled }
    }

    #[test]
    fn test_engagement_rate_zero_impressions() {
        assert_eq!(engagement_rate(&snapshot(0, 10, 10, 10)), 0.0);
    }

    #[test]
    fn test_engagement_rate_weights() {
        let s = EngagementSnapshot {
            impressions: 100,
            reactions: 10,
            comments: 5,
            shares: 2,
            video_completions: 4,
        };
        // 10 + 10 + 6 + 6 = 32
        assert!((engagement_rate(&s) - 0.32).abs() < 1e-9);
    }

    #[test]
    fn test_stage_thresholds() {
        let controller = DistributionController::default();
        assert_eq!(controller.stage_for_impressions(0), DistributionStage::Testing);
        assert_eq!(controller.stage_for_impressions(49), DistributionStage::Testing);
        assert_eq!(controller.stage_for_impressions(50), DistributionStage::Expanding);
        assert_eq!(controller.stage_for_impressions(199), DistributionStage::Expanding);
        assert_eq!(controller.stage_for_impressions(200), DistributionStage::Viral);
        assert_eq!(controller.stage_for_impressions(999), DistributionStage::Viral);
        assert_eq!(controller.stage_for_impressions(1000), DistributionStage::Saturated);
    }

    #[test]
    fn test_testing_item_expands_at_fifteen_percent() {
        let controller = DistributionController::default();
        // (10 + 2*2 + 0) / 40 = 0.35
        let decision = controller.evaluate(&snapshot(40, 10, 2, 0), &RolloutState::default());

        assert!((decision.engagement_rate - 0.35).abs() < 1e-9);
        assert_eq!(
            decision.action,
            RolloutAction::Expand(DistributionStage::Expanding)
        );
        assert_eq!(decision.next_state.granted, DistributionStage::Expanding);
        assert_eq!(decision.audience_cap, 200);
    }

    #[test]
    fn test_testing_item_holds_below_threshold() {
        let controller = DistributionController::default();
        let decision = controller.evaluate(&snapshot(40, 5, 0, 0), &RolloutState::default());

        assert_eq!(decision.action, RolloutAction::Hold);
        assert_eq!(decision.next_state, RolloutState::default());
        assert!(!decision.changed(&RolloutState::default()));
        assert_eq!(decision.audience_cap, 50);
    }

    #[test]
    fn test_no_impressions_never_expands() {
        let controller = DistributionController::default();
        let decision = controller.evaluate(&snapshot(0, 0, 0, 0), &RolloutState::default());
        assert_eq!(decision.engagement_rate, 0.0);
        assert_eq!(decision.action, RolloutAction::Hold);
    }

    #[test]
    fn test_expanding_needs_twenty_percent() {
        let controller = DistributionController::default();
        let current = state(DistributionStage::Expanding, false);

        let held = controller.evaluate(&snapshot(150, 27, 0, 0), &current);
        assert_eq!(held.action, RolloutAction::Hold);

        let expanded = controller.evaluate(&snapshot(150, 30, 0, 0), &current);
        assert_eq!(expanded.action, RolloutAction::Expand(DistributionStage::Viral));
        assert_eq!(expanded.audience_cap, 10_000);
    }

    #[test]
    fn test_viral_item_freezes_below_minimum_viable() {
        let controller = DistributionController::default();
        let current = state(DistributionStage::Viral, false);

        let decision = controller.evaluate(&snapshot(600, 30, 0, 0), &current);

        assert_eq!(decision.action, RolloutAction::Freeze);
        assert!(decision.next_state.throttled);
        assert_eq!(decision.next_state.granted, DistributionStage::Viral);
        // reach frozen at what was already served
        assert_eq!(decision.audience_cap, 600);
        assert!(!controller.has_remaining_reach(&decision.next_state, 600));
    }

    #[test]
    fn test_viral_item_recovers_when_viable_again() {
        let controller = DistributionController::default();
        let current = state(DistributionStage::Viral, true);

        let decision = controller.evaluate(&snapshot(600, 70, 0, 0), &current);

        assert_eq!(decision.action, RolloutAction::Continue);
        assert!(!decision.next_state.throttled);
        assert!(controller.has_remaining_reach(&decision.next_state, 600));
    }

    #[test]
    fn test_stage_ratchet_past_viral_threshold() {
        let controller = DistributionController::default();
        let current = state(DistributionStage::Expanding, false);

        // 0.15 would fail expanding -> viral, yet 1200 impressions are already served
        let decision = controller.evaluate(&snapshot(1200, 180, 0, 0), &current);

        assert_eq!(decision.action, RolloutAction::Continue);
        assert!(decision.stage >= DistributionStage::Viral);
        assert_eq!(decision.stage, DistributionStage::Saturated);
        assert_eq!(decision.next_state.granted, DistributionStage::Expanding);
    }

    #[test]
    fn test_served_viral_audience_freezes_on_low_rate() {
        let controller = DistributionController::default();

        // 600 impressions put a never-granted item in the viral band; 0.05 < 0.10
        let decision = controller.evaluate(&snapshot(600, 30, 0, 0), &RolloutState::default());

        assert_eq!(decision.stage, DistributionStage::Viral);
        assert_eq!(decision.action, RolloutAction::Freeze);
        assert!(decision.next_state.throttled);
        assert_eq!(decision.next_state.granted, DistributionStage::Testing);
    }

    #[test]
    fn test_served_expanding_audience_needs_viral_threshold() {
        let controller = DistributionController::default();

        // 22 / 120 = 0.183: above testing -> expanding, below expanding -> viral
        let decision = controller.evaluate(&snapshot(120, 22, 0, 0), &RolloutState::default());

        assert_eq!(decision.stage, DistributionStage::Expanding);
        assert_eq!(decision.action, RolloutAction::Hold);
        assert!(!decision.changed(&RolloutState::default()));

        let decision = controller.evaluate(&snapshot(120, 24, 0, 0), &RolloutState::default());
        assert_eq!(decision.action, RolloutAction::Expand(DistributionStage::Viral));
        assert_eq!(decision.next_state.granted, DistributionStage::Viral);
    }

    #[test]
    fn test_granted_stage_never_regresses() {
        let controller = DistributionController::default();
        let current = state(DistributionStage::Viral, false);

        let decision = controller.evaluate(&snapshot(10, 0, 0, 0), &current);

        assert_eq!(decision.next_state.granted, DistributionStage::Viral);
        assert_eq!(decision.stage, DistributionStage::Viral);
    }

    #[test]
    fn test_remaining_reach_for_testing_item() {
        let controller = DistributionController::default();
        let fresh = RolloutState::default();
        assert!(controller.has_remaining_reach(&fresh, 49));
        assert!(!controller.has_remaining_reach(&fresh, 50));
    }
}
