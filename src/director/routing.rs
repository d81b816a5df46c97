//! Routing decision logic.
//!
//! Before a task executes, the Director scores its complexity, checks
//! handler availability, and picks one of four routing strategies. The
//! decision is recorded with its reasoning for analytics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::classifier::Intent;
use crate::tasks::{Task, TaskPriority};
use crate::utils::config::DirectorSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    SingleAgent,
    ParallelAgents,
    ScatterGather,
    LoadBalanced,
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::SingleAgent => "single_agent",
            Self::ParallelAgents => "parallel_agents",
            Self::ScatterGather => "scatter_gather",
            Self::LoadBalanced => "load_balanced",
        };
        write!(f, "{label}")
    }
}

/// A routing decision with the metadata that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub strategy: RoutingStrategy,
    pub selected_handlers: Vec<String>,
    pub confidence: f64,
    pub reasoning: String,
    pub expected_execution_secs: f64,
    pub fallback_handlers: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Departments that complement a primary intent under scatter-gather.
#[must_use]
pub fn complementary_departments(primary: Intent) -> &'static [Intent] {
    match primary {
        Intent::Communications => &[Intent::Analysis],
        Intent::Analysis => &[Intent::Communications],
        Intent::Automation => &[Intent::Analysis, Intent::Coordination],
        Intent::Coordination => &[Intent::Communications, Intent::Analysis],
    }
}

/// Complexity score in [1, 10], weighted over description length, payload
/// size, priority, and the presence of complexity keywords.
#[must_use]
pub fn analyze_task_complexity(task: &Task) -> u8 {
    let mut score: u8 = 1;

    let description_length = task.description.len();
    if description_length > 500 {
        score += 2;
    } else if description_length > 200 {
        score += 1;
    }

    if task.input_data.len() > 5 {
        score += 2;
    } else if !task.input_data.is_empty()
        && serde_json::to_string(&task.input_data)
            .map(|s| s.len() > 1000)
            .unwrap_or(false)
    {
        score += 3;
    }

    if task.priority >= TaskPriority::High {
        score += 1;
    }

    let complex_keywords = [
        "analyze",
        "comprehensive",
        "detailed",
        "complex",
        "multi-step",
        "integration",
    ];
    let task_text = format!("{} {}", task.title, task.description).to_lowercase();
    for keyword in complex_keywords {
        if task_text.contains(keyword) {
            score += 1;
        }
    }

    score.min(10)
}

/// Pick the routing strategy from complexity, confidence, and how many
/// handlers can take the intent.
#[must_use]
pub fn determine_strategy(
    settings: &DirectorSettings,
    complexity: u8,
    confidence: f64,
    available_handlers: usize,
) -> RoutingStrategy {
    if !settings.enable_parallel_execution {
        return RoutingStrategy::SingleAgent;
    }

    if complexity >= 8 && available_handlers >= 2 {
        RoutingStrategy::ScatterGather
    } else if confidence < settings.routing_confidence_threshold && available_handlers >= 2 {
        RoutingStrategy::ParallelAgents
    } else if settings.enable_load_balancing && available_handlers >= 2 {
        RoutingStrategy::LoadBalanced
    } else {
        RoutingStrategy::SingleAgent
    }
}

/// Expected wall-clock seconds for a strategy, complexity-adjusted.
#[must_use]
pub fn estimate_execution_secs(strategy: RoutingStrategy, complexity: u8) -> f64 {
    let base_time = 30.0;
    let multiplier = 1.0 + f64::from(complexity.saturating_sub(1)) * 0.2;

    match strategy {
        RoutingStrategy::ParallelAgents => base_time * multiplier * 0.7 + 10.0,
        RoutingStrategy::ScatterGather => base_time * multiplier * 1.3 + 20.0,
        RoutingStrategy::SingleAgent | RoutingStrategy::LoadBalanced => base_time * multiplier,
    }
}

/// Human-readable reasoning string recorded with each decision.
#[must_use]
pub fn routing_reasoning(
    settings: &DirectorSettings,
    strategy: RoutingStrategy,
    selected: &[String],
    intent: Intent,
    confidence: f64,
) -> String {
    let mut parts = vec![format!("Selected {strategy} strategy for {intent} intent")];

    if confidence < settings.routing_confidence_threshold {
        parts.push(format!(
            "Low confidence ({confidence:.2}) suggests multiple agent validation"
        ));
    }
    if selected.len() > 1 {
        parts.push(format!("Using {} agents for enhanced quality", selected.len()));
    }
    match strategy {
        RoutingStrategy::ScatterGather => {
            parts.push("High complexity task benefits from diverse perspectives".to_string());
        }
        RoutingStrategy::LoadBalanced => {
            parts.push("Load balancing to optimize resource utilization".to_string());
        }
        _ => {}
    }

    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskType;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    fn settings() -> DirectorSettings {
        DirectorSettings::default()
    }

    #[test]
    fn simple_task_scores_low() {
        let task = Task::new("Ping".to_string(), "check".to_string(), TaskType::Other);
        assert_eq!(analyze_task_complexity(&task), 1);
    }

    #[test]
    fn complexity_accumulates_and_caps_at_ten() {
        let mut task = Task::new(
            "Comprehensive integration analysis".to_string(),
            "analyze ".repeat(100),
            TaskType::Analysis,
        )
        .with_priority(TaskPriority::Critical);
        for i in 0..6 {
            task.input_data
                .insert(format!("key{i}"), Value::String("value".to_string()));
        }

        // 1 base + 2 long description + 2 payload keys + 1 priority
        // + keywords (analyze, comprehensive, integration) = 9.
        assert_eq!(analyze_task_complexity(&task), 9);

        task.description.push_str(" detailed complex multi-step");
        assert_eq!(analyze_task_complexity(&task), 10);
    }

    #[test]
    fn strategy_selection_matrix() {
        let s = settings();

        // High complexity with handlers available: scatter-gather.
        assert_eq!(
            determine_strategy(&s, 8, 0.9, 2),
            RoutingStrategy::ScatterGather
        );
        // Low confidence with handlers available: parallel consensus.
        assert_eq!(
            determine_strategy(&s, 3, 0.4, 2),
            RoutingStrategy::ParallelAgents
        );
        // Multiple handlers at decent confidence: load balance.
        assert_eq!(
            determine_strategy(&s, 3, 0.9, 2),
            RoutingStrategy::LoadBalanced
        );
        // One handler: single agent, whatever else holds.
        assert_eq!(determine_strategy(&s, 9, 0.2, 1), RoutingStrategy::SingleAgent);

        let mut serial = settings();
        serial.enable_parallel_execution = false;
        assert_eq!(
            determine_strategy(&serial, 9, 0.2, 4),
            RoutingStrategy::SingleAgent
        );
    }

    #[test]
    fn complementary_map_matches_the_fixed_pairs() {
        assert_eq!(
            complementary_departments(Intent::Communications),
            &[Intent::Analysis]
        );
        assert_eq!(
            complementary_departments(Intent::Automation),
            &[Intent::Analysis, Intent::Coordination]
        );
        assert_eq!(
            complementary_departments(Intent::Coordination),
            &[Intent::Communications, Intent::Analysis]
        );
    }

    #[test]
    fn estimates_scale_with_strategy() {
        let single = estimate_execution_secs(RoutingStrategy::SingleAgent, 5);
        let parallel = estimate_execution_secs(RoutingStrategy::ParallelAgents, 5);
        let scatter = estimate_execution_secs(RoutingStrategy::ScatterGather, 5);
        assert!(parallel < single);
        assert!(scatter > single);
    }
}
