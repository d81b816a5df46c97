//! Training dataset for intent classification.
//!
//! Ships with curated examples per department; grows over time as feedback
//! corrections arrive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::Intent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentExample {
    pub text: String,
    pub department: Intent,
    pub confidence: f64,
    /// Where the example came from: curated, feedback, synthetic.
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl IntentExample {
    #[must_use]
    pub fn curated(text: &str, department: Intent) -> Self {
        Self {
            text: text.to_string(),
            department,
            confidence: 1.0,
            source: "curated".to_string(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn from_feedback(text: String, department: Intent) -> Self {
        Self {
            text,
            department,
            confidence: 1.0,
            source: "feedback".to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Per-department training examples plus the prompt used for the LLM path.
#[derive(Debug, Clone)]
pub struct IntentDataset {
    examples: HashMap<Intent, Vec<IntentExample>>,
}

impl Default for IntentDataset {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentDataset {
    #[must_use]
    pub fn new() -> Self {
        let mut examples: HashMap<Intent, Vec<IntentExample>> = HashMap::new();

        let communications = [
            "Send email to team about project status",
            "Draft newsletter for quarterly updates",
            "Write announcement for new policy",
            "Compose follow-up message to client",
            "Create notification about system maintenance",
            "Send reminder about deadline to stakeholders",
            "Draft response to customer inquiry",
            "Compose welcome message for new employees",
            "Send alert about security incident",
            "Create broadcast message for all users",
            "Send status update to management",
            "Draft invitation for company event",
        ];
        let analysis = [
            "Analyze sales performance for Q3",
            "Review customer feedback data",
            "Evaluate marketing campaign effectiveness",
            "Assess project risk factors",
            "Examine user behavior patterns",
            "Investigate system performance issues",
            "Audit financial records for compliance",
            "Research industry best practices",
            "Inspect code quality and security",
            "Analyze website traffic patterns",
            "Review budget allocation efficiency",
            "Investigate operational bottlenecks",
        ];
        let automation = [
            "Automate daily report generation",
            "Schedule weekly data backups",
            "Set up recurring invoice processing",
            "Create workflow for approval processes",
            "Automate user onboarding tasks",
            "Set up monitoring for system health",
            "Create batch processing for orders",
            "Set up automated testing pipeline",
            "Automate inventory level monitoring",
            "Automate log file cleanup",
            "Set up alert triggers for errors",
            "Automate compliance reporting",
        ];
        let coordination = [
            "Coordinate project team meeting",
            "Organize cross-department collaboration",
            "Plan product launch timeline",
            "Manage stakeholder communications",
            "Delegate tasks to team members",
            "Track project milestone progress",
            "Supervise quality assurance testing",
            "Monitor team workload distribution",
            "Plan resource allocation strategy",
            "Coordinate vendor negotiations",
            "Oversee system deployment plan",
            "Plan capacity expansion strategy",
        ];

        for (intent, texts) in [
            (Intent::Communications, communications.as_slice()),
            (Intent::Analysis, analysis.as_slice()),
            (Intent::Automation, automation.as_slice()),
            (Intent::Coordination, coordination.as_slice()),
        ] {
            examples.insert(
                intent,
                texts
                    .iter()
                    .map(|text| IntentExample::curated(text, intent))
                    .collect(),
            );
        }

        Self { examples }
    }

    pub fn add_example(&mut self, example: IntentExample) {
        self.examples
            .entry(example.department)
            .or_default()
            .push(example);
    }

    #[must_use]
    pub fn examples_for(&self, department: Intent) -> &[IntentExample] {
        self.examples
            .get(&department)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    #[must_use]
    pub fn counts(&self) -> HashMap<Intent, usize> {
        self.examples
            .iter()
            .map(|(intent, examples)| (*intent, examples.len()))
            .collect()
    }

    /// Build the LLM classification prompt with up to `include_examples`
    /// examples per department.
    #[must_use]
    pub fn training_prompt(&self, include_examples: usize) -> String {
        let mut prompt = String::from(
            "You are an expert at classifying user requests into these departments:\n\n\
             1. COMMUNICATIONS: Email, messaging, notifications, announcements, correspondence\n\
             2. ANALYSIS: Data analysis, research, evaluation, reporting, assessment\n\
             3. AUTOMATION: Workflow automation, scheduling, scripting, system integration\n\
             4. COORDINATION: Project management, planning, delegation, oversight, organization\n\n\
             Here are some examples:\n",
        );

        for intent in Intent::ALL {
            prompt.push_str(&format!("\n{} examples:\n", intent.as_str().to_uppercase()));
            for example in self.examples_for(intent).iter().take(include_examples) {
                prompt.push_str(&format!("- {}\n", example.text));
            }
        }

        prompt.push_str(
            "\nPlease classify the following request and provide a confidence score (0.0-1.0):\n\
             Format your response as: DEPARTMENT|CONFIDENCE\n\nRequest: ",
        );
        prompt
    }

    /// Export the dataset for analysis or backup.
    #[must_use]
    pub fn export(&self) -> serde_json::Value {
        serde_json::json!({
            "exported_at": Utc::now(),
            "total_examples": self.examples.values().map(Vec::len).sum::<usize>(),
            "examples_by_department": self
                .examples
                .iter()
                .map(|(intent, examples)| (intent.as_str().to_string(), examples.clone()))
                .collect::<HashMap<String, Vec<IntentExample>>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ships_with_curated_examples() {
        let dataset = IntentDataset::new();
        for intent in Intent::ALL {
            assert!(dataset.examples_for(intent).len() >= 12);
        }
    }

    #[test]
    fn prompt_bounds_examples_per_department() {
        let dataset = IntentDataset::new();
        let prompt = dataset.training_prompt(3);
        assert!(prompt.contains("COMMUNICATIONS examples:"));
        assert!(prompt.contains("DEPARTMENT|CONFIDENCE"));
        // 4 departments x 3 examples = 12 bullet lines.
        assert_eq!(prompt.matches("\n- ").count(), 12);
    }

    #[test]
    fn feedback_examples_grow_the_dataset() {
        let mut dataset = IntentDataset::new();
        let before = dataset.examples_for(Intent::Coordination).len();
        dataset.add_example(IntentExample::from_feedback(
            "review quarterly numbers".to_string(),
            Intent::Coordination,
        ));
        assert_eq!(dataset.examples_for(Intent::Coordination).len(), before + 1);
    }
}
