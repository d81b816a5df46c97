//! Intent classification.
//!
//! Tasks are classified into one of four departments by a keyword scorer,
//! optionally fronted by an LLM port with a hash-keyed result cache. A
//! feedback loop turns corrections into new training examples and exposes
//! accuracy analytics.

/// Curated and learned training examples
pub mod dataset;
/// Abstract LLM completion port
pub mod llm;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::tasks::Task;
use crate::utils::config::ClassifierSettings;
pub use dataset::{IntentDataset, IntentExample};
pub use llm::{Classifier, HttpClassifier};

/// The closed set of routing intents. Tie-breaking between equal keyword
/// scores follows the declaration order below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Communications,
    Analysis,
    Automation,
    Coordination,
}

impl Intent {
    pub const ALL: [Self; 4] = [
        Self::Communications,
        Self::Analysis,
        Self::Automation,
        Self::Coordination,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Communications => "communications",
            Self::Analysis => "analysis",
            Self::Automation => "automation",
            Self::Coordination => "coordination",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "communications" => Some(Self::Communications),
            "analysis" => Some(Self::Analysis),
            "automation" => Some(Self::Automation),
            "coordination" => Some(Self::Coordination),
            _ => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    Keyword,
    Llm,
}

/// Cached classification keyed by the hash of the normalized task text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationEntry {
    pub intent: Intent,
    pub confidence: f64,
    pub method: ClassificationMethod,
    pub timestamp: DateTime<Utc>,
    pub hit_count: u64,
}

impl ClassificationEntry {
    #[must_use]
    pub fn is_valid(&self, max_age_hours: i64) -> bool {
        Utc::now() - self.timestamp < chrono::Duration::hours(max_age_hours)
    }
}

/// Append-only correction record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationFeedback {
    pub task_id: Uuid,
    pub predicted_intent: Intent,
    pub predicted_confidence: f64,
    pub actual_intent: Intent,
    pub source: String,
    pub method: ClassificationMethod,
    pub timestamp: DateTime<Utc>,
}

/// Classifier over the closed intent set with caching and feedback.
pub struct IntentClassifier {
    settings: ClassifierSettings,
    fallback: Intent,
    keywords: HashMap<Intent, Vec<&'static str>>,
    dataset: RwLock<IntentDataset>,
    cache: Mutex<HashMap<u64, ClassificationEntry>>,
    feedback: Mutex<Vec<ClassificationFeedback>>,
    llm: Option<Arc<dyn Classifier>>,
}

impl IntentClassifier {
    #[must_use]
    pub fn new(settings: ClassifierSettings, fallback: Intent) -> Self {
        Self {
            settings,
            fallback,
            keywords: Self::intent_keywords(),
            dataset: RwLock::new(IntentDataset::new()),
            cache: Mutex::new(HashMap::new()),
            feedback: Mutex::new(Vec::new()),
            llm: None,
        }
    }

    #[must_use]
    pub fn with_llm(mut self, llm: Arc<dyn Classifier>) -> Self {
        self.llm = Some(llm);
        self
    }

    fn intent_keywords() -> HashMap<Intent, Vec<&'static str>> {
        let mut keywords = HashMap::new();
        keywords.insert(
            Intent::Communications,
            vec![
                "email", "message", "communication", "send", "draft", "write", "compose",
                "letter", "memo", "notification", "announce", "contact", "reply", "response",
                "correspondence", "outreach", "newsletter", "broadcast", "alert", "reminder",
            ],
        );
        keywords.insert(
            Intent::Analysis,
            vec![
                "analyze", "analysis", "review", "evaluate", "assess", "examine", "study",
                "research", "investigate", "compare", "audit", "inspect", "critique",
                "feedback", "opinion", "recommendation", "report", "metrics", "performance",
                "statistics", "data",
            ],
        );
        keywords.insert(
            Intent::Automation,
            vec![
                "automate", "schedule", "trigger", "batch", "process", "workflow", "pipeline",
                "routine", "recurring", "systematic", "script", "tool", "integration", "api",
            ],
        );
        keywords.insert(
            Intent::Coordination,
            vec![
                "coordinate", "manage", "organize", "plan", "delegate", "assign", "supervise",
                "oversee", "monitor", "track", "schedule", "timeline", "project", "meeting",
                "collaboration",
            ],
        );
        keywords
    }

    /// Concatenate title, description, and the input payload's `type` field,
    /// lower-cased and whitespace-collapsed.
    #[must_use]
    pub fn extract_task_text(task: &Task) -> String {
        let mut parts = vec![task.title.clone(), task.description.clone()];
        if let Some(Value::String(kind)) = task.input_data.get("type") {
            parts.push(kind.clone());
        }
        parts
            .join(" ")
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn text_hash(text: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }

    /// Classify a task into an intent with a confidence in [0, 1].
    pub async fn classify(&self, task: &Task) -> (Intent, f64) {
        let text = Self::extract_task_text(task);
        self.classify_text(&text).await
    }

    /// Classify pre-normalized text.
    pub async fn classify_text(&self, text: &str) -> (Intent, f64) {
        if self.settings.enable_llm {
            self.classify_llm(text).await
        } else {
            self.classify_keyword(text)
        }
    }

    /// Keyword scorer: count matches per intent, pick the argmax with
    /// declaration-order tie-breaking, and normalize confidence against the
    /// total matches across intents. Zero matches routes to the fallback
    /// department at confidence zero.
    #[must_use]
    pub fn classify_keyword(&self, text: &str) -> (Intent, f64) {
        let mut total_matches = 0usize;
        let mut best = (self.fallback, 0usize);

        for intent in Intent::ALL {
            let score = self
                .keywords
                .get(&intent)
                .map(|words| words.iter().filter(|w| text.contains(*w)).count())
                .unwrap_or(0);
            total_matches += score;
            if score > best.1 {
                best = (intent, score);
            }
        }

        if best.1 == 0 {
            debug!("no keyword matches, using fallback department");
            return (self.fallback, 0.0);
        }

        let confidence = (best.1 as f64 / total_matches.max(1) as f64).min(1.0);
        debug!(
            intent = best.0.as_str(),
            score = best.1,
            confidence,
            "keyword classification"
        );
        (best.0, confidence)
    }

    async fn classify_llm(&self, text: &str) -> (Intent, f64) {
        let hash = Self::text_hash(text);

        {
            let mut cache = self.cache.lock().await;
            if let Some(entry) = cache.get_mut(&hash) {
                if entry.is_valid(self.settings.cache_max_age_hours) {
                    entry.hit_count += 1;
                    debug!("classification cache hit");
                    return (entry.intent, entry.confidence);
                }
            }
        }

        let Some(llm) = &self.llm else {
            warn!("LLM classification enabled but no classifier port wired");
            return self.classify_keyword(text);
        };

        let prompt = {
            let dataset = self.dataset.read().await;
            format!("{}{}", dataset.training_prompt(3), text)
        };

        match llm.complete(&prompt).await {
            Ok(response) => match Self::parse_llm_response(&response) {
                Some((intent, confidence)) => {
                    let mut cache = self.cache.lock().await;
                    cache.insert(
                        hash,
                        ClassificationEntry {
                            intent,
                            confidence,
                            method: ClassificationMethod::Llm,
                            timestamp: Utc::now(),
                            hit_count: 1,
                        },
                    );
                    info!(intent = intent.as_str(), confidence, "LLM classification");
                    (intent, confidence)
                }
                None => {
                    warn!(response = %response, "LLM returned an unusable intent, using keywords");
                    self.classify_keyword(text)
                }
            },
            Err(e) => {
                warn!(error = %e, "LLM classification unavailable, using keywords");
                self.classify_keyword(text)
            }
        }
    }

    /// Parse a `DEPARTMENT|CONFIDENCE` reply; fall back to a substring scan
    /// at a default confidence when the format is off.
    #[must_use]
    pub fn parse_llm_response(response: &str) -> Option<(Intent, f64)> {
        let trimmed = response.trim();
        let mut parts = trimmed.split('|');
        if let (Some(department), Some(confidence)) = (parts.next(), parts.next()) {
            if let Some(intent) = Intent::parse(department) {
                let confidence = confidence.trim().parse::<f64>().unwrap_or(0.0);
                return Some((intent, confidence.clamp(0.0, 1.0)));
            }
        }

        let lowered = trimmed.to_lowercase();
        Intent::ALL
            .into_iter()
            .find(|intent| lowered.contains(intent.as_str()))
            .map(|intent| (intent, 0.7))
    }

    /// Record a correction. Mispredictions grow the training set under the
    /// actual intent and invalidate the cached entry for the text.
    pub async fn add_feedback(
        &self,
        task_id: Uuid,
        predicted_intent: Intent,
        predicted_confidence: f64,
        actual_intent: Intent,
        source: &str,
        task_text: &str,
    ) {
        let method = if self.settings.enable_llm {
            ClassificationMethod::Llm
        } else {
            ClassificationMethod::Keyword
        };

        self.feedback.lock().await.push(ClassificationFeedback {
            task_id,
            predicted_intent,
            predicted_confidence,
            actual_intent,
            source: source.to_string(),
            method,
            timestamp: Utc::now(),
        });

        if predicted_intent != actual_intent {
            let normalized = task_text
                .to_lowercase()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            self.dataset
                .write()
                .await
                .add_example(IntentExample::from_feedback(
                    normalized.clone(),
                    actual_intent,
                ));
            self.cache
                .lock()
                .await
                .remove(&Self::text_hash(&normalized));
            info!(
                %task_id,
                predicted = predicted_intent.as_str(),
                actual = actual_intent.as_str(),
                "classification corrected"
            );
        }
    }

    /// Aggregate accuracy, per-method accuracy, top confusion pairs, and
    /// cache statistics.
    pub async fn analytics(&self) -> Value {
        let feedback = self.feedback.lock().await;
        let cache_stats = self.cache_stats().await;
        let training_counts: HashMap<String, usize> = self
            .dataset
            .read()
            .await
            .counts()
            .into_iter()
            .map(|(intent, count)| (intent.as_str().to_string(), count))
            .collect();

        if feedback.is_empty() {
            return json!({
                "total_feedback": 0,
                "accuracy": Value::Null,
                "method_performance": {},
                "common_misclassifications": [],
                "training_examples": training_counts,
                "cache_performance": cache_stats,
            });
        }

        let total = feedback.len();
        let correct = feedback
            .iter()
            .filter(|f| f.predicted_intent == f.actual_intent)
            .count();

        let mut method_performance = serde_json::Map::new();
        for method in [ClassificationMethod::Keyword, ClassificationMethod::Llm] {
            let samples: Vec<_> = feedback.iter().filter(|f| f.method == method).collect();
            if samples.is_empty() {
                continue;
            }
            let method_correct = samples
                .iter()
                .filter(|f| f.predicted_intent == f.actual_intent)
                .count();
            let label = match method {
                ClassificationMethod::Keyword => "keyword",
                ClassificationMethod::Llm => "llm",
            };
            method_performance.insert(
                label.to_string(),
                json!({
                    "accuracy": method_correct as f64 / samples.len() as f64,
                    "total_samples": samples.len(),
                }),
            );
        }

        let mut confusion: HashMap<String, u64> = HashMap::new();
        for f in feedback.iter() {
            if f.predicted_intent != f.actual_intent {
                *confusion
                    .entry(format!("{} -> {}", f.predicted_intent, f.actual_intent))
                    .or_default() += 1;
            }
        }
        let mut pairs: Vec<_> = confusion.into_iter().collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1));
        pairs.truncate(5);

        json!({
            "total_feedback": total,
            "accuracy": correct as f64 / total as f64,
            "correct_classifications": correct,
            "method_performance": method_performance,
            "common_misclassifications": pairs
                .into_iter()
                .map(|(pair, count)| json!({"pair": pair, "count": count}))
                .collect::<Vec<_>>(),
            "training_examples": training_counts,
            "cache_performance": cache_stats,
        })
    }

    async fn cache_stats(&self) -> Value {
        let cache = self.cache.lock().await;
        if cache.is_empty() {
            return json!({"cache_entries": 0, "total_hits": 0, "cache_efficiency": 0.0});
        }
        // The first access is a store, not a hit.
        let total_hits: u64 = cache.values().map(|e| e.hit_count - 1).sum();
        let entries = cache.len();
        let valid = cache
            .values()
            .filter(|e| e.is_valid(self.settings.cache_max_age_hours))
            .count();
        json!({
            "cache_entries": entries,
            "total_hits": total_hits,
            "cache_efficiency": total_hits as f64 / entries as f64,
            "valid_entries": valid,
        })
    }

    /// Remove expired cache entries; returns how many were dropped.
    pub async fn cleanup_cache(&self) -> usize {
        let max_age = self.settings.cache_max_age_hours;
        let mut cache = self.cache.lock().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.is_valid(max_age));
        let removed = before - cache.len();
        if removed > 0 {
            info!(removed, "expired classification cache entries removed");
        }
        removed
    }

    /// Export the training dataset for analysis or backup.
    pub async fn export_training_data(&self) -> Value {
        self.dataset.read().await.export()
    }

    #[must_use]
    pub fn fallback_department(&self) -> Intent {
        self.fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskType;
    use pretty_assertions::assert_eq;

    fn classifier() -> IntentClassifier {
        IntentClassifier::new(ClassifierSettings::default(), Intent::Coordination)
    }

    #[tokio::test]
    async fn email_task_routes_to_communications() {
        let task = Task::new(
            "Send welcome email".to_string(),
            "Draft a welcome message for new user".to_string(),
            TaskType::Email,
        );
        let (intent, confidence) = classifier().classify(&task).await;
        assert_eq!(intent, Intent::Communications);
        assert!(confidence > 0.0);
    }

    #[tokio::test]
    async fn unmatched_text_falls_back_at_zero_confidence() {
        let task = Task::new("Do the thing".to_string(), String::new(), TaskType::Other);
        let (intent, confidence) = classifier().classify(&task).await;
        assert_eq!(intent, Intent::Coordination);
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn confidence_is_share_of_total_matches() {
        let c = classifier();
        // "analyze" and "report" hit analysis twice; "email" hits
        // communications once. 2 of 3 matches -> 0.666...
        let (intent, confidence) = c.classify_keyword("analyze the report about email volume");
        assert_eq!(intent, Intent::Analysis);
        assert!((confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn input_type_participates_in_classification() {
        let mut task = Task::new("Handle item".to_string(), String::new(), TaskType::Other);
        task.input_data
            .insert("type".to_string(), Value::String("Email".to_string()));
        let text = IntentClassifier::extract_task_text(&task);
        assert_eq!(text, "handle item email");
    }

    #[test]
    fn llm_response_parsing() {
        assert_eq!(
            IntentClassifier::parse_llm_response("ANALYSIS|0.85"),
            Some((Intent::Analysis, 0.85))
        );
        // Confidence clamped into [0, 1].
        assert_eq!(
            IntentClassifier::parse_llm_response("automation|7.5"),
            Some((Intent::Automation, 1.0))
        );
        // Free-form reply scanned for a department name.
        assert_eq!(
            IntentClassifier::parse_llm_response("This looks like coordination work."),
            Some((Intent::Coordination, 0.7))
        );
        assert_eq!(IntentClassifier::parse_llm_response("SHIPPING|0.9"), None);
    }

    struct CannedClassifier {
        reply: String,
    }

    #[async_trait::async_trait]
    impl Classifier for CannedClassifier {
        async fn complete(&self, _prompt: &str) -> crate::utils::error::DirectorResult<String> {
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn llm_results_are_cached_with_hit_counts() {
        let mut settings = ClassifierSettings::default();
        settings.enable_llm = true;
        let classifier = IntentClassifier::new(settings, Intent::Coordination).with_llm(Arc::new(
            CannedClassifier {
                reply: "ANALYSIS|0.9".to_string(),
            },
        ));

        let first = classifier.classify_text("inspect the quarterly books").await;
        let second = classifier.classify_text("inspect the quarterly books").await;
        assert_eq!(first, second);
        assert_eq!(first.0, Intent::Analysis);

        let cache = classifier.cache.lock().await;
        let entry = cache.values().next().unwrap();
        assert_eq!(entry.hit_count, 2);
    }

    #[tokio::test]
    async fn feedback_invalidates_cache_and_grows_dataset() {
        let mut settings = ClassifierSettings::default();
        settings.enable_llm = true;
        let classifier = IntentClassifier::new(settings, Intent::Coordination).with_llm(Arc::new(
            CannedClassifier {
                reply: "ANALYSIS|0.9".to_string(),
            },
        ));

        let text = "review quarterly numbers";
        let (predicted, confidence) = classifier.classify_text(text).await;
        assert_eq!(predicted, Intent::Analysis);

        classifier
            .add_feedback(
                Uuid::new_v4(),
                predicted,
                confidence,
                Intent::Coordination,
                "manual",
                text,
            )
            .await;

        // Cache entry for the corrected text is gone.
        assert!(classifier.cache.lock().await.is_empty());

        let analytics = classifier.analytics().await;
        assert_eq!(analytics["total_feedback"], 1);
        assert_eq!(analytics["accuracy"], 0.0);
        assert_eq!(
            analytics["common_misclassifications"][0]["pair"],
            "analysis -> coordination"
        );

        let counts = classifier.dataset.read().await.counts();
        assert_eq!(counts[&Intent::Coordination], 13);
    }

    #[tokio::test]
    async fn expired_entries_are_cleaned_up() {
        let classifier = classifier();
        classifier.cache.lock().await.insert(
            42,
            ClassificationEntry {
                intent: Intent::Analysis,
                confidence: 0.8,
                method: ClassificationMethod::Llm,
                timestamp: Utc::now() - chrono::Duration::hours(48),
                hit_count: 3,
            },
        );
        assert_eq!(classifier.cleanup_cache().await, 1);
        assert!(classifier.cache.lock().await.is_empty());
    }
}
