//! Importance scoring - multi-factor event scoring with online feedback
//!
//! Six weighted factors produce a score in [0, 1] that drives retention,
//! tiering, and ranking. Weights are process-wide, adjusted from user
//! feedback, and always renormalized to sum to 1. Every adjustment is
//! reported back to the caller so it can be appended to the feedback ledger.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::embedding::cosine_similarity;
use crate::event::{EventType, IntegrationEvent};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Keywords that mark critical engineering content
pub const CRITICAL_KEYWORDS: &[&str] = &[
    "bug",
    "critical",
    "urgent",
    "security",
    "performance",
    "architecture",
    "decision",
    "requirement",
    "specification",
    "design",
    "implementation",
    "deployment",
    "release",
    "milestone",
    "deadline",
    "issue",
    "problem",
];

/// Batch chunk size for scoring
pub const BATCH_CHUNK_SIZE: usize = 50;

/// Feedback only adjusts weights when the prediction missed by more than this
const FEEDBACK_ERROR_THRESHOLD: f64 = 0.2;

fn code_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(function|class|def|fn|async|await|impl|import|export)\b")
            .expect("static pattern compiles")
    })
}

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"//[^\n]*|#[^\n]*|/\*[\s\S]*?\*/")
            .expect("static pattern compiles")
    })
}

fn structure_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(agenda|action|decision|requirement|specification)\b")
            .expect("static pattern compiles")
    })
}

// ============================================================================
// LEVELS
// ============================================================================

/// Importance level by fixed score cut-points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportanceLevel {
    /// 0.8-1.0 - must keep
    Critical,
    /// 0.6-0.8 - very important
    High,
    /// 0.4-0.6 - moderately important
    Medium,
    /// 0.2-0.4 - less important
    Low,
    /// 0.0-0.2 - can be discarded
    Noise,
}

impl ImportanceLevel {
    /// Classify a score
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            ImportanceLevel::Critical
        } else if score >= 0.6 {
            ImportanceLevel::High
        } else if score >= 0.4 {
            ImportanceLevel::Medium
        } else if score >= 0.2 {
            ImportanceLevel::Low
        } else {
            ImportanceLevel::Noise
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportanceLevel::Critical => "critical",
            ImportanceLevel::High => "high",
            ImportanceLevel::Medium => "medium",
            ImportanceLevel::Low => "low",
            ImportanceLevel::Noise => "noise",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "critical" => Some(ImportanceLevel::Critical),
            "high" => Some(ImportanceLevel::High),
            "medium" => Some(ImportanceLevel::Medium),
            "low" => Some(ImportanceLevel::Low),
            "noise" => Some(ImportanceLevel::Noise),
            _ => None,
        }
    }
}

impl std::fmt::Display for ImportanceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// WEIGHTS
// ============================================================================

/// Factor names, in the canonical order used everywhere
pub const FACTOR_NAMES: [&str; 6] = [
    "content_quality",
    "temporal_relevance",
    "author_importance",
    "keyword_relevance",
    "context_similarity",
    "engagement_metrics",
];

/// Per-factor weights; always normalized to sum to 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// Length, structure and code-content signal
    pub content_quality: f64,
    /// Step function of event age
    pub temporal_relevance: f64,
    /// Author role in the project roster
    pub author_importance: f64,
    /// Critical keyword density
    pub keyword_relevance: f64,
    /// Similarity of the event to the project's recent activity
    pub context_similarity: f64,
    /// Replies, reactions, mentions
    pub engagement_metrics: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            content_quality: 0.25,
            temporal_relevance: 0.20,
            author_importance: 0.15,
            keyword_relevance: 0.15,
            context_similarity: 0.15,
            engagement_metrics: 0.10,
        }
    }
}

impl ScoringWeights {
    fn get(&self, name: &str) -> f64 {
        match name {
            "content_quality" => self.content_quality,
            "temporal_relevance" => self.temporal_relevance,
            "author_importance" => self.author_importance,
            "keyword_relevance" => self.keyword_relevance,
            "context_similarity" => self.context_similarity,
            "engagement_metrics" => self.engagement_metrics,
            _ => 0.0,
        }
    }

    fn scale(&mut self, name: &str, factor: f64) {
        match name {
            "content_quality" => self.content_quality *= factor,
            "temporal_relevance" => self.temporal_relevance *= factor,
            "author_importance" => self.author_importance *= factor,
            "keyword_relevance" => self.keyword_relevance *= factor,
            "context_similarity" => self.context_similarity *= factor,
            "engagement_metrics" => self.engagement_metrics *= factor,
            _ => {}
        }
    }

    fn normalize(&mut self) {
        let total = self.content_quality
            + self.temporal_relevance
            + self.author_importance
            + self.keyword_relevance
            + self.context_similarity
            + self.engagement_metrics;
        if total > 0.0 {
            self.content_quality /= total;
            self.temporal_relevance /= total;
            self.author_importance /= total;
            self.keyword_relevance /= total;
            self.context_similarity /= total;
            self.engagement_metrics /= total;
        }
    }

    /// Sum of all weights (1.0 after normalization)
    pub fn total(&self) -> f64 {
        FACTOR_NAMES.iter().map(|name| self.get(name)).sum()
    }
}

// ============================================================================
// SCORE RESULT
// ============================================================================

/// Importance scoring result
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportanceScore {
    /// Weighted overall score, 0.0 to 1.0
    pub score: f64,
    /// Level by fixed cut-points
    pub level: ImportanceLevel,
    /// Named sub-scores before weighting
    pub factors: HashMap<String, f64>,
    /// Confidence in the result: 1 - stdev/mean of factors, clamped
    pub confidence: f64,
    /// Human-readable reasons derived from factor extremes
    pub reasons: Vec<String>,
    /// Whether the score clears the keep threshold
    pub should_keep: bool,
}

/// Team roster entry consulted for author importance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    /// Role label ("lead", "senior", "developer", ...)
    pub role: String,
}

/// Optional project context for scoring
#[derive(Debug, Clone, Default)]
pub struct ProjectContext {
    /// Author handle -> roster entry
    pub team_members: HashMap<String, TeamMember>,
}

/// Per-call scoring inputs beyond the event itself
#[derive(Debug, Clone, Default)]
pub struct ScoringContext<'a> {
    /// Team roster, when known
    pub project: Option<&'a ProjectContext>,
    /// Centroid of recent-window embeddings for the event's project
    pub window_centroid: Option<&'a [f32]>,
}

/// A weight adjustment produced by feedback, for the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightAdjustment {
    /// The factor whose weight moved
    pub factor: String,
    /// Prediction error that triggered the adjustment
    pub error: f64,
    /// Predicted overall score
    pub predicted: f64,
    /// Actual importance reported by the user
    pub actual: f64,
    /// Weights after renormalization
    pub weights: ScoringWeights,
    /// When the adjustment happened
    pub adjusted_at: DateTime<Utc>,
}

/// Recommended thresholds by project shape
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdRecommendations {
    /// Minimum score to keep an entry
    pub keep_threshold: f64,
    /// Score at which an entry is critical
    pub critical_threshold: f64,
    /// Maximum score considered for proactive cleanup
    pub cleanup_threshold: f64,
}

// ============================================================================
// SCORER
// ============================================================================

/// Multi-factor importance scorer
///
/// All methods take `&self`; the weight table sits behind a single mutex so
/// feedback updates appear atomic to concurrent readers.
pub struct ImportanceScorer {
    weights: Mutex<ScoringWeights>,
    keep_threshold: f64,
}

impl Default for ImportanceScorer {
    fn default() -> Self {
        Self::new(0.3)
    }
}

impl ImportanceScorer {
    /// Create a scorer with the given keep threshold
    pub fn new(keep_threshold: f64) -> Self {
        Self {
            weights: Mutex::new(ScoringWeights::default()),
            keep_threshold,
        }
    }

    /// Snapshot of the current weights
    pub fn weights(&self) -> ScoringWeights {
        self.weights
            .lock()
            .map(|w| *w)
            .unwrap_or_default()
    }

    /// Replace the weight table atomically (multi-process deployments push
    /// updates through the store of record and call this on each node)
    pub fn set_weights(&self, mut weights: ScoringWeights) {
        weights.normalize();
        if let Ok(mut guard) = self.weights.lock() {
            *guard = weights;
        }
    }

    /// Score an event as of now
    pub fn score(&self, event: &IntegrationEvent, ctx: &ScoringContext<'_>) -> ImportanceScore {
        self.score_at(event, ctx, Utc::now())
    }

    /// Score an event relative to an explicit clock
    ///
    /// Deterministic: the same event, context, weights and clock always
    /// produce the same score.
    pub fn score_at(
        &self,
        event: &IntegrationEvent,
        ctx: &ScoringContext<'_>,
        now: DateTime<Utc>,
    ) -> ImportanceScore {
        let weights = self.weights();

        let content = score_content_quality(event);
        let temporal = score_temporal_relevance(event, now);
        let author = score_author_importance(event, ctx.project);
        let keyword = score_keyword_relevance(event);
        let context = score_context_similarity(event, ctx.window_centroid);
        let engagement = score_engagement_metrics(event);

        let score = content * weights.content_quality
            + temporal * weights.temporal_relevance
            + author * weights.author_importance
            + keyword * weights.keyword_relevance
            + context * weights.context_similarity
            + engagement * weights.engagement_metrics;

        let factor_values = [content, temporal, author, keyword, context, engagement];
        let mut factors = HashMap::with_capacity(6);
        for (name, value) in FACTOR_NAMES.iter().zip(factor_values.iter()) {
            factors.insert(name.to_string(), *value);
        }

        let confidence = factor_confidence(&factor_values);
        let reasons = build_reasons(content, temporal, author, keyword, engagement);

        ImportanceScore {
            score,
            level: ImportanceLevel::from_score(score),
            factors,
            confidence,
            reasons,
            should_keep: score >= self.keep_threshold,
        }
    }

    /// Score a batch of events in chunks
    pub fn score_batch(
        &self,
        events: &[IntegrationEvent],
        ctx: &ScoringContext<'_>,
    ) -> Vec<ImportanceScore> {
        let now = Utc::now();
        let mut scores = Vec::with_capacity(events.len());
        for chunk in events.chunks(BATCH_CHUNK_SIZE) {
            for event in chunk {
                scores.push(self.score_at(event, ctx, now));
            }
        }
        scores
    }

    /// Adjust weights from user feedback
    ///
    /// When the prediction missed by more than 0.2, the largest-contributing
    /// factor's weight is scaled by 0.95 (over-predicted) or 1.05
    /// (under-predicted) and all weights are renormalized. Returns the
    /// adjustment for the feedback ledger, or `None` when no change was made.
    pub fn learn_from_feedback(
        &self,
        predicted: &ImportanceScore,
        actual: f64,
    ) -> Option<WeightAdjustment> {
        let error = (predicted.score - actual).abs();
        if error <= FEEDBACK_ERROR_THRESHOLD {
            return None;
        }

        let (factor, _) = predicted
            .factors
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;
        let factor = factor.clone();

        let mut guard = self.weights.lock().ok()?;
        let scale = if predicted.score > actual { 0.95 } else { 1.05 };
        guard.scale(&factor, scale);
        guard.normalize();
        let weights = *guard;
        drop(guard);

        tracing::info!(
            factor = %factor,
            error,
            actual,
            "adjusted scoring weight from feedback"
        );

        Some(WeightAdjustment {
            factor,
            error,
            predicted: predicted.score,
            actual,
            weights,
            adjusted_at: Utc::now(),
        })
    }

    /// Recommended thresholds by project size and data volume
    ///
    /// Sizes: small / medium / large / enterprise. Volumes: low / medium /
    /// high / very_high. Unknown labels fall back to the base values.
    pub fn recommended_thresholds(
        project_size: &str,
        data_volume: &str,
    ) -> ThresholdRecommendations {
        let mut keep = 0.3;
        match project_size {
            "small" => keep = 0.2,
            "large" => keep = 0.4,
            "enterprise" => keep = 0.5,
            _ => {}
        }
        let mut rec = ThresholdRecommendations {
            keep_threshold: keep,
            critical_threshold: 0.8,
            cleanup_threshold: 0.2,
        };
        match data_volume {
            "very_high" => {
                rec.keep_threshold = (rec.keep_threshold * 1.2).min(1.0);
                rec.critical_threshold = (rec.critical_threshold * 1.2).min(1.0);
                rec.cleanup_threshold = (rec.cleanup_threshold * 1.2).min(1.0);
            }
            "low" => {
                rec.keep_threshold *= 0.8;
                rec.critical_threshold *= 0.8;
                rec.cleanup_threshold *= 0.8;
            }
            _ => {}
        }
        rec
    }
}

// ============================================================================
// FACTOR FUNCTIONS
// ============================================================================

fn score_content_quality(event: &IntegrationEvent) -> f64 {
    let content = event.full_text();
    let content = content.trim();
    if content.is_empty() {
        return 0.0;
    }

    let mut score: f64 = match content.len() {
        0..=9 => 0.1,
        10..=49 => 0.3,
        50..=2000 => 0.8,
        2001..=5000 => 0.6,
        _ => 0.4,
    };

    if content.split('.').count() > 2 {
        score += 0.2;
    }

    match event.event_type {
        EventType::Commit | EventType::PullRequest | EventType::CodeReview => {
            if code_token_re().is_match(content) {
                score += 0.3;
            }
            if comment_re().is_match(content) {
                score += 0.2;
            }
        }
        EventType::Meeting | EventType::Document => {
            if structure_marker_re().is_match(content) {
                score += 0.3;
            }
        }
        _ => {}
    }

    score.min(1.0)
}

fn score_temporal_relevance(event: &IntegrationEvent, now: DateTime<Utc>) -> f64 {
    match event.age_days(now) {
        d if d <= 1 => 1.0,
        d if d <= 7 => 0.9,
        d if d <= 30 => 0.7,
        d if d <= 90 => 0.5,
        d if d <= 365 => 0.3,
        _ => 0.1,
    }
}

fn score_author_importance(event: &IntegrationEvent, project: Option<&ProjectContext>) -> f64 {
    let (Some(author), Some(project)) = (&event.author, project) else {
        return 0.5;
    };
    let Some(member) = project.team_members.get(author) else {
        return 0.5;
    };
    let role = member.role.to_lowercase();
    if ["lead", "architect", "senior", "principal"].contains(&role.as_str()) {
        0.9
    } else if ["manager", "product"].contains(&role.as_str()) {
        0.8
    } else if ["developer", "engineer"].contains(&role.as_str()) {
        0.7
    } else {
        0.5
    }
}

fn score_keyword_relevance(event: &IntegrationEvent) -> f64 {
    let content = event.full_text().to_lowercase();
    let hits = CRITICAL_KEYWORDS
        .iter()
        .filter(|keyword| content.contains(*keyword))
        .count();
    // Scale up for impact
    (hits as f64 / CRITICAL_KEYWORDS.len() as f64 * 2.0).min(1.0)
}

fn score_context_similarity(event: &IntegrationEvent, centroid: Option<&[f32]>) -> f64 {
    match (&event.embedding, centroid) {
        (Some(embedding), Some(centroid)) => {
            f64::from(cosine_similarity(embedding, centroid)).clamp(0.0, 1.0)
        }
        // Untrained default until embeddings flow
        _ => 0.5,
    }
}

fn score_engagement_metrics(event: &IntegrationEvent) -> f64 {
    let mut score = 0.0;
    let replies = event.reply_count() as f64;
    if replies > 0.0 {
        score += (replies * 0.1).min(0.4);
    }
    let reactions = event.reaction_count() as f64;
    if reactions > 0.0 {
        score += (reactions * 0.05).min(0.3);
    }
    let mentions = event.mention_count() as f64;
    if mentions > 0.0 {
        score += (mentions * 0.1).min(0.3);
    }
    score.min(1.0)
}

fn factor_confidence(values: &[f64]) -> f64 {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean <= 0.0 {
        return 0.5;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (1.0 - variance.sqrt() / mean).clamp(0.0, 1.0)
}

fn build_reasons(
    content: f64,
    temporal: f64,
    author: f64,
    keyword: f64,
    engagement: f64,
) -> Vec<String> {
    let mut reasons = Vec::new();
    if content > 0.7 {
        reasons.push("High-quality, well-structured content".to_string());
    } else if content < 0.3 {
        reasons.push("Low-quality or minimal content".to_string());
    }
    if temporal > 0.8 {
        reasons.push("Very recent and timely".to_string());
    } else if temporal < 0.3 {
        reasons.push("Older content with reduced relevance".to_string());
    }
    if author > 0.8 {
        reasons.push("From a senior team member".to_string());
    }
    if keyword > 0.5 {
        reasons.push("Contains critical project keywords".to_string());
    }
    if engagement > 0.5 {
        reasons.push("High engagement (replies, reactions)".to_string());
    }
    reasons
}

// ============================================================================
// TESTS
// ============================================================================
