//! Heuristic reasoning annotator — a fixed pipeline of ten pure analysis
//! steps over (message, profile, retrieval result).
//!
//! This is a deterministic annotator, not a model-driven reasoner. The
//! trace is injected into the assembled prompt as contextual guidance and
//! optionally exposed as diagnostic metadata; it is never shown raw to the
//! end user as model "reasoning".

use crate::types::{QueryProfile, QueryType, RagResult};
use serde::{Deserialize, Serialize};

// ── Step types ────────────────────────────────────────────────────────────────

/// The ten fixed analysis steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    IntentClassification,
    EntityExtraction,
    ContextSummary,
    RetrievalQuality,
    ComplexityScore,
    InformationNeeds,
    MultiHopEstimate,
    VerificationNeed,
    StrategySelection,
    QualityPrediction,
}

/// One heuristic analysis step: a textual result plus a confidence in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub kind: StepKind,
    pub result: String,
    pub confidence: f32,
}

/// Ordered trace of all ten steps. `overall_confidence` is the mean of the
/// step confidences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningTrace {
    pub steps: Vec<ReasoningStep>,
    pub overall_confidence: f32,
}

impl ReasoningTrace {
    /// Render the trace as a compact context block for prompt injection.
    pub fn as_prompt_context(&self) -> String {
        let mut out = String::from("Query analysis:\n");
        for step in &self.steps {
            out.push_str(&format!("- {:?}: {}\n", step.kind, step.result));
        }
        out
    }
}

// ── Annotator ─────────────────────────────────────────────────────────────────

/// Run the fixed ten-step pipeline over one query.
pub fn annotate(message: &str, profile: &QueryProfile, rag: &RagResult) -> ReasoningTrace {
    let steps = vec![
        step_intent(message, profile),
        step_entities(message),
        step_context_summary(rag),
        step_retrieval_quality(rag),
        step_complexity(message),
        step_information_needs(message),
        step_multi_hop(message),
        step_verification_need(message, rag),
        step_strategy(profile),
        step_quality_prediction(message, rag),
    ];
    let overall_confidence = steps.iter().map(|s| s.confidence).sum::<f32>() / steps.len() as f32;
    ReasoningTrace {
        steps,
        overall_confidence,
    }
}

fn clamp(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

// ── The ten steps ─────────────────────────────────────────────────────────────

fn step_intent(message: &str, profile: &QueryProfile) -> ReasoningStep {
    let (label, confidence) = match profile.query_type {
        QueryType::Greeting => ("social exchange, no informational intent", 0.95),
        QueryType::Simple => ("direct factual lookup", 0.8),
        QueryType::Knowledge => ("knowledge-seeking, benefits from references", 0.7),
        QueryType::Complex => ("analytical, multi-faceted request", 0.65),
    };
    let qualifier = if message.trim_end().ends_with('?') {
        " (explicit question)"
    } else {
        ""
    };
    ReasoningStep {
        kind: StepKind::IntentClassification,
        result: format!("{label}{qualifier}"),
        confidence,
    }
}

fn step_entities(message: &str) -> ReasoningStep {
    // Capitalized mid-sentence words and long content words approximate
    // named entities / topics without an NER model.
    let mut entities: Vec<&str> = Vec::new();
    for (i, word) in message.split_whitespace().enumerate() {
        let w = word.trim_matches(|c: char| !c.is_alphanumeric());
        if w.len() < 3 {
            continue;
        }
        let capitalized = w.chars().next().is_some_and(|c| c.is_uppercase());
        if (capitalized && i > 0) || w.len() >= 8 {
            if !entities.contains(&w) {
                entities.push(w);
            }
        }
    }
    entities.truncate(8);
    let confidence = clamp(0.4 + 0.05 * entities.len() as f32);
    let result = if entities.is_empty() {
        "no salient entities detected".to_string()
    } else {
        format!("salient terms: {}", entities.join(", "))
    };
    ReasoningStep {
        kind: StepKind::EntityExtraction,
        result,
        confidence,
    }
}

fn step_context_summary(rag: &RagResult) -> ReasoningStep {
    let result = if rag.entries.is_empty() {
        "no prior context retrieved".to_string()
    } else {
        let categories: Vec<&str> = rag.categories.iter().map(String::as_str).collect();
        format!(
            "{} prior item(s) across categories [{}]",
            rag.entries.len(),
            categories.join(", ")
        )
    };
    let confidence = if rag.entries.is_empty() { 0.5 } else { 0.75 };
    ReasoningStep {
        kind: StepKind::ContextSummary,
        result,
        confidence,
    }
}

fn step_retrieval_quality(rag: &RagResult) -> ReasoningStep {
    let (label, confidence) = if rag.entries.is_empty() {
        ("no retrieval signal", 0.5)
    } else if rag.total_relevance >= 1.5 {
        ("strong retrieval support", 0.85)
    } else if rag.total_relevance >= 0.5 {
        ("moderate retrieval support", 0.7)
    } else {
        ("weak retrieval support", 0.55)
    };
    ReasoningStep {
        kind: StepKind::RetrievalQuality,
        result: format!("{label} (total relevance {:.2})", rag.total_relevance),
        confidence,
    }
}

fn step_complexity(message: &str) -> ReasoningStep {
    let words = message.split_whitespace().count();
    let clauses = message.matches([',', ';']).count();
    let score = clamp(words as f32 / 30.0 + clauses as f32 * 0.1);
    ReasoningStep {
        kind: StepKind::ComplexityScore,
        result: format!("complexity {:.2} ({} words, {} clause breaks)", score, words, clauses),
        confidence: 0.7,
    }
}

fn step_information_needs(message: &str) -> ReasoningStep {
    let lower = message.to_lowercase();
    let mut needs: Vec<&str> = Vec::new();
    if lower.contains("what is") || lower.contains("define") || lower.contains("meaning of") {
        needs.push("definition");
    }
    if lower.contains("latest") || lower.contains("today") || lower.contains("current") || lower.contains("news") {
        needs.push("current data");
    }
    if lower.contains("calculate") || lower.contains("compute") || lower.contains("how many") || lower.contains("how much") {
        needs.push("computation");
    }
    if lower.contains("example") || lower.contains("how to") || lower.contains("steps") {
        needs.push("procedure/examples");
    }
    let result = if needs.is_empty() {
        "general explanation".to_string()
    } else {
        format!("needs: {}", needs.join(", "))
    };
    ReasoningStep {
        kind: StepKind::InformationNeeds,
        result,
        confidence: 0.65,
    }
}

fn step_multi_hop(message: &str) -> ReasoningStep {
    let lower = message.to_lowercase();
    let connectives = ["and", "then", "because", "compare", "versus", "both", "after"];
    let hops: usize = connectives.iter().map(|c| lower.split_whitespace().filter(|w| w == c).count()).sum();
    let depth = (1 + hops.min(3)) as u32;
    ReasoningStep {
        kind: StepKind::MultiHopEstimate,
        result: format!("estimated reasoning depth {depth}"),
        confidence: clamp(0.8 - 0.1 * hops.min(4) as f32),
    }
}

fn step_verification_need(message: &str, rag: &RagResult) -> ReasoningStep {
    let has_numbers = message.chars().any(|c| c.is_ascii_digit());
    let weak_retrieval = rag.entries.is_empty() || rag.total_relevance < 0.5;
    let needed = has_numbers || weak_retrieval;
    ReasoningStep {
        kind: StepKind::VerificationNeed,
        result: if needed {
            "verification recommended before asserting specifics".to_string()
        } else {
            "low verification need".to_string()
        },
        confidence: if needed { 0.6 } else { 0.75 },
    }
}

fn step_strategy(profile: &QueryProfile) -> ReasoningStep {
    let strategy = match profile.query_type {
        QueryType::Greeting => "respond briefly and warmly",
        QueryType::Simple => "answer directly, no elaboration",
        QueryType::Knowledge => "ground the answer in retrieved context",
        QueryType::Complex => "decompose into sub-questions, then synthesize",
    };
    ReasoningStep {
        kind: StepKind::StrategySelection,
        result: strategy.to_string(),
        confidence: 0.8,
    }
}

/// Heuristic answer-quality prediction.
///
/// Documented formula (behavior-preserving, not a calibrated probability):
/// base 0.5, +0.15 when any context was retrieved, +0.10 when total
/// relevance exceeds 1.0, +0.10 for messages of 3–50 words, +0.05 for an
/// explicit question mark, clamped to [0, 1].
fn step_quality_prediction(message: &str, rag: &RagResult) -> ReasoningStep {
    let words = message.split_whitespace().count();
    let mut score = 0.5f32;
    if !rag.entries.is_empty() {
        score += 0.15;
    }
    if rag.total_relevance > 1.0 {
        score += 0.10;
    }
    if (3..=50).contains(&words) {
        score += 0.10;
    }
    if message.trim_end().ends_with('?') {
        score += 0.05;
    }
    let score = clamp(score);
    ReasoningStep {
        kind: StepKind::QualityPrediction,
        result: format!("predicted answer quality {score:.2}"),
        confidence: score,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
