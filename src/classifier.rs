//! Heuristic query classification — maps raw text to a pipeline profile.
//!
//! Pure function over the input text: an ordered list of (predicate,
//! profile) rules evaluated in priority order, first match wins. Rules are
//! data, so adding one never touches control flow.

use crate::types::{ModelSize, QueryProfile, QueryType};
use regex::Regex;
use std::sync::OnceLock;

/// Word count above which a query is treated as complex regardless of
/// keywords.
const COMPLEX_WORD_THRESHOLD: usize = 15;

/// Word count at or below which a question can qualify as "simple".
const SIMPLE_WORD_LIMIT: usize = 8;

// ── Compiled pattern sets ─────────────────────────────────────────────────────

fn greeting_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(hi|hello|hey|howdy|greetings|good\s+(morning|afternoon|evening|night)|bye|goodbye|farewell|see\s+you|thanks|thank\s+you|thx|much\s+appreciated)\b[\s!.,?]*\S{0,20}\s*$",
        )
        .expect("static regex")
    })
}

fn question_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(what|who|when|where|which|is|are|was|were|does|do|did|can)\b")
            .expect("static regex")
    })
}

fn knowledge_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(research|study|studies|reference|documentation|literature|article|paper|evidence|guideline|history\s+of|background|according\s+to|wikipedia|definition\s+of|symptom|symptoms|diagnosis|treatment|disease|medication)\b",
        )
        .expect("static regex")
    })
}

fn complexity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(why|because|cause|causes|caused|effect|effects|reason|reasons|lead\s+to|leads\s+to|result\s+in|results\s+in|compare|comparison|versus|vs\.?|difference|differences|better|worse|pros\s+and\s+cons|trade-?offs?|step\s+by\s+step|multiple|several|both|calculate|compute|solve|equation|analyze|analyse|explain\s+in\s+detail)\b",
        )
        .expect("static regex")
    })
}

// ── Rule table ────────────────────────────────────────────────────────────────

/// Pre-computed text features shared by all predicates.
struct TextFeatures<'a> {
    text: &'a str,
    word_count: usize,
    has_complexity_keyword: bool,
}

struct Rule {
    name: &'static str,
    matches: fn(&TextFeatures<'_>) -> bool,
    profile: QueryProfile,
}

const fn profile(
    query_type: QueryType,
    use_retrieval: bool,
    use_reasoning_annotation: bool,
    model_size: ModelSize,
) -> QueryProfile {
    QueryProfile {
        query_type,
        use_retrieval,
        use_reasoning_annotation,
        model_size,
    }
}

/// Ordered rule table — first match wins; the final rule always matches.
fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            Rule {
                name: "greeting",
                matches: |f| greeting_re().is_match(f.text),
                profile: profile(QueryType::Greeting, false, false, ModelSize::Tiny),
            },
            Rule {
                name: "simple_factual",
                matches: |f| {
                    f.word_count <= SIMPLE_WORD_LIMIT
                        && !f.has_complexity_keyword
                        && (question_start_re().is_match(f.text) || f.text.trim_end().ends_with('?'))
                },
                profile: profile(QueryType::Simple, false, false, ModelSize::Medium),
            },
            Rule {
                name: "knowledge",
                matches: |f| knowledge_re().is_match(f.text),
                profile: profile(QueryType::Knowledge, true, false, ModelSize::Medium),
            },
            Rule {
                name: "complex",
                matches: |f| f.has_complexity_keyword || f.word_count > COMPLEX_WORD_THRESHOLD,
                profile: profile(QueryType::Complex, true, true, ModelSize::Large),
            },
            Rule {
                name: "default_knowledge",
                matches: |_| true,
                profile: profile(QueryType::Knowledge, true, false, ModelSize::Medium),
            },
        ]
    })
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Classify a message into the pipeline profile that should handle it.
pub fn classify(text: &str) -> QueryProfile {
    let features = TextFeatures {
        text,
        word_count: text.split_whitespace().count(),
        has_complexity_keyword: complexity_re().is_match(text),
    };
    for rule in rules() {
        if (rule.matches)(&features) {
            tracing::debug!(rule = rule.name, "query classified");
            return rule.profile;
        }
    }
    // The final rule always matches; this line is unreachable.
    profile(QueryType::Knowledge, true, false, ModelSize::Medium)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
