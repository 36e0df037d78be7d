//! The six consultation modes and their canned system prompts.

use serde::{Deserialize, Serialize};

/// Consultation mode; selects the system prompt for a new conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    Debug,
    AnalyzeCode,
    ReviewArchitecture,
    ValidatePlan,
    ExplainConcept,
    #[default]
    General,
}

impl Mode {
    /// Lenient parse: unrecognised labels fall back to `general`.
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("debug") => Self::Debug,
            Some("analyzeCode") => Self::AnalyzeCode,
            Some("reviewArchitecture") => Self::ReviewArchitecture,
            Some("validatePlan") => Self::ValidatePlan,
            Some("explainConcept") => Self::ExplainConcept,
            _ => Self::General,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::AnalyzeCode => "analyzeCode",
            Self::ReviewArchitecture => "reviewArchitecture",
            Self::ValidatePlan => "validatePlan",
            Self::ExplainConcept => "explainConcept",
            Self::General => "general",
        }
    }

    /// The canned system prompt for this mode.
    pub fn system_prompt(&self) -> &'static str {
        match self {
            Self::Debug => DEBUG_PROMPT,
            Self::AnalyzeCode => ANALYZE_CODE_PROMPT,
            Self::ReviewArchitecture => REVIEW_ARCHITECTURE_PROMPT,
            Self::ValidatePlan => VALIDATE_PLAN_PROMPT,
            Self::ExplainConcept => EXPLAIN_CONCEPT_PROMPT,
            Self::General => GENERAL_PROMPT,
        }
    }
}

const DEBUG_PROMPT: &str = "You are an expert debugging assistant. Analyze the reported \
problem methodically: restate the symptom, enumerate plausible root causes ranked by \
likelihood, and propose the smallest experiment that would discriminate between them. \
When code is provided, point at exact lines. Prefer concrete fixes over generalities.";

const ANALYZE_CODE_PROMPT: &str = "You are a senior engineer performing a close reading of \
code. Explain what the code actually does, flag correctness hazards, unhandled edge cases, \
and surprising behavior, and note any simpler equivalent formulation. Do not restate the \
obvious; focus on what the author most needs to know.";

const REVIEW_ARCHITECTURE_PROMPT: &str = "You are a software architect reviewing a design. \
Evaluate component boundaries, data ownership, failure modes, and how the design will bear \
change over time. Name the strongest aspect, the weakest aspect, and the single revision \
with the best effort-to-impact ratio.";

const VALIDATE_PLAN_PROMPT: &str = "You are validating an implementation plan before work \
begins. Check the steps for ordering problems, hidden dependencies, missing rollback paths, \
and scope that should be cut. Answer whether the plan is sound to execute as written, and \
if not, what must change first.";

const EXPLAIN_CONCEPT_PROMPT: &str = "You are a patient technical explainer. Build the \
explanation from what the asker likely already knows, use one concrete example, and call \
out the most common misconception about the topic. Keep it accurate; simplify the \
presentation, never the substance.";

const GENERAL_PROMPT: &str = "You are a senior software engineering consultant giving a \
second opinion. Be direct and specific, state your confidence, and when the question is \
underspecified say what additional context would change your answer.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_covers_all_six_labels() {
        assert_eq!(Mode::parse(Some("debug")), Mode::Debug);
        assert_eq!(Mode::parse(Some("analyzeCode")), Mode::AnalyzeCode);
        assert_eq!(Mode::parse(Some("reviewArchitecture")), Mode::ReviewArchitecture);
        assert_eq!(Mode::parse(Some("validatePlan")), Mode::ValidatePlan);
        assert_eq!(Mode::parse(Some("explainConcept")), Mode::ExplainConcept);
        assert_eq!(Mode::parse(Some("general")), Mode::General);
    }

    #[test]
    fn unknown_or_absent_mode_is_general() {
        assert_eq!(Mode::parse(None), Mode::General);
        assert_eq!(Mode::parse(Some("poetry")), Mode::General);
    }

    #[test]
    fn prompts_are_distinct_non_empty_constants() {
        let all = [
            Mode::Debug,
            Mode::AnalyzeCode,
            Mode::ReviewArchitecture,
            Mode::ValidatePlan,
            Mode::ExplainConcept,
            Mode::General,
        ];
        for mode in &all {
            assert!(!mode.system_prompt().is_empty());
        }
        let mut prompts: Vec<&str> = all.iter().map(|m| m.system_prompt()).collect();
        prompts.dedup();
        assert_eq!(prompts.len(), all.len());
    }
}
