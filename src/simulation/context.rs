//! Prompt variables and fallback turns derived from a case.
//!
//! Everything here is a pure function of the case plus the run state passed
//! in, so a resumed run sees exactly the variables an uninterrupted run would.

use serde_json::{json, Value};

use super::case::{format_value, CaseSnapshot, Issue};
use super::port::{PromptVariables, TurnFallback};
use super::strategy::{suggestions_text, StrategySuggestion};
use super::types::{Action, ConversationEntry, Speaker};
use crate::llm::Message;

const COUNTERPARTY_FALLBACK_TEXT: &str = "Thanks for outlining your goal. I need to balance this with internal constraints; here is a realistic counteroffer.";

fn base_variables(case: &CaseSnapshot) -> PromptVariables {
    let mut vars = PromptVariables::new();
    vars.insert("topic".into(), json!(case.topic));
    vars.insert("domain".into(), json!(case.domain));
    vars.insert("channel".into(), json!(case.channel));
    vars
}

/// Variables for the user proxy.
pub fn user_variables(
    case: &CaseSnapshot,
    suggestions: &[StrategySuggestion],
    budget_remaining: u32,
) -> PromptVariables {
    let mut vars = base_variables(case);
    vars.insert("issues_table".into(), json!(issues_table(case.issues_for_user())));
    vars.insert("parameters_table".into(), json!(parameters_table(case)));
    vars.insert(
        "target_summary".into(),
        json!(case.objectives.target.summary()),
    );
    vars.insert(
        "reservation_summary".into(),
        json!(case.objectives.reservation.summary()),
    );
    vars.insert("clarifications".into(), json!(case.clarifications_text()));
    vars.insert("ask_info_budget_remaining".into(), json!(budget_remaining));
    vars.insert(
        "strategy_suggestions".into(),
        json!(suggestions_text(suggestions)),
    );
    vars
}

/// Variables for the counterparty.
pub fn counterparty_variables(
    case: &CaseSnapshot,
    suggestions: &[StrategySuggestion],
) -> PromptVariables {
    let mut vars = base_variables(case);
    vars.insert(
        "issues_table".into(),
        json!(issues_table(case.issues_for_counterparty())),
    );
    vars.insert(
        "counterparty_assumptions_summary".into(),
        json!(counterparty_summary(case)),
    );
    vars.insert("clarifications".into(), json!(case.clarifications_text()));
    vars.insert(
        "strategy_suggestions".into(),
        json!(suggestions_text(suggestions)),
    );
    vars
}

/// Variables for the arbiter's per-round verdict.
pub fn outcome_variables(case: &CaseSnapshot) -> PromptVariables {
    let mut vars = base_variables(case);
    vars.insert("issues_table".into(), json!(issues_table(case.issues_for_user())));
    vars.insert(
        "target_summary".into(),
        json!(case.objectives.target.summary()),
    );
    vars.insert(
        "reservation_summary".into(),
        json!(case.objectives.reservation.summary()),
    );
    vars.insert(
        "primary_issue_id".into(),
        json!(case
            .primary_issue()
            .map(|issue| issue.issue_id.as_str())
            .unwrap_or_default()),
    );
    vars.insert(
        "primary_issue_direction".into(),
        json!(case.primary_issue_direction().as_str()),
    );
    vars
}

/// Variables for post-run extraction and summary.
pub fn digest_variables(case: &CaseSnapshot) -> PromptVariables {
    let mut vars = base_variables(case);
    vars.insert("issues_table".into(), json!(issues_table(case.issues_for_user())));
    vars
}

pub fn user_fallback(case: &CaseSnapshot) -> TurnFallback {
    TurnFallback {
        text: format!(
            "I'm looking to reach {} on this offer and can explain why it makes sense.",
            case.objectives.target.summary()
        ),
        action: Action::new(Speaker::User.default_action()),
    }
}

pub fn counterparty_fallback() -> TurnFallback {
    TurnFallback {
        text: COUNTERPARTY_FALLBACK_TEXT.to_string(),
        action: Action::new(Speaker::Counterparty.default_action()),
    }
}

/// Transcript as chat messages from `viewer`'s perspective: its own lines
/// are `assistant`, the other side's are `user`.
pub fn history_for(conversation: &[ConversationEntry], viewer: Speaker) -> Vec<Message> {
    conversation
        .iter()
        .map(|entry| {
            if entry.speaker == viewer {
                Message::assistant(entry.text.clone())
            } else {
                Message::user(entry.text.clone())
            }
        })
        .collect()
}

pub fn issues_table(issues: &[Issue]) -> String {
    if issues.is_empty() {
        return "None".to_string();
    }
    let mut rows = vec!["issue_id | name | type | direction | unit | bounds".to_string()];
    for issue in issues {
        let bounds = issue
            .bounds
            .as_ref()
            .map(|b| {
                format!(
                    "{}..{}",
                    optional_value(b.min.as_ref()),
                    optional_value(b.max.as_ref())
                )
            })
            .unwrap_or_default();
        rows.push(format!(
            "{} | {} | {} | {} | {} | {}",
            issue.issue_id,
            issue.name,
            issue.kind,
            issue.direction.as_str(),
            issue.unit,
            bounds
        ));
    }
    rows.join("\n")
}

pub fn parameters_table(case: &CaseSnapshot) -> String {
    if case.parameters.is_empty() {
        return "None".to_string();
    }
    let mut rows = vec![
        "param_id | label | class | disclosure | value_type | value | scope | issue_id".to_string(),
    ];
    for param in &case.parameters {
        rows.push(format!(
            "{} | {} | {} | {} | {} | {} | {} | {}",
            param.param_id,
            param.label,
            param.class,
            param.disclosure(),
            param.value_type,
            format_value(&param.value),
            param.applies_to.scope,
            param.applies_to.issue_id.as_deref().unwrap_or_default()
        ));
    }
    rows.join("\n")
}

/// Calibration answers and notes describing the counterparty.
pub fn counterparty_summary(case: &CaseSnapshot) -> String {
    let assumptions = &case.counterparty_assumptions;
    let answers = &assumptions.calibration.answers;

    let control_lines: Vec<String> = answers
        .iter()
        .filter(|(_, value)| match value {
            Value::Null => false,
            Value::String(s) => !s.is_empty() && s != "unknown",
            _ => true,
        })
        .map(|(id, value)| format!("- {}: Value: {}", id, format_value(value)))
        .collect();
    let controls = if control_lines.is_empty() {
        "None".to_string()
    } else {
        control_lines.join("\n")
    };

    [
        format!(
            "calibration_answers: {}",
            serde_json::to_string(answers).unwrap_or_default()
        ),
        "counterparty_controls:".to_string(),
        controls,
        format!("notes: {}", assumptions.notes.as_deref().unwrap_or_default()),
    ]
    .join("\n")
}

fn optional_value(value: Option<&Value>) -> String {
    match value {
        Some(v) if !v.is_null() => format_value(v),
        _ => "None".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::case::{IssueBounds, IssueDirection, ObjectiveValue};

    fn case() -> CaseSnapshot {
        let mut case = CaseSnapshot::new("case-1", "Apartment lease");
        case.issues = Some(vec![Issue {
            issue_id: "rent".to_string(),
            name: "Monthly rent".to_string(),
            kind: "PRICE".to_string(),
            direction: IssueDirection::Minimize,
            unit: "USD".to_string(),
            bounds: Some(IssueBounds {
                min: Some(json!(1500)),
                max: None,
            }),
        }]);
        case.objectives.target = ObjectiveValue::single(1800);
        case.objectives.reservation = ObjectiveValue::single(2000);
        case.counterparty_assumptions
            .calibration
            .answers
            .insert("flexibility".to_string(), json!("low"));
        case.counterparty_assumptions
            .calibration
            .answers
            .insert("urgency".to_string(), json!("unknown"));
        case
    }

    #[test]
    fn test_user_variables() {
        let vars = user_variables(&case(), &[], 2);
        assert_eq!(vars["topic"], json!("Apartment lease"));
        assert_eq!(vars["ask_info_budget_remaining"], json!(2));
        assert_eq!(vars["strategy_suggestions"], json!("None"));
        assert_eq!(
            vars["issues_table"],
            json!("issue_id | name | type | direction | unit | bounds\nrent | Monthly rent | PRICE | MINIMIZE | USD | 1500..None")
        );
        assert_eq!(vars["target_summary"], json!("1800"));
    }

    #[test]
    fn test_outcome_variables_name_primary_issue() {
        let vars = outcome_variables(&case());
        assert_eq!(vars["primary_issue_id"], json!("rent"));
        assert_eq!(vars["primary_issue_direction"], json!("MINIMIZE"));
    }

    #[test]
    fn test_counterparty_summary_skips_unknown_answers() {
        let summary = counterparty_summary(&case());
        assert!(summary.contains("- flexibility: Value: low"));
        assert!(!summary.contains("- urgency"));
        assert!(summary.ends_with("notes: "));
    }

    #[test]
    fn test_fallbacks() {
        let user = user_fallback(&case());
        assert_eq!(
            user.text,
            "I'm looking to reach 1800 on this offer and can explain why it makes sense."
        );
        assert_eq!(user.action.kind, Speaker::User.default_action());
        assert_eq!(
            counterparty_fallback().action.kind,
            Speaker::Counterparty.default_action()
        );
    }

    #[test]
    fn test_history_roles_relative_to_viewer() {
        let conversation = vec![
            ConversationEntry::new(Speaker::User, "Hi"),
            ConversationEntry::new(Speaker::Counterparty, "Hello"),
        ];
        let history = history_for(&conversation, Speaker::Counterparty);
        assert_eq!(history[0], Message::user("Hi"));
        assert_eq!(history[1], Message::assistant("Hello"));
    }
}
