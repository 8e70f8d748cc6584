//! Deterministic outcome fallback.
//!
//! Used only when the arbiter returns no verdict. The binding figure in the
//! counterparty's latest message is compared against the case target and
//! reservation for the primary issue.

use std::sync::OnceLock;

use regex::Regex;

use super::case::{CaseSnapshot, DesiredValues, IssueDirection};
use super::types::{ConversationEntry, Outcome, Speaker};

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-+]?\d[\d,]*(?:\.\d+)?").expect("static regex is valid"))
}

/// All numeric tokens in `text`, thousands separators removed.
pub fn extract_numbers(text: &str) -> Vec<f64> {
    number_regex()
        .find_iter(text)
        .filter_map(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        .collect()
}

/// The figure most favourable to the counterparty: the minimum when the
/// user minimizes, the maximum when the user maximizes.
pub fn binding_value(text: &str, direction: IssueDirection) -> Option<f64> {
    let numbers = extract_numbers(text);
    let fold: fn(f64, f64) -> f64 = match direction {
        IssueDirection::Minimize => f64::min,
        IssueDirection::Maximize => f64::max,
    };
    numbers.into_iter().reduce(fold)
}

/// Judges a counterparty utterance against the desired values.
pub fn evaluate_offer(text: &str, desired: &DesiredValues) -> Outcome {
    let (Some(value), Some(target)) = (binding_value(text, desired.direction), desired.target)
    else {
        return Outcome::Neutral;
    };

    let satisfies = |threshold: f64| match desired.direction {
        IssueDirection::Minimize => value <= threshold,
        IssueDirection::Maximize => value >= threshold,
    };

    if satisfies(target) {
        Outcome::Pass
    } else if desired.reservation.is_some_and(satisfies) {
        Outcome::Neutral
    } else {
        Outcome::Fail
    }
}

/// Evaluates the latest counterparty message in `conversation`.
pub fn evaluate_outcome(case: &CaseSnapshot, conversation: &[ConversationEntry]) -> Outcome {
    let latest = conversation
        .iter()
        .rev()
        .find(|entry| entry.speaker == Speaker::Counterparty)
        .map(|entry| entry.text.as_str())
        .unwrap_or_default();
    evaluate_offer(latest, &case.desired_values())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::case::{Issue, ObjectiveValue};

    fn desired(target: Option<f64>, reservation: Option<f64>, direction: IssueDirection) -> DesiredValues {
        DesiredValues {
            target,
            reservation,
            direction,
        }
    }

    #[test]
    fn test_extract_numbers() {
        assert_eq!(
            extract_numbers("We can do 120,000 or -5.5 and +3, not 1,2"),
            vec![120000.0, -5.5, 3.0, 12.0]
        );
        assert!(extract_numbers("no figures here").is_empty());
    }

    #[test]
    fn test_maximize_target_met_passes() {
        let d = desired(Some(100_000.0), Some(85_000.0), IssueDirection::Maximize);
        assert_eq!(evaluate_offer("We can offer 120,000.", &d), Outcome::Pass);
    }

    #[test]
    fn test_below_reservation_fails() {
        let d = desired(Some(100_000.0), Some(85_000.0), IssueDirection::Maximize);
        assert_eq!(evaluate_offer("Best we can do is 80,000.", &d), Outcome::Fail);
    }

    #[test]
    fn test_between_reservation_and_target_is_neutral() {
        let d = desired(Some(100_000.0), Some(85_000.0), IssueDirection::Maximize);
        assert_eq!(evaluate_offer("How about 90,000?", &d), Outcome::Neutral);
    }

    #[test]
    fn test_no_number_or_target_is_neutral() {
        let d = desired(Some(100_000.0), None, IssueDirection::Maximize);
        assert_eq!(evaluate_offer("Let me check with my manager.", &d), Outcome::Neutral);

        let no_target = desired(None, Some(1.0), IssueDirection::Maximize);
        assert_eq!(evaluate_offer("Offer: 500", &no_target), Outcome::Neutral);
    }

    #[test]
    fn test_minimize_uses_lowest_figure() {
        let d = desired(Some(1_000.0), Some(1_200.0), IssueDirection::Minimize);
        assert_eq!(
            evaluate_offer("List price is 1,500 but I can do 950.", &d),
            Outcome::Pass
        );
        assert_eq!(evaluate_offer("Final: 1,300", &d), Outcome::Fail);
        assert_eq!(evaluate_offer("Final: 1,100", &d), Outcome::Neutral);
    }

    #[test]
    fn test_evaluate_outcome_reads_latest_counterparty_message() {
        let mut case = CaseSnapshot::new("c1", "Salary");
        case.issues = Some(vec![Issue {
            issue_id: "salary".to_string(),
            name: "Salary".to_string(),
            kind: "SALARY".to_string(),
            direction: IssueDirection::Maximize,
            unit: "USD".to_string(),
            bounds: None,
        }]);
        case.objectives.target = ObjectiveValue::single(100_000);
        case.objectives.reservation = ObjectiveValue::single(85_000);

        let conversation = vec![
            ConversationEntry::new(Speaker::Counterparty, "We start at 80,000."),
            ConversationEntry::new(Speaker::User, "I need 150,000."),
            ConversationEntry::new(Speaker::Counterparty, "We can stretch to 101,000."),
        ];
        assert_eq!(evaluate_outcome(&case, &conversation), Outcome::Pass);
        assert_eq!(evaluate_outcome(&case, &[]), Outcome::Neutral);
    }
}
