//! Read-only negotiation case input.
//!
//! A case arrives as JSON or YAML. Only the fields the engine reads are
//! typed; anything else is kept verbatim in `extra` so a case can be
//! re-serialized without loss.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueDirection {
    Minimize,
    #[default]
    Maximize,
}

impl IssueDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueDirection::Minimize => "MINIMIZE",
            IssueDirection::Maximize => "MAXIMIZE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectiveType {
    OfferVector,
    #[default]
    SingleValue,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectiveValue {
    #[serde(rename = "type")]
    pub kind: ObjectiveType,
    #[serde(default)]
    pub value: Value,
}

impl ObjectiveValue {
    pub fn single(value: impl Into<Value>) -> Self {
        Self {
            kind: ObjectiveType::SingleValue,
            value: value.into(),
        }
    }

    pub fn offer_vector(values: Map<String, Value>) -> Self {
        Self {
            kind: ObjectiveType::OfferVector,
            value: Value::Object(values),
        }
    }

    /// Numeric value for `issue_id`: the value itself for SINGLE_VALUE,
    /// the issue's entry for OFFER_VECTOR.
    pub fn value_for(&self, issue_id: Option<&str>) -> Option<f64> {
        match self.kind {
            ObjectiveType::SingleValue => to_number(&self.value),
            ObjectiveType::OfferVector => {
                let map = self.value.as_object()?;
                to_number(map.get(issue_id?)?)
            }
        }
    }

    /// Human-readable rendering used in prompts and fallback text.
    pub fn summary(&self) -> String {
        match (&self.kind, &self.value) {
            (ObjectiveType::OfferVector, Value::Object(map)) if map.is_empty() => "{}".to_string(),
            (ObjectiveType::OfferVector, Value::Object(map)) => map
                .iter()
                .map(|(key, value)| format!("{}={}", key, format_value(value)))
                .collect::<Vec<_>>()
                .join(", "),
            (_, value) => format_value(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Objectives {
    #[serde(default)]
    pub target: ObjectiveValue,
    #[serde(default)]
    pub reservation: ObjectiveValue,
    #[serde(default)]
    pub no_deal_acceptable: bool,
    #[serde(default)]
    pub issue_weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IssueBounds {
    #[serde(default)]
    pub min: Option<Value>,
    #[serde(default)]
    pub max: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub issue_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub direction: IssueDirection,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub bounds: Option<IssueBounds>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterAppliesTo {
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub issue_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub param_id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub value_type: String,
    #[serde(default)]
    pub value: Value,
    #[serde(rename = "class", default)]
    pub class: String,
    #[serde(default)]
    pub disclosure: Option<String>,
    #[serde(default)]
    pub applies_to: ParameterAppliesTo,
}

impl Parameter {
    /// Explicit disclosure, or SHAREABLE for preferences and PRIVATE for
    /// everything else.
    pub fn disclosure(&self) -> &str {
        match self.disclosure.as_deref() {
            Some(d) if !d.is_empty() => d,
            _ if self.class == "PREFERENCE" => "SHAREABLE",
            _ => "PRIVATE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CounterpartyCalibration {
    #[serde(default)]
    pub answers: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CounterpartyAssumptions {
    #[serde(default)]
    pub calibration: CounterpartyCalibration,
    #[serde(default)]
    pub persona_distribution: Vec<Value>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clarification {
    pub question: String,
    #[serde(default)]
    pub answer: Option<Value>,
}

/// Snapshot of a negotiation case at one revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSnapshot {
    pub case_id: String,
    #[serde(default)]
    pub revision: u32,
    #[serde(default)]
    pub topic: String,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub objectives: Objectives,
    #[serde(default)]
    pub issues: Option<Vec<Issue>>,
    #[serde(default)]
    pub user_issues: Option<Vec<Issue>>,
    #[serde(default)]
    pub counterparty_issues: Option<Vec<Issue>>,
    #[serde(default)]
    pub counterparty_assumptions: CounterpartyAssumptions,
    #[serde(default)]
    pub clarifications: Option<Vec<Clarification>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_domain() -> String {
    "GENERAL".to_string()
}

fn default_channel() -> String {
    "UNSPECIFIED".to_string()
}

/// Target, reservation and direction used by the fallback evaluator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DesiredValues {
    pub target: Option<f64>,
    pub reservation: Option<f64>,
    pub direction: IssueDirection,
}

impl CaseSnapshot {
    /// Minimal case with no issues or objectives.
    pub fn new(case_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            revision: 1,
            topic: topic.into(),
            domain: default_domain(),
            channel: default_channel(),
            parameters: Vec::new(),
            objectives: Objectives::default(),
            issues: None,
            user_issues: None,
            counterparty_issues: None,
            counterparty_assumptions: CounterpartyAssumptions::default(),
            clarifications: None,
            extra: Map::new(),
        }
    }

    /// Loads a case from a `.json`, `.yaml` or `.yml` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CaseError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
            other => Err(CaseError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }

    /// User-side issues, falling back to the shared list.
    pub fn issues_for_user(&self) -> &[Issue] {
        self.user_issues
            .as_deref()
            .filter(|issues| !issues.is_empty())
            .or(self.issues.as_deref())
            .unwrap_or_default()
    }

    /// Counterparty-side issues, falling back to the shared list.
    pub fn issues_for_counterparty(&self) -> &[Issue] {
        self.counterparty_issues
            .as_deref()
            .filter(|issues| !issues.is_empty())
            .or(self.issues.as_deref())
            .unwrap_or_default()
    }

    /// Highest-weight user issue; ties go to the earlier issue. Only used to
    /// pick the entry of an `OFFER_VECTOR` objective.
    pub fn primary_issue(&self) -> Option<&Issue> {
        let weights = &self.objectives.issue_weights;
        let mut best: Option<(&Issue, f64)> = None;
        for issue in self.issues_for_user() {
            let weight = weights.get(&issue.issue_id).copied().unwrap_or(0.0);
            match best {
                Some((_, best_weight)) if weight <= best_weight => {}
                _ => best = Some((issue, weight)),
            }
        }
        best.map(|(issue, _)| issue)
    }

    /// Direction of the first user issue, MAXIMIZE when there are none.
    pub fn primary_issue_direction(&self) -> IssueDirection {
        self.issues_for_user()
            .first()
            .map(|issue| issue.direction)
            .unwrap_or_default()
    }

    pub fn desired_values(&self) -> DesiredValues {
        let issue_id = self.primary_issue().map(|issue| issue.issue_id.as_str());
        DesiredValues {
            target: self.objectives.target.value_for(issue_id),
            reservation: self.objectives.reservation.value_for(issue_id),
            direction: self.primary_issue_direction(),
        }
    }

    /// Answered clarifications as a bullet list, or `None`.
    pub fn clarifications_text(&self) -> String {
        let lines: Vec<String> = self
            .clarifications
            .iter()
            .flatten()
            .filter(|c| !c.question.is_empty())
            .filter_map(|c| {
                let answer = c.answer.as_ref()?;
                let text = format_value(answer);
                if answer.is_null() || text.is_empty() {
                    return None;
                }
                Some(format!("- Q: {}\n  A: {}", c.question, text))
            })
            .collect();
        if lines.is_empty() {
            "None".to_string()
        } else {
            lines.join("\n")
        }
    }

    /// Copy of the case with an answered question appended.
    pub fn with_clarification(&self, question: impl Into<String>, answer: impl Into<Value>) -> Self {
        let mut case = self.clone();
        case.clarifications
            .get_or_insert_with(Vec::new)
            .push(Clarification {
                question: question.into(),
                answer: Some(answer.into()),
            });
        case
    }
}

/// Parses plain numbers and numeric strings with thousands separators.
pub(crate) fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned = s.trim().replace(',', "");
            if cleaned.is_empty() {
                None
            } else {
                cleaned.parse().ok()
            }
        }
        _ => None,
    }
}

/// Strings render bare, everything else as compact JSON.
pub(crate) fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
