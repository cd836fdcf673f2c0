use serde::{Deserialize, Serialize};

use crate::finding::{FindingSet, Severity};

/// Severity vocabulary of the interchange schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Note,
    Warning,
    Error,
}

pub fn level_for(severity: Severity) -> Level {
    match severity {
        Severity::Informational | Severity::Low => Level::Note,
        Severity::Medium => Level::Warning,
        Severity::High | Severity::Critical => Level::Error,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEntry {
    pub rule_id: String,
    pub level: Level,
    pub message: String,
}

/// The tool-agnostic results document consumed by the code-scanning
/// dashboard. Carries actionable results only; suppressed findings stay
/// in the FindingSet, which is where the audit history lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterchangeReport {
    pub tool: Tool,
    pub results: Vec<ResultEntry>,
}

impl InterchangeReport {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("interchange report serializes")
    }
}

/// Build the interchange document from the vulnerability stage's
/// FindingSet. Pure: same input, byte-identical output. An absent or
/// empty set produces a valid document with zero results.
pub fn report(set: Option<&FindingSet>) -> InterchangeReport {
    let results = set
        .map(|s| {
            s.findings
                .iter()
                .filter(|f| !f.suppressed)
                .map(|f| ResultEntry {
                    rule_id: f.id.clone(),
                    level: level_for(f.severity),
                    message: f.description.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    InterchangeReport {
        tool: Tool {
            name: "vigil".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::{Finding, StageId, StageOutcome};

    fn set_with(findings: Vec<Finding>) -> FindingSet {
        FindingSet {
            stage: StageId::Vulnerability,
            outcome: StageOutcome::Failure,
            findings,
            artifact: None,
            error: None,
        }
    }

    fn finding(id: &str, severity: Severity, suppressed: bool) -> Finding {
        Finding {
            id: id.to_string(),
            severity,
            stage: StageId::Vulnerability,
            description: format!("{id} description"),
            suppressed,
        }
    }

    #[test]
    fn absent_set_yields_zero_results() {
        let doc = report(None);
        assert!(doc.results.is_empty());
        assert_eq!(doc.tool.name, "vigil");
        assert!(!doc.tool.version.is_empty());
    }

    #[test]
    fn empty_set_yields_zero_results() {
        let doc = report(Some(&set_with(vec![])));
        assert!(doc.results.is_empty());
    }

    #[test]
    fn suppressed_findings_are_excluded() {
        let doc = report(Some(&set_with(vec![
            finding("ADV-1", Severity::High, true),
            finding("ADV-2", Severity::High, false),
        ])));
        assert_eq!(doc.results.len(), 1);
        assert_eq!(doc.results[0].rule_id, "ADV-2");
    }

    #[test]
    fn severity_maps_to_interchange_levels() {
        assert_eq!(level_for(Severity::Informational), Level::Note);
        assert_eq!(level_for(Severity::Low), Level::Note);
        assert_eq!(level_for(Severity::Medium), Level::Warning);
        assert_eq!(level_for(Severity::High), Level::Error);
        assert_eq!(level_for(Severity::Critical), Level::Error);
    }

    #[test]
    fn generation_is_deterministic() {
        let set = set_with(vec![
            finding("ADV-1", Severity::Medium, false),
            finding("ADV-2", Severity::Critical, false),
        ]);
        let a = report(Some(&set)).to_json();
        let b = report(Some(&set)).to_json();
        assert_eq!(a, b);
    }

    #[test]
    fn json_uses_interchange_field_names() {
        let doc = report(Some(&set_with(vec![finding(
            "ADV-1",
            Severity::Medium,
            false,
        )])));
        let json: serde_json::Value = serde_json::from_str(&doc.to_json()).unwrap();
        assert_eq!(json["tool"]["name"], "vigil");
        assert_eq!(json["results"][0]["ruleId"], "ADV-1");
        assert_eq!(json["results"][0]["level"], "warning");
        assert_eq!(json["results"][0]["message"], "ADV-1 description");
    }
}
