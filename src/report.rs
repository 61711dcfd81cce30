use std::fmt::Write;

use crate::models::{Situation, SituationBrief};

/// Most recent communications included in a generation prompt.
pub const MAX_PROMPT_COMMUNICATIONS: usize = 50;

const RESPONSE_SHAPE: &str = r#"{
  "summary": "2-4 sentence overview of where things stand",
  "stakeholders": [{"name": "", "role": "", "currentStance": "", "recentTone": "positive|neutral|negative|mixed", "keyPoints": [""], "suggestedApproach": ""}],
  "unresolvedItems": [{"description": "", "raisedBy": "", "raisedAt": "", "type": "question|commitment|decision|action_item", "context": ""}],
  "suggestedNextSteps": [{"priority": 1, "action": "", "rationale": "", "suggestedQuestions": [""]}],
  "riskLevel": "low|medium|high",
  "topRisks": [{"type": "disengagement|escalation|misalignment|blocker", "severity": "low|medium|high", "description": "", "evidence": [""]}]
}"#;

/// Prompt for the text-generation service. Communications are listed in
/// origin-time order, which can differ from the order they were captured.
pub fn build_prompt(situation: &Situation) -> String {
    let mut output = String::new();

    let _ = writeln!(
        output,
        "You are helping someone prepare for an ongoing situation. Analyse the captured \
         conversation history and answer with JSON only, matching this shape:"
    );
    let _ = writeln!(output, "{RESPONSE_SHAPE}");
    let _ = writeln!(output);
    let _ = writeln!(output, "# Situation: {}", situation.title);
    let _ = writeln!(output, "Status: {}", situation.status);
    if !situation.description.is_empty() {
        let _ = writeln!(output, "Description: {}", situation.description);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Participants");
    if situation.participants.is_empty() {
        let _ = writeln!(output, "No participants recorded.");
    } else {
        for participant in situation.participants.iter() {
            let mut line = format!("- {}", participant.name);
            if let Some(role) = &participant.role {
                let _ = write!(line, " ({role})");
            }
            if let Some(position) = &participant.stated_position {
                let _ = write!(line, ", stated position: {position}");
            }
            let _ = writeln!(output, "{line}");
        }
    }

    let mut communications: Vec<_> = situation.communications.iter().collect();
    communications.sort_by_key(|c| c.timestamp);
    let skip = communications.len().saturating_sub(MAX_PROMPT_COMMUNICATIONS);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Communications");
    if communications.is_empty() {
        let _ = writeln!(output, "No communications captured yet.");
    } else {
        for communication in communications.into_iter().skip(skip) {
            let speakers = if communication.participants.is_empty() {
                "unknown".to_string()
            } else {
                communication.participants.join(", ")
            };
            let _ = writeln!(
                output,
                "[{}] {} ({}): {}",
                communication.timestamp.to_rfc3339(),
                communication.source,
                speakers,
                communication.content
            );
        }
    }

    output
}

/// Markdown rendering of a stored brief.
pub fn render_brief(brief: &SituationBrief) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# {}", brief.title);
    let _ = writeln!(
        output,
        "Generated {} (risk level: {})",
        brief.generated_at.format("%Y-%m-%d %H:%M UTC"),
        brief.risk_level
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "{}", brief.summary);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Stakeholders");
    if brief.stakeholders.is_empty() {
        let _ = writeln!(output, "No stakeholders identified.");
    } else {
        for stakeholder in brief.stakeholders.iter() {
            let _ = writeln!(
                output,
                "- {} ({}): {}",
                stakeholder.name,
                if stakeholder.role.is_empty() { "role unknown" } else { stakeholder.role.as_str() },
                stakeholder.current_stance
            );
            if !stakeholder.suggested_approach.is_empty() {
                let _ = writeln!(output, "  Approach: {}", stakeholder.suggested_approach);
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Unresolved");
    if brief.unresolved_items.is_empty() {
        let _ = writeln!(output, "Nothing outstanding.");
    } else {
        for item in brief.unresolved_items.iter() {
            let _ = writeln!(output, "- {}", item.description);
        }
    }

    let mut steps = brief.suggested_next_steps.clone();
    steps.sort_by_key(|step| step.priority);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Suggested Next Steps");
    if steps.is_empty() {
        let _ = writeln!(output, "No suggestions.");
    } else {
        for step in steps.iter() {
            let _ = writeln!(output, "{}. {}", step.priority, step.action);
            if !step.rationale.is_empty() {
                let _ = writeln!(output, "   {}", step.rationale);
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Risks");
    if brief.top_risks.is_empty() {
        let _ = writeln!(output, "No risks flagged.");
    } else {
        for risk in brief.top_risks.iter().take(5) {
            let _ = writeln!(output, "- [{}] {}", risk.severity, risk.description);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::{
        Communication, CommunicationMetadata, CommunicationSource, Participant, RiskSeverity,
        SituationStatus, SuggestedAction,
    };

    fn communication(id: &str, minutes_ago: i64, content: &str) -> Communication {
        Communication {
            id: id.to_string(),
            situation_id: "s1".to_string(),
            source: CommunicationSource::Slack,
            source_id: id.to_string(),
            source_url: None,
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            participants: vec!["Alex".to_string()],
            content: content.to_string(),
            metadata: CommunicationMetadata::Manual,
        }
    }

    fn situation() -> Situation {
        let now = Utc::now();
        Situation {
            id: "s1".to_string(),
            title: "Vendor negotiation".to_string(),
            description: "Renewal".to_string(),
            status: SituationStatus::Active,
            created_at: now,
            updated_at: now,
            participants: vec![Participant {
                id: "p1".to_string(),
                name: "Alex".to_string(),
                email: None,
                slack_id: None,
                role: Some("Account manager".to_string()),
                stated_position: None,
                inferred_intent: None,
            }],
            // Captured out of origin order.
            communications: vec![
                communication("c2", 5, "Second message"),
                communication("c1", 60, "First message"),
            ],
            analysis: None,
        }
    }

    #[test]
    fn prompt_lists_history_chronologically() {
        let prompt = build_prompt(&situation());
        assert!(prompt.contains("# Situation: Vendor negotiation"));
        assert!(prompt.contains("- Alex (Account manager)"));
        let first = prompt.find("First message").unwrap();
        let second = prompt.find("Second message").unwrap();
        assert!(first < second);
    }

    #[test]
    fn prompt_keeps_only_recent_communications() {
        let mut situation = situation();
        situation.communications = (0..MAX_PROMPT_COMMUNICATIONS as i64 + 5)
            .map(|i| communication(&format!("c{i}"), i, &format!("message #{i}#")))
            .collect();
        let prompt = build_prompt(&situation);
        assert!(prompt.contains("message #0#"));
        assert!(!prompt.contains(&format!("message #{}#", MAX_PROMPT_COMMUNICATIONS + 4)));
    }

    #[test]
    fn brief_renders_steps_in_priority_order() {
        let brief = SituationBrief {
            situation_id: "s1".to_string(),
            generated_at: Utc::now(),
            title: "Vendor negotiation".to_string(),
            summary: "Vendor wants more time.".to_string(),
            stakeholders: Vec::new(),
            unresolved_items: Vec::new(),
            suggested_next_steps: vec![
                SuggestedAction {
                    priority: 2,
                    action: "Send revised terms".to_string(),
                    rationale: String::new(),
                    suggested_questions: None,
                },
                SuggestedAction {
                    priority: 1,
                    action: "Confirm new deadline".to_string(),
                    rationale: "Blocks everything else".to_string(),
                    suggested_questions: None,
                },
            ],
            risk_level: RiskSeverity::Medium,
            top_risks: Vec::new(),
        };

        let report = render_brief(&brief);
        assert!(report.contains("risk level: medium"));
        let first = report.find("1. Confirm new deadline").unwrap();
        let second = report.find("2. Send revised terms").unwrap();
        assert!(first < second);
        assert!(report.contains("No risks flagged."));
    }
}
