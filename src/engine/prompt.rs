//! Prompt assembly (spec §4.4 step 1): system prompt from the agent spec plus a
//! workspace summary, the skill list, and mission context, followed by the trimmed
//! transcript and the current plan summary if one exists.

use super::types::Plan;
use crate::skills::SkillSummary;

pub struct PromptInputs<'a> {
    pub agent_system_prompt: &'a str,
    pub workspace_summary: &'a str,
    pub skills: &'a [SkillSummary],
    pub mission: Option<&'a str>,
    pub plan: Option<&'a Plan>,
}

pub fn build_system_prompt(inputs: &PromptInputs) -> String {
    let mut out = String::new();
    out.push_str(inputs.agent_system_prompt.trim());
    out.push_str("\n\n## Workspace\n");
    out.push_str(inputs.workspace_summary);

    if !inputs.skills.is_empty() {
        out.push_str("\n\n## Available skills\n");
        for skill in inputs.skills {
            out.push_str(&format!("- {}: {}\n", skill.name, skill.description));
        }
    }

    if let Some(mission) = inputs.mission {
        out.push_str("\n\n## Active mission\n");
        out.push_str(mission);
    }

    if let Some(plan) = inputs.plan {
        out.push_str(&format!("\n\n## Current plan ({:?})\n", plan.status));
        for (i, item) in plan.items.iter().enumerate() {
            out.push_str(&format!("{}. [{:?}] {}\n", i + 1, item.status, item.title));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_sections_in_order() {
        let inputs = PromptInputs {
            agent_system_prompt: "You are a careful engineer.",
            workspace_summary: "repo: ridgeline-agent",
            skills: &[],
            mission: Some("ship the release"),
            plan: None,
        };
        let prompt = build_system_prompt(&inputs);
        assert!(prompt.find("careful engineer").unwrap() < prompt.find("Workspace").unwrap());
        assert!(prompt.find("Workspace").unwrap() < prompt.find("mission").unwrap());
    }
}
