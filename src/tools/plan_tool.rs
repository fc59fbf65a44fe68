//! Plan tool (spec §4.3/§4.4 "Plan mode"): registers or updates the run's plan. A
//! `planned` status parks tool dispatch until the user approves or rejects it.

use super::{ToolCall, ToolContext, ToolError, ToolResult};
use crate::engine::types::{Plan, PlanStatus};

pub async fn plan(ctx: &ToolContext, call: &ToolCall) -> Result<ToolResult, ToolError> {
    let mut plan: Plan = serde_json::from_value(call.args.clone())
        .map_err(|e| ToolError::InvalidPlan(format!("malformed plan object: {e}")))?;

    if plan.items.is_empty() {
        return Err(ToolError::InvalidPlan("plan must contain at least one item".into()));
    }

    let manager = ctx.manager()?;
    manager.set_plan(&ctx.run_id, plan.clone()).await;

    if plan.status == PlanStatus::Planned {
        let approved = manager
            .await_plan_approval(&ctx.project_root, &ctx.session_id, &ctx.run_id, &ctx.agent_id, &plan)
            .await
            .unwrap_or(false);
        plan.status = if approved { PlanStatus::Executing } else { PlanStatus::Planned };
        manager.set_plan(&ctx.run_id, plan.clone()).await;
        if !approved {
            return Ok(ToolResult::ok(
                call,
                "plan rejected, tool dispatch stays suspended".to_string(),
                serde_json::to_value(&plan).unwrap_or_default(),
            ));
        }
    }

    let summary = match plan.status {
        PlanStatus::Planned => format!("proposed a {}-step plan, awaiting approval", plan.items.len()),
        PlanStatus::Approved => "plan approved, executing".to_string(),
        PlanStatus::Executing => format!("executing plan ({} steps)", plan.items.len()),
        PlanStatus::Completed => "plan completed".to_string(),
    };

    Ok(ToolResult::ok(call, summary, serde_json::to_value(&plan).unwrap_or_default()))
}
