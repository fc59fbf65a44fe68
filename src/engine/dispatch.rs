//! Tool dispatch batching and loop detection (spec §4.4 steps 5-6, supplemented per
//! SPEC_FULL.md §4.4): batches up to 8 consecutive non-conflicting tool calls (no two
//! touching overlapping write paths) for concurrent execution, batches consecutive
//! `Task` delegations for concurrent child-run spawn, and tracks a repeat-signature
//! streak to trigger the loop breaker then `LoopDetected`.

use crate::tools::{self, ToolCall, ToolContext, ToolResult};

const MAX_BATCH: usize = 8;

fn write_path(call: &ToolCall) -> Option<String> {
    if matches!(call.name.as_str(), "Write" | "Edit") {
        call.args.get("path").and_then(|v| v.as_str()).map(str::to_string)
    } else {
        None
    }
}

fn can_parallel_tool(call: &ToolCall) -> bool {
    !matches!(call.name.as_str(), "AskUser" | "FinalizeTask" | "Plan")
}

fn has_write_path_conflict(batch: &[ToolCall], candidate: &ToolCall) -> bool {
    let Some(path) = write_path(candidate) else {
        return false;
    };
    batch.iter().any(|c| write_path(c).as_deref() == Some(path.as_str()))
}

/// Splits a sequence of tool calls from one model turn into batches that can run
/// concurrently. Each returned group is either: (a) a single call that can't be
/// parallelized (AskUser, FinalizeTask, Plan), or (b) up to `MAX_BATCH` consecutive
/// calls with no overlapping write paths, all of the same "kind" (delegations batch
/// with delegations; other tools batch with other tools).
pub fn partition_batch(calls: Vec<ToolCall>) -> Vec<Vec<ToolCall>> {
    let mut groups: Vec<Vec<ToolCall>> = Vec::new();
    let mut current: Vec<ToolCall> = Vec::new();
    let mut current_is_delegation = false;

    for call in calls {
        if !can_parallel_tool(&call) {
            if !current.is_empty() {
                groups.push(std::mem::take(&mut current));
            }
            groups.push(vec![call]);
            continue;
        }

        let is_delegation = call.name == "Task";
        let conflicts = has_write_path_conflict(&current, &call);
        let kind_changed = !current.is_empty() && current_is_delegation != is_delegation;

        if conflicts || kind_changed || current.len() >= MAX_BATCH {
            groups.push(std::mem::take(&mut current));
        }
        current_is_delegation = is_delegation;
        current.push(call);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

pub async fn run_batch(ctx: &ToolContext, batch: Vec<ToolCall>) -> Vec<ToolResult> {
    if batch.len() == 1 {
        return vec![tools::dispatch(ctx, batch.into_iter().next().unwrap()).await];
    }
    let futures = batch.into_iter().map(|call| tools::dispatch(ctx, call));
    futures_util::future::join_all(futures).await
}

/// `(canonical_tool_name, normalized_args_json)` — the loop-detection signature
/// (spec §4.4 step 6, Testable Property 10).
pub fn tool_signature(call: &ToolCall) -> (String, String) {
    let normalized = normalize_args(&call.args);
    (call.name.clone(), normalized.to_string())
}

fn normalize_args(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, serde_json::Value> = std::collections::BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k.clone(), normalize_args(v));
            }
            serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
        }
        other => other.clone(),
    }
}

#[derive(Default)]
pub struct LoopDetector {
    last_signature: Option<(String, String)>,
    streak: usize,
}

pub enum LoopCheck {
    Fine,
    BreakerInjected,
    LoopDetected,
}

impl LoopDetector {
    /// `breaker_threshold` injects a loop-breaker system message; `detected_threshold`
    /// fails the run outright. Both are counted against the same streak of identical
    /// `(tool, args)` signatures.
    pub fn observe(&mut self, call: &ToolCall, breaker_threshold: usize, detected_threshold: usize) -> LoopCheck {
        let sig = tool_signature(call);
        if self.last_signature.as_ref() == Some(&sig) {
            self.streak += 1;
        } else {
            self.streak = 1;
            self.last_signature = Some(sig);
        }

        if self.streak >= detected_threshold {
            LoopCheck::LoopDetected
        } else if self.streak >= breaker_threshold {
            LoopCheck::BreakerInjected
        } else {
            LoopCheck::Fine
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, path: &str) -> ToolCall {
        ToolCall {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            args: serde_json::json!({ "path": path }),
        }
    }

    #[test]
    fn batches_non_conflicting_writes_together() {
        let calls = vec![call("Write", "a.rs"), call("Write", "b.rs"), call("Read", "c.rs")];
        let batches = partition_batch(calls);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[test]
    fn splits_on_overlapping_write_path() {
        let calls = vec![call("Write", "a.rs"), call("Edit", "a.rs")];
        let batches = partition_batch(calls);
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn ask_user_is_never_batched() {
        let calls = vec![call("Read", "a.rs"), ToolCall { id: "x".into(), name: "AskUser".into(), args: serde_json::json!({}) }];
        let batches = partition_batch(calls);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn loop_detector_triggers_breaker_then_detected() {
        let mut detector = LoopDetector::default();
        let c = call("Read", "a.rs");
        assert!(matches!(detector.observe(&c, 4, 6), LoopCheck::Fine));
        assert!(matches!(detector.observe(&c, 4, 6), LoopCheck::Fine));
        assert!(matches!(detector.observe(&c, 4, 6), LoopCheck::Fine));
        assert!(matches!(detector.observe(&c, 4, 6), LoopCheck::BreakerInjected));
        assert!(matches!(detector.observe(&c, 4, 6), LoopCheck::BreakerInjected));
        assert!(matches!(detector.observe(&c, 4, 6), LoopCheck::LoopDetected));
    }

    #[test]
    fn different_args_reset_the_streak() {
        let mut detector = LoopDetector::default();
        assert!(matches!(detector.observe(&call("Read", "a.rs"), 4, 6), LoopCheck::Fine));
        assert!(matches!(detector.observe(&call("Read", "a.rs"), 4, 6), LoopCheck::Fine));
        assert!(matches!(detector.observe(&call("Read", "b.rs"), 4, 6), LoopCheck::Fine));
    }
}
