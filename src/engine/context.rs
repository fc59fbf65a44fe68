//! Context Manager (spec §4.4): tracks `{estimated_tokens, message_count,
//! token_limit}` and compacts the transcript when over budget. Compaction never
//! drops the system prompt, never drops the task message, and never drops the most
//! recent K messages; everything else older is summarized in chronological chunks.

use super::types::{ContextRecord, ContextType, MessageImportance};

const KEEP_TAIL_MESSAGES: usize = 8;
const CHARS_PER_TOKEN: usize = 4;

pub fn estimate_tokens(text: &str) -> usize {
    (text.len() / CHARS_PER_TOKEN).max(1)
}

#[derive(Debug, Clone)]
pub struct ContextUsage {
    pub estimated_tokens: usize,
    pub message_count: usize,
    pub token_limit: usize,
}

pub struct ContextManager {
    pub token_limit: usize,
}

impl ContextManager {
    pub fn new(token_limit: usize) -> Self {
        Self { token_limit }
    }

    pub fn usage(&self, records: &[ContextRecord]) -> ContextUsage {
        ContextUsage {
            estimated_tokens: records.iter().map(|r| r.estimated_tokens).sum(),
            message_count: records.len(),
            token_limit: self.token_limit,
        }
    }

    pub fn over_budget(&self, records: &[ContextRecord]) -> bool {
        self.usage(records).estimated_tokens > self.token_limit
    }

    /// Compacts `records` in place: always keeps index 0 (system prompt, by
    /// convention the caller's first record) and the task message (first
    /// `Critical`-importance record), plus the last `KEEP_TAIL_MESSAGES` records
    /// unconditionally; everything else in between is folded into one synthetic
    /// summary record.
    pub fn compact(&self, records: Vec<ContextRecord>) -> Vec<ContextRecord> {
        if records.len() <= KEEP_TAIL_MESSAGES + 2 {
            return records;
        }

        let tail_start = records.len() - KEEP_TAIL_MESSAGES;
        let mut kept_head = Vec::new();
        let mut to_summarize = Vec::new();

        for (i, record) in records.iter().enumerate() {
            if i == 0 || record.importance == MessageImportance::Critical || i >= tail_start {
                continue;
            }
            to_summarize.push((i, record));
        }

        if to_summarize.is_empty() {
            return records;
        }

        let summary_text = format!(
            "[compacted {} earlier message(s): {}]",
            to_summarize.len(),
            to_summarize
                .iter()
                .map(|(_, r)| truncate(&r.content, 80))
                .collect::<Vec<_>>()
                .join(" | ")
        );
        let summary_record = ContextRecord {
            role: "system".to_string(),
            estimated_tokens: estimate_tokens(&summary_text),
            content: summary_text,
            importance: MessageImportance::Normal,
        };

        let summarized_indices: std::collections::HashSet<usize> =
            to_summarize.iter().map(|(i, _)| *i).collect();
        for (i, record) in records.into_iter().enumerate() {
            if i == 0 {
                kept_head.push(record);
            } else if !summarized_indices.contains(&i) {
                kept_head.push(record);
            }
        }

        // Insert the summary right after the head (position 1), before whatever
        // survived (critical messages and the tail).
        let mut out = Vec::with_capacity(kept_head.len() + 1);
        out.push(kept_head.remove(0));
        out.push(summary_record);
        out.extend(kept_head);
        out
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}…", &s[..max])
    }
}

pub fn classify(ctype: ContextType) -> MessageImportance {
    match ctype {
        ContextType::System | ContextType::Task => MessageImportance::Critical,
        ContextType::ToolResult => MessageImportance::Normal,
        ContextType::Transcript => MessageImportance::Normal,
        ContextType::Summary => MessageImportance::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(content: &str, importance: MessageImportance) -> ContextRecord {
        ContextRecord {
            role: "user".to_string(),
            estimated_tokens: estimate_tokens(content),
            content: content.to_string(),
            importance,
        }
    }

    #[test]
    fn small_transcripts_are_not_compacted() {
        let mgr = ContextManager::new(100_000);
        let records: Vec<_> = (0..5).map(|i| record(&format!("m{i}"), MessageImportance::Normal)).collect();
        let compacted = mgr.compact(records.clone());
        assert_eq!(compacted.len(), records.len());
    }

    #[test]
    fn compaction_preserves_system_prompt_and_tail() {
        let mgr = ContextManager::new(100);
        let mut records = vec![record("SYSTEM PROMPT", MessageImportance::Critical)];
        for i in 0..20 {
            records.push(record(&format!("msg {i}"), MessageImportance::Normal));
        }
        let compacted = mgr.compact(records);
        assert_eq!(compacted[0].content, "SYSTEM PROMPT");
        assert!(compacted.iter().any(|r| r.content.contains("compacted")));
        assert!(compacted.last().unwrap().content.contains("msg 19"));
    }

    #[test]
    fn critical_messages_survive_compaction() {
        let mgr = ContextManager::new(100);
        let mut records = vec![record("SYSTEM", MessageImportance::Critical)];
        records.push(record("TASK: fix the bug", MessageImportance::Critical));
        for i in 0..20 {
            records.push(record(&format!("chatter {i}"), MessageImportance::Normal));
        }
        let compacted = mgr.compact(records);
        assert!(compacted.iter().any(|r| r.content == "TASK: fix the bug"));
    }
}
