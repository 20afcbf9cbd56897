//! Tool call correlation.
//!
//! Every external operation (an agent producer invocation, a recovery action)
//! gets one opaque correlation id, a tracing span carrying that id, and a
//! start/end timing record kept in a bounded history.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::Span;
use uuid::Uuid;

/// How a correlated operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

/// Timing record for one finished operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub correlation_id: Uuid,
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u128,
    pub status: ToolCallStatus,
}

/// An operation that has started but not yet been finished.
#[derive(Debug)]
pub struct ToolCall {
    id: Uuid,
    operation: String,
    started_at: DateTime<Utc>,
    started: Instant,
    span: Span,
}

impl ToolCall {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span tagged with this call's correlation id; instrument futures with it.
    pub fn span(&self) -> Span {
        self.span.clone()
    }
}

/// Assigns correlation ids and keeps the last `capacity` timing records.
#[derive(Debug)]
pub struct ToolCallCorrelator {
    capacity: usize,
    records: Mutex<VecDeque<ToolCallRecord>>,
}

impl Default for ToolCallCorrelator {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ToolCallCorrelator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }

    /// Start a correlated operation.
    pub fn begin(&self, operation: impl Into<String>) -> ToolCall {
        let id = Uuid::new_v4();
        let operation = operation.into();
        let span = tracing::info_span!(
            "concord.tool_call",
            correlation_id = %id,
            operation = %operation
        );
        tracing::debug!(parent: &span, event = "tool_call.started");
        ToolCall {
            id,
            operation,
            started_at: Utc::now(),
            started: Instant::now(),
            span,
        }
    }

    /// Close an operation and record its timing.
    pub fn finish(&self, call: ToolCall, status: ToolCallStatus) -> ToolCallRecord {
        let duration_ms = call.started.elapsed().as_millis();
        tracing::debug!(
            parent: &call.span,
            event = "tool_call.finished",
            duration_ms = duration_ms as u64,
            status = ?status,
        );
        let record = ToolCallRecord {
            correlation_id: call.id,
            operation: call.operation,
            started_at: call.started_at,
            finished_at: Utc::now(),
            duration_ms,
            status,
        };

        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record.clone());
        record
    }

    /// Most recent records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ToolCallRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let skip = records.len().saturating_sub(n);
        records.iter().skip(skip).cloned().collect()
    }

    pub fn get(&self, correlation_id: Uuid) -> Option<ToolCallRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .find(|r| r.correlation_id == correlation_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_call_gets_distinct_id() {
        let correlator = ToolCallCorrelator::default();
        let a = correlator.begin("agent:miner");
        let b = correlator.begin("agent:miner");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_finish_records_timing_under_same_id() {
        let correlator = ToolCallCorrelator::default();
        let call = correlator.begin("agent:docs");
        let id = call.id();
        let record = correlator.finish(call, ToolCallStatus::Succeeded);
        assert_eq!(record.correlation_id, id);
        assert!(record.finished_at >= record.started_at);
        assert_eq!(correlator.get(id), Some(record));
    }

    #[test]
    fn test_history_is_bounded() {
        let correlator = ToolCallCorrelator::new(2);
        for i in 0..5 {
            let call = correlator.begin(format!("op-{i}"));
            correlator.finish(call, ToolCallStatus::Failed);
        }
        let recent = correlator.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].operation, "op-3");
        assert_eq!(recent[1].operation, "op-4");
    }
}
