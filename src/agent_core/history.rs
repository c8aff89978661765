//! Bounded, append-safe history buffers.
//!
//! [`BoundedLog`] is a fixed-capacity ring buffer behind a mutex: appends
//! never block on anything but the lock, and the oldest entry is evicted when
//! full. [`RoutingHistory`] wraps one for routing decisions and computes
//! usage statistics over whatever is currently retained.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use super::types::RoutingDecision;

// ─── BoundedLog ─────────────────────────────────────────────────────────────

/// Fixed-capacity ring buffer with serialized appends.
#[derive(Debug)]
pub struct BoundedLog<T> {
    capacity: usize,
    entries: Mutex<VecDeque<T>>,
}

impl<T: Clone> BoundedLog<T> {
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    // A poisoned lock only means a panic happened mid-append elsewhere; the
    // deque itself is still structurally valid.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Append, evicting the oldest entry when full.
    pub fn push(&self, entry: T) {
        let mut entries = self.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Up to `n` most recent entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<T> {
        self.lock().iter().rev().take(n).cloned().collect()
    }

    /// All retained entries, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

// ─── RoutingHistory ─────────────────────────────────────────────────────────

/// Aggregate view over the retained routing decisions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoutingStats {
    pub total: usize,
    pub per_agent: BTreeMap<String, usize>,
    pub average_confidence: f32,
    pub fallback_count: usize,
}

/// Ring buffer of routing decisions.
#[derive(Debug)]
pub struct RoutingHistory {
    log: BoundedLog<RoutingDecision>,
}

impl RoutingHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            log: BoundedLog::new(capacity),
        }
    }

    pub fn record(&self, decision: RoutingDecision) {
        self.log.push(decision);
    }

    /// Newest first.
    pub fn recent(&self, n: usize) -> Vec<RoutingDecision> {
        self.log.recent(n)
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn clear(&self) {
        self.log.clear();
    }

    pub fn stats(&self) -> RoutingStats {
        let decisions = self.log.snapshot();
        if decisions.is_empty() {
            return RoutingStats::default();
        }

        let mut per_agent = BTreeMap::new();
        let mut confidence_sum = 0.0f32;
        let mut fallback_count = 0;
        for d in &decisions {
            *per_agent.entry(d.selected_agent.to_string()).or_insert(0) += 1;
            confidence_sum += d.confidence;
            if d.fallback {
                fallback_count += 1;
            }
        }

        RoutingStats {
            total: decisions.len(),
            per_agent,
            average_confidence: confidence_sum / decisions.len() as f32,
            fallback_count,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agent_core::types::{AgentKind, TaskType};

    fn decision(agent: AgentKind, confidence: f32, fallback: bool) -> RoutingDecision {
        RoutingDecision {
            selected_agent: agent,
            task_type: TaskType::CodeRefactor,
            confidence,
            reasoning: String::new(),
            fallback,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn evicts_oldest_when_full() {
        let log = BoundedLog::new(3);
        for i in 0..5 {
            log.push(i);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.snapshot(), vec![2, 3, 4]);
        assert_eq!(log.recent(2), vec![4, 3]);
    }

    #[test]
    fn zero_capacity_keeps_one() {
        let log = BoundedLog::new(0);
        log.push("a");
        log.push("b");
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.snapshot(), vec!["b"]);
    }

    #[test]
    fn stats_count_agents_and_fallbacks() {
        let history = RoutingHistory::new(10);
        history.record(decision(AgentKind::CodeAssistant, 0.9, false));
        history.record(decision(AgentKind::CodeAssistant, 0.7, false));
        history.record(decision(AgentKind::GeneralAssistant, 0.2, true));

        let stats = history.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.per_agent.get("code_assistant"), Some(&2));
        assert_eq!(stats.fallback_count, 1);
        assert!((stats.average_confidence - 0.6).abs() < 1e-5);
        assert_eq!(stats.per_agent.get("general_assistant"), Some(&1));
    }

    #[test]
    fn concurrent_appends_are_not_lost_below_capacity() {
        let history = Arc::new(RoutingHistory::new(1000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let h = Arc::clone(&history);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        h.record(decision(AgentKind::Translator, 0.8, false));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(history.len(), 400);
    }

    #[test]
    fn empty_history_has_zero_stats() {
        let stats = RoutingHistory::new(5).stats();
        assert_eq!(stats, RoutingStats::default());
    }
}
