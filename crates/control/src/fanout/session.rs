// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session result table and the statistics derived from it.

use indexmap::IndexMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::fanout::EntryStatus;

/// Upper bounds (exclusive) of the latency histogram buckets; the last bucket
/// is open-ended.
pub const LATENCY_BUCKETS_MS: [f64; 7] = [10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at_ms: Option<u64>,
}

impl Entry {
    fn pending() -> Self {
        Self { status: EntryStatus::Pending, latency_ms: None, error: None, resolved_at_ms: None }
    }
}

/// One operator-initiated fan-out.
#[derive(Debug, Clone)]
pub struct TestSession {
    pub id: String,
    pub owner_id: String,
    pub target: String,
    pub created_at_ms: u64,
    pub deadline_at_ms: u64,
    pub completed_at_ms: Option<u64>,
    /// Dispatch instant, for round-trip latency and the deadline timer.
    pub started: Instant,
    entries: IndexMap<String, Entry>,
}

impl TestSession {
    pub fn new(
        id: String,
        owner_id: String,
        target: String,
        agents: impl IntoIterator<Item = String>,
        created_at_ms: u64,
        deadline_at_ms: u64,
    ) -> Self {
        let entries: IndexMap<String, Entry> =
            agents.into_iter().map(|agent| (agent, Entry::pending())).collect();
        let completed_at_ms = entries.is_empty().then_some(created_at_ms);
        Self {
            id,
            owner_id,
            target,
            created_at_ms,
            deadline_at_ms,
            completed_at_ms,
            started: Instant::now(),
            entries,
        }
    }

    pub fn entry(&self, agent_id: &str) -> Option<&Entry> {
        self.entries.get(agent_id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.entries.values().filter(|e| e.status == EntryStatus::Pending).count()
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at_ms.is_some()
    }

    /// Move a pending entry to a terminal status.
    ///
    /// Returns `false` for unknown agents and entries that are already
    /// terminal; those updates are dropped.
    pub fn resolve(
        &mut self,
        agent_id: &str,
        status: EntryStatus,
        latency_ms: Option<f64>,
        error: Option<String>,
        now_ms: u64,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(agent_id) else {
            return false;
        };
        if entry.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        *entry = Entry { status, latency_ms, error, resolved_at_ms: Some(now_ms) };
        true
    }

    /// Time out every pending entry. Returns the affected agents.
    pub fn expire(&mut self, now_ms: u64) -> Vec<String> {
        let mut expired = Vec::new();
        for (agent, entry) in &mut self.entries {
            if entry.status == EntryStatus::Pending {
                *entry = Entry {
                    status: EntryStatus::Timeout,
                    latency_ms: None,
                    error: Some("no reply before deadline".into()),
                    resolved_at_ms: Some(now_ms),
                };
                expired.push(agent.clone());
            }
        }
        expired
    }

    /// Stamp completion once nothing is pending. Returns `true` only on the
    /// call that completes the session.
    pub fn finish_if_done(&mut self, now_ms: u64) -> bool {
        if self.completed_at_ms.is_some() || self.pending() > 0 {
            return false;
        }
        self.completed_at_ms = Some(now_ms);
        true
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts { total: self.entries.len(), ..StatusCounts::default() };
        for entry in self.entries.values() {
            match entry.status {
                EntryStatus::Pending => counts.pending += 1,
                EntryStatus::Success => counts.success += 1,
                EntryStatus::Failed => counts.failed += 1,
                EntryStatus::Timeout => counts.timeout += 1,
            }
        }
        counts
    }

    fn success_latencies(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().filter_map(|(agent, e)| match (e.status, e.latency_ms) {
            (EntryStatus::Success, Some(latency)) => Some((agent.as_str(), latency)),
            _ => None,
        })
    }

    /// Average/min/max over `success` entries only.
    pub fn latency(&self) -> LatencyStats {
        let mut stats = LatencyStats::default();
        let mut sum = 0.0;
        for (_, latency) in self.success_latencies() {
            stats.count += 1;
            sum += latency;
            stats.min_ms = Some(stats.min_ms.map_or(latency, |m: f64| m.min(latency)));
            stats.max_ms = Some(stats.max_ms.map_or(latency, |m: f64| m.max(latency)));
        }
        if stats.count > 0 {
            stats.avg_ms = Some(sum / stats.count as f64);
        }
        stats
    }

    pub fn histogram(&self) -> Vec<HistogramBucket> {
        let mut buckets: Vec<HistogramBucket> = Vec::with_capacity(LATENCY_BUCKETS_MS.len() + 1);
        let mut lower = 0.0;
        for upper in LATENCY_BUCKETS_MS {
            buckets.push(HistogramBucket { lower_ms: lower, upper_ms: Some(upper), count: 0 });
            lower = upper;
        }
        buckets.push(HistogramBucket { lower_ms: lower, upper_ms: None, count: 0 });

        for (_, latency) in self.success_latencies() {
            let idx = LATENCY_BUCKETS_MS
                .iter()
                .position(|&upper| latency < upper)
                .unwrap_or(LATENCY_BUCKETS_MS.len());
            buckets[idx].count += 1;
        }
        buckets
    }

    /// The `n` fastest successful agents, ascending.
    pub fn fastest(&self, n: usize) -> Vec<RankedEntry> {
        let mut ranked: Vec<(&str, f64)> = self.success_latencies().collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        ranked
            .into_iter()
            .take(n)
            .map(|(agent, latency_ms)| RankedEntry { agent_id: agent.to_owned(), latency_ms })
            .collect()
    }

    pub fn results(&self, top_n: usize) -> SessionResults {
        SessionResults {
            session_id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            target: self.target.clone(),
            created_at_ms: self.created_at_ms,
            deadline_at_ms: self.deadline_at_ms,
            completed_at_ms: self.completed_at_ms,
            complete: self.is_complete(),
            entries: self
                .entries
                .iter()
                .map(|(agent, entry)| EntryView { agent_id: agent.clone(), entry: entry.clone() })
                .collect(),
            stats: SessionStats {
                counts: self.counts(),
                latency: self.latency(),
                histogram: self.histogram(),
                fastest: self.fastest(top_n),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub success: usize,
    pub failed: usize,
    pub timeout: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: usize,
    pub avg_ms: Option<f64>,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramBucket {
    pub lower_ms: f64,
    /// `None` for the open-ended last bucket.
    pub upper_ms: Option<f64>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    pub agent_id: String,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub counts: StatusCounts,
    pub latency: LatencyStats,
    pub histogram: Vec<HistogramBucket>,
    pub fastest: Vec<RankedEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryView {
    pub agent_id: String,
    #[serde(flatten)]
    pub entry: Entry,
}

/// Snapshot returned to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionResults {
    pub session_id: String,
    pub owner_id: String,
    pub target: String,
    pub created_at_ms: u64,
    pub deadline_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    pub complete: bool,
    pub entries: Vec<EntryView>,
    pub stats: SessionStats,
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
