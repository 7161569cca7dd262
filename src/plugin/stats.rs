//! Diagnostic counters. Monotonic and relaxed; readers may see a slightly
//! stale view while writers are active.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::ConflictRecord;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Counter {
    Lifecycle,
    RenderHook,
    ExtensionCall,
    ExtensionFallback,
    Error,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    lifecycle_calls: AtomicU64,
    render_hook_calls: AtomicU64,
    extension_calls: AtomicU64,
    extension_fallbacks: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn cell(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Lifecycle => &self.lifecycle_calls,
            Counter::RenderHook => &self.render_hook_calls,
            Counter::ExtensionCall => &self.extension_calls,
            Counter::ExtensionFallback => &self.extension_fallbacks,
            Counter::Error => &self.errors,
        }
    }

    fn bump(&self, counter: Counter) {
        self.cell(counter).fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            lifecycle_calls: self.lifecycle_calls.load(Ordering::Relaxed),
            render_hook_calls: self.render_hook_calls.load(Ordering::Relaxed),
            extension_calls: self.extension_calls.load(Ordering::Relaxed),
            extension_fallbacks: self.extension_fallbacks.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Aggregate plus one set of counters per plugin, indexed like the sorted plugin list
#[derive(Debug, Default)]
pub(crate) struct Stats {
    total: Counters,
    per_plugin: Vec<(String, Counters)>,
}

impl Stats {
    pub(crate) fn new(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            total: Counters::default(),
            per_plugin: names.into_iter().map(|n| (n, Counters::default())).collect(),
        }
    }

    pub(crate) fn record(&self, plugin: usize, counter: Counter) {
        self.total.bump(counter);
        if let Some((_, counters)) = self.per_plugin.get(plugin) {
            counters.bump(counter);
        }
    }

    pub(crate) fn snapshot(&self, conflicts: &[ConflictRecord]) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total.snapshot(),
            plugins: self
                .per_plugin
                .iter()
                .map(|(name, counters)| PluginCounters {
                    name: name.clone(),
                    counters: counters.snapshot(),
                })
                .collect(),
            conflicts: conflicts.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub lifecycle_calls: u64,
    pub render_hook_calls: u64,
    pub extension_calls: u64,
    pub extension_fallbacks: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginCounters {
    pub name: String,
    pub counters: CounterSnapshot,
}

/// Point-in-time view of the runtime's observability data
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total: CounterSnapshot,
    pub plugins: Vec<PluginCounters>,
    pub conflicts: Vec<ConflictRecord>,
}

impl StatsSnapshot {
    pub fn plugin(&self, name: &str) -> Option<&CounterSnapshot> {
        self.plugins
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_updates_total_and_plugin() {
        let stats = Stats::new(["a".to_string(), "b".to_string()]);
        stats.record(1, Counter::Error);
        stats.record(1, Counter::ExtensionCall);
        stats.record(0, Counter::ExtensionCall);
        let snap = stats.snapshot(&[]);
        assert_eq!(snap.total.extension_calls, 2);
        assert_eq!(snap.total.errors, 1);
        assert_eq!(snap.plugin("b").unwrap().errors, 1);
        assert_eq!(snap.plugin("a").unwrap().errors, 0);
    }
}
