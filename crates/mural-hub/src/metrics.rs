//! Minimal labeled metrics for the hub, rendered in Prometheus text
//! exposition format. No external metrics dependency; counters and gauges
//! over `DashMap` with sorted label keys for deterministic output.

use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn label_key(labels: &[(&str, &str)]) -> Vec<(String, String)> {
    let mut key: Vec<(String, String)> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort();
    key
}

fn render_line(out: &mut String, name: &str, key: &[(String, String)], val: i64) {
    let labels = key
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label(v)))
        .collect::<Vec<_>>()
        .join(",");
    if labels.is_empty() {
        let _ = writeln!(out, "{name} {val}");
    } else {
        let _ = writeln!(out, "{name}{{{labels}}} {val}");
    }
}

#[derive(Default)]
pub struct CounterVec {
    map: DashMap<Vec<(String, String)>, AtomicU64>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {name} counter");
        for r in self.map.iter() {
            render_line(out, name, r.key(), r.value().load(Ordering::Relaxed) as i64);
        }
    }
}

#[derive(Default)]
pub struct GaugeVec {
    map: DashMap<Vec<(String, String)>, AtomicI64>,
}

impl GaugeVec {
    pub fn add(&self, labels: &[(&str, &str)], v: i64) {
        self.map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(v, Ordering::Relaxed);
    }

    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn dec(&self, labels: &[(&str, &str)]) {
        self.add(labels, -1);
    }

    pub fn set(&self, labels: &[(&str, &str)], v: i64) {
        self.map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicI64::new(0))
            .store(v, Ordering::Relaxed);
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {name} gauge");
        for r in self.map.iter() {
            render_line(out, name, r.key(), r.value().load(Ordering::Relaxed));
        }
    }
}

/// Everything the hub reports.
#[derive(Default)]
pub struct HubMetrics {
    /// Commands handled, labeled by op and outcome.
    pub commands: CounterVec,
    /// Live sessions, labeled by role once known.
    pub sessions_active: GaugeVec,
    /// Image assignments attempted, labeled by outcome.
    pub placements: CounterVec,
    /// Total bytes currently held in the hub's image cache.
    pub cache_bytes: GaugeVec,
}

impl HubMetrics {
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.commands.render("mural_hub_commands_total", &mut out);
        self.sessions_active.render("mural_hub_sessions_active", &mut out);
        self.placements.render("mural_hub_placements_total", &mut out);
        self.cache_bytes.render("mural_hub_cache_bytes", &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_labeled_counters() {
        let m = HubMetrics::default();
        m.commands.inc(&[("op", "register"), ("outcome", "ok")]);
        m.commands.inc(&[("op", "register"), ("outcome", "ok")]);
        m.sessions_active.inc(&[]);
        let text = m.render();
        assert!(text.contains(r#"mural_hub_commands_total{op="register",outcome="ok"} 2"#));
        assert!(text.contains("mural_hub_sessions_active 1"));
    }

    #[test]
    fn gauge_set_overwrites() {
        let m = HubMetrics::default();
        m.cache_bytes.set(&[], 1024);
        m.cache_bytes.set(&[], 512);
        assert!(m.render().contains("mural_hub_cache_bytes 512"));
    }
}
