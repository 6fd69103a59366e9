//! Per-state wall-clock accounting.

use crate::state::StateKind;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// States taking more than this share of the run are flagged.
pub const BOTTLENECK_SHARE: f64 = 0.05;

/// Durations of every state visit, keyed by state.
#[derive(Clone, Debug, Default)]
pub struct StateTimings {
    durations: BTreeMap<StateKind, Vec<Duration>>,
    current: Option<(StateKind, Instant)>,
}

impl StateTimings {
    /// Start timing a visit; an open visit is closed first.
    pub fn enter(&mut self, kind: StateKind) {
        self.exit();
        self.current = Some((kind, Instant::now()));
    }

    /// Close the open visit, if any.
    pub fn exit(&mut self) -> Option<Duration> {
        let (kind, started) = self.current.take()?;
        let elapsed = started.elapsed();
        self.record(kind, elapsed);
        Some(elapsed)
    }

    /// State of the open visit.
    pub fn current(&self) -> Option<StateKind> {
        self.current.map(|(kind, _)| kind)
    }

    pub fn record(&mut self, kind: StateKind, elapsed: Duration) {
        self.durations.entry(kind).or_default().push(elapsed);
    }

    pub fn durations(&self, kind: StateKind) -> &[Duration] {
        self.durations.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn visits(&self, kind: StateKind) -> usize {
        self.durations(kind).len()
    }

    pub fn report(&self) -> TimingReport {
        let total: Duration = self.durations.values().flatten().sum();
        let total_s = total.as_secs_f64();

        let mut states: Vec<StateTimingSummary> = self
            .durations
            .iter()
            .filter(|(_, d)| !d.is_empty())
            .map(|(&state, d)| {
                let sum: Duration = d.iter().sum();
                let share = if total_s > 0.0 {
                    sum.as_secs_f64() / total_s
                } else {
                    0.0
                };
                StateTimingSummary {
                    state,
                    visits: d.len(),
                    total_s: sum.as_secs_f64(),
                    mean_s: sum.as_secs_f64() / d.len() as f64,
                    min_s: d.iter().min().map_or(0.0, Duration::as_secs_f64),
                    max_s: d.iter().max().map_or(0.0, Duration::as_secs_f64),
                    share,
                    bottleneck: share > BOTTLENECK_SHARE,
                }
            })
            .collect();
        states.sort_by(|a, b| b.total_s.total_cmp(&a.total_s));

        TimingReport { total_s, states }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateTimingSummary {
    pub state: StateKind,
    pub visits: usize,
    pub total_s: f64,
    pub mean_s: f64,
    pub min_s: f64,
    pub max_s: f64,
    /// Fraction of the whole run.
    pub share: f64,
    pub bottleneck: bool,
}

/// Post-run breakdown, most expensive state first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingReport {
    pub total_s: f64,
    pub states: Vec<StateTimingSummary>,
}

impl TimingReport {
    pub fn bottlenecks(&self) -> impl Iterator<Item = &StateTimingSummary> {
        self.states.iter().filter(|s| s.bottleneck)
    }

    pub fn log(&self) {
        info!("calibration timing: {:.3}s total", self.total_s);
        for s in &self.states {
            info!(
                "  {:<26} {:>3} visits  total {:8.3}s  mean {:7.3}s  min {:7.3}s  max {:7.3}s  {:5.1}%{}",
                s.state.name(),
                s.visits,
                s.total_s,
                s.mean_s,
                s.min_s,
                s.max_s,
                s.share * 100.0,
                if s.bottleneck { "  <- bottleneck" } else { "" }
            );
        }
    }
}
