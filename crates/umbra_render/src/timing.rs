//! Per-pass timing history
//!
//! Keeps the last value and a rolling average for every pass plus the whole
//! frame, fed from the [`FrameStats`] the backend reports.

use std::collections::VecDeque;
use std::time::Duration;

use crate::backend::FrameStats;
use crate::config::ShadowAlgorithm;
use crate::pass::PassId;

/// Rolling timing of one measured span
#[derive(Debug, Clone)]
pub struct SpanTiming {
    last: Duration,
    history: VecDeque<Duration>,
    history_size: usize,
    samples: u64,
}

impl SpanTiming {
    fn new(history_size: usize) -> Self {
        Self {
            last: Duration::ZERO,
            history: VecDeque::with_capacity(history_size),
            history_size,
            samples: 0,
        }
    }

    fn record(&mut self, value: Duration) {
        self.last = value;
        if self.history.len() >= self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(value);
        self.samples += 1;
    }

    /// Most recent value
    pub fn last(&self) -> Duration {
        self.last
    }

    /// Average over the history window
    pub fn average(&self) -> Duration {
        if self.history.is_empty() {
            Duration::ZERO
        } else {
            let sum: Duration = self.history.iter().sum();
            sum / self.history.len() as u32
        }
    }

    /// Total number of values recorded
    pub fn samples(&self) -> u64 {
        self.samples
    }
}

/// Timing of every pass
#[derive(Debug, Clone)]
pub struct PassTimings {
    passes: Vec<SpanTiming>,
    total: SpanTiming,
}

impl Default for PassTimings {
    fn default() -> Self {
        Self::new(120)
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl PassTimings {
    /// Create with a history window of `history_size` frames
    pub fn new(history_size: usize) -> Self {
        let history_size = history_size.max(1);
        Self {
            passes: (0..PassId::COUNT).map(|_| SpanTiming::new(history_size)).collect(),
            total: SpanTiming::new(history_size),
        }
    }

    /// Fold in a frame's measurements
    pub fn record(&mut self, stats: &FrameStats) {
        for (pass, time) in &stats.pass_times {
            self.passes[pass.index()].record(*time);
        }
        if let Some(total) = stats.total {
            self.total.record(total);
        }
    }

    pub fn pass(&self, pass: PassId) -> &SpanTiming {
        &self.passes[pass.index()]
    }

    /// Last measured value, `None` if the pass never reported
    pub fn last(&self, pass: PassId) -> Option<Duration> {
        let t = self.pass(pass);
        (t.samples() > 0).then(|| t.last())
    }

    pub fn average(&self, pass: PassId) -> Option<Duration> {
        let t = self.pass(pass);
        (t.samples() > 0).then(|| t.average())
    }

    pub fn total(&self) -> &SpanTiming {
        &self.total
    }

    /// Report lines in milliseconds for `algorithm`'s passes
    pub fn report(&self, algorithm: ShadowAlgorithm) -> Vec<String> {
        let mut lines = vec![format!(
            "Total time [ms]: {:.4} (avg {:.4})",
            ms(self.total.last()),
            ms(self.total.average())
        )];
        for (i, pass) in PassId::sequence(algorithm).iter().enumerate() {
            let t = self.pass(*pass);
            if t.samples() == 0 {
                continue;
            }
            lines.push(format!(
                "{}. {} [ms]: {:.4} (avg {:.4})",
                i + 1,
                pass.title(),
                ms(t.last()),
                ms(t.average())
            ));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(pass: PassId, micros: u64) -> FrameStats {
        FrameStats {
            pass_times: vec![(pass, Duration::from_micros(micros))],
            total: Some(Duration::from_micros(micros * 2)),
            ..Default::default()
        }
    }

    #[test]
    fn test_last_and_average() {
        let mut t = PassTimings::new(4);
        t.record(&stats(PassId::ShadowTest, 100));
        t.record(&stats(PassId::ShadowTest, 300));
        assert_eq!(t.last(PassId::ShadowTest), Some(Duration::from_micros(300)));
        assert_eq!(t.average(PassId::ShadowTest), Some(Duration::from_micros(200)));
        assert_eq!(t.last(PassId::RenderScene), None);
        assert_eq!(t.total().last(), Duration::from_micros(600));
    }

    #[test]
    fn test_history_window() {
        let mut t = PassTimings::new(2);
        for micros in [100, 200, 400] {
            t.record(&stats(PassId::RenderScene, micros));
        }
        assert_eq!(t.average(PassId::RenderScene), Some(Duration::from_micros(300)));
        assert_eq!(t.pass(PassId::RenderScene).samples(), 3);
    }

    #[test]
    fn test_history_drops_oldest_first() {
        let mut t = PassTimings::new(4);
        for micros in 0..100 {
            t.record(&stats(PassId::ShadowTest, micros));
        }
        assert_eq!(t.average(PassId::ShadowTest), Some(Duration::from_nanos(97_500)));
        assert_eq!(t.last(PassId::ShadowTest), Some(Duration::from_micros(99)));
    }

    #[test]
    fn test_report_numbering() {
        let mut t = PassTimings::default();
        for pass in PassId::sequence(ShadowAlgorithm::AliasFree) {
            t.record(&stats(*pass, 1000));
        }
        let lines = t.report(ShadowAlgorithm::AliasFree);
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("Total time [ms]"));
        assert!(lines[1].starts_with("1. Visibility map generation [ms]: 1.0000"));
        assert!(lines[2].starts_with("2. List buffer generation"));
        assert!(lines[3].starts_with("3. Shadow test"));
        assert!(lines[4].starts_with("4. Render scene"));
    }
}
