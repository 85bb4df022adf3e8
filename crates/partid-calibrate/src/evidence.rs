// crates/partid-calibrate/src/evidence.rs
//
// Decay-weighted per-modality accuracy from QA feedback.
//
// Each event says whether the text ranking and the visual ranking "scored":
// a modality scores when its top-1 agreed with the resolved entry and the
// resolution was correct, or disagreed and the resolution was wrong. Older
// events count less: weight = 0.5^(age / half_life).

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

/// One tagged feedback event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvidenceEvent {
    pub at: DateTime<Utc>,
    pub text_scored: bool,
    pub visual_scored: bool,
}

/// Aggregate of the current evidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvidenceSummary {
    pub text_accuracy: f64,
    pub visual_accuracy: f64,
    /// Kish effective sample size of the decay weights.
    pub effective_samples: f64,
    /// Standard error of `text_accuracy - visual_accuracy`.
    pub standard_error: f64,
}

impl EvidenceSummary {
    pub fn delta(&self) -> f64 {
        self.text_accuracy - self.visual_accuracy
    }
}

/// Exponential decay weight of an event `age` old.
pub fn decay_weight(age: Duration, half_life: Duration) -> f64 {
    let half_life_secs = half_life.num_milliseconds() as f64 / 1000.0;
    if half_life_secs <= 0.0 {
        return 0.0;
    }
    let age_secs = (age.num_milliseconds().max(0)) as f64 / 1000.0;
    0.5_f64.powf(age_secs / half_life_secs)
}

#[derive(Debug, Clone, Default)]
pub struct EvidenceWindow {
    events: VecDeque<EvidenceEvent>,
}

impl EvidenceWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: EvidenceEvent) {
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Drop events older than `window` before `now`.
    pub fn expire(&mut self, now: DateTime<Utc>, window: Duration) {
        let cutoff = now - window;
        self.events.retain(|e| e.at >= cutoff);
    }

    pub fn summarize(&self, now: DateTime<Utc>, half_life: Duration) -> EvidenceSummary {
        let mut sum_w = 0.0;
        let mut sum_w2 = 0.0;
        let mut text = 0.0;
        let mut visual = 0.0;
        for e in &self.events {
            let w = decay_weight(now - e.at, half_life);
            sum_w += w;
            sum_w2 += w * w;
            if e.text_scored {
                text += w;
            }
            if e.visual_scored {
                visual += w;
            }
        }
        if sum_w <= 0.0 {
            return EvidenceSummary {
                text_accuracy: 0.0,
                visual_accuracy: 0.0,
                effective_samples: 0.0,
                standard_error: f64::INFINITY,
            };
        }

        let p_t = text / sum_w;
        let p_v = visual / sum_w;
        let n_eff = sum_w * sum_w / sum_w2;
        let variance = (p_t * (1.0 - p_t) + p_v * (1.0 - p_v)) / n_eff;
        EvidenceSummary {
            text_accuracy: p_t,
            visual_accuracy: p_v,
            effective_samples: n_eff,
            standard_error: variance.sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decay_half_life() {
        let w = decay_weight(Duration::hours(6), Duration::hours(6));
        assert!((w - 0.5).abs() < 1e-10);
        assert!((decay_weight(Duration::zero(), Duration::hours(6)) - 1.0).abs() < 1e-10);
        assert_eq!(decay_weight(Duration::hours(1), Duration::zero()), 0.0);
    }

    #[test]
    fn test_summary_accuracies() {
        let now = Utc::now();
        let mut w = EvidenceWindow::new();
        for i in 0..10 {
            w.push(EvidenceEvent {
                at: now,
                text_scored: true,
                visual_scored: i < 5,
            });
        }
        let s = w.summarize(now, Duration::hours(6));
        assert!((s.text_accuracy - 1.0).abs() < 1e-10);
        assert!((s.visual_accuracy - 0.5).abs() < 1e-10);
        assert!((s.effective_samples - 10.0).abs() < 1e-9);
        assert!((s.delta() - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_old_events_weigh_less() {
        let now = Utc::now();
        let mut w = EvidenceWindow::new();
        w.push(EvidenceEvent {
            at: now - Duration::hours(48),
            text_scored: false,
            visual_scored: true,
        });
        w.push(EvidenceEvent {
            at: now,
            text_scored: true,
            visual_scored: false,
        });
        let s = w.summarize(now, Duration::hours(6));
        assert!(s.text_accuracy > 0.99);
        assert!(s.effective_samples < 1.1);
    }

    #[test]
    fn test_expire() {
        let now = Utc::now();
        let mut w = EvidenceWindow::new();
        w.push(EvidenceEvent {
            at: now - Duration::hours(100),
            text_scored: true,
            visual_scored: true,
        });
        w.push(EvidenceEvent {
            at: now,
            text_scored: true,
            visual_scored: true,
        });
        w.expire(now, Duration::hours(72));
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn test_empty_summary() {
        let s = EvidenceWindow::new().summarize(Utc::now(), Duration::hours(6));
        assert_eq!(s.effective_samples, 0.0);
    }
}
