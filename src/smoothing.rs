//! Temporal smoothing of per-frame verdicts.
//!
//! A sliding majority-vote window plus a per-label exponential moving average of
//! confidence. A settle event fires only when the majority label changes, so a
//! steady object produces exactly one event.

use crate::config::SmoothingConfig;
use crate::types::{ClassificationVote, Label};
use std::collections::VecDeque;

/// Emitted when the window's majority label changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettleEvent {
    pub label: Label,
    /// EMA of the settled label at the moment of settling
    pub confidence: f32,
    /// Votes for the label in the window
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct TemporalSmoother {
    window: VecDeque<ClassificationVote>,
    capacity: usize,
    alpha: f32,
    ema: [f32; Label::ALL.len()],
    last_settled: Option<Label>,
}

impl TemporalSmoother {
    pub fn new(window_size: usize, alpha: f32) -> Self {
        let capacity = window_size.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            alpha: alpha.clamp(f32::EPSILON, 1.0),
            ema: [0.0; Label::ALL.len()],
            last_settled: None,
        }
    }

    pub fn from_config(config: &SmoothingConfig) -> Self {
        Self::new(config.window_size, config.ema_alpha)
    }

    /// Feed one frame verdict.
    pub fn push(&mut self, vote: ClassificationVote) -> Option<SettleEvent> {
        if vote.label == Label::NoObject {
            // object left the scene
            self.window.clear();
            self.last_settled = None;
            self.decay_all();
            return None;
        }

        for label in Label::ALL {
            let slot = &mut self.ema[label_index(label)];
            if label == vote.label {
                *slot = self.alpha * vote.confidence + (1.0 - self.alpha) * *slot;
            } else {
                *slot *= 1.0 - self.alpha;
            }
        }

        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(vote);

        let (label, count) = self.settled()?;
        if self.last_settled == Some(label) {
            return None;
        }

        self.last_settled = Some(label);
        let event = SettleEvent {
            label,
            confidence: self.ema(label),
            count,
        };
        log::debug!(
            "settled on {} ({} of {} votes, ema {:.2})",
            event.label,
            event.count,
            self.capacity,
            event.confidence
        );
        Some(event)
    }

    /// Current majority label and its count, if it exceeds half the window capacity.
    pub fn settled(&self) -> Option<(Label, usize)> {
        let mut counts = [0usize; Label::ALL.len()];
        for vote in &self.window {
            counts[label_index(vote.label)] += 1;
        }

        let (label, count) = Label::ALL
            .iter()
            .map(|&l| (l, counts[label_index(l)]))
            .filter(|&(_, c)| c > 0)
            .max_by(|a, b| {
                a.1.cmp(&b.1)
                    .then_with(|| self.ema(a.0).total_cmp(&self.ema(b.0)))
            })?;

        (count * 2 > self.capacity).then_some((label, count))
    }

    pub fn last_settled(&self) -> Option<Label> {
        self.last_settled
    }

    pub fn ema(&self, label: Label) -> f32 {
        self.ema[label_index(label)]
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Forget everything, as after a camera stop or a stats reset.
    pub fn reset(&mut self) {
        self.window.clear();
        self.ema = [0.0; Label::ALL.len()];
        self.last_settled = None;
    }

    fn decay_all(&mut self) {
        for slot in &mut self.ema {
            *slot *= 1.0 - self.alpha;
        }
    }
}

impl Default for TemporalSmoother {
    fn default() -> Self {
        Self::from_config(&SmoothingConfig::default())
    }
}

fn label_index(label: Label) -> usize {
    match label {
        Label::Acceptable => 0,
        Label::Defective => 1,
        Label::Unknown => 2,
        Label::NoObject => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VoteSource;

    fn vote(label: Label, confidence: f32) -> ClassificationVote {
        ClassificationVote::new(label, confidence, VoteSource::Fused)
    }

    #[test]
    fn test_majority_settles_once() {
        let mut smoother = TemporalSmoother::new(5, 0.5);
        let sequence = [
            Label::Acceptable,
            Label::Acceptable,
            Label::Defective,
            Label::Acceptable,
            Label::Acceptable,
        ];

        let events: Vec<SettleEvent> = sequence
            .iter()
            .filter_map(|&l| smoother.push(vote(l, 0.8)))
            .collect();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].label, Label::Acceptable);
        assert_eq!(events[0].count, 3);
        assert_eq!(smoother.settled(), Some((Label::Acceptable, 4)));
        assert_eq!(smoother.last_settled(), Some(Label::Acceptable));
    }

    #[test]
    fn test_no_object_clears_window() {
        let mut smoother = TemporalSmoother::new(5, 0.5);
        for _ in 0..5 {
            smoother.push(vote(Label::Defective, 0.9));
        }
        assert_eq!(smoother.last_settled(), Some(Label::Defective));

        assert!(smoother.push(ClassificationVote::no_object()).is_none());
        assert!(smoother.is_empty());
        assert_eq!(smoother.last_settled(), None);

        assert!(smoother.push(vote(Label::Defective, 0.9)).is_none());
        assert_eq!(smoother.settled(), None);
    }

    #[test]
    fn test_resettles_after_object_leaves() {
        let mut smoother = TemporalSmoother::new(3, 0.5);
        let first: Vec<_> = (0..3).filter_map(|_| smoother.push(vote(Label::Acceptable, 0.9))).collect();
        assert_eq!(first.len(), 1);

        smoother.push(ClassificationVote::no_object());
        let second: Vec<_> = (0..3).filter_map(|_| smoother.push(vote(Label::Acceptable, 0.9))).collect();
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_ema_update_and_decay() {
        let mut smoother = TemporalSmoother::new(5, 0.5);
        smoother.push(vote(Label::Acceptable, 1.0));
        assert!((smoother.ema(Label::Acceptable) - 0.5).abs() < 1e-6);

        smoother.push(vote(Label::Defective, 0.8));
        assert!((smoother.ema(Label::Acceptable) - 0.25).abs() < 1e-6);
        assert!((smoother.ema(Label::Defective) - 0.4).abs() < 1e-6);

        smoother.push(ClassificationVote::no_object());
        assert!((smoother.ema(Label::Defective) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_split_window_does_not_settle() {
        let mut smoother = TemporalSmoother::new(4, 0.5);
        smoother.push(vote(Label::Defective, 0.2));
        smoother.push(vote(Label::Acceptable, 0.9));
        smoother.push(vote(Label::Defective, 0.2));
        smoother.push(vote(Label::Acceptable, 0.9));
        assert_eq!(smoother.settled(), None);
        assert_eq!(smoother.last_settled(), None);
    }

    #[test]
    fn test_settle_confidence_is_ema() {
        let mut smoother = TemporalSmoother::new(1, 0.5);
        let event = smoother.push(vote(Label::Defective, 0.6)).unwrap();
        assert_eq!(event.label, Label::Defective);
        assert!((event.confidence - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut smoother = TemporalSmoother::new(3, 0.5);
        for _ in 0..3 {
            smoother.push(vote(Label::Acceptable, 0.9));
        }
        let flipped: Vec<_> = (0..2).filter_map(|_| smoother.push(vote(Label::Defective, 0.9))).collect();
        assert_eq!(smoother.len(), 3);
        assert_eq!(flipped.len(), 1);
        assert_eq!(flipped[0].label, Label::Defective);
    }

    #[test]
    fn test_reset() {
        let mut smoother = TemporalSmoother::default();
        for _ in 0..5 {
            smoother.push(vote(Label::Acceptable, 0.9));
        }
        smoother.reset();
        assert!(smoother.is_empty());
        assert_eq!(smoother.last_settled(), None);
        assert_eq!(smoother.ema(Label::Acceptable), 0.0);
    }
}
