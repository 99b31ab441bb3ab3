//! Armed threshold predicates over a sampled signal, per
//! `include/bbque/trig/trigger.h` and `trigger_overthreshold.h`: a trigger
//! fires at most once per crossing and does not re-arm until the signal
//! recrosses in the opposite direction.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    OverThreshold,
    UnderThreshold,
}

#[derive(Debug, Clone)]
pub struct Trigger {
    kind: TriggerKind,
    threshold_high: f64,
    threshold_low: f64,
    margin: f64,
    armed: bool,
}

impl Trigger {
    pub fn new(kind: TriggerKind, threshold_high: f64, threshold_low: f64, margin: f64) -> Self {
        Self {
            kind,
            threshold_high,
            threshold_low,
            margin,
            armed: true,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Feeds a new sample through the trigger. Returns `true` exactly on
    /// the sample that crosses the fire threshold while armed.
    pub fn evaluate(&mut self, sample: f64) -> bool {
        match self.kind {
            TriggerKind::OverThreshold => {
                if self.armed {
                    if sample > self.threshold_high * (1.0 - self.margin) {
                        self.armed = false;
                        return true;
                    }
                } else if sample < self.threshold_low * (1.0 - self.margin) {
                    self.armed = true;
                }
                false
            }
            TriggerKind::UnderThreshold => {
                if self.armed {
                    if sample < self.threshold_low * (1.0 + self.margin) {
                        self.armed = false;
                        return true;
                    }
                } else if sample > self.threshold_high * (1.0 + self.margin) {
                    self.armed = true;
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overtemperature_fires_once_then_rearms_per_spec_example() {
        let mut t = Trigger::new(TriggerKind::OverThreshold, 90.0, 70.0, 0.1);
        let samples = [60.0, 75.0, 86.0, 95.0, 92.0, 60.0];
        let fired: Vec<bool> = samples.iter().map(|&s| t.evaluate(s)).collect();
        assert_eq!(fired, vec![false, false, true, false, false, false]);
        assert!(t.is_armed());
    }

    #[test]
    fn underthreshold_mirrors_overthreshold() {
        let mut t = Trigger::new(TriggerKind::UnderThreshold, 90.0, 70.0, 0.1);
        assert!(!t.evaluate(80.0));
        assert!(t.evaluate(60.0)); // 60 < 70*1.1 = 77, fires
        assert!(!t.is_armed());
        assert!(!t.evaluate(95.0)); // still under rearm bound 90*1.1=99
        assert!(!t.evaluate(100.0)); // rearms, doesn't fire again
        assert!(t.is_armed());
    }
}
