/// Linear warmup from 0 to the base rate, then linear decay back to 0.
#[derive(Debug, Clone)]
pub struct LinearWarmup {
    base_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
}

impl LinearWarmup {
    pub fn new(base_lr: f64, total_steps: usize, warmup_ratio: f64) -> Self {
        let warmup_steps = (total_steps as f64 * warmup_ratio.max(0.0)).ceil() as usize;
        Self {
            base_lr,
            warmup_steps,
            total_steps,
        }
    }

    pub fn warmup_steps(&self) -> usize {
        self.warmup_steps
    }

    /// Learning rate for the optimizer step with index `step` (0-based).
    pub fn lr_at(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return self.base_lr * step as f64 / self.warmup_steps.max(1) as f64;
        }
        let remaining = self.total_steps.saturating_sub(step) as f64;
        let decay = (self.total_steps - self.warmup_steps.min(self.total_steps)).max(1) as f64;
        self.base_lr * (remaining / decay).max(0.0)
    }
}

/// Stops after `patience` evaluations in a row without a strictly better
/// metric.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: Option<f64>,
    stale: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: None,
            stale: 0,
        }
    }

    /// Records a metric; returns true when it is a new best.
    pub fn observe(&mut self, metric: f64) -> bool {
        match self.best {
            Some(best) if metric <= best => {
                self.stale += 1;
                false
            }
            _ => {
                self.best = Some(metric);
                self.stale = 0;
                true
            }
        }
    }

    pub fn should_stop(&self) -> bool {
        self.patience > 0 && self.stale >= self.patience
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }
}
