//! Rolling log-return statistics.
//!
//! Keeps the last `window` log returns of a price series and exposes their
//! volatility and a t-statistic style trend strength.

use std::collections::VecDeque;

use statrs::statistics::Statistics;

/// Cap applied to trend strength when returns have no dispersion.
pub const TREND_STRENGTH_CAP: f64 = 100.0;

/// Rolling log-return window.
pub struct RollingReturns {
    /// Window size in periods.
    window: usize,
    /// Recent log returns.
    returns: VecDeque<f64>,
    /// Previous price (for computing next return).
    prev_price: Option<f64>,
    /// Most recent return.
    last_return: f64,
    /// Running sum of returns (for mean).
    sum: f64,
    /// Running sum of squared returns (for variance).
    sum_sq: f64,
}

impl RollingReturns {
    /// Create a new rolling window.
    pub fn new(window: usize) -> Self {
        Self {
            window,
            returns: VecDeque::with_capacity(window),
            prev_price: None,
            last_return: 0.0,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    /// Add a price observation. Returns the log return it produced, if any.
    pub fn add_price(&mut self, price: f64) -> Option<f64> {
        let mut produced = None;
        if let Some(prev) = self.prev_price {
            if prev > 0.0 && price > 0.0 {
                let log_return = (price / prev).ln();
                self.add_return(log_return);
                produced = Some(log_return);
            }
        }
        self.last_return = produced.unwrap_or(0.0);
        self.prev_price = Some(price);
        produced
    }

    fn add_return(&mut self, ret: f64) {
        if self.returns.len() >= self.window {
            if let Some(old) = self.returns.pop_front() {
                self.sum -= old;
                self.sum_sq -= old * old;
            }
        }
        self.returns.push_back(ret);
        self.sum += ret;
        self.sum_sq += ret * ret;
    }

    /// Population standard deviation of returns in the window.
    pub fn volatility(&self) -> Option<f64> {
        let n = self.returns.len();
        if n < 2 {
            return None;
        }
        let n_f = n as f64;
        let mean = self.sum / n_f;
        let variance = (self.sum_sq / n_f) - (mean * mean);
        if variance <= 0.0 {
            Some(0.0)
        } else {
            Some(variance.sqrt())
        }
    }

    /// Mean return over its standard error, clamped to the cap.
    pub fn trend_strength(&self) -> f64 {
        let n = self.returns.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.returns.iter().mean();
        let std_dev = self.returns.iter().std_dev();
        if !(std_dev > 1e-12) {
            return if mean.abs() <= 1e-12 {
                0.0
            } else {
                mean.signum() * TREND_STRENGTH_CAP
            };
        }
        let t = mean / (std_dev / (n as f64).sqrt());
        t.clamp(-TREND_STRENGTH_CAP, TREND_STRENGTH_CAP)
    }

    /// Most recent log return (0 before the second price).
    pub fn last_return(&self) -> f64 {
        self.last_return
    }

    /// Check if the window is full.
    pub fn is_ready(&self) -> bool {
        self.returns.len() >= self.window
    }

    /// Get the number of returns in the window.
    pub fn count(&self) -> usize {
        self.returns.len()
    }
}
