use std::time::Duration;

/// Smoothed round-trip estimate fed by snapshot acknowledgments.
#[derive(Debug, Clone, Copy)]
pub struct RttEstimator {
    srtt: f32,
    rtt_var: f32,
    samples: u32,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    pub fn new() -> Self {
        Self {
            srtt: 100.0,
            rtt_var: 50.0,
            samples: 0,
        }
    }

    pub fn record(&mut self, rtt: Duration) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        let rtt = rtt.as_secs_f32() * 1000.0;
        if self.samples == 0 {
            self.srtt = rtt;
            self.rtt_var = rtt / 2.0;
        } else {
            let diff = (rtt - self.srtt).abs();
            self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
            self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
        }
        self.samples = self.samples.saturating_add(1);
    }

    /// Smoothed round trip in milliseconds.
    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn ping_ms(&self) -> u32 {
        if self.samples == 0 {
            0
        } else {
            self.srtt.round() as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_seeds_estimate() {
        let mut rtt = RttEstimator::new();
        assert_eq!(rtt.ping_ms(), 0);

        rtt.record(Duration::from_millis(40));
        assert_eq!(rtt.ping_ms(), 40);
        assert_eq!(rtt.rtt_var(), 20.0);
    }

    #[test]
    fn test_smoothing_moves_toward_samples() {
        let mut rtt = RttEstimator::new();
        rtt.record(Duration::from_millis(40));
        for _ in 0..50 {
            rtt.record(Duration::from_millis(120));
        }
        assert!((rtt.srtt() - 120.0).abs() < 2.0);
        assert_eq!(rtt.samples(), 51);
    }
}
