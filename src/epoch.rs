use std::time::Instant;

/// Source of integer millisecond timestamps, relative to the moment an endpoint started.
pub struct Epoch {
    time_base: Instant,
}

impl Epoch {
    pub fn new() -> Self {
        Self {
            time_base: Instant::now(),
        }
    }

    pub fn time_now_ms(&self) -> u64 {
        self.time_base.elapsed().as_millis() as u64
    }

    /// Returns the milliseconds elapsed since `*last_ms` and moves `*last_ms` to now.
    pub fn lap_ms(&self, last_ms: &mut u64) -> u64 {
        let now_ms = self.time_now_ms();
        let delta_ms = now_ms.saturating_sub(*last_ms);
        *last_ms = now_ms;
        delta_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lap_advances_reference() {
        let epoch = Epoch::new();
        let mut last_ms = 0;

        std::thread::sleep(std::time::Duration::from_millis(20));

        let first = epoch.lap_ms(&mut last_ms);
        assert!(first >= 20);
        assert_eq!(last_ms, first);

        let second = epoch.lap_ms(&mut last_ms);
        assert!(second < 20);
    }
}
