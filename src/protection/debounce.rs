/// Time-accumulating debounce.
///
/// Reports a violation only once it persisted for longer than `limit`, in
/// whatever unit the caller feeds as `dt`. Any sample inside limits restarts
/// the count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Debounce {
    elapsed: u32,
    limit: u32,
}

impl Debounce {
    pub const fn new(limit: u32) -> Self {
        Self { elapsed: 0, limit }
    }

    pub fn update(&mut self, violated: bool, dt: u32) -> bool {
        if violated {
            self.elapsed = self.elapsed.saturating_add(dt);
            self.elapsed > self.limit
        } else {
            self.elapsed = 0;
            false
        }
    }

    pub fn reset(&mut self) {
        self.elapsed = 0;
    }

    pub fn elapsed(&self) -> u32 {
        self.elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_strictly_after_limit() {
        let mut d = Debounce::new(1000);
        for _ in 0..200 {
            assert!(!d.update(true, 5));
        }
        assert_eq!(d.elapsed(), 1000);
        assert!(d.update(true, 5));
    }

    #[test]
    fn clean_sample_restarts() {
        let mut d = Debounce::new(100);
        d.update(true, 90);
        assert!(!d.update(false, 10));
        assert!(!d.update(true, 90));
        assert!(d.update(true, 20));
    }

    #[test]
    fn saturates() {
        let mut d = Debounce::new(10);
        d.update(true, u32::MAX);
        assert!(d.update(true, u32::MAX));
        assert_eq!(d.elapsed(), u32::MAX);
    }
}
