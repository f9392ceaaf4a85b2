//! Wall-clock abstraction so the tick driver can run against a fake clock.

use time::OffsetDateTime;

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// The real UTC clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock that starts at a fixed instant and advances by `step` on every read,
/// optionally jumping once by `offset` on read number `at`.
#[cfg(test)]
pub struct SteppingClock {
    inner: std::sync::Mutex<Stepping>,
    step: time::Duration,
    jump: Option<(usize, time::Duration)>,
}

#[cfg(test)]
struct Stepping {
    next: OffsetDateTime,
    reads: usize,
}

#[cfg(test)]
impl SteppingClock {
    pub fn new(start: OffsetDateTime, step: time::Duration) -> Self {
        Self {
            inner: std::sync::Mutex::new(Stepping {
                next: start,
                reads: 0,
            }),
            step,
            jump: None,
        }
    }

    pub fn with_jump(mut self, at: usize, offset: time::Duration) -> Self {
        self.jump = Some((at, offset));
        self
    }
}

#[cfg(test)]
impl Clock for SteppingClock {
    fn now(&self) -> OffsetDateTime {
        let mut inner = self.inner.lock().unwrap();
        if let Some((at, offset)) = self.jump {
            if inner.reads == at {
                inner.next += offset;
            }
        }
        inner.reads += 1;
        let now = inner.next;
        inner.next = now + self.step;
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn stepping_clock_jumps_once() {
        let clock = SteppingClock::new(datetime!(2025-10-06 4:00 UTC), time::Duration::SECOND)
            .with_jump(2, time::Duration::seconds(-5));
        let reads: Vec<i64> = (0..4)
            .map(|_| clock.now().unix_timestamp() - datetime!(2025-10-06 4:00 UTC).unix_timestamp())
            .collect();
        assert_eq!(reads, vec![0, 1, -3, -2]);
    }
}
