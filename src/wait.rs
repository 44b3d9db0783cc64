use std::thread;
use std::time::{Duration, Instant};

/// Checks `probe` every `interval` until it yields a value or `timeout` elapses.
/// The probe always runs at least once, and once more right at the deadline, so a
/// condition that becomes true during the last sleep is not missed.
pub fn wait_until<T, F>(interval: Duration, timeout: Duration, mut probe: F) -> Option<T>
where
    F: FnMut() -> Option<T>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = probe() {
            return Some(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        thread::sleep(interval.min(deadline - now));
    }
}
