use std::cell::Cell;

use report_harvest::error::HarvestError;
use report_harvest::logging::LogContext;
use report_harvest::retry::{Release, RetryExecutor, RetryPolicy};

#[derive(Default)]
struct Session {
    releases: usize,
    fail_release: bool,
}

impl Release for Session {
    fn release(&mut self) -> Result<(), HarvestError> {
        self.releases += 1;
        if self.fail_release {
            return Err(HarvestError::Interaction("session already gone".to_string()));
        }
        Ok(())
    }
}

fn executor(attempts: u32) -> RetryExecutor {
    RetryExecutor::new(RetryPolicy::immediate(attempts), LogContext::detached())
}

#[test]
fn stops_at_first_success() {
    let calls = Cell::new(0);
    let value = executor(3)
        .run("flaky", || {
            calls.set(calls.get() + 1);
            if calls.get() < 2 { Err("not yet") } else { Ok(42) }
        })
        .unwrap();
    assert_eq!(value, 42);
    assert_eq!(calls.get(), 2);
}

#[test]
fn never_exceeds_attempt_budget_and_returns_last_error() {
    let calls = Cell::new(0);
    let err = executor(3)
        .run("always failing", || -> Result<(), String> {
            calls.set(calls.get() + 1);
            Err(format!("failure {}", calls.get()))
        })
        .unwrap_err();
    assert_eq!(calls.get(), 3);
    assert_eq!(err, "failure 3");
}

#[test]
fn releases_resource_only_after_exhaustion() {
    let mut session = Session::default();
    let result: Result<(), &str> = executor(2).run_with("select", &mut session, |_| Err("boom"));
    assert_eq!(result, Err("boom"));
    assert_eq!(session.releases, 1);

    let mut session = Session::default();
    let result: Result<u8, &str> = executor(2).run_with("select", &mut session, |_| Ok(1));
    assert_eq!(result, Ok(1));
    assert_eq!(session.releases, 0);
}

#[test]
fn release_failure_does_not_mask_original_error() {
    let mut session = Session {
        fail_release: true,
        ..Session::default()
    };
    let result: Result<(), &str> = executor(1).run_with("trigger", &mut session, |_| Err("original"));
    assert_eq!(result, Err("original"));
    assert_eq!(session.releases, 1);
}
