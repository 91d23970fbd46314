//! Liveness state machine.
//!
//! A pure function that folds one probe outcome into a service record.
//! Persistence and locking live in the store; this module only decides.

use crate::db::{Service, StateChange, Status};
use chrono::{DateTime, Utc};

/// Apply one probe outcome to a service record in place.
///
/// A success resets the failure counter and forces UP. A failure increments
/// the counter (saturating at the threshold) and crosses to DOWN exactly
/// when the counter reaches the threshold. `last_checked_at` and
/// `updated_at` are stamped on every call.
///
/// Returns the transition when the stored status actually crossed.
pub fn advance(service: &mut Service, success: bool, now: DateTime<Utc>) -> Option<StateChange> {
    let previous = service.status;

    if success {
        service.status = Status::Up;
        service.consecutive_failures = 0;
    } else {
        if service.consecutive_failures < service.failure_threshold {
            service.consecutive_failures += 1;
        }
        if service.consecutive_failures >= service.failure_threshold {
            service.status = Status::Down;
        }
    }

    service.last_checked_at = Some(now);
    service.updated_at = now;

    if previous != service.status {
        Some(StateChange {
            from: previous,
            to: service.status,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Method, Protocol};

    fn service(threshold: i64) -> Service {
        let now = Utc::now();
        Service {
            id: 1,
            name: "A".to_string(),
            url: "http://x/health".to_string(),
            protocol: Protocol::Http,
            method: Method::Get,
            timeout_secs: 5,
            interval_secs: 30,
            failure_threshold: threshold,
            status: Status::Up,
            consecutive_failures: 0,
            last_checked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn invariants_hold(s: &Service) -> bool {
        let down_iff_threshold = (s.status == Status::Down)
            == (s.consecutive_failures >= s.failure_threshold);
        let up_implies_zero = s.status != Status::Up || s.consecutive_failures == 0;
        down_iff_threshold && up_implies_zero
    }

    #[test]
    fn test_success_from_up_is_quiet() {
        let mut s = service(3);
        let change = advance(&mut s, true, Utc::now());
        assert!(change.is_none());
        assert_eq!(s.status, Status::Up);
        assert_eq!(s.consecutive_failures, 0);
        assert!(s.last_checked_at.is_some());
    }

    #[test]
    fn test_three_failures_cross_down_once() {
        let mut s = service(3);
        let now = Utc::now();

        assert!(advance(&mut s, false, now).is_none());
        assert!(advance(&mut s, false, now).is_none());
        let change = advance(&mut s, false, now).expect("third failure crosses");

        assert_eq!(change.from, Status::Up);
        assert_eq!(change.to, Status::Down);
        assert_eq!(s.status, Status::Down);
        assert_eq!(s.consecutive_failures, 3);
        assert!(invariants_hold(&s));
    }

    #[test]
    fn test_recovery_is_single_probe() {
        let mut s = service(3);
        let now = Utc::now();
        for _ in 0..3 {
            advance(&mut s, false, now);
        }

        let change = advance(&mut s, true, now).expect("success while down recovers");
        assert_eq!(change.from, Status::Down);
        assert_eq!(change.to, Status::Up);
        assert_eq!(s.consecutive_failures, 0);
        assert!(invariants_hold(&s));
    }

    #[test]
    fn test_threshold_one_downs_immediately() {
        let mut s = service(1);
        let change = advance(&mut s, false, Utc::now()).expect("first failure crosses");
        assert_eq!(change.to, Status::Down);
        assert!(invariants_hold(&s));
    }

    #[test]
    fn test_failure_while_down_is_quiet_and_saturates() {
        let mut s = service(2);
        let now = Utc::now();
        advance(&mut s, false, now);
        advance(&mut s, false, now);
        assert_eq!(s.status, Status::Down);

        for _ in 0..10 {
            assert!(advance(&mut s, false, now).is_none());
        }
        assert_eq!(s.consecutive_failures, 2);
        assert!(invariants_hold(&s));
    }

    #[test]
    fn test_duplicate_success_is_idempotent() {
        let mut s = service(3);
        let now = Utc::now();
        advance(&mut s, true, now);
        let (status, failures) = (s.status, s.consecutive_failures);

        let change = advance(&mut s, true, now);
        assert!(change.is_none());
        assert_eq!(s.status, status);
        assert_eq!(s.consecutive_failures, failures);
    }

    #[test]
    fn test_any_failures_then_success_lands_up() {
        for n in 0..8 {
            let mut s = service(3);
            let now = Utc::now();
            for _ in 0..n {
                advance(&mut s, false, now);
            }
            advance(&mut s, true, now);
            assert_eq!(s.status, Status::Up);
            assert_eq!(s.consecutive_failures, 0);
            assert!(invariants_hold(&s));
        }
    }
}
