//! Integration coverage for the sliding-window limiter across multiple
//! independent keys and server/client-IP admission shapes (spec §4.2, P5).

use dicomweb_oauth_broker::rate_limiter::{Admission, RateLimiter};
use std::thread;
use std::time::Duration;

#[test]
fn concurrent_callers_share_one_bucket_per_key() {
    let limiter = std::sync::Arc::new(RateLimiter::new(20, Duration::from_secs(2)));
    let mut handles = Vec::new();
    for _ in 0..5 {
        let limiter = limiter.clone();
        handles.push(thread::spawn(move || {
            let mut admitted = 0;
            for _ in 0..10 {
                if limiter.check_and_record("shared-client") == Admission::Admit {
                    admitted += 1;
                }
            }
            admitted
        }));
    }
    let total_admitted: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total_admitted, 20, "exactly the configured limit should be admitted across all threads");
}

#[test]
fn window_slides_rather_than_resetting_on_a_boundary() {
    let limiter = RateLimiter::new(2, Duration::from_millis(200));
    assert_eq!(limiter.check_and_record("k"), Admission::Admit);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(limiter.check_and_record("k"), Admission::Admit);
    // both still inside the window
    assert!(matches!(limiter.check_and_record("k"), Admission::Reject { .. }));

    thread::sleep(Duration::from_millis(150));
    // the first admission (now ~250ms old) has aged out; the second
    // (~150ms old) has not, so exactly one new slot is free.
    assert_eq!(limiter.check_and_record("k"), Admission::Admit);
    assert!(matches!(limiter.check_and_record("k"), Admission::Reject { .. }));
}

#[test]
fn server_and_client_ip_keys_are_independent_namespaces() {
    let limiter = RateLimiter::new(1, Duration::from_secs(10));
    assert_eq!(limiter.check_and_record("server:hospital-a"), Admission::Admit);
    assert_eq!(limiter.check_and_record("10.0.0.5"), Admission::Admit);
    assert!(matches!(
        limiter.check_and_record("server:hospital-a"),
        Admission::Reject { .. }
    ));
    assert!(matches!(limiter.check_and_record("10.0.0.5"), Admission::Reject { .. }));
}
