//! Connection throttle tests under real thread contention

mod common;

use kodegen_tools_trawl::crawl_engine::ConnectionThrottle;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[test]
fn test_caps_hold_under_contention() {
    common::init_logging();
    let throttle = Arc::new(ConnectionThrottle::new(5, 2));
    let hosts = ["a.test", "b.test", "c.test", "d.test"];
    let live = Arc::new(AtomicUsize::new(0));
    let live_peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..24)
        .map(|i| {
            let throttle = Arc::clone(&throttle);
            let live = Arc::clone(&live);
            let live_peak = Arc::clone(&live_peak);
            let host = hosts[i % hosts.len()];
            thread::spawn(move || {
                for _ in 0..5 {
                    let permit = throttle.acquire(host).expect("throttle closed early");
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    live_peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(2));
                    live.fetch_sub(1, Ordering::SeqCst);
                    drop(permit);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    assert!(live_peak.load(Ordering::SeqCst) <= 5);
    assert!(throttle.global_peak() <= 5);
    for host in hosts {
        assert!(throttle.peak(host) <= 2, "{host} exceeded its cap");
        assert_eq!(throttle.in_flight(host), 0);
    }
    assert_eq!(throttle.total_in_flight(), 0);
}

#[test]
fn test_released_slot_wakes_other_host() {
    let throttle = Arc::new(ConnectionThrottle::new(1, 1));
    let held = throttle.acquire("a.test").expect("slot available");

    let waiter = {
        let throttle = Arc::clone(&throttle);
        thread::spawn(move || {
            throttle
                .acquire_timeout("b.test", Duration::from_secs(5))
                .map(|permit| permit.host().to_string())
        })
    };
    thread::sleep(Duration::from_millis(30));
    drop(held);

    let host = waiter
        .join()
        .expect("waiter panicked")
        .expect("global slot should have been handed over");
    assert_eq!(host, "b.test");
}
