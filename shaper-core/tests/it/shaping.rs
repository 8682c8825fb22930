use std::{ffi::c_void, io, os::fd::RawFd, sync::Arc, time::Duration};

use rand::Rng;
use shaper_core::{AllotmentPolicy, Error, Shaper, ShaperOptions};

use crate::mock::{MockClock, MockIo};

const START: u64 = 1_000_000;

fn options() -> ShaperOptions {
    ShaperOptions::default().with_byte_limit(1000).with_interval(100_000)
}

fn shaper(options: ShaperOptions) -> Shaper<MockIo, MockClock> {
    let _ = tracing_subscriber::fmt::try_init();
    Shaper::new(MockIo::default(), MockClock::at(START), options).unwrap()
}

fn read(shaper: &Shaper<MockIo, MockClock>, fd: RawFd, count: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; count];
    let n = unsafe { shaper.read(fd, buf.as_mut_ptr() as *mut c_void, count)? };
    buf.truncate(n);
    Ok(buf)
}

fn payload(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes[..]);
    bytes
}

#[test]
fn unshaped_reads_pass_through() {
    let shaper = shaper(options());
    let fd = shaper.io().open_file();

    let data = payload(8192);
    shaper.io().push(fd, &data);

    assert_eq!(read(&shaper, fd, 4096).unwrap(), data[..4096]);
    assert_eq!(read(&shaper, fd, 10_000).unwrap(), data[4096..]);
    assert_eq!(read(&shaper, fd, 10).unwrap(), b"");

    // Errors come back exactly as the real primitive produced them.
    let err = read(&shaper, 999, 16).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EBADF));

    assert_eq!(shaper.io().requested(), vec![(fd, 4096), (fd, 10_000), (fd, 10), (999, 16)]);
    assert!(shaper.clock().pauses().is_empty());
    assert_eq!(shaper.stats().passthrough_reads(), 4);
    assert_eq!(shaper.stats().shaped_reads(), 0);
}

#[test]
fn only_shaped_family_is_registered() {
    let shaper = shaper(options());

    let inet = shaper.socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
    let unix = shaper.socket(libc::AF_UNIX, libc::SOCK_STREAM, 0).unwrap();
    let inet6 = shaper.socket(libc::AF_INET6, libc::SOCK_DGRAM, 0).unwrap();

    assert!(shaper.registry().is_registered(inet));
    assert!(!shaper.registry().is_registered(unix));
    assert!(!shaper.registry().is_registered(inet6));
    assert_eq!(shaper.registry().len(), 1);
    assert_eq!(shaper.stats().shaped_sockets(), 1);
}

#[test]
fn configured_family_is_shaped() {
    let shaper = shaper(options().with_family(libc::AF_INET6));

    let inet = shaper.socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
    let inet6 = shaper.socket(libc::AF_INET6, libc::SOCK_STREAM, 0).unwrap();

    assert!(!shaper.registry().is_registered(inet));
    assert!(shaper.registry().is_registered(inet6));
}

#[test]
fn failed_socket_is_returned_unchanged() {
    let shaper = shaper(options());

    let err = shaper.socket(-1, libc::SOCK_STREAM, 0).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EAFNOSUPPORT));
    assert!(shaper.registry().is_empty());
}

#[test]
fn closed_descriptor_is_no_longer_shaped() {
    let shaper = shaper(options());

    let fd = shaper.socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
    assert!(shaper.registry().is_registered(fd));

    shaper.close(fd).unwrap();
    assert!(!shaper.registry().is_registered(fd));
    assert!(!shaper.io().is_open(fd));

    // The number is reused by a socket of another family, which must not inherit shaping.
    let reused = shaper.socket(libc::AF_UNIX, libc::SOCK_STREAM, 0).unwrap();
    assert_eq!(reused, fd);
    assert!(!shaper.registry().is_registered(reused));

    shaper.io().push(reused, &payload(500));
    assert_eq!(read(&shaper, reused, 500).unwrap().len(), 500);
    assert!(shaper.clock().pauses().is_empty());
}

#[test]
fn close_of_unknown_descriptor_is_delegated() {
    let shaper = shaper(options());

    let err = shaper.close(42).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EBADF));
}

#[test]
fn shaped_reads_are_capped_and_paced() {
    let shaper = shaper(options());
    let fd = shaper.socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();

    let data = payload(5000);
    shaper.io().push(fd, &data);

    let mut received = Vec::new();
    for _ in 0..5 {
        let before = shaper.clock().now();
        let chunk = read(&shaper, fd, 1000).unwrap();
        assert_eq!(chunk.len(), 100);

        // Every call costs a full interval.
        assert_eq!(shaper.clock().now() - before, 100_000);
        received.extend(chunk);
    }

    assert_eq!(received, data[..500]);
    assert!(shaper.io().requested().iter().all(|&(_, count)| count == 100));
    assert_eq!(shaper.clock().pauses(), vec![Duration::from_millis(100); 5]);
    assert_eq!(shaper.stats().shaped_reads(), 5);
    assert_eq!(shaper.stats().shaped_bytes(), 500);
    assert_eq!(shaper.stats().paced_micros(), 500_000);
}

#[test]
fn small_reads_keep_their_size() {
    let shaper = shaper(options());
    let fd = shaper.socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
    shaper.io().push(fd, &payload(100));

    assert_eq!(read(&shaper, fd, 10).unwrap().len(), 10);
    assert_eq!(shaper.io().requested(), vec![(fd, 10)]);
}

#[test]
fn pacing_covers_the_rest_of_the_interval() {
    let shaper = shaper(options());
    let fd = shaper.socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
    shaper.io().push(fd, &payload(100));

    // 30ms into the interval: only the remaining 70ms are waited out.
    shaper.clock().advance(30_000);
    read(&shaper, fd, 50).unwrap();

    assert_eq!(shaper.clock().pauses(), vec![Duration::from_millis(70)]);
    assert_eq!(shaper.budget().last_accounted(), START + 100_000);
}

#[test]
fn empty_read_is_still_paced() {
    let shaper = shaper(options());
    let fd = shaper.socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();

    assert!(read(&shaper, fd, 1000).unwrap().is_empty());
    assert_eq!(shaper.clock().pauses(), vec![Duration::from_millis(100)]);
    assert_eq!(shaper.budget().remaining(), 1000);
}

#[test]
fn read_errors_are_propagated_and_paced() {
    let shaper = shaper(options());
    let fd = shaper.socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
    shaper.io().fail_reads(fd, libc::EAGAIN);

    let err = read(&shaper, fd, 1000).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EAGAIN));

    assert!(shaper.registry().is_registered(fd));
    assert_eq!(shaper.clock().pauses().len(), 1);
    assert_eq!(shaper.budget().remaining(), 1000);
}

#[test]
fn bad_descriptor_is_dropped_from_registry() {
    let shaper = shaper(options());
    let fd = shaper.socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
    shaper.io().fail_reads(fd, libc::EBADF);

    let err = read(&shaper, fd, 1000).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EBADF));

    assert!(!shaper.registry().is_registered(fd));
    assert!(shaper.clock().pauses().is_empty());
}

#[test]
fn clock_failure_falls_back_to_unshaped_read() {
    let shaper = shaper(options());
    let fd = shaper.socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
    shaper.io().push(fd, &payload(1000));

    shaper.clock().set_broken(true);
    assert_eq!(read(&shaper, fd, 1000).unwrap().len(), 1000);

    assert_eq!(shaper.io().requested(), vec![(fd, 1000)]);
    assert!(shaper.clock().pauses().is_empty());
    assert_eq!(shaper.stats().clock_fallbacks(), 1);

    // Shaping resumes once the clock recovers.
    shaper.clock().set_broken(false);
    shaper.io().push(fd, &payload(1000));
    assert_eq!(read(&shaper, fd, 1000).unwrap().len(), 100);
}

#[test]
fn broken_clock_at_startup_is_an_error() {
    let clock = MockClock::at(START);
    clock.set_broken(true);

    let result = Shaper::new(MockIo::default(), clock, options());
    assert!(matches!(result, Err(Error::Clock(_))));
}

#[test]
fn invalid_options_are_rejected() {
    let result = Shaper::new(MockIo::default(), MockClock::at(START), options().with_byte_limit(0));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn budget_resets_after_interval_boundary() {
    let shaper = shaper(options());
    let fd = shaper.socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
    shaper.io().push(fd, &payload(10_000));

    // Back-to-back reads never leave a full interval between accounting passes, so the counter
    // keeps drifting down.
    for _ in 0..15 {
        read(&shaper, fd, 1000).unwrap();
    }
    assert_eq!(shaper.budget().remaining(), 1000 - 1500);

    // An idle interval later, the next read starts from a full budget.
    shaper.clock().advance(100_000);
    read(&shaper, fd, 1000).unwrap();
    assert_eq!(shaper.budget().remaining(), 1000 - 100);
    assert_eq!(shaper.clock().pauses().last(), Some(&Duration::from_millis(100)));
}

#[test]
fn token_bucket_delivers_budget_then_waits() {
    let shaper = shaper(options().with_policy(AllotmentPolicy::TokenBucket));
    let fd = shaper.socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
    shaper.io().push(fd, &payload(5000));

    let mut delivered = 0;
    while delivered < 1000 {
        delivered += read(&shaper, fd, 300).unwrap().len();
    }

    // The whole budget went out without any pacing, and never more than the budget.
    assert_eq!(delivered, 1000);
    assert!(shaper.clock().pauses().is_empty());
    assert_eq!(shaper.clock().now(), START);

    // The next read waits for the next window, then gets a fresh budget.
    assert_eq!(read(&shaper, fd, 300).unwrap().len(), 300);
    assert_eq!(shaper.clock().pauses(), vec![Duration::from_millis(100)]);
    assert_eq!(shaper.budget().remaining(), 700);
}

#[test]
fn token_bucket_refunds_short_reads() {
    let shaper = shaper(options().with_policy(AllotmentPolicy::TokenBucket));
    let fd = shaper.socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
    shaper.io().push(fd, &payload(10));

    assert_eq!(read(&shaper, fd, 800).unwrap().len(), 10);
    assert_eq!(shaper.budget().remaining(), 990);
}

#[test]
fn shutdown_disables_pacing() {
    let shaper = shaper(options());
    let fd = shaper.socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
    shaper.io().push(fd, &payload(2000));

    shaper.shutdown();
    assert!(shaper.is_shut_down());

    assert_eq!(read(&shaper, fd, 2000).unwrap().len(), 2000);
    assert!(shaper.clock().pauses().is_empty());
    assert_eq!(shaper.stats().passthrough_reads(), 1);
}

#[test]
fn concurrent_shaped_reads_account_every_byte() {
    let shaper = Arc::new(shaper(options().with_byte_limit(1_000_000)));

    let fds: Vec<RawFd> = (0..8)
        .map(|_| {
            let fd = shaper.socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
            shaper.io().push(fd, &payload(50 * 4096));
            fd
        })
        .collect();

    let handles: Vec<_> = fds
        .iter()
        .map(|&fd| {
            let shaper = Arc::clone(&shaper);
            std::thread::spawn(move || {
                let mut total = 0;
                for _ in 0..50 {
                    total += read(&shaper, fd, 4096).unwrap().len();
                }
                total
            })
        })
        .collect();

    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    // Allotment is 100_000 bytes, larger than any request.
    assert_eq!(total, 8 * 50 * 4096);
    assert_eq!(shaper.stats().shaped_reads(), 400);
    assert_eq!(shaper.stats().shaped_bytes(), total as u64);
    assert_eq!(shaper.registry().len(), 8);

    for fd in fds {
        shaper.close(fd).unwrap();
    }
    assert!(shaper.registry().is_empty());
}
