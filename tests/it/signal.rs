use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver};
use stdmock::os::signal::*;
use unimock::*;

/// Waits for a shutdown signal, the way a daemon main loop would.
fn wait_for_shutdown(notifier: &dyn Notifier, timeout: Duration) -> Option<Signal> {
    let (tx, rx): (_, Receiver<Signal>) = bounded(1);
    notifier.notify(&tx, &[Signal::Interrupt, Signal::Terminate]);
    let received = rx.recv_timeout(timeout).ok();
    notifier.stop(&tx);
    received
}

#[test]
fn mocked_notify_delivers_signal() {
    let u = Unimock::new((
        NotifierMock::notify
            .next_call(matching!(_, [Signal::Interrupt, Signal::Terminate]))
            .answers(&|_, tx, _| {
                tx.send(Signal::Terminate).unwrap();
            }),
        NotifierMock::stop.next_call(matching!(_)).returns(()),
    ));

    assert_eq!(
        Some(Signal::Terminate),
        wait_for_shutdown(&u, Duration::from_secs(1))
    );
}

#[test]
fn mocked_notify_times_out() {
    let u = Unimock::new((
        NotifierMock::notify.next_call(matching!(_, _)).returns(()),
        NotifierMock::stop.next_call(matching!(_)).returns(()),
    ));

    assert_eq!(None, wait_for_shutdown(&u, Duration::from_millis(10)));
}

#[test]
fn mocked_ignore_and_reset() {
    let u = Unimock::new((
        NotifierMock::ignore
            .next_call(matching!([Signal::Hangup]))
            .returns(()),
        NotifierMock::ignored
            .next_call(matching!(Signal::Hangup))
            .returns(true),
        NotifierMock::reset.next_call(matching!([])).returns(()),
        NotifierMock::ignored
            .next_call(matching!(Signal::Hangup))
            .returns(false),
    ));

    u.ignore(&[Signal::Hangup]);
    assert!(u.ignored(Signal::Hangup));
    u.reset(&[]);
    assert!(!u.ignored(Signal::Hangup));
}

#[test]
fn mocked_notify_flag() {
    let u = Unimock::new(
        NotifierMock::notify_flag
            .next_call(matching!([Signal::Interrupt]))
            .answers(&|_, _| Arc::new(AtomicBool::new(true))),
    );

    let flag = u.notify_flag(&[Signal::Interrupt]);
    assert!(flag.load(Ordering::SeqCst));
}

#[test]
fn mocked_flag_is_stopped() {
    let u = Unimock::new((
        NotifierMock::notify_flag
            .next_call(matching!([Signal::Terminate]))
            .answers(&|_, _| Arc::new(AtomicBool::new(false))),
        NotifierMock::stop_flag.next_call(matching!(_)).returns(()),
    ));

    let flag = u.notify_flag(&[Signal::Terminate]);
    u.stop_flag(&flag);
    assert!(!flag.load(Ordering::SeqCst));
}

#[test]
fn local_signals_forget_dropped_subscribers() {
    let signals = LocalSignals::new();
    let (tx, rx) = bounded(1);
    signals.notify(&tx, &[Signal::Pipe]);
    drop(rx);

    let flag = signals.notify_flag(&[Signal::Pipe]);
    assert_eq!(2, signals.subscriber_count());

    assert_eq!(1, signals.raise(Signal::Pipe));
    assert_eq!(1, signals.subscriber_count());

    signals.stop_flag(&flag);
    assert_eq!(0, signals.subscriber_count());
    assert_eq!(0, signals.raise(Signal::Pipe));
}

#[test]
fn local_signals_route_to_subscribers() {
    let signals = LocalSignals::new();

    let (tx, rx) = bounded(4);
    signals.notify(&tx, &[Signal::User1]);
    assert_eq!(0, signals.raise(Signal::User2));
    assert_eq!(1, signals.raise(Signal::User1));
    assert_eq!(Ok(Signal::User1), rx.try_recv());

    signals.notify(&tx, &[Signal::User2]);
    assert_eq!(1, signals.raise(Signal::User2));
    assert_eq!(Ok(Signal::User2), rx.try_recv());

    signals.stop(&tx);
    assert_eq!(0, signals.raise(Signal::User1));
}

#[test]
fn local_signals_across_threads() {
    let signals = Arc::new(LocalSignals::new());
    let (tx, rx) = bounded(1);
    signals.notify(&tx, &[]);

    let raiser = {
        let signals = signals.clone();
        std::thread::spawn(move || signals.raise(Signal::Quit))
    };

    assert_eq!(
        Ok(Signal::Quit),
        rx.recv_timeout(Duration::from_secs(5))
    );
    assert_eq!(1, raiser.join().unwrap());
}

#[test]
fn local_signals_ignore_then_notify_again() {
    let signals = LocalSignals::new();
    let (tx, rx) = bounded(1);

    signals.notify(&tx, &[Signal::Interrupt]);
    signals.ignore(&[Signal::Interrupt]);
    assert!(signals.ignored(Signal::Interrupt));
    assert_eq!(0, signals.raise(Signal::Interrupt));

    signals.notify(&tx, &[Signal::Interrupt]);
    assert!(!signals.ignored(Signal::Interrupt));
    assert_eq!(1, signals.raise(Signal::Interrupt));
    assert_eq!(Ok(Signal::Interrupt), rx.try_recv());
}

#[test]
fn wait_for_shutdown_with_local_signals() {
    let signals = LocalSignals::new();
    let flag = signals.notify_flag(&[Signal::Terminate]);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            // the flag plus the channel, once subscribed
            while signals.raise(Signal::Terminate) < 2 {
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        assert_eq!(
            Some(Signal::Terminate),
            wait_for_shutdown(&signals, Duration::from_secs(5))
        );
    });
    assert!(flag.load(Ordering::SeqCst));
}

#[test]
fn signal_names() {
    assert_eq!("interrupt", Signal::Interrupt.to_string());
    assert_eq!(Some(Signal::Kill), Signal::from_number(9));
    assert_eq!(None, Signal::from_number(0));
}
