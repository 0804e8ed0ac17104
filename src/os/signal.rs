//! Mock APIs for subscribing to process signals.
//!
//! [LocalSignals] is an in-process router: signals are injected with [LocalSignals::raise]
//! rather than received from the operating system.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crossbeam::channel::{Sender, TrySendError};
use parking_lot::Mutex;
use tracing::trace;
use unimock::unimock;

/// A process signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    Hangup,
    Interrupt,
    Quit,
    Kill,
    Pipe,
    Terminate,
    User1,
    User2,
}

impl Signal {
    /// Every known signal.
    pub const ALL: [Signal; 8] = [
        Signal::Hangup,
        Signal::Interrupt,
        Signal::Quit,
        Signal::Kill,
        Signal::Pipe,
        Signal::Terminate,
        Signal::User1,
        Signal::User2,
    ];

    /// The unix signal number.
    pub fn number(self) -> i32 {
        match self {
            Self::Hangup => 1,
            Self::Interrupt => 2,
            Self::Quit => 3,
            Self::Kill => 9,
            Self::Pipe => 13,
            Self::Terminate => 15,
            Self::User1 if cfg!(any(target_os = "macos", target_os = "ios", target_os = "freebsd")) => 30,
            Self::User2 if cfg!(any(target_os = "macos", target_os = "ios", target_os = "freebsd")) => 31,
            Self::User1 => 10,
            Self::User2 => 12,
        }
    }

    pub fn from_number(number: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|sig| sig.number() == number)
    }

    /// The conventional description, e.g. `"interrupt"`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Hangup => "hangup",
            Self::Interrupt => "interrupt",
            Self::Quit => "quit",
            Self::Kill => "killed",
            Self::Pipe => "broken pipe",
            Self::Terminate => "terminated",
            Self::User1 => "user defined signal 1",
            Self::User2 => "user defined signal 2",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Signal subscription.
///
/// An empty `signals` slice means every signal.
#[unimock(api = NotifierMock)]
pub trait Notifier: Send + Sync {
    /// Relay `signals` to `tx`. Calling again with the same channel adds to its signals.
    fn notify(&self, tx: &Sender<Signal>, signals: &[Signal]);

    /// Stop relaying any signal to `tx`.
    fn stop(&self, tx: &Sender<Signal>);

    /// Ignore `signals`. Existing subscriptions no longer receive them.
    fn ignore(&self, signals: &[Signal]);

    /// Whether `sig` is currently ignored.
    fn ignored(&self, sig: Signal) -> bool;

    /// Undo the effect of [Notifier::notify] and [Notifier::ignore] for `signals`.
    fn reset(&self, signals: &[Signal]);

    /// A flag which becomes `true` when one of `signals` arrives.
    ///
    /// The flag is unregistered by [Notifier::stop_flag] or when the last clone of it is dropped.
    fn notify_flag(&self, signals: &[Signal]) -> Arc<AtomicBool>;

    /// Stop setting a flag returned by [Notifier::notify_flag].
    fn stop_flag(&self, flag: &Arc<AtomicBool>);
}

enum Target {
    Channel(Sender<Signal>),
    Flag(Weak<AtomicBool>),
}

struct Subscriber {
    target: Target,
    signals: HashSet<Signal>,
}

impl Subscriber {
    fn is_flag(&self, flag: &Arc<AtomicBool>) -> bool {
        matches!(&self.target, Target::Flag(weak) if weak.as_ptr() == Arc::as_ptr(flag))
    }
}

#[derive(Default)]
struct Router {
    subscribers: Vec<Subscriber>,
    ignored: HashSet<Signal>,
}

impl Router {
    /// Drop flags nobody holds anymore.
    fn prune_flags(&mut self) {
        self.subscribers.retain(|subscriber| match &subscriber.target {
            Target::Flag(weak) => weak.strong_count() > 0,
            Target::Channel(_) => true,
        });
    }
}

fn signal_set(signals: &[Signal]) -> HashSet<Signal> {
    if signals.is_empty() {
        Signal::ALL.into_iter().collect()
    } else {
        signals.iter().copied().collect()
    }
}

/// The real [Notifier]: an in-process signal router.
#[derive(Default)]
pub struct LocalSignals {
    router: Mutex<Router>,
}

impl LocalSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `sig` to every subscriber, returning how many received it.
    ///
    /// Ignored signals go nowhere. A subscriber whose channel is full misses the signal.
    /// Subscribers whose receiver or flag is gone are dropped.
    pub fn raise(&self, sig: Signal) -> usize {
        let mut router = self.router.lock();
        if router.ignored.contains(&sig) {
            trace!(%sig, "ignored signal");
            return 0;
        }

        let mut delivered = 0;
        router.subscribers.retain(|subscriber| {
            if !subscriber.signals.contains(&sig) {
                return true;
            }
            match &subscriber.target {
                Target::Channel(tx) => match tx.try_send(sig) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => trace!(%sig, "subscriber channel full"),
                    Err(TrySendError::Disconnected(_)) => {
                        trace!(%sig, "dropping disconnected subscriber");
                        return false;
                    }
                },
                Target::Flag(weak) => match weak.upgrade() {
                    Some(flag) => {
                        flag.store(true, Ordering::SeqCst);
                        delivered += 1;
                    }
                    None => return false,
                },
            }
            true
        });
        trace!(%sig, delivered, "raised signal");
        delivered
    }

    /// The number of registered channels and flags.
    pub fn subscriber_count(&self) -> usize {
        self.router.lock().subscribers.len()
    }
}

impl Notifier for LocalSignals {
    fn notify(&self, tx: &Sender<Signal>, signals: &[Signal]) {
        let signals = signal_set(signals);
        let mut router = self.router.lock();
        router.prune_flags();
        router.ignored.retain(|sig| !signals.contains(sig));

        let existing = router.subscribers.iter_mut().find(|subscriber| {
            matches!(&subscriber.target, Target::Channel(existing) if existing.same_channel(tx))
        });
        match existing {
            Some(subscriber) => subscriber.signals.extend(signals),
            None => router.subscribers.push(Subscriber {
                target: Target::Channel(tx.clone()),
                signals,
            }),
        }
    }

    fn stop(&self, tx: &Sender<Signal>) {
        self.router.lock().subscribers.retain(|subscriber| {
            !matches!(&subscriber.target, Target::Channel(existing) if existing.same_channel(tx))
        });
    }

    fn ignore(&self, signals: &[Signal]) {
        let signals = signal_set(signals);
        let mut router = self.router.lock();
        for subscriber in &mut router.subscribers {
            subscriber.signals.retain(|sig| !signals.contains(sig));
        }
        router.subscribers.retain(|subscriber| !subscriber.signals.is_empty());
        router.ignored.extend(signals);
    }

    fn ignored(&self, sig: Signal) -> bool {
        self.router.lock().ignored.contains(&sig)
    }

    fn reset(&self, signals: &[Signal]) {
        let signals = signal_set(signals);
        let mut router = self.router.lock();
        router.ignored.retain(|sig| !signals.contains(sig));
        for subscriber in &mut router.subscribers {
            subscriber.signals.retain(|sig| !signals.contains(sig));
        }
        router.subscribers.retain(|subscriber| !subscriber.signals.is_empty());
    }

    fn notify_flag(&self, signals: &[Signal]) -> Arc<AtomicBool> {
        let signals = signal_set(signals);
        let flag = Arc::new(AtomicBool::new(false));
        let mut router = self.router.lock();
        router.prune_flags();
        router.ignored.retain(|sig| !signals.contains(sig));
        router.subscribers.push(Subscriber {
            target: Target::Flag(Arc::downgrade(&flag)),
            signals,
        });
        flag
    }

    fn stop_flag(&self, flag: &Arc<AtomicBool>) {
        let mut router = self.router.lock();
        router.subscribers.retain(|subscriber| !subscriber.is_flag(flag));
        router.prune_flags();
    }
}
