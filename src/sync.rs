//! Mock APIs for synchronization primitives.
//!
//! The traits take `&self` throughout, since the values are shared between threads.
//! Real implementations are built on [parking_lot], [once_cell] and [dashmap].

use std::hash::Hash;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Condvar;
use unimock::unimock;

/// An object that can be locked and unlocked.
#[unimock(api = LockerMock)]
pub trait Locker: Send + Sync {
    /// Block until the lock is acquired.
    fn lock(&self);

    /// Release the lock.
    fn unlock(&self);
}

/// A mutual exclusion lock.
#[unimock(api = MutexMock)]
pub trait Mutex: Locker {
    /// Acquire the lock if it is free. Returns whether it was acquired.
    fn try_lock(&self) -> bool;
}

/// A reader/writer mutual exclusion lock. [Locker] locks it for writing.
#[unimock(api = RwMutexMock)]
pub trait RwMutex: Locker {
    fn read_lock(&self);

    fn read_unlock(&self);

    fn try_read_lock(&self) -> bool;

    fn try_lock(&self) -> bool;
}

/// Waits for a collection of tasks to finish.
#[unimock(api = WaitGroupMock)]
pub trait WaitGroup: Send + Sync {
    /// Add `delta` to the counter.
    fn add(&self, delta: isize);

    /// Decrement the counter by one.
    fn done(&self);

    /// Block until the counter is zero.
    fn wait(&self);
}

/// Performs exactly one action.
#[unimock(api = OnceMock)]
pub trait Once: Send + Sync {
    /// Call `f` if and only if this is the first call of `call_once`.
    fn call_once(&self, f: &mut dyn FnMut());
}

/// A rendezvous point for threads waiting for an event.
#[unimock(api = CondMock)]
pub trait Cond: Send + Sync {
    /// Unlock the associated locker, suspend until woken, then lock it again.
    fn wait(&self);

    /// Wake one waiting thread.
    fn signal(&self);

    /// Wake all waiting threads.
    fn broadcast(&self);
}

/// A set of reusable values.
#[unimock(api = PoolMock)]
pub trait Pool<T>: Send + Sync {
    fn get(&self) -> T;

    fn put(&self, value: T);
}

/// A map that is safe for concurrent use.
#[unimock(api = MapMock)]
pub trait Map<K, V>: Send + Sync {
    fn load(&self, key: &K) -> Option<V>;

    fn store(&self, key: K, value: V);

    /// The existing value and `true`, or else stores `value` and returns it with `false`.
    fn load_or_store(&self, key: K, value: V) -> (V, bool);

    fn load_and_delete(&self, key: &K) -> Option<V>;

    fn delete(&self, key: &K);

    /// Store `value`, returning the previous value if any.
    fn swap(&self, key: K, value: V) -> Option<V>;

    /// Replace the value if it equals `old`. Returns whether it was replaced.
    fn compare_and_swap(&self, key: &K, old: &V, new: V) -> bool;

    /// Delete the entry if its value equals `old`. Returns whether it was deleted.
    fn compare_and_delete(&self, key: &K, old: &V) -> bool;

    /// Call `f` for every entry until it returns `false`.
    fn range(&self, f: &mut dyn FnMut(K, V) -> bool);

    fn clear(&self);
}

/// A [Mutex] which blocks the calling thread.
///
/// It is not tied to a guard, so it may be unlocked from another thread than the one that locked it.
#[derive(Debug, Default)]
pub struct BlockingMutex {
    locked: parking_lot::Mutex<bool>,
    unlocked: Condvar,
}

impl BlockingMutex {
    /// An unlocked mutex.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Locker for BlockingMutex {
    fn lock(&self) {
        let mut locked = self.locked.lock();
        while *locked {
            self.unlocked.wait(&mut locked);
        }
        *locked = true;
    }

    /// # Panics
    /// If the mutex is not locked.
    fn unlock(&self) {
        let mut locked = self.locked.lock();
        if !*locked {
            panic!("sync: unlock of unlocked mutex");
        }
        *locked = false;
        self.unlocked.notify_one();
    }
}

impl Mutex for BlockingMutex {
    fn try_lock(&self) -> bool {
        let mut locked = self.locked.lock();
        if *locked {
            false
        } else {
            *locked = true;
            true
        }
    }
}

#[derive(Debug, Default)]
struct RwState {
    readers: usize,
    writer: bool,
    waiting_writers: usize,
}

/// A [RwMutex] which blocks the calling thread.
///
/// A blocked writer keeps new readers out, so writers cannot starve.
#[derive(Debug, Default)]
pub struct BlockingRwMutex {
    state: parking_lot::Mutex<RwState>,
    changed: Condvar,
}

impl BlockingRwMutex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Locker for BlockingRwMutex {
    fn lock(&self) {
        let mut state = self.state.lock();
        state.waiting_writers += 1;
        while state.writer || state.readers > 0 {
            self.changed.wait(&mut state);
        }
        state.waiting_writers -= 1;
        state.writer = true;
    }

    /// # Panics
    /// If the mutex is not write locked.
    fn unlock(&self) {
        let mut state = self.state.lock();
        if !state.writer {
            panic!("sync: Unlock of unlocked RWMutex");
        }
        state.writer = false;
        self.changed.notify_all();
    }
}

impl RwMutex for BlockingRwMutex {
    fn read_lock(&self) {
        let mut state = self.state.lock();
        while state.writer || state.waiting_writers > 0 {
            self.changed.wait(&mut state);
        }
        state.readers += 1;
    }

    /// # Panics
    /// If the mutex is not read locked.
    fn read_unlock(&self) {
        let mut state = self.state.lock();
        if state.readers == 0 {
            panic!("sync: RUnlock of unlocked RWMutex");
        }
        state.readers -= 1;
        if state.readers == 0 {
            self.changed.notify_all();
        }
    }

    fn try_read_lock(&self) -> bool {
        let mut state = self.state.lock();
        if state.writer || state.waiting_writers > 0 {
            return false;
        }
        state.readers += 1;
        true
    }

    fn try_lock(&self) -> bool {
        let mut state = self.state.lock();
        if state.writer || state.readers > 0 {
            return false;
        }
        state.writer = true;
        true
    }
}

/// A [WaitGroup] which blocks the calling thread.
#[derive(Debug, Default)]
pub struct BlockingWaitGroup {
    count: parking_lot::Mutex<isize>,
    zero: Condvar,
}

impl BlockingWaitGroup {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitGroup for BlockingWaitGroup {
    /// # Panics
    /// If the counter becomes negative.
    fn add(&self, delta: isize) {
        let mut count = self.count.lock();
        let updated = *count + delta;
        if updated < 0 {
            panic!("sync: negative WaitGroup counter");
        }
        *count = updated;
        if updated == 0 {
            self.zero.notify_all();
        }
    }

    fn done(&self) {
        self.add(-1);
    }

    fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.zero.wait(&mut count);
        }
    }
}

/// A [Once] over [OnceCell].
///
/// If the action panics, it is considered not to have run.
#[derive(Debug, Default)]
pub struct OnceFlag {
    cell: OnceCell<()>,
}

impl OnceFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl Once for OnceFlag {
    fn call_once(&self, f: &mut dyn FnMut()) {
        self.cell.get_or_init(|| f());
    }
}

#[derive(Debug, Default)]
struct Tickets {
    next: u64,
    notified: u64,
}

/// A [Cond] associated with any [Locker].
///
/// Waiters are woken in the order they started waiting.
pub struct BlockingCond {
    locker: Arc<dyn Locker>,
    tickets: parking_lot::Mutex<Tickets>,
    woken: Condvar,
}

impl BlockingCond {
    /// A condition variable tied to `locker`, which waiters must hold.
    pub fn new(locker: Arc<dyn Locker>) -> Self {
        Self {
            locker,
            tickets: Default::default(),
            woken: Condvar::new(),
        }
    }

    /// The locker which must be held while calling [Cond::wait].
    pub fn locker(&self) -> &Arc<dyn Locker> {
        &self.locker
    }
}

impl Cond for BlockingCond {
    fn wait(&self) {
        let mut tickets = self.tickets.lock();
        let ticket = tickets.next;
        tickets.next += 1;

        self.locker.unlock();
        while tickets.notified <= ticket {
            self.woken.wait(&mut tickets);
        }
        drop(tickets);

        self.locker.lock();
    }

    fn signal(&self) {
        let mut tickets = self.tickets.lock();
        if tickets.notified < tickets.next {
            tickets.notified += 1;
            self.woken.notify_all();
        }
    }

    fn broadcast(&self) {
        let mut tickets = self.tickets.lock();
        tickets.notified = tickets.next;
        self.woken.notify_all();
    }
}

/// A [Pool] which constructs new values when empty.
pub struct ObjectPool<T> {
    items: parking_lot::Mutex<Vec<T>>,
    new: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T> ObjectPool<T> {
    /// An empty pool. `new` builds a value whenever [Pool::get] finds the pool empty.
    pub fn new(new: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            items: parking_lot::Mutex::new(vec![]),
            new: Box::new(new),
        }
    }

    /// The number of idle values in the pool.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send> Pool<T> for ObjectPool<T> {
    fn get(&self) -> T {
        let reused = self.items.lock().pop();
        reused.unwrap_or_else(|| {
            tracing::trace!("pool is empty, constructing a new value");
            (self.new)()
        })
    }

    fn put(&self, value: T) {
        self.items.lock().push(value);
    }
}

/// A [Map] over [DashMap].
///
/// [Map::range] iterates over a snapshot, so the callback may modify the map.
#[derive(Debug)]
pub struct ConcurrentMap<K: Eq + Hash, V> {
    map: DashMap<K, V>,
}

impl<K: Eq + Hash, V> Default for ConcurrentMap<K, V> {
    fn default() -> Self {
        Self {
            map: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V> ConcurrentMap<K, V> {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<K, V> Map<K, V> for ConcurrentMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + PartialEq + Send + Sync,
{
    fn load(&self, key: &K) -> Option<V> {
        self.map.get(key).map(|value| value.clone())
    }

    fn store(&self, key: K, value: V) {
        self.map.insert(key, value);
    }

    fn load_or_store(&self, key: K, value: V) -> (V, bool) {
        match self.map.entry(key) {
            Entry::Occupied(entry) => (entry.get().clone(), true),
            Entry::Vacant(entry) => {
                entry.insert(value.clone());
                (value, false)
            }
        }
    }

    fn load_and_delete(&self, key: &K) -> Option<V> {
        self.map.remove(key).map(|(_, value)| value)
    }

    fn delete(&self, key: &K) {
        self.map.remove(key);
    }

    fn swap(&self, key: K, value: V) -> Option<V> {
        self.map.insert(key, value)
    }

    fn compare_and_swap(&self, key: &K, old: &V, new: V) -> bool {
        match self.map.get_mut(key) {
            Some(mut current) if *current == *old => {
                *current = new;
                true
            }
            _ => false,
        }
    }

    fn compare_and_delete(&self, key: &K, old: &V) -> bool {
        self.map.remove_if(key, |_, current| current == old).is_some()
    }

    fn range(&self, f: &mut dyn FnMut(K, V) -> bool) {
        let snapshot: Vec<(K, V)> = self
            .map
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (key, value) in snapshot {
            if !f(key, value) {
                break;
            }
        }
    }

    fn clear(&self) {
        self.map.clear();
    }
}
