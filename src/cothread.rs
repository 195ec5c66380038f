//! Cooperative cothreads with explicit switching.
//!
//! A [`CothreadContext`] is a group of execution contexts of which exactly
//! one runs at any moment. Control moves only through
//! [`CothreadContext::switch_to`]: the caller names the next context to run
//! and blocks until some other context switches back to it.
//!
//! Every cothread is backed by its own OS thread (so it has its own stack)
//! and a capacity-one mailbox. Switching sends a wake-up into the target's
//! mailbox and parks on the caller's own, which hands a single baton around
//! the group. The thread that created the context takes part as
//! [`CothreadId::MAIN`].
//!
//! ```rust,ignore
//! let ctx = CothreadContext::new("demo", 4, None);
//! let worker = ctx.spawn("worker", |_flags| println!("hello from a cothread"))?;
//! ctx.switch_to(worker.id())?; // returns once the body finished
//! ```

use crate::error::{Error, Result};
use kanal::{Receiver, Sender};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, trace};

/// Identifier of a cothread within its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CothreadId(u64);

impl CothreadId {
    /// The controller context, i.e. the thread that drives the scheduler.
    pub const MAIN: Self = Self(0);

    /// Raw numeric id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CothreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::MAIN {
            write!(f, "main")
        } else {
            write!(f, "co#{}", self.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Run,
    Exit,
}

struct Mailbox {
    tx: Sender<Wake>,
    rx: Receiver<Wake>,
}

impl Mailbox {
    fn new() -> Arc<Self> {
        let (tx, rx) = kanal::bounded(1);
        Arc::new(Self { tx, rx })
    }
}

struct Shared {
    name: String,
    mailboxes: Mutex<HashMap<CothreadId, Arc<Mailbox>>>,
    current: AtomicU64,
    next_id: AtomicU64,
    allocated: AtomicUsize,
    max_cothreads: usize,
    stack_size: Option<usize>,
    switches: AtomicU64,
}

impl Shared {
    fn mailboxes(&self) -> MutexGuard<'_, HashMap<CothreadId, Arc<Mailbox>>> {
        self.mailboxes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Flags shared between a [`Cothread`] handle and the code running on it.
#[derive(Debug, Default)]
pub struct CothreadFlags {
    stop: AtomicBool,
    cancelled: AtomicBool,
}

impl CothreadFlags {
    /// Ask the body to return at its next check.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Read and clear the stop request.
    pub fn take_stop(&self) -> bool {
        self.stop.swap(false, Ordering::SeqCst)
    }

    /// Whether the cothread has been destroyed.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A group of cooperatively scheduled execution contexts.
///
/// Cheap to clone; clones refer to the same group.
#[derive(Clone)]
pub struct CothreadContext {
    shared: Arc<Shared>,
}

impl CothreadContext {
    /// Create a context that can hold up to `max_cothreads` cothreads
    /// besides the calling thread.
    pub fn new(name: impl Into<String>, max_cothreads: usize, stack_size: Option<usize>) -> Self {
        let mut mailboxes = HashMap::new();
        mailboxes.insert(CothreadId::MAIN, Mailbox::new());
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                mailboxes: Mutex::new(mailboxes),
                current: AtomicU64::new(CothreadId::MAIN.0),
                next_id: AtomicU64::new(1),
                allocated: AtomicUsize::new(0),
                max_cothreads,
                stack_size,
                switches: AtomicU64::new(0),
            }),
        }
    }

    /// Context name, used as the thread name prefix.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The cothread that currently holds control.
    pub fn current(&self) -> CothreadId {
        CothreadId(self.shared.current.load(Ordering::SeqCst))
    }

    /// Whether the controller currently holds control.
    pub fn is_main(&self) -> bool {
        self.current() == CothreadId::MAIN
    }

    /// Number of live cothreads.
    pub fn allocated(&self) -> usize {
        self.shared.allocated.load(Ordering::SeqCst)
    }

    /// Maximum number of live cothreads.
    pub fn max_cothreads(&self) -> usize {
        self.shared.max_cothreads
    }

    /// Total number of switches performed.
    pub fn switches(&self) -> u64 {
        self.shared.switches.load(Ordering::Relaxed)
    }

    /// Create a suspended cothread running `body`.
    ///
    /// The body starts on the first switch into the cothread. When it
    /// returns, control goes back to [`CothreadId::MAIN`]; the next switch
    /// into the cothread runs the body again from the top.
    pub fn spawn<F>(&self, name: &str, body: F) -> Result<Cothread>
    where
        F: FnMut(&CothreadFlags) + Send + 'static,
    {
        let shared = &self.shared;
        if shared.allocated.fetch_add(1, Ordering::SeqCst) >= shared.max_cothreads {
            shared.allocated.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::CothreadsExhausted {
                max: shared.max_cothreads,
            });
        }

        let id = CothreadId(shared.next_id.fetch_add(1, Ordering::SeqCst));
        let mailbox = Mailbox::new();
        let flags = Arc::new(CothreadFlags::default());
        shared.mailboxes().insert(id, Arc::clone(&mailbox));

        let mut builder = std::thread::Builder::new().name(format!("{}-{}", shared.name, name));
        if let Some(size) = shared.stack_size {
            builder = builder.stack_size(size);
        }

        let ctx = self.clone();
        let thread_flags = Arc::clone(&flags);
        let spawned = builder.spawn(move || ctx.run_thread(id, mailbox, thread_flags, body));

        if let Err(e) = spawned {
            shared.mailboxes().remove(&id);
            shared.allocated.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::CothreadSpawn(e));
        }

        debug!(context = %shared.name, cothread = %id, name, "cothread created");
        Ok(Cothread {
            id,
            flags,
            shared: Arc::clone(shared),
        })
    }

    /// Transfer control to `target` and wait until control comes back.
    ///
    /// Switching to the running cothread is a no-op. Returns
    /// [`Error::Shutdown`] if the caller was destroyed while suspended.
    pub fn switch_to(&self, target: CothreadId) -> Result<()> {
        let me = self.current();
        if me == target {
            return Ok(());
        }

        let (target_box, my_box) = {
            let boxes = self.shared.mailboxes();
            (boxes.get(&target).cloned(), boxes.get(&me).cloned())
        };
        let target_box = target_box.ok_or(Error::CothreadGone(target))?;
        let my_box = my_box.ok_or(Error::Shutdown)?;

        self.shared.current.store(target.0, Ordering::SeqCst);
        self.shared.switches.fetch_add(1, Ordering::Relaxed);
        trace!(from = %me, to = %target, "switch");

        if target_box.tx.send(Wake::Run).is_err() {
            self.shared.current.store(me.0, Ordering::SeqCst);
            return Err(Error::CothreadGone(target));
        }

        match my_box.rx.recv() {
            Ok(Wake::Run) => Ok(()),
            Ok(Wake::Exit) | Err(_) => Err(Error::Shutdown),
        }
    }

    /// Wake every cothread with an exit request and refuse further switches.
    pub fn shutdown(&self) {
        let boxes: Vec<_> = self.shared.mailboxes().drain().collect();
        for (id, mailbox) in boxes {
            if id != CothreadId::MAIN {
                let _ = mailbox.tx.try_send(Wake::Exit);
            }
        }
        debug!(context = %self.shared.name, "cothread context shut down");
    }

    fn run_thread<F>(&self, id: CothreadId, mailbox: Arc<Mailbox>, flags: Arc<CothreadFlags>, mut body: F)
    where
        F: FnMut(&CothreadFlags),
    {
        if !matches!(mailbox.rx.recv(), Ok(Wake::Run)) {
            return;
        }
        loop {
            if flags.is_cancelled() {
                break;
            }
            if panic::catch_unwind(AssertUnwindSafe(|| body(&flags))).is_err() {
                error!(cothread = %id, "cothread body panicked");
            }
            if flags.is_cancelled() {
                break;
            }
            if self.switch_to(CothreadId::MAIN).is_err() {
                break;
            }
        }
        trace!(cothread = %id, "cothread exited");
    }
}

impl fmt::Debug for CothreadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CothreadContext")
            .field("name", &self.shared.name)
            .field("current", &self.current())
            .field("allocated", &self.allocated())
            .field("max_cothreads", &self.shared.max_cothreads)
            .finish()
    }
}

/// Handle to a cothread. Dropping it destroys the cothread.
pub struct Cothread {
    id: CothreadId,
    flags: Arc<CothreadFlags>,
    shared: Arc<Shared>,
}

impl Cothread {
    /// The cothread's id.
    pub fn id(&self) -> CothreadId {
        self.id
    }

    /// Ask the body to return to the controller at its next check.
    pub fn request_stop(&self) {
        self.flags.request_stop();
    }

    /// Destroy the cothread.
    ///
    /// A suspended body sees [`Error::Shutdown`] from its pending switch.
    pub fn cancel(&self) {
        if self.flags.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mailbox) = self.shared.mailboxes().remove(&self.id) {
            let _ = mailbox.tx.try_send(Wake::Exit);
        }
        self.shared.allocated.fetch_sub(1, Ordering::SeqCst);
        debug!(context = %self.shared.name, cothread = %self.id, "cothread destroyed");
    }
}

impl Drop for Cothread {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Cothread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cothread")
            .field("id", &self.id)
            .field("cancelled", &self.flags.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_body_reruns_on_each_switch() {
        let ctx = CothreadContext::new("test", 4, None);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let co = ctx
            .spawn("worker", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        ctx.switch_to(co.id()).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(ctx.is_main());

        ctx.switch_to(co.id()).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_switch_resumes_mid_body() {
        let ctx = CothreadContext::new("test", 4, None);
        let log = Arc::new(Mutex::new(Vec::new()));
        let body_log = Arc::clone(&log);
        let body_ctx = ctx.clone();
        let co = ctx
            .spawn("worker", move |_| {
                body_log.lock().unwrap().push("a");
                if body_ctx.switch_to(CothreadId::MAIN).is_err() {
                    return;
                }
                body_log.lock().unwrap().push("b");
            })
            .unwrap();

        ctx.switch_to(co.id()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a"]);
        ctx.switch_to(co.id()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
        ctx.switch_to(co.id()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "a"]);
        assert!(ctx.switches() >= 6);
    }

    #[test]
    fn test_switch_to_self_is_noop() {
        let ctx = CothreadContext::new("test", 1, None);
        ctx.switch_to(CothreadId::MAIN).unwrap();
        assert_eq!(ctx.switches(), 0);
    }

    #[test]
    fn test_cothread_limit() {
        let ctx = CothreadContext::new("test", 1, None);
        let first = ctx.spawn("a", |_| {}).unwrap();
        assert_eq!(ctx.allocated(), 1);

        let err = ctx.spawn("b", |_| {}).unwrap_err();
        assert!(matches!(err, Error::CothreadsExhausted { max: 1 }));

        drop(first);
        assert_eq!(ctx.allocated(), 0);
        assert!(ctx.spawn("c", |_| {}).is_ok());
    }

    #[test]
    fn test_cancel_unblocks_suspended_body() {
        let ctx = CothreadContext::new("test", 2, None);
        let saw_shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&saw_shutdown);
        let body_ctx = ctx.clone();
        let co = ctx
            .spawn("worker", move |_| {
                if let Err(Error::Shutdown) = body_ctx.switch_to(CothreadId::MAIN) {
                    flag.store(true, Ordering::SeqCst);
                }
            })
            .unwrap();

        ctx.switch_to(co.id()).unwrap();
        let id = co.id();
        drop(co);

        assert!(wait_for(|| saw_shutdown.load(Ordering::SeqCst)));
        assert!(matches!(ctx.switch_to(id), Err(Error::CothreadGone(_))));
    }

    #[test]
    fn test_stop_flag() {
        let flags = CothreadFlags::default();
        assert!(!flags.take_stop());
        flags.request_stop();
        assert!(flags.take_stop());
        assert!(!flags.take_stop());
    }

    #[test]
    fn test_id_display() {
        assert_eq!(CothreadId::MAIN.to_string(), "main");
        assert_eq!(CothreadId(3).to_string(), "co#3");
    }
}
