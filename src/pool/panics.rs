//! Panic capture at the routine boundary.
//!
//! A process-wide hook is installed once and chained to whatever hook was
//! there before. While a routine runs on the current thread the hook records
//! the panic location and a backtrace taken at the panic site, and prints
//! nothing; the report goes to the pool's diagnostic sink instead. Panics
//! anywhere else reach the previous hook unchanged.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

/// Where a panic happened, recorded by the hook before unwinding
#[derive(Debug, Clone)]
pub(crate) struct PanicSite {
    pub(crate) location: Option<String>,
    pub(crate) backtrace: String,
}

/// A panic payload caught at the routine boundary
pub(crate) struct CaughtPanic {
    pub(crate) payload: Box<dyn Any + Send>,
    /// `None` when the hook was replaced after the pool installed it
    pub(crate) site: Option<PanicSite>,
}

thread_local! {
    static ROUTINE_DEPTH: Cell<usize> = const { Cell::new(0) };
    static LAST_SITE: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

pub(crate) fn install_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if ROUTINE_DEPTH.try_with(Cell::get).unwrap_or(0) == 0 {
                previous(info);
                return;
            }
            let site = PanicSite {
                location: info.location().map(|location| location.to_string()),
                backtrace: Backtrace::force_capture().to_string(),
            };
            let _ = LAST_SITE.try_with(|slot| *slot.borrow_mut() = Some(site));
        }));
    });
}

/// Marks the current thread as running a routine
struct RoutineScope;

impl RoutineScope {
    fn enter() -> Self {
        ROUTINE_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for RoutineScope {
    fn drop(&mut self) {
        ROUTINE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn take_site() -> Option<PanicSite> {
    LAST_SITE.with(|slot| slot.borrow_mut().take())
}

/// Run `f`, catching any panic together with the site the hook recorded.
pub(crate) fn isolate<R>(f: impl FnOnce() -> R) -> Result<R, CaughtPanic> {
    install_hook();
    // stale site left by a panic the routine caught itself
    take_site();

    let result = {
        let _scope = RoutineScope::enter();
        panic::catch_unwind(AssertUnwindSafe(f))
    };
    result.map_err(|payload| CaughtPanic {
        payload,
        site: take_site(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn fail_inside_named_frame() -> u32 {
        panic!("named frame failure")
    }

    #[test]
    fn test_isolate_passes_value_through() {
        let value = isolate(|| 7).ok();
        assert_eq!(value, Some(7));
        assert_eq!(ROUTINE_DEPTH.with(Cell::get), 0);
    }

    #[test]
    fn test_site_points_at_panicking_frame() {
        let caught = match isolate(fail_inside_named_frame) {
            Ok(_) => panic!("routine should have panicked"),
            Err(caught) => caught,
        };
        assert_eq!(
            caught.payload.downcast_ref::<&str>(),
            Some(&"named frame failure")
        );

        let site = caught.site.expect("hook records the site");
        assert!(site.location.unwrap_or_default().contains("panics.rs"));
        assert!(
            site.backtrace.contains("fail_inside_named_frame"),
            "backtrace misses panic site: {}",
            site.backtrace
        );
        assert_eq!(ROUTINE_DEPTH.with(Cell::get), 0);
    }

    #[test]
    fn test_routine_catching_its_own_panic_succeeds() {
        let result = isolate(|| {
            let inner = panic::catch_unwind(|| panic!("handled by the routine"));
            inner.is_err()
        });
        assert_eq!(result.ok(), Some(true));

        let caught = isolate(|| panic::panic_any(5u8)).err();
        let caught = caught.expect("second routine panics");
        assert_eq!(caught.payload.downcast_ref::<u8>(), Some(&5));
        assert!(caught.site.is_some());
        assert!(take_site().is_none());
    }
}
