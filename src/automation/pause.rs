use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Suspends automation while composite records are being written.
///
/// Counts holders, so overlapping writers keep it raised until the last
/// guard drops.
#[derive(Clone, Default)]
pub struct DataProcessingPause {
    holders: Arc<AtomicUsize>,
}

impl DataProcessingPause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&self) -> PauseGuard {
        self.holders.fetch_add(1, Ordering::SeqCst);
        PauseGuard {
            holders: self.holders.clone(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.holders.load(Ordering::SeqCst) > 0
    }
}

/// Releases the pause when dropped, including on early return.
#[must_use = "the pause is released as soon as the guard is dropped"]
pub struct PauseGuard {
    holders: Arc<AtomicUsize>,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.holders.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_raises_and_clears() {
        let pause = DataProcessingPause::new();
        assert!(!pause.is_paused());
        let guard = pause.hold();
        assert!(pause.is_paused());
        drop(guard);
        assert!(!pause.is_paused());
    }

    #[test]
    fn overlapping_holders() {
        let pause = DataProcessingPause::new();
        let a = pause.hold();
        let b = pause.clone().hold();
        drop(a);
        assert!(pause.is_paused());
        drop(b);
        assert!(!pause.is_paused());
    }

    #[test]
    fn cleared_on_error_path() {
        fn failing_save(pause: &DataProcessingPause) -> Result<(), &'static str> {
            let _guard = pause.hold();
            Err("disk full")
        }
        let pause = DataProcessingPause::new();
        assert!(failing_save(&pause).is_err());
        assert!(!pause.is_paused());
    }
}
