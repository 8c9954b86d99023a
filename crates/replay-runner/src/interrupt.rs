use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

static CTRL_C_FLAG: OnceLock<InterruptFlag> = OnceLock::new();

/// Shared stop flag set by Ctrl-C. The run loop polls it between invocations.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide flag, installing the Ctrl-C handler on first use.
    /// `ctrlc` only accepts one handler per process, so later calls share it.
    pub fn install() -> Result<Self> {
        if let Some(flag) = CTRL_C_FLAG.get() {
            return Ok(flag.clone());
        }
        let flag = InterruptFlag::new();
        let for_handler = flag.clone();
        ctrlc::set_handler(move || {
            for_handler.trigger();
        })
        .map_err(|e| anyhow!("interrupt_handler: failed to install Ctrl-C handler: {}", e))?;
        Ok(CTRL_C_FLAG.get_or_init(|| flag).clone())
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let flag = InterruptFlag::new();
        let seen_by_loop = flag.clone();
        assert!(!seen_by_loop.is_set());
        flag.trigger();
        assert!(seen_by_loop.is_set());
    }
}
