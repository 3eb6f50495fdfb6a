//! Process liveness capability

/// Platform check for whether a process id still refers to a live process
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}
