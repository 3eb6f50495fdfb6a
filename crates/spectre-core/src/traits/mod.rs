//! Seams between the protocol core and host-specific collaborators

mod probe;
mod process;

pub use probe::HostProbe;
pub use process::ProcessProbe;
