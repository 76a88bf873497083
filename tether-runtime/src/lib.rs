//! Runtime control plane for Tether
//!
//! This crate keeps the delegated runtime process alive and turns calls into
//! exactly one callback each: process supervision with crash-loop backoff, a
//! request registry swept once per tick, the request gate, and the message
//! link that connects them to the running process.

pub mod backoff;
pub mod control;
pub mod error;
pub mod gate;
pub mod link;
pub mod process;
pub mod registry;
pub mod stub;
pub mod supervisor;
pub mod sweep;

// Re-export commonly used types
pub use backoff::RestartThrottle;
pub use control::ControlPlane;
pub use error::{RegistryError, RuntimeError};
pub use gate::RequestGate;
pub use link::RuntimeLink;
pub use process::{
    DiagnosticStream, LaunchSpec, ProcessIo, ProcessLauncher, RuntimeProcess, TokioLauncher,
    TokioProcess,
};
pub use registry::{PendingRequest, RequestRegistry, RetryAction, TickReport};
pub use stub::{StubBehavior, StubLauncher, StubProcess, StubRuntime};
pub use supervisor::{ProcessObserver, Supervisor, SupervisorOptions};
pub use sweep::{DeferredFire, FireScheduler, Sweep};
