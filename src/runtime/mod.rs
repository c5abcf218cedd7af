//! Container Runtime Adapter: a uniform interface to the host container runtime.

mod docker;
mod traits;

pub use docker::{engine_label, DockerRuntimeAdapter};
pub use traits::{
    ContainerOptions, ContainerSummary, MountSpec, RuntimeAdapter, RuntimeError, RuntimeEvent,
    RuntimeEventFilter, RuntimeResult,
};
