#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod manager;
pub mod metrics;
pub mod profile;
pub mod queue;
pub mod reconcile;
pub mod resource;
pub mod router;
pub mod status;
pub mod store;
pub mod validation;
pub mod workload;


pub use self::{
    manager::{StatusEvent, StatusManagerHandle},
    metrics::ControllerMetrics,
    profile::{BuiltinGenerator, ProfileGenerator},
    queue::WorkQueue,
    reconcile::{Controller, ControllerConfig},
    resource::{PolicyResource, ResourceId},
    store::{KubeStore, ResourceStore, StoreError},
    workload::{KubeWorkloadNotifier, WorkloadNotifier},
};
