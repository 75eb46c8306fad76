#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use warden_policy_controller_k8s_api as k8s;
pub use warden_policy_controller_k8s_sync as sync;

mod args;

pub use self::args::Args;
