//! ecr-admission: validating admission webhook for Amazon ECR compliance.
//!
//! Decides whether a workload may be created based on the registry-side
//! policy of every managed image it references: the repository must exist,
//! have tag immutability and scan on push enabled, and the image scan must
//! report no critical finding.
//!
//! See `DESIGN.md` for the module map.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admission;
pub mod compliance;
pub mod config;
pub mod image;
pub mod logging;
pub mod registry;
pub mod webhook;
