//! Transformers from ModelDeployment to runtime-native resources
//!
//! A [`Transformer`] turns a validated deployment into owned child objects for
//! one runtime. Transformers are pure; applying their output is the runtime
//! controller's job. The [`TransformerRegistry`] maps the provider id stored in
//! `status.provider.name` to its implementation.

#![deny(missing_docs)]

pub mod child;
pub mod dynamo;
pub mod error;
pub mod kaito;
pub mod kuberay;
pub mod overrides;
pub mod pod;
pub mod topology;
pub mod transformer;

pub use child::{ChildMetadata, ChildResource};
pub use dynamo::DynamoTransformer;
pub use error::TransformError;
pub use kaito::KaitoTransformer;
pub use kuberay::KubeRayTransformer;
pub use overrides::{apply_overrides, OverrideTarget};
pub use topology::{Topology, WorkerGroup};
pub use transformer::{ObservedStatus, Transformer, TransformerRegistry};
