//! # Parameter System
//!
//! Physical parameters of every model component, organised in groups.
//!
//! ## Key Features
//!
//! - **Grouped Parameters**: one instance per `(component, name, group)`, so a
//!   quantity can diverge between observations while the rest stay shared
//! - **Bounds**: every value carries a closed interval checked on assignment
//! - **Stable Vector Layout**: fitted parameters are always enumerated in the
//!   same order, which defines the optimizer vector
//! - **Serialization Support**: parameters and bounds are serde types
//!
//! ## Core Components
//!
//! - [`Parameter`]: a single value with bounds, unit, group and fitted flag
//! - [`ParameterRegistry`]: all parameters of all components
//! - [`Bounds`]: closed `[vmin, vmax]` interval
//!
//! ## Example Usage
//!
//! ```rust
//! use specfit_rs::parameters::ParameterRegistry;
//! use std::collections::BTreeMap;
//!
//! let mut registry = ParameterRegistry::new();
//! registry.add_component("primary", &BTreeMap::new()).unwrap();
//!
//! // Let the radial velocity differ between two epochs
//! registry.set_groups("primary", "rv", &[0, 1]).unwrap();
//! registry.update(Some("primary"), "rv", None, &specfit_rs::parameters::ParameterUpdate::fitted(true)).unwrap();
//!
//! assert_eq!(registry.fitted_count(), 2);
//! ```

pub mod bounds;
pub mod definitions;
pub mod parameter;
pub mod registry;

// Include tests
#[cfg(test)]
mod tests;

// Re-export key types
pub use bounds::{Bounds, BoundsError};
pub use definitions::{is_directly_applied, DIRECTLY_APPLIED};
pub use parameter::{GroupId, Parameter, ParameterKey, ParameterUpdate, DEFAULT_GROUP};
pub use registry::{ParameterRegistry, ALL_COMPONENTS};
