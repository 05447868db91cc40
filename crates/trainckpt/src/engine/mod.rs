//! Backing state engines.
//!
//! Provides:
//! - `StateStore` trait, the contract a checkpoint engine implements
//! - `RawHandle` for passing untyped engine handles across a boundary
//! - `SessionState`, an in-process engine with a JSON checkpoint codec

mod session;

pub use session::{
    CheckpointRecord, OptimizerState, Parameter, SessionState, CHECKPOINT_FORMAT_VERSION,
};

use crate::value::Value;
use crate::EngineError;
use ndarray::ArrayD;
use std::any::Any;

/// Trait for engines that own training session state.
///
/// Properties and parameters live in disjoint namespaces. The `get_*` and
/// `update_*` accessors assume the caller already checked membership with
/// the matching `has_*` query.
pub trait StateStore: Sized + 'static {
    /// Deserialize a checkpoint file into a new store.
    fn load_checkpoint(path: &str) -> Result<Self, EngineError>;

    /// Serialize the store to `path`, optionally including optimizer state.
    fn save_checkpoint(&self, path: &str, include_optimizer_state: bool)
        -> Result<(), EngineError>;

    fn has_property(&self, name: &str) -> bool;

    fn has_parameter(&self, name: &str) -> bool;

    fn get_property(&self, name: &str) -> Result<Value, EngineError>;

    /// Create or overwrite a property.
    fn add_property(&mut self, name: &str, value: Value) -> Result<(), EngineError>;

    fn get_parameter_data(&self, name: &str) -> Result<ArrayD<f32>, EngineError>;

    /// Overwrite a parameter's data. Shapes must match.
    fn update_parameter_data(&mut self, name: &str, data: ArrayD<f32>)
        -> Result<(), EngineError>;

    /// Property names in sorted order.
    fn property_names(&self) -> Vec<String>;

    /// Parameter names in sorted order.
    fn parameter_names(&self) -> Vec<String>;
}

/// An opaque engine handle whose concrete type is only known at runtime.
///
/// Implemented for every `'static + Send` type, so any store can be boxed
/// as a `Box<dyn RawHandle>` and later checked back into its concrete type.
pub trait RawHandle: Any + Send {
    /// Name of the concrete type behind the handle.
    fn type_name(&self) -> &'static str;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Any + Send> RawHandle for T {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}
