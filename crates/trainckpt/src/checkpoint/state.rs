//! Name-addressable checkpoint state.

use crate::engine::{RawHandle, SessionState, StateStore};
use crate::value::Value;
use crate::{CheckpointError, Result};
use std::path::Path;

/// Namespace a name resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// User-defined value stored next to the model
    Property,
    /// Tensor belonging to the trainable model
    Parameter,
}

/// State of a training session: model parameters, optimizer state and
/// user-defined properties.
///
/// Properties and parameters are addressed by name. Lookups check the
/// property namespace first, then the parameter namespace.
///
/// Reads take `&self` and writes take `&mut self`; share a state across
/// threads behind a `Mutex` or `RwLock`.
///
/// # Example
///
/// ```ignore
/// let mut state: CheckpointState = CheckpointState::load_checkpoint("ckpt.json")?;
///
/// if state.contains("epoch") {
///     state.set("epoch", 4)?;
/// }
/// let weights = state.get("layer1.weight")?;
///
/// CheckpointState::save_checkpoint(&state, "ckpt.json", true)?;
/// ```
#[derive(Debug)]
pub struct CheckpointState<S: StateStore = SessionState> {
    state: S,
}

impl<S: StateStore> CheckpointState<S> {
    /// Wrap an engine state.
    pub fn new(state: S) -> Self {
        Self { state }
    }

    /// Wrap an untyped engine handle, checking its concrete type.
    pub fn from_handle(handle: Box<dyn RawHandle>) -> Result<Self> {
        let received = (*handle).type_name();
        match handle.into_any().downcast::<S>() {
            Ok(state) => Ok(Self::new(*state)),
            Err(_) => Err(CheckpointError::TypeMismatch {
                expected: std::any::type_name::<S>(),
                received,
            }),
        }
    }

    /// Load the checkpoint state from a checkpoint file.
    pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let uri = path_str(path)?;
        tracing::info!(path = uri, "Loading checkpoint");

        let state = S::load_checkpoint(uri).map_err(|source| CheckpointError::LoadFailure {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(state))
    }

    /// Save the checkpoint state to a checkpoint file.
    ///
    /// Optimizer state is written only when `include_optimizer_state` is set.
    pub fn save_checkpoint(
        state: &Self,
        path: impl AsRef<Path>,
        include_optimizer_state: bool,
    ) -> Result<()> {
        let path = path.as_ref();
        let uri = path_str(path)?;

        state
            .state
            .save_checkpoint(uri, include_optimizer_state)
            .map_err(|source| CheckpointError::SaveFailure {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!(path = uri, include_optimizer_state, "Saved checkpoint");
        Ok(())
    }

    /// Resolve which namespace holds `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<EntryKind> {
        if self.state.has_property(name) {
            Some(EntryKind::Property)
        } else if self.state.has_parameter(name) {
            Some(EntryKind::Parameter)
        } else {
            None
        }
    }

    /// Get the property value or parameter data for `name`.
    ///
    /// Returns `Ok(None)` if the name is neither a property nor a parameter.
    pub fn get(&self, name: &str) -> Result<Option<Value>> {
        let value = match self.lookup(name) {
            Some(EntryKind::Property) => Some(self.state.get_property(name)?),
            Some(EntryKind::Parameter) => Some(Value::Array(self.state.get_parameter_data(name)?)),
            None => None,
        };
        Ok(value)
    }

    /// Overwrite the property value or parameter data for `name`.
    ///
    /// Parameters only accept [`Value::Array`] of the parameter's shape.
    /// Fails with [`CheckpointError::NameNotFound`] if `name` is unknown.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value: Value = value.into();
        match self.lookup(name) {
            Some(EntryKind::Property) => {
                tracing::debug!(name, kind = value.kind(), "Updating property");
                self.state.add_property(name, value)?;
            }
            Some(EntryKind::Parameter) => {
                tracing::debug!(name, "Updating parameter data");
                let data = value
                    .into_array()
                    .ok_or_else(|| CheckpointError::NotAnArray(name.to_string()))?;
                self.state.update_parameter_data(name, data)?;
            }
            None => return Err(CheckpointError::NameNotFound(name.to_string())),
        }
        Ok(())
    }

    /// Check whether `name` is a property or a parameter.
    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn property_names(&self) -> Vec<String> {
        self.state.property_names()
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.state.parameter_names()
    }

    /// Borrow the backing engine state.
    pub fn store(&self) -> &S {
        &self.state
    }

    /// Release the backing engine state.
    pub fn into_inner(self) -> S {
        self.state
    }
}

impl<S: StateStore> From<S> for CheckpointState<S> {
    fn from(state: S) -> Self {
        Self::new(state)
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| CheckpointError::InvalidPath(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OptimizerState;
    use crate::EngineError;
    use ndarray::{arr1, arr2, ArrayD};
    use tempfile::tempdir;

    fn sample_state() -> CheckpointState {
        let mut session = SessionState::new();
        session.add_property("epoch", Value::Int(3)).unwrap();
        session.add_property("lr", Value::Float(0.1)).unwrap();
        session
            .insert_parameter("w", arr1(&[1.0, 2.0]).into_dyn())
            .unwrap();
        session
            .insert_parameter("layer1.weight", arr2(&[[1.0, 0.0], [0.0, 1.0]]).into_dyn())
            .unwrap();
        session
            .set_optimizer_state(
                OptimizerState::new(10, 0.1).with_moment("w", "momentum0", arr1(&[0.1, 0.2]).into_dyn()),
            )
            .unwrap();
        CheckpointState::new(session)
    }

    #[test]
    fn test_load_and_index_by_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ckpt.bin");
        CheckpointState::save_checkpoint(&sample_state(), &path, false).unwrap();

        let state: CheckpointState = CheckpointState::load_checkpoint(&path).unwrap();

        assert_eq!(state.get("epoch").unwrap(), Some(Value::Int(3)));
        assert_eq!(
            state.get("w").unwrap(),
            Some(Value::Array(arr1(&[1.0, 2.0]).into_dyn()))
        );
        assert!(state.contains("epoch"));
        assert!(state.contains("w"));
        assert!(!state.contains("missing"));
    }

    #[test]
    fn test_from_handle_rejects_wrong_type() {
        let err = CheckpointState::<SessionState>::from_handle(Box::new(42u32)).unwrap_err();
        match err {
            CheckpointError::TypeMismatch { expected, received } => {
                assert!(expected.ends_with("SessionState"));
                assert_eq!(received, "u32");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_handle_accepts_store() {
        let handle: Box<dyn RawHandle> = Box::new(sample_state().into_inner());
        let state = CheckpointState::<SessionState>::from_handle(handle).unwrap();
        assert!(state.contains("layer1.weight"));
    }

    #[test]
    fn test_lookup_prefers_property_namespace() {
        let state = sample_state();
        assert_eq!(state.lookup("epoch"), Some(EntryKind::Property));
        assert_eq!(state.lookup("w"), Some(EntryKind::Parameter));
        assert_eq!(state.lookup("missing"), None);
    }

    #[test]
    fn test_contains_matches_store_queries() {
        let state = sample_state();
        for name in ["epoch", "lr", "w", "layer1.weight", "missing", ""] {
            let store = state.store();
            assert!(!(store.has_property(name) && store.has_parameter(name)));
            assert_eq!(
                state.contains(name),
                store.has_property(name) || store.has_parameter(name)
            );
        }
    }

    #[test]
    fn test_set_property_then_get() {
        let mut state = sample_state();
        state.set("lr", 0.01).unwrap();
        assert_eq!(state.get("lr").unwrap(), Some(Value::Float(0.01)));

        // Properties may change type.
        state.set("epoch", "done").unwrap();
        assert_eq!(state.get("epoch").unwrap(), Some(Value::from("done")));
    }

    #[test]
    fn test_set_parameter_then_get() {
        let mut state = sample_state();
        let arr = arr2(&[[0.5, 0.5], [0.25, 0.75]]).into_dyn();
        state.set("layer1.weight", arr.clone()).unwrap();

        let value = state.get("layer1.weight").unwrap().unwrap();
        assert_eq!(value.as_array(), Some(&arr));
    }

    #[test]
    fn test_set_parameter_rejects_bad_values() {
        let mut state = sample_state();

        let err = state.set("w", 1.0).unwrap_err();
        assert!(matches!(err, CheckpointError::NotAnArray(name) if name == "w"));

        let err = state
            .set("w", ArrayD::<f32>::zeros(vec![3]))
            .unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::Engine(EngineError::ShapeMismatch { .. })
        ));

        // Failed writes leave the data untouched.
        assert_eq!(
            state.get("w").unwrap(),
            Some(Value::Array(arr1(&[1.0, 2.0]).into_dyn()))
        );
    }

    #[test]
    fn test_unknown_name() {
        let mut state = sample_state();
        assert_eq!(state.get("missing").unwrap(), None);

        let err = state.set("missing", 1).unwrap_err();
        assert!(matches!(err, CheckpointError::NameNotFound(name) if name == "missing"));
        assert!(!state.contains("missing"));
    }

    #[test]
    fn test_round_trip_with_optimizer_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("full.json");

        let state = sample_state();
        CheckpointState::save_checkpoint(&state, &path, true).unwrap();
        let loaded: CheckpointState = CheckpointState::load_checkpoint(&path).unwrap();

        assert_eq!(loaded.store(), state.store());
        for name in state.property_names().iter().chain(state.parameter_names().iter()) {
            assert_eq!(loaded.get(name).unwrap(), state.get(name).unwrap());
        }
    }

    #[test]
    fn test_non_finite_values_fail_save_and_keep_file_loadable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ckpt.json");

        let mut state = sample_state();
        CheckpointState::save_checkpoint(&state, &path, true).unwrap();

        state.set("lr", f64::NAN).unwrap();
        let err = CheckpointState::save_checkpoint(&state, &path, true).unwrap_err();
        assert!(matches!(
            &err,
            CheckpointError::SaveFailure { source: EngineError::NonFinite(name), .. } if name == "lr"
        ));

        state.set("lr", 0.1).unwrap();
        state.set("w", arr1(&[1.0, f32::INFINITY]).into_dyn()).unwrap();
        assert!(CheckpointState::save_checkpoint(&state, &path, false).is_err());

        let loaded: CheckpointState = CheckpointState::load_checkpoint(&path).unwrap();
        assert_eq!(loaded.store(), sample_state().store());
    }

    #[test]
    fn test_invalid_optimizer_state_never_reaches_disk() {
        let mut session = sample_state().into_inner();
        let err = session
            .set_optimizer_state(OptimizerState::new(1, 0.1).with_moment(
                "ghost",
                "momentum0",
                arr1(&[0.0]).into_dyn(),
            ))
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownParameter(name) if name == "ghost"));

        let dir = tempdir().unwrap();
        let path = dir.path().join("ckpt.json");
        let state = CheckpointState::new(session);
        CheckpointState::save_checkpoint(&state, &path, true).unwrap();

        let loaded: CheckpointState = CheckpointState::load_checkpoint(&path).unwrap();
        assert_eq!(loaded.store(), state.store());
    }

    #[test]
    fn test_each_load_reads_storage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ckpt.json");

        let mut state = sample_state();
        CheckpointState::save_checkpoint(&state, &path, false).unwrap();
        let first: CheckpointState = CheckpointState::load_checkpoint(&path).unwrap();

        state.set("epoch", 4).unwrap();
        CheckpointState::save_checkpoint(&state, &path, false).unwrap();
        let second: CheckpointState = CheckpointState::load_checkpoint(&path).unwrap();

        assert_eq!(first.get("epoch").unwrap(), Some(Value::Int(3)));
        assert_eq!(second.get("epoch").unwrap(), Some(Value::Int(4)));
    }

    #[test]
    fn test_load_failure_names_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.json");

        let err = CheckpointState::<SessionState>::load_checkpoint(&path).unwrap_err();
        assert!(matches!(
            &err,
            CheckpointError::LoadFailure { source: EngineError::Io(_), .. }
        ));
        assert!(err.to_string().contains("nope.json"));
    }

    #[test]
    fn test_save_failure_names_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("no_such_dir").join("ckpt.json");

        let err = CheckpointState::save_checkpoint(&sample_state(), &path, false).unwrap_err();
        assert!(matches!(&err, CheckpointError::SaveFailure { .. }));
        assert!(err.to_string().contains("no_such_dir"));
    }
}
