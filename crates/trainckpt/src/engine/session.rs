//! In-process session state and its checkpoint codec.

use super::StateStore;
use crate::value::Value;
use crate::EngineError;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Version of the record layout written by [`SessionState`].
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// A named tensor of the trainable model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Parameter {
    /// Current parameter data
    pub data: ArrayD<f32>,
    /// Whether the parameter is trainable
    pub requires_grad: bool,
}

/// Optimizer state captured alongside the parameters.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OptimizerState {
    /// Number of optimizer steps taken
    pub step: i64,
    /// Learning rate at checkpoint time
    pub learning_rate: f64,
    /// Per-parameter moment buffers, keyed by parameter then moment name
    pub moments: BTreeMap<String, BTreeMap<String, ArrayD<f32>>>,
}

impl OptimizerState {
    /// Create optimizer state with no moment buffers.
    pub fn new(step: i64, learning_rate: f64) -> Self {
        Self {
            step,
            learning_rate,
            moments: BTreeMap::new(),
        }
    }

    /// Add a moment buffer (e.g. "momentum0") for a parameter.
    pub fn with_moment(
        mut self,
        parameter: impl Into<String>,
        moment: impl Into<String>,
        data: ArrayD<f32>,
    ) -> Self {
        self.moments
            .entry(parameter.into())
            .or_default()
            .insert(moment.into(), data);
        self
    }
}

/// Serialized checkpoint layout.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CheckpointRecord {
    /// Record layout version
    pub format_version: u32,
    /// Library version that produced the file
    pub producer: String,
    /// Unix timestamp (seconds) when the file was written
    pub timestamp: String,
    pub parameters: BTreeMap<String, Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer_state: Option<OptimizerState>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

/// Training session state held in memory.
///
/// Parameters and properties share no names. Checkpoints are written as
/// JSON [`CheckpointRecord`]s.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionState {
    parameters: BTreeMap<String, Parameter>,
    optimizer_state: Option<OptimizerState>,
    properties: BTreeMap<String, Value>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trainable parameter.
    pub fn insert_parameter(
        &mut self,
        name: impl Into<String>,
        data: ArrayD<f32>,
    ) -> Result<(), EngineError> {
        self.insert(name.into(), data, true)
    }

    /// Register a parameter that is excluded from training.
    pub fn insert_frozen_parameter(
        &mut self,
        name: impl Into<String>,
        data: ArrayD<f32>,
    ) -> Result<(), EngineError> {
        self.insert(name.into(), data, false)
    }

    fn insert(
        &mut self,
        name: String,
        data: ArrayD<f32>,
        requires_grad: bool,
    ) -> Result<(), EngineError> {
        if self.properties.contains_key(&name) {
            return Err(EngineError::NameConflict(name));
        }
        self.parameters.insert(
            name,
            Parameter {
                data,
                requires_grad,
            },
        );
        Ok(())
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }

    pub fn optimizer_state(&self) -> Option<&OptimizerState> {
        self.optimizer_state.as_ref()
    }

    /// Attach optimizer state. Every moment buffer must belong to a known
    /// parameter and match its shape.
    pub fn set_optimizer_state(&mut self, state: OptimizerState) -> Result<(), EngineError> {
        check_moments(&self.parameters, &state)?;
        self.optimizer_state = Some(state);
        Ok(())
    }

    pub fn clear_optimizer_state(&mut self) {
        self.optimizer_state = None;
    }

    /// Snapshot the state into a serializable record.
    pub fn to_record(&self, include_optimizer_state: bool) -> CheckpointRecord {
        CheckpointRecord {
            format_version: CHECKPOINT_FORMAT_VERSION,
            producer: format!("trainckpt {}", crate::VERSION),
            timestamp: unix_timestamp(),
            parameters: self.parameters.clone(),
            optimizer_state: if include_optimizer_state {
                self.optimizer_state.clone()
            } else {
                None
            },
            properties: self.properties.clone(),
        }
    }

    /// Rebuild a state from a record, validating version and namespaces.
    pub fn from_record(record: CheckpointRecord) -> Result<Self, EngineError> {
        if record.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(EngineError::VersionMismatch {
                expected: CHECKPOINT_FORMAT_VERSION,
                found: record.format_version,
            });
        }

        if let Some(name) = record
            .properties
            .keys()
            .find(|name| record.parameters.contains_key(*name))
        {
            return Err(EngineError::NameConflict(name.clone()));
        }

        if let Some(optimizer) = &record.optimizer_state {
            check_moments(&record.parameters, optimizer)?;
        }

        Ok(Self {
            parameters: record.parameters,
            optimizer_state: record.optimizer_state,
            properties: record.properties,
        })
    }
}

impl StateStore for SessionState {
    fn load_checkpoint(path: &str) -> Result<Self, EngineError> {
        let data = fs::read(path)?;
        let record: CheckpointRecord = serde_json::from_slice(&data)?;
        Self::from_record(record)
    }

    fn save_checkpoint(&self, path: &str, include_optimizer_state: bool) -> Result<(), EngineError> {
        let record = self.to_record(include_optimizer_state);
        // JSON has no NaN or infinity; refuse before touching the file.
        check_finite(&record)?;
        let data = serde_json::to_vec(&record)?;

        // Readers only ever see a complete file. The temporary file is
        // removed on drop unless it was persisted.
        let dir = Path::new(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::Builder::new()
            .prefix(".trainckpt-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| EngineError::Io(e.error))?;
        Ok(())
    }

    fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    fn has_parameter(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    fn get_property(&self, name: &str) -> Result<Value, EngineError> {
        self.properties
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownProperty(name.to_string()))
    }

    fn add_property(&mut self, name: &str, value: Value) -> Result<(), EngineError> {
        if self.parameters.contains_key(name) {
            return Err(EngineError::NameConflict(name.to_string()));
        }
        self.properties.insert(name.to_string(), value);
        Ok(())
    }

    fn get_parameter_data(&self, name: &str) -> Result<ArrayD<f32>, EngineError> {
        self.parameters
            .get(name)
            .map(|p| p.data.clone())
            .ok_or_else(|| EngineError::UnknownParameter(name.to_string()))
    }

    fn update_parameter_data(&mut self, name: &str, data: ArrayD<f32>) -> Result<(), EngineError> {
        let param = self
            .parameters
            .get_mut(name)
            .ok_or_else(|| EngineError::UnknownParameter(name.to_string()))?;

        if param.data.shape() != data.shape() {
            return Err(EngineError::ShapeMismatch {
                expected: param.data.shape().to_vec(),
                actual: data.shape().to_vec(),
            });
        }
        param.data = data;
        Ok(())
    }

    fn property_names(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.parameters.keys().cloned().collect()
    }
}

fn check_moments(
    parameters: &BTreeMap<String, Parameter>,
    optimizer: &OptimizerState,
) -> Result<(), EngineError> {
    for (name, moments) in &optimizer.moments {
        let param = parameters
            .get(name)
            .ok_or_else(|| EngineError::UnknownParameter(name.clone()))?;
        for data in moments.values() {
            if data.shape() != param.data.shape() {
                return Err(EngineError::ShapeMismatch {
                    expected: param.data.shape().to_vec(),
                    actual: data.shape().to_vec(),
                });
            }
        }
    }
    Ok(())
}

fn all_finite(data: &ArrayD<f32>) -> bool {
    data.iter().all(|x| x.is_finite())
}

fn check_finite(record: &CheckpointRecord) -> Result<(), EngineError> {
    for (name, value) in &record.properties {
        let finite = match value {
            Value::Float(v) => v.is_finite(),
            Value::Array(data) => all_finite(data),
            Value::Int(_) | Value::String(_) => true,
        };
        if !finite {
            return Err(EngineError::NonFinite(name.clone()));
        }
    }

    if let Some(name) = record
        .parameters
        .iter()
        .find(|(_, param)| !all_finite(&param.data))
        .map(|(name, _)| name)
    {
        return Err(EngineError::NonFinite(name.clone()));
    }

    if let Some(optimizer) = &record.optimizer_state {
        if !optimizer.learning_rate.is_finite() {
            return Err(EngineError::NonFinite("learning_rate".to_string()));
        }
        for (param, moments) in &optimizer.moments {
            if let Some(moment) = moments.iter().find(|(_, data)| !all_finite(data)).map(|(m, _)| m) {
                return Err(EngineError::NonFinite(format!("{}/{}", param, moment)));
            }
        }
    }
    Ok(())
}

fn unix_timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", duration.as_secs())
}
