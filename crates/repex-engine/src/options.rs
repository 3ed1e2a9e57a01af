//! Tagged option values persisted in the static group of a run.
//!
//! Every option is stored together with the kind of value it holds so the
//! record reconstructs [`RunOptions`] exactly, without reflective lookups.

use indexmap::IndexMap;
use repex_core::{ErrorInfo, RepexError};
use serde::{Deserialize, Serialize};

use crate::config::{MixingScheme, RunOptions};

/// Unit attached to collision rates.
pub const UNIT_INVERSE_PICOSECOND: &str = "1/picosecond";
/// Unit attached to timesteps.
pub const UNIT_FEMTOSECOND: &str = "femtosecond";

/// One persisted option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum OptionValue {
    /// Signed integer.
    Integer(i64),
    /// Floating point scalar.
    Float(f64),
    /// Text.
    String(String),
    /// Flag.
    Boolean(bool),
    /// Scalar with a physical unit.
    Quantity {
        /// Magnitude expressed in `unit`.
        value: f64,
        /// Unit label.
        unit: String,
    },
}

impl OptionValue {
    /// Name of the value kind, as used in error context.
    pub fn kind(&self) -> &'static str {
        match self {
            OptionValue::Integer(_) => "integer",
            OptionValue::Float(_) => "float",
            OptionValue::String(_) => "string",
            OptionValue::Boolean(_) => "boolean",
            OptionValue::Quantity { .. } => "quantity",
        }
    }
}

/// Flat, insertion-ordered map from option name to tagged value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionsRecord {
    entries: IndexMap<String, OptionValue>,
}

impl OptionsRecord {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entry.
    pub fn insert(&mut self, key: impl Into<String>, value: OptionValue) {
        self.entries.insert(key.into(), value);
    }

    /// Looks up an entry.
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.entries.get(key)
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the record has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn integer(&self, key: &str) -> Result<Option<i64>, RepexError> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Integer(value)) => Ok(Some(*value)),
            Some(other) => Err(type_mismatch(key, "integer", other)),
        }
    }

    fn count(&self, key: &str) -> Result<Option<usize>, RepexError> {
        match self.integer(key)? {
            None => Ok(None),
            Some(value) => usize::try_from(value).map(Some).map_err(|_| {
                RepexError::Resume(
                    ErrorInfo::new("option-out-of-range", "stored count is negative")
                        .with_context("option", key)
                        .with_context("value", value),
                )
            }),
        }
    }

    fn float(&self, key: &str) -> Result<Option<f64>, RepexError> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Float(value)) => Ok(Some(*value)),
            Some(other) => Err(type_mismatch(key, "float", other)),
        }
    }

    fn boolean(&self, key: &str) -> Result<Option<bool>, RepexError> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Boolean(value)) => Ok(Some(*value)),
            Some(other) => Err(type_mismatch(key, "boolean", other)),
        }
    }

    fn string(&self, key: &str) -> Result<Option<&str>, RepexError> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::String(value)) => Ok(Some(value.as_str())),
            Some(other) => Err(type_mismatch(key, "string", other)),
        }
    }

    fn quantity(&self, key: &str, unit: &str) -> Result<Option<f64>, RepexError> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Quantity {
                value,
                unit: stored,
            }) if stored == unit => Ok(Some(*value)),
            Some(OptionValue::Quantity { unit: stored, .. }) => Err(RepexError::Resume(
                ErrorInfo::new("option-unit-mismatch", "stored quantity has unexpected unit")
                    .with_context("option", key)
                    .with_context("expected", unit)
                    .with_context("found", stored),
            )),
            Some(other) => Err(type_mismatch(key, "quantity", other)),
        }
    }
}

fn type_mismatch(key: &str, expected: &str, found: &OptionValue) -> RepexError {
    RepexError::Resume(
        ErrorInfo::new("option-type-mismatch", "stored option has unexpected value kind")
            .with_context("option", key)
            .with_context("expected", expected)
            .with_context("found", found.kind()),
    )
}

fn integer_of(key: &str, count: usize) -> Result<OptionValue, RepexError> {
    i64::try_from(count).map(OptionValue::Integer).map_err(|_| {
        RepexError::Configuration(
            ErrorInfo::new("option-out-of-range", "count does not fit a stored integer")
                .with_context("option", key)
                .with_context("value", count),
        )
    })
}

impl RunOptions {
    /// Converts the options into their persisted tagged form. Counts above
    /// `i64::MAX` are rejected rather than clamped.
    pub fn to_record(&self) -> Result<OptionsRecord, RepexError> {
        let mut record = OptionsRecord::new();
        record.insert("title", OptionValue::String(self.title.clone()));
        record.insert(
            "collision_rate",
            OptionValue::Quantity {
                value: self.collision_rate,
                unit: UNIT_INVERSE_PICOSECOND.to_string(),
            },
        );
        record.insert(
            "constraint_tolerance",
            OptionValue::Float(self.constraint_tolerance),
        );
        record.insert(
            "timestep",
            OptionValue::Quantity {
                value: self.timestep,
                unit: UNIT_FEMTOSECOND.to_string(),
            },
        );
        record.insert(
            "nsteps_per_iteration",
            integer_of("nsteps_per_iteration", self.nsteps_per_iteration)?,
        );
        record.insert(
            "number_of_iterations",
            integer_of("number_of_iterations", self.number_of_iterations)?,
        );
        record.insert(
            "equilibration_timestep",
            OptionValue::Quantity {
                value: self.equilibration_timestep,
                unit: UNIT_FEMTOSECOND.to_string(),
            },
        );
        record.insert(
            "number_of_equilibration_iterations",
            integer_of(
                "number_of_equilibration_iterations",
                self.number_of_equilibration_iterations,
            )?,
        );
        record.insert("minimize", OptionValue::Boolean(self.minimize));
        record.insert(
            "replica_mixing_scheme",
            OptionValue::String(self.replica_mixing_scheme.as_str().to_string()),
        );
        record.insert("online_analysis", OptionValue::Boolean(self.online_analysis));
        record.insert(
            "show_mixing_statistics",
            OptionValue::Boolean(self.show_mixing_statistics),
        );
        // Two's-complement bit pattern; `from_record` reverses the cast.
        record.insert("master_seed", OptionValue::Integer(self.master_seed as i64));
        record.insert(
            "propagation_threads",
            integer_of("propagation_threads", self.propagation_threads)?,
        );
        Ok(record)
    }

    /// Rebuilds options from a persisted record.
    ///
    /// Missing keys take their defaults and unknown keys are ignored.
    pub fn from_record(record: &OptionsRecord) -> Result<Self, RepexError> {
        let mut options = RunOptions::default();
        if let Some(title) = record.string("title")? {
            options.title = title.to_string();
        }
        if let Some(value) = record.quantity("collision_rate", UNIT_INVERSE_PICOSECOND)? {
            options.collision_rate = value;
        }
        if let Some(value) = record.float("constraint_tolerance")? {
            options.constraint_tolerance = value;
        }
        if let Some(value) = record.quantity("timestep", UNIT_FEMTOSECOND)? {
            options.timestep = value;
        }
        if let Some(value) = record.count("nsteps_per_iteration")? {
            options.nsteps_per_iteration = value;
        }
        if let Some(value) = record.count("number_of_iterations")? {
            options.number_of_iterations = value;
        }
        if let Some(value) = record.quantity("equilibration_timestep", UNIT_FEMTOSECOND)? {
            options.equilibration_timestep = value;
        }
        if let Some(value) = record.count("number_of_equilibration_iterations")? {
            options.number_of_equilibration_iterations = value;
        }
        if let Some(value) = record.boolean("minimize")? {
            options.minimize = value;
        }
        if let Some(name) = record.string("replica_mixing_scheme")? {
            options.replica_mixing_scheme = name.parse::<MixingScheme>()?;
        }
        if let Some(value) = record.boolean("online_analysis")? {
            options.online_analysis = value;
        }
        if let Some(value) = record.boolean("show_mixing_statistics")? {
            options.show_mixing_statistics = value;
        }
        if let Some(value) = record.integer("master_seed")? {
            options.master_seed = value as u64;
        }
        if let Some(value) = record.count("propagation_threads")? {
            options.propagation_threads = value;
        }
        options.validate()?;
        Ok(options)
    }
}
