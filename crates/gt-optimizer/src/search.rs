//! Search space definitions and exhaustive grid enumeration.

use gt_types::{GtResult, SearchError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Human-readable parameter name (e.g. "lr").
    pub name: String,
    /// The kind of candidate set.
    pub kind: ParameterKind,
}

/// Describes how a parameter's candidate values are produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Explicit finite set of candidates, enumerated in the given order.
    Values { values: Vec<ParameterValue> },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Linear range [low, high], gridded into evenly spaced steps.
    FloatRange { low: f64, high: f64 },
    /// Log-spaced range [low, high], gridded in log-space.
    LogUniform { low: f64, high: f64 },
}

/// A concrete hyperparameter value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
}

impl ParameterValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Float(v) => *v,
            Self::Int(v) => *v as f64,
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            Self::Float(v) => v.is_finite(),
            Self::Int(_) => true,
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
        }
    }
}

/// One concrete assignment of values to every hyperparameter, in the order
/// the parameters were declared.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Configuration {
    values: Vec<(String, ParameterValue)>,
}

impl Configuration {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.values.push((name.into(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).map(ParameterValue::as_f64)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Display for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_values(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Values {
                values: values.into_iter().map(ParameterValue::Float).collect(),
            },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    /// Check that every dimension yields at least one finite candidate and
    /// that names are unique.
    pub fn validate(&self) -> GtResult<()> {
        if self.parameters.is_empty() {
            return Err(SearchError::EmptySpace.into());
        }

        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(SearchError::DuplicateParameter {
                    name: param.name.clone(),
                }
                .into());
            }

            let invalid = |message: &str| SearchError::InvalidRange {
                name: param.name.clone(),
                message: message.to_string(),
            };

            match &param.kind {
                ParameterKind::Values { values } => {
                    if values.is_empty() {
                        return Err(SearchError::EmptyCandidates {
                            name: param.name.clone(),
                        }
                        .into());
                    }
                    if values.iter().any(|v| !v.is_finite()) {
                        return Err(invalid("candidate values must be finite").into());
                    }
                }
                ParameterKind::IntRange { low, high } => {
                    if low > high {
                        return Err(invalid("low is greater than high").into());
                    }
                }
                ParameterKind::FloatRange { low, high } => {
                    if !low.is_finite() || !high.is_finite() {
                        return Err(invalid("bounds must be finite").into());
                    }
                    if low > high {
                        return Err(invalid("low is greater than high").into());
                    }
                }
                ParameterKind::LogUniform { low, high } => {
                    if !(*low > 0.0) || !high.is_finite() {
                        return Err(invalid("log bounds must be positive and finite").into());
                    }
                    if low > high {
                        return Err(invalid("low is greater than high").into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Total number of grid points, with continuous dimensions gridded into
    /// `float_steps` points. `None` on overflow.
    pub fn grid_size(&self, float_steps: usize) -> Option<usize> {
        let mut total: usize = 1;
        for param in &self.parameters {
            let dim_size = match &param.kind {
                ParameterKind::Values { values } => values.len(),
                ParameterKind::IntRange { low, high } => {
                    usize::try_from(high.checked_sub(*low)?.checked_add(1)?).ok()?
                }
                ParameterKind::FloatRange { .. } | ParameterKind::LogUniform { .. } => {
                    float_steps.max(2)
                }
            };
            total = total.checked_mul(dim_size)?;
        }
        Some(total)
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Grid search
// ---------------------------------------------------------------------------

/// Exhaustive grid search over the Cartesian product of all dimensions.
///
/// The first declared parameter varies slowest, the last fastest.
#[derive(Debug, Clone)]
pub struct GridSearch {
    cursor: usize,
    combos: Vec<Configuration>,
}

impl GridSearch {
    pub fn new(space: &SearchSpace, float_steps: usize) -> Self {
        Self {
            cursor: 0,
            combos: Self::build_grid(space, float_steps),
        }
    }

    fn axis_values(kind: &ParameterKind, float_steps: usize) -> Vec<ParameterValue> {
        match kind {
            ParameterKind::Values { values } => values.clone(),
            ParameterKind::IntRange { low, high } => {
                (*low..=*high).map(ParameterValue::Int).collect()
            }
            ParameterKind::FloatRange { low, high } => {
                let steps = float_steps.max(2);
                (0..steps)
                    .map(|i| {
                        let t = i as f64 / (steps - 1) as f64;
                        ParameterValue::Float(low + t * (high - low))
                    })
                    .collect()
            }
            ParameterKind::LogUniform { low, high } => {
                let steps = float_steps.max(2);
                let log_low = low.ln();
                let log_high = high.ln();
                (0..steps)
                    .map(|i| {
                        let t = i as f64 / (steps - 1) as f64;
                        ParameterValue::Float((log_low + t * (log_high - log_low)).exp())
                    })
                    .collect()
            }
        }
    }

    fn build_grid(space: &SearchSpace, float_steps: usize) -> Vec<Configuration> {
        if space.parameters.is_empty() {
            return Vec::new();
        }

        // Cartesian product
        let mut result: Vec<Configuration> = vec![Configuration::new()];
        for param in &space.parameters {
            let axis = Self::axis_values(&param.kind, float_steps);
            let mut next = Vec::with_capacity(result.len() * axis.len());
            for existing in &result {
                for value in &axis {
                    next.push(existing.clone().with(param.name.clone(), *value));
                }
            }
            result = next;
        }

        result
    }

    /// Next batch of at most `count` configurations.
    pub fn suggest(&mut self, count: usize) -> Vec<Configuration> {
        let end = (self.cursor + count).min(self.combos.len());
        let batch = self.combos[self.cursor..end].to_vec();
        self.cursor = end;
        batch
    }

    pub fn len(&self) -> usize {
        self.combos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combos.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.combos.len() - self.cursor
    }
}

impl Iterator for GridSearch {
    type Item = Configuration;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.combos.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(item)
    }
}
