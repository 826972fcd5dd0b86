//! Aggregation operators.
//!
//! An operator decides how much one contribution weighs and how the
//! accumulated value of a parameter turns into a gradient. The
//! accumulation mechanics themselves (running merge or stacked batch)
//! live in the engine and are shared by all operators.

use ndarray::ArrayD;
use thiserror::Error;

use crate::{
    session::transform::{PayloadEntry, PARAM_FIELD},
    task::{TaskInfo, INSTANCES},
};

use super::reducer::ReduceError;

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("no parameter named `{0}` is registered")]
    UnknownParameter(String),
    #[error("contribution lacks required info key `{0}`")]
    MissingInfoKey(String),
    #[error("entry `{key}` lacks field `{field}`")]
    MissingField { key: String, field: String },
    #[error("shape mismatch for `{0}`")]
    ShapeMismatch(String),
    #[error("quantile {0} must lie in the open interval (0, 1)")]
    QuantileOutOfRange(f64),
    #[error(transparent)]
    Reduce(#[from] ReduceError),
}

/// One aggregation discipline.
pub trait AggregationOp: Send {
    /// Task-info keys every contribution must carry.
    fn required_info_keys(&self) -> &[&str] {
        &[]
    }

    /// Entry fields consumed besides `param`.
    fn pipe_keys(&self) -> &[&str] {
        &[]
    }

    /// The weight of one contribution in the accumulated value.
    fn contribution_weight(&self, info: &TaskInfo) -> Result<f64, AggregationError>;

    /// The gradient committed for a trainable parameter, from its
    /// current value and the accumulated entry. The convention is
    /// `current - aggregated`, so that a descent step towards the
    /// aggregate applies it directly.
    fn gradient(
        &self,
        current: &ArrayD<f32>,
        entry: &PayloadEntry,
    ) -> Result<ArrayD<f32>, AggregationError> {
        let aggregated = param_field(entry)?;
        Ok(current - aggregated)
    }
}

fn param_field(entry: &PayloadEntry) -> Result<&ArrayD<f32>, AggregationError> {
    entry.get(PARAM_FIELD).ok_or_else(|| AggregationError::MissingField {
        key: String::new(),
        field: PARAM_FIELD.to_string(),
    })
}

/// Plain averaging: every contribution weighs the same.
pub struct AverageOp;

impl AggregationOp for AverageOp {
    fn contribution_weight(&self, _info: &TaskInfo) -> Result<f64, AggregationError> {
        Ok(1.0)
    }
}

/// FedAvg-style averaging: contributions weigh by their declared number
/// of training instances.
pub struct NaiveOp;

impl AggregationOp for NaiveOp {
    fn required_info_keys(&self) -> &[&str] {
        &[INSTANCES]
    }

    fn contribution_weight(&self, info: &TaskInfo) -> Result<f64, AggregationError> {
        info.get_f64(INSTANCES)
            .ok_or_else(|| AggregationError::MissingInfoKey(INSTANCES.to_string()))
    }
}

/// The entry field elastic contributions carry next to `param`.
pub const IMPORTANCE_FIELD: &str = "importance";

/// Importance-weighted aggregation.
///
/// Contributions weigh by instances like [`NaiveOp`], but the committed
/// gradient is scaled element-wise: positions the contributors marked as
/// important move less, positions nobody cares about move by up to the
/// full delta. The scale is `1 + q - importance / max(importance)`, so
/// with quantile `q` the most important position moves by a factor of
/// about `q`.
#[derive(Debug)]
pub struct ElasticOp {
    quantile: f64,
}

impl ElasticOp {
    pub fn new(quantile: f64) -> Result<Self, AggregationError> {
        if 0.0 < quantile && quantile < 1.0 {
            Ok(Self { quantile })
        } else {
            Err(AggregationError::QuantileOutOfRange(quantile))
        }
    }
}

impl AggregationOp for ElasticOp {
    fn required_info_keys(&self) -> &[&str] {
        &[INSTANCES]
    }

    fn pipe_keys(&self) -> &[&str] {
        &[IMPORTANCE_FIELD]
    }

    fn contribution_weight(&self, info: &TaskInfo) -> Result<f64, AggregationError> {
        info.get_f64(INSTANCES)
            .ok_or_else(|| AggregationError::MissingInfoKey(INSTANCES.to_string()))
    }

    fn gradient(
        &self,
        current: &ArrayD<f32>,
        entry: &PayloadEntry,
    ) -> Result<ArrayD<f32>, AggregationError> {
        let aggregated = param_field(entry)?;
        let importance = entry
            .get(IMPORTANCE_FIELD)
            .ok_or_else(|| AggregationError::MissingField {
                key: String::new(),
                field: IMPORTANCE_FIELD.to_string(),
            })?;
        let max = importance.iter().cloned().fold(0.0f32, f32::max);
        // the epsilon keeps an all-zero importance map from dividing by zero
        let scale = importance.mapv(|i| 1.0 + self.quantile as f32 - i / (max + 1e-13));
        Ok((current - aggregated) * &scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn entry(param: &[f32]) -> PayloadEntry {
        let mut e = PayloadEntry::new();
        e.insert(PARAM_FIELD.to_string(), arr1(param).into_dyn());
        e
    }

    #[test]
    fn test_default_gradient_is_the_delta() {
        let current = arr1(&[3.0f32, 1.0]).into_dyn();
        let grad = AverageOp.gradient(&current, &entry(&[1.0, 1.0])).unwrap();
        assert_eq!(grad, arr1(&[2.0f32, 0.0]).into_dyn());
    }

    #[test]
    fn test_naive_weight_requires_instances() {
        assert!(NaiveOp.contribution_weight(&TaskInfo::new()).is_err());
        let info = TaskInfo::new().set(INSTANCES, 12);
        assert_eq!(NaiveOp.contribution_weight(&info).unwrap(), 12.0);
    }

    #[test]
    fn test_elastic_quantile_bounds() {
        assert!(ElasticOp::new(0.5).is_ok());
        for bad in [0.0, 1.0, -0.2, 2.0] {
            assert!(matches!(
                ElasticOp::new(bad).unwrap_err(),
                AggregationError::QuantileOutOfRange(_)
            ));
        }
    }

    #[test]
    fn test_elastic_equal_importance_scales_by_the_quantile() {
        let op = ElasticOp::new(0.3).unwrap();
        let current = arr1(&[2.0f32, 4.0]).into_dyn();
        let mut e = entry(&[1.0, 1.0]);
        e.insert(
            IMPORTANCE_FIELD.to_string(),
            arr1(&[5.0f32, 5.0]).into_dyn(),
        );
        let grad = op.gradient(&current, &e).unwrap();
        // importance / max == 1 everywhere, so the scale collapses to q
        let expected = [0.3f32 * 1.0, 0.3 * 3.0];
        for (g, e) in grad.iter().zip(expected.iter()) {
            assert!((g - e).abs() < 1e-5, "{} vs {}", g, e);
        }
    }

    #[test]
    fn test_elastic_requires_the_importance_field() {
        let op = ElasticOp::new(0.5).unwrap();
        let current = arr1(&[1.0f32]).into_dyn();
        assert!(matches!(
            op.gradient(&current, &entry(&[0.0])).unwrap_err(),
            AggregationError::MissingField { .. }
        ));
    }
}
