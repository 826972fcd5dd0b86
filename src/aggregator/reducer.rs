//! Batch reduction of task-info reports into one round summary.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::task::TaskInfo;

#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("nothing to reduce: the report buffer is empty")]
    EmptyBuffer,
    #[error("report {index} lacks the weight key `{key}`")]
    MissingWeightKey { index: usize, key: String },
}

/// Folds the buffered reports of one round into a single one.
///
/// Reducers borrow the buffer so that a rejected batch stays intact for
/// the caller.
pub trait Reduce: Send {
    fn reduce(&self, infos: &[TaskInfo]) -> Result<TaskInfo, ReduceError>;
}

/// Weighted averaging over the numeric keys of the buffered reports.
///
/// With a weight key, every report must carry it and contributes in
/// proportion; the reduced report carries the key's sum (e.g. total
/// instances seen). Without one, reports contribute uniformly. Keys to
/// reduce default to every numeric key of the first report; additional
/// keys are copied verbatim from the first report instead of reduced.
pub struct WeightedReducer {
    weight_key: Option<String>,
    reduce_keys: Option<Vec<String>>,
    additional_keys: Vec<String>,
}

impl WeightedReducer {
    pub fn new(weight_key: Option<String>) -> Self {
        Self {
            weight_key,
            reduce_keys: None,
            additional_keys: Vec::new(),
        }
    }

    pub fn with_reduce_keys(mut self, keys: Vec<String>) -> Self {
        self.reduce_keys = Some(keys);
        self
    }

    pub fn with_additional_keys(mut self, keys: Vec<String>) -> Self {
        self.additional_keys = keys;
        self
    }

    fn weights(&self, infos: &[TaskInfo]) -> Result<Vec<f64>, ReduceError> {
        let raw: Vec<f64> = match &self.weight_key {
            Some(key) => infos
                .iter()
                .enumerate()
                .map(|(index, info)| {
                    info.get_f64(key).ok_or_else(|| ReduceError::MissingWeightKey {
                        index,
                        key: key.clone(),
                    })
                })
                .collect::<Result<_, _>>()?,
            None => vec![1.0; infos.len()],
        };
        let total: f64 = raw.iter().sum();
        if total > 0.0 {
            Ok(raw.into_iter().map(|w| w / total).collect())
        } else {
            Ok(vec![1.0 / infos.len() as f64; infos.len()])
        }
    }
}

impl Reduce for WeightedReducer {
    fn reduce(&self, infos: &[TaskInfo]) -> Result<TaskInfo, ReduceError> {
        if infos.is_empty() {
            return Err(ReduceError::EmptyBuffer);
        }
        let weights = self.weights(infos)?;
        let first = &infos[0];

        let keys: BTreeSet<String> = match &self.reduce_keys {
            Some(keys) => keys.iter().cloned().collect(),
            None => first
                .iter()
                .filter(|(key, value)| {
                    value.is_number()
                        && Some(key.as_str()) != self.weight_key.as_deref()
                        && !self.additional_keys.iter().any(|k| k == *key)
                })
                .map(|(key, _)| key.clone())
                .collect(),
        };

        let mut reduced = TaskInfo::new();
        for key in &keys {
            let mut acc = 0.0;
            for (info, weight) in infos.iter().zip(&weights) {
                if let Some(value) = info.get_f64(key) {
                    acc += weight * value;
                }
            }
            reduced.insert(key.clone(), acc);
        }
        if let Some(key) = &self.weight_key {
            let total: f64 = infos.iter().filter_map(|info| info.get_f64(key)).sum();
            reduced.insert(key.clone(), total);
        }
        for key in &self.additional_keys {
            if let Some(value) = first.get(key) {
                reduced.insert(key.clone(), value.clone());
            }
        }
        Ok(reduced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::INSTANCES;

    #[test]
    fn test_single_report_reduces_to_itself() {
        let reducer = WeightedReducer::new(Some(INSTANCES.to_string()));
        let info = TaskInfo::new().set("accuracy", 0.9).set(INSTANCES, 10);
        let reduced = reducer.reduce(&[info]).unwrap();
        assert_eq!(reduced.get_f64("accuracy"), Some(0.9));
        assert_eq!(reduced.get_f64(INSTANCES), Some(10.0));
    }

    #[test]
    fn test_instance_weighted_accuracy() {
        let reducer = WeightedReducer::new(Some(INSTANCES.to_string()));
        let reduced = reducer
            .reduce(&[
                TaskInfo::new().set("accuracy", 0.5).set(INSTANCES, 10),
                TaskInfo::new().set("accuracy", 0.6).set(INSTANCES, 20),
                TaskInfo::new().set("accuracy", 0.7).set(INSTANCES, 30),
            ])
            .unwrap();
        // (10 * 0.5 + 20 * 0.6 + 30 * 0.7) / 60
        let accuracy = reduced.get_f64("accuracy").unwrap();
        assert!((accuracy - 38.0 / 60.0).abs() < 1e-12);
        assert_eq!(reduced.get_f64(INSTANCES), Some(60.0));
    }

    #[test]
    fn test_uniform_without_weight_key() {
        let reducer = WeightedReducer::new(None);
        let reduced = reducer
            .reduce(&[
                TaskInfo::new().set("loss", 1.0),
                TaskInfo::new().set("loss", 3.0),
            ])
            .unwrap();
        assert_eq!(reduced.get_f64("loss"), Some(2.0));
    }

    #[test]
    fn test_missing_weight_key_is_an_error() {
        let reducer = WeightedReducer::new(Some(INSTANCES.to_string()));
        let err = reducer
            .reduce(&[
                TaskInfo::new().set("loss", 1.0).set(INSTANCES, 5),
                TaskInfo::new().set("loss", 3.0),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            ReduceError::MissingWeightKey { index: 1, .. }
        ));
    }

    #[test]
    fn test_additional_keys_come_from_the_first_report() {
        let reducer = WeightedReducer::new(None)
            .with_additional_keys(vec!["mode".to_string()]);
        let reduced = reducer
            .reduce(&[
                TaskInfo::new().set("mode", "train").set("loss", 2.0),
                TaskInfo::new().set("mode", "eval").set("loss", 4.0),
            ])
            .unwrap();
        assert_eq!(reduced.get("mode"), Some(&serde_json::Value::from("train")));
        assert_eq!(reduced.get_f64("loss"), Some(3.0));
    }

    #[test]
    fn test_empty_buffer_is_an_error() {
        let reducer = WeightedReducer::new(None);
        assert!(matches!(
            reducer.reduce(&[]).unwrap_err(),
            ReduceError::EmptyBuffer
        ));
    }
}
