//! The leader-side aggregation engine.
//!
//! The engine owns the parameter arena and accumulates downloaded
//! contributions per parameter group. Two disciplines cover all
//! operators: `merge` folds each contribution into a running weighted
//! average as it arrives and keeps no per-contribution state, `stack`
//! buffers contributions and averages them in one batch at aggregation
//! time. Both produce the same aggregate up to rounding; merge trades a
//! little precision for constant memory.
//!
//! Aggregating commits the result into the arena. A trainable parameter
//! receives a gradient with the convention `current - aggregated`, so a
//! plain descent step moves the model towards the aggregate; anything
//! else (buffers, statistics) is overwritten in place. Task-info reports
//! buffer alongside and fold into one round summary via
//! [`reduce`](Aggregator::reduce).

pub mod ops;
pub mod reducer;

use std::collections::HashMap;

use tracing::debug;

use crate::{
    params::{ParamArena, ParamId},
    session::transform::{Payload, PayloadEntry, PARAM_FIELD},
    settings::{AggregationMode, AggregationSettings},
    task::TaskInfo,
};

use self::ops::{AggregationError, AggregationOp, AverageOp, ElasticOp, NaiveOp};
use self::reducer::{Reduce, ReduceError, WeightedReducer};

/// A set of parameters aggregated under one discipline.
struct ParamGroup {
    params: Vec<ParamId>,
    mode: AggregationMode,
}

enum AccumState {
    Merged {
        entry: PayloadEntry,
        weight: f64,
    },
    Stacked {
        contributions: Vec<(PayloadEntry, f64)>,
    },
}

pub struct Aggregator {
    arena: ParamArena,
    groups: Vec<ParamGroup>,
    op: Box<dyn AggregationOp>,
    reducer: Box<dyn Reduce>,
    accum: HashMap<ParamId, AccumState>,
    infos: Vec<TaskInfo>,
}

impl Aggregator {
    pub fn new(arena: ParamArena, op: Box<dyn AggregationOp>, reducer: Box<dyn Reduce>) -> Self {
        Self {
            arena,
            groups: Vec::new(),
            op,
            reducer,
            accum: HashMap::new(),
            infos: Vec::new(),
        }
    }

    /// Picks the operator from the settings: a quantile selects elastic
    /// aggregation, a weight key instance-weighted averaging, otherwise
    /// plain averaging.
    pub fn from_settings(
        settings: &AggregationSettings,
        arena: ParamArena,
    ) -> Result<Self, AggregationError> {
        let op: Box<dyn AggregationOp> = match settings.quantile {
            Some(quantile) => Box::new(ElasticOp::new(quantile)?),
            None if settings.weight_key.is_some() => Box::new(NaiveOp),
            None => Box::new(AverageOp),
        };
        let reducer = WeightedReducer::new(settings.weight_key.clone());
        Ok(Self::new(arena, op, Box::new(reducer)))
    }

    pub fn arena(&self) -> &ParamArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut ParamArena {
        &mut self.arena
    }

    /// Tracks named parameters under the given discipline.
    pub fn add_param_group(
        &mut self,
        names: &[&str],
        mode: AggregationMode,
    ) -> Result<(), AggregationError> {
        let params = names
            .iter()
            .map(|&name| {
                self.arena
                    .id_of(name)
                    .ok_or_else(|| AggregationError::UnknownParameter(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.groups.push(ParamGroup { params, mode });
        Ok(())
    }

    /// The number of contributions buffered since the last reduce.
    pub fn contributions(&self) -> usize {
        self.infos.len()
    }

    /// Folds one downloaded contribution into the engine.
    pub fn ingest(&mut self, payload: &Payload, info: &TaskInfo) -> Result<(), AggregationError> {
        for &key in self.op.required_info_keys() {
            if !info.contains(key) {
                return Err(AggregationError::MissingInfoKey(key.to_string()));
            }
        }
        let weight = self.op.contribution_weight(info)?;

        let targets: Vec<(ParamId, AggregationMode)> = self
            .groups
            .iter()
            .flat_map(|g| g.params.iter().map(move |&id| (id, g.mode)))
            .collect();

        for (id, mode) in targets {
            let name = self.arena.get(id).name.as_str();
            let entry = match payload.get(name) {
                Some(entry) => entry,
                // a contribution may cover a subset of the tracked params
                None => continue,
            };
            self.check_entry(name, id, entry)?;

            let mut fields = vec![PARAM_FIELD];
            fields.extend_from_slice(self.op.pipe_keys());

            match mode {
                AggregationMode::Merge => {
                    let state = self.accum.entry(id).or_insert(AccumState::Merged {
                        entry: PayloadEntry::new(),
                        weight: 0.0,
                    });
                    if let AccumState::Merged {
                        entry: acc,
                        weight: accumulated,
                    } = state
                    {
                        for &field in &fields {
                            let incoming = &entry[field];
                            match acc.get_mut(field) {
                                Some(old) => {
                                    *old = (&*old * *accumulated as f32
                                        + incoming * weight as f32)
                                        / (*accumulated + weight) as f32;
                                }
                                None => {
                                    acc.insert(field.to_string(), incoming.clone());
                                }
                            }
                        }
                        *accumulated += weight;
                    }
                }
                AggregationMode::Stack => {
                    let contribution: PayloadEntry = fields
                        .iter()
                        .map(|&field| (field.to_string(), entry[field].clone()))
                        .collect();
                    match self.accum.entry(id).or_insert(AccumState::Stacked {
                        contributions: Vec::new(),
                    }) {
                        AccumState::Stacked { contributions } => {
                            contributions.push((contribution, weight))
                        }
                        AccumState::Merged { .. } => {}
                    }
                }
            }
        }

        self.infos.push(info.clone());
        debug!(buffered = self.infos.len(), "contribution ingested");
        Ok(())
    }

    fn check_entry(
        &self,
        name: &str,
        id: ParamId,
        entry: &PayloadEntry,
    ) -> Result<(), AggregationError> {
        let param = match entry.get(PARAM_FIELD) {
            Some(param) => param,
            None => {
                return Err(AggregationError::MissingField {
                    key: name.to_string(),
                    field: PARAM_FIELD.to_string(),
                })
            }
        };
        for &field in self.op.pipe_keys() {
            if !entry.contains_key(field) {
                return Err(AggregationError::MissingField {
                    key: name.to_string(),
                    field: field.to_string(),
                });
            }
        }
        if param.shape() != self.arena.get(id).data.shape() {
            return Err(AggregationError::ShapeMismatch(name.to_string()));
        }
        Ok(())
    }

    /// Commits the accumulated values into the arena.
    ///
    /// Parameters without any contribution are left untouched. With
    /// `clear_buffer` the accumulators reset for the next round; buffered
    /// task-info reports are unaffected either way, they belong to
    /// [`reduce`](Self::reduce).
    pub fn aggregate(&mut self, clear_buffer: bool) -> Result<(), AggregationError> {
        let ids: Vec<ParamId> = self.accum.keys().copied().collect();
        for id in ids {
            let averaged = match &self.accum[&id] {
                AccumState::Merged { entry, .. } => entry.clone(),
                AccumState::Stacked { contributions } => batch_average(contributions),
            };
            let param = self.arena.get_mut(id);
            if param.requires_grad {
                param.grad = Some(self.op.gradient(&param.data, &averaged)?);
            } else if let Some(value) = averaged.get(PARAM_FIELD) {
                param.data = value.clone();
            }
        }
        if clear_buffer {
            self.accum.clear();
        }
        Ok(())
    }

    pub fn clear_buffer(&mut self) {
        self.accum.clear();
    }

    pub fn zero_grad(&mut self) {
        for group in &self.groups {
            for &id in &group.params {
                self.arena.get_mut(id).zero_grad();
            }
        }
    }

    /// Folds the buffered reports into one round summary and clears the
    /// report buffer. A failed reduce clears nothing, the buffered
    /// reports stay available for inspection or a corrected reducer.
    pub fn reduce(&mut self) -> Result<TaskInfo, AggregationError> {
        let reduced = self.reducer.reduce(&self.infos)?;
        self.infos.clear();
        Ok(reduced)
    }
}

fn batch_average(contributions: &[(PayloadEntry, f64)]) -> PayloadEntry {
    let total: f64 = contributions.iter().map(|(_, w)| w).sum();
    let uniform = 1.0 / contributions.len() as f64;
    let mut out = PayloadEntry::new();
    for (entry, weight) in contributions {
        let share = if total > 0.0 { weight / total } else { uniform };
        for (field, value) in entry {
            let scaled = value * share as f32;
            match out.get_mut(field) {
                Some(acc) => *acc = &*acc + &scaled,
                None => {
                    out.insert(field.clone(), scaled);
                }
            }
        }
    }
    out
}
