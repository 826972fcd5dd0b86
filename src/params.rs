//! Registry of live parameter arrays.
//!
//! Delivered payloads refer to parameters by name; the rest of the crate
//! refers to them by [`ParamId`], a stable index into a [`ParamArena`].
//! Passing ids around instead of references keeps sessions and the
//! aggregator decoupled from parameter ownership.

use std::collections::HashMap;

use ndarray::ArrayD;
use thiserror::Error;

/// A stable handle to a parameter in a [`ParamArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamId(pub(crate) usize);

/// One named parameter array together with its gradient slot.
///
/// The array engine that trains the model owns nothing here: it reads the
/// aggregated `grad` (or the synchronized `data`) back out after each
/// round.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub data: ArrayD<f32>,
    pub grad: Option<ArrayD<f32>>,
    /// Whether the aggregated value is committed as a gradient delta
    /// (`true`) or copied in place like a synchronized buffer (`false`).
    pub requires_grad: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, data: ArrayD<f32>, requires_grad: bool) -> Self {
        Self {
            name: name.into(),
            data,
            grad: None,
            requires_grad,
        }
    }

    /// Resets the gradient to zero, allocating it on first use.
    pub fn zero_grad(&mut self) {
        match &mut self.grad {
            Some(grad) => grad.fill(0.0),
            None => self.grad = Some(ArrayD::zeros(self.data.raw_dim())),
        }
    }
}

#[derive(Debug, Error)]
#[error("parameter `{0}` is already registered")]
pub struct DuplicateParameterError(pub String);

/// Arena of parameters, indexed by [`ParamId`] and by name.
#[derive(Debug, Default)]
pub struct ParamArena {
    params: Vec<Parameter>,
    by_name: HashMap<String, usize>,
}

impl ParamArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a parameter. Names are unique within an arena.
    pub fn insert(&mut self, param: Parameter) -> Result<ParamId, DuplicateParameterError> {
        if self.by_name.contains_key(&param.name) {
            return Err(DuplicateParameterError(param.name));
        }
        let id = ParamId(self.params.len());
        self.by_name.insert(param.name.clone(), id.0);
        self.params.push(param);
        Ok(id)
    }

    pub fn get(&self, id: ParamId) -> &Parameter {
        &self.params[id.0]
    }

    pub fn get_mut(&mut self, id: ParamId) -> &mut Parameter {
        &mut self.params[id.0]
    }

    pub fn id_of(&self, name: &str) -> Option<ParamId> {
        self.by_name.get(name).copied().map(ParamId)
    }

    pub fn ids(&self) -> impl Iterator<Item = ParamId> {
        (0..self.params.len()).map(ParamId)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_insert_and_lookup() {
        let mut arena = ParamArena::new();
        let id = arena
            .insert(Parameter::new("w", arr1(&[1.0f32, 2.0]).into_dyn(), true))
            .unwrap();
        assert_eq!(arena.id_of("w"), Some(id));
        assert_eq!(arena.get(id).name, "w");
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut arena = ParamArena::new();
        arena
            .insert(Parameter::new("w", arr1(&[0.0f32]).into_dyn(), true))
            .unwrap();
        let err = arena.insert(Parameter::new("w", arr1(&[0.0f32]).into_dyn(), true));
        assert!(err.is_err());
    }

    #[test]
    fn test_zero_grad_allocates_once() {
        let mut p = Parameter::new("b", arr1(&[3.0f32, 4.0]).into_dyn(), true);
        assert!(p.grad.is_none());
        p.zero_grad();
        assert_eq!(p.grad.as_ref().unwrap().sum(), 0.0);
    }
}
