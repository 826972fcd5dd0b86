//! Payload packaging and the encrypt/decrypt transform chain.

use std::collections::HashMap;

use ndarray::ArrayD;
use thiserror::Error;

/// One payload entry: a named-array dictionary that must contain at
/// least a `param` field once the format transform has run.
pub type PayloadEntry = HashMap<String, ArrayD<f32>>;

/// The string-keyed payload map exchanged in one round.
pub type Payload = HashMap<String, PayloadEntry>;

/// The reserved field every entry carries after formatting.
pub const PARAM_FIELD: &str = "param";

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("payload entry `{0}` has no `param` field")]
    MissingParam(String),
    #[error("transform `{name}` failed: {source}")]
    Failed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// One step of the payload transform chain.
///
/// Transforms are pure with respect to everything except the entry they
/// are handed: a transform may not assume it runs first or last except
/// by its registration order.
pub trait Transform: Send {
    fn name(&self) -> &str;

    /// Applied to outgoing entries, in registration order.
    fn encrypt(&self, key: &str, entry: PayloadEntry) -> Result<PayloadEntry, TransformError>;

    /// Applied to incoming entries, in reverse registration order.
    fn decrypt(&self, key: &str, entry: PayloadEntry) -> Result<PayloadEntry, TransformError>;
}

/// The mandatory innermost transform: guarantees a `param` field and
/// moves arrays into a transfer-compatible (standard, contiguous)
/// layout on the way out and back into the destination layout on
/// arrival.
struct FormatTransform;

impl FormatTransform {
    fn check(&self, key: &str, mut entry: PayloadEntry) -> Result<PayloadEntry, TransformError> {
        if !entry.contains_key(PARAM_FIELD) {
            return Err(TransformError::MissingParam(key.to_string()));
        }
        for value in entry.values_mut() {
            if !value.is_standard_layout() {
                *value = value.as_standard_layout().to_owned();
            }
        }
        Ok(entry)
    }
}

impl Transform for FormatTransform {
    fn name(&self) -> &str {
        "format"
    }

    fn encrypt(&self, key: &str, entry: PayloadEntry) -> Result<PayloadEntry, TransformError> {
        self.check(key, entry)
    }

    fn decrypt(&self, key: &str, entry: PayloadEntry) -> Result<PayloadEntry, TransformError> {
        self.check(key, entry)
    }
}

/// The ordered transform chain of one session.
///
/// The format transform is always present and always innermost: first on
/// encrypt, last on decrypt. First-registered runs first on encrypt.
pub struct TransformChain {
    transforms: Vec<Box<dyn Transform>>,
}

impl Default for TransformChain {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformChain {
    pub fn new() -> Self {
        Self {
            transforms: vec![Box::new(FormatTransform)],
        }
    }

    pub fn register(&mut self, transform: Box<dyn Transform>) {
        self.transforms.push(transform);
    }

    /// Runs the chain forward over every entry of an outgoing payload.
    pub fn encrypt(&self, payload: Payload) -> Result<Payload, TransformError> {
        let mut out = Payload::with_capacity(payload.len());
        for (key, mut entry) in payload {
            for transform in &self.transforms {
                entry = transform.encrypt(&key, entry)?;
            }
            out.insert(key, entry);
        }
        Ok(out)
    }

    /// Runs the chain backward over every entry of an incoming payload.
    pub fn decrypt(&self, payload: Payload) -> Result<Payload, TransformError> {
        let mut out = Payload::with_capacity(payload.len());
        for (key, mut entry) in payload {
            for transform in self.transforms.iter().rev() {
                entry = transform.decrypt(&key, entry)?;
            }
            out.insert(key, entry);
        }
        Ok(out)
    }
}
