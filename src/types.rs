use std::fmt::Debug;

use crate::codec::Entity;
use crate::codec::EntityObject;
use crate::error::CodecError;
use crate::error::Error;
use crate::error::KeyError;
use crate::key::Key;
use crate::property::PropertyList;

/// Outcome for one key of a batch.
#[derive(Clone, Debug, PartialEq)]
pub enum KeyResult<T> {
    Found(T),
    NotFound,
    Failed(KeyError),
}

/// Per-key outcome of [`Cache::get_multi_into()`](crate::Cache::get_multi_into); the values end up in the container.
pub type KeyStatus = KeyResult<()>;

impl<T> KeyResult<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, KeyResult::Found(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, KeyResult::NotFound)
    }

    pub fn found(self) -> Option<T> {
        match self {
            KeyResult::Found(v) => Some(v),
            _ => None,
        }
    }

    pub fn status(&self) -> KeyStatus {
        match self {
            KeyResult::Found(_) => KeyResult::Found(()),
            KeyResult::NotFound => KeyResult::NotFound,
            KeyResult::Failed(err) => KeyResult::Failed(err.clone()),
        }
    }

    pub fn into_result(self, key: &Key) -> Result<T, Error> {
        match self {
            KeyResult::Found(v) => Ok(v),
            KeyResult::NotFound => Err(Error::NotFound(key.clone())),
            KeyResult::Failed(source) => Err(Error::Key {
                key: key.clone(),
                source,
            }),
        }
    }
}

/// Result containers accepted by [`Cache::get_multi_into()`](crate::Cache::get_multi_into).
///
/// The container must have exactly one slot per key. Slots of keys that are not found or failed are left untouched.
pub enum ResultSlots<'a, T: Entity = PropertyList> {
    /// Concrete records, including `PropertyList` itself.
    Records(&'a mut [T]),
    /// Boxed records; `None` slots get allocated when an entity is found.
    Boxed(&'a mut [Option<Box<T>>]),
    /// Pre-allocated records of possibly different types. Every slot must hold an object to load into.
    Objects(&'a mut [Option<Box<dyn EntityObject>>]),
}

impl<'a> ResultSlots<'a, PropertyList> {
    pub fn objects(slots: &'a mut [Option<Box<dyn EntityObject>>]) -> Self {
        ResultSlots::Objects(slots)
    }
}

impl<T: Entity> ResultSlots<'_, T> {
    pub fn len(&self) -> usize {
        match self {
            ResultSlots::Records(s) => s.len(),
            ResultSlots::Boxed(s) => s.len(),
            ResultSlots::Objects(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Shape checks done before any I/O.
    pub(crate) fn validate(&self, key_count: usize) -> Result<(), Error> {
        if self.len() != key_count {
            return Err(Error::LengthMismatch {
                keys:   key_count,
                values: self.len(),
            });
        }
        if let ResultSlots::Objects(slots) = self {
            if let Some(idx) = slots.iter().position(|s| s.is_none()) {
                return Err(Error::InvalidContainer(format!(
                    "object slot {idx} is empty; cannot infer the entity type to load into"
                )));
            }
        }
        Ok(())
    }
}

/// Where the populate protocol delivers entities. `accept` must leave the slot untouched on error.
pub(crate) trait Sink: Send {
    fn accept(&mut self, idx: usize, properties: PropertyList) -> Result<(), CodecError>;
}

impl<T: Entity> Sink for ResultSlots<'_, T> {
    fn accept(&mut self, idx: usize, properties: PropertyList) -> Result<(), CodecError> {
        match self {
            ResultSlots::Records(slots) => slots[idx] = T::load(properties)?,
            ResultSlots::Boxed(slots) => slots[idx] = Some(Box::new(T::load(properties)?)),
            ResultSlots::Objects(slots) => match slots[idx].as_mut() {
                Some(object) => object.load_into(properties)?,
                None => return Err(CodecError::Unsupported(format!("empty object slot {idx}"))),
            },
        }
        Ok(())
    }
}

/// Collects freshly loaded records.
pub(crate) struct Collector<T>(pub(crate) Vec<Option<T>>);

impl<T: Entity> Sink for Collector<T> {
    fn accept(&mut self, idx: usize, properties: PropertyList) -> Result<(), CodecError> {
        self.0[idx] = Some(T::load(properties)?);
        Ok(())
    }
}

/// Shifts indices so a chunk of a larger batch can fill its part of the sink.
pub(crate) struct Offset<'a> {
    pub(crate) sink: &'a mut dyn Sink,
    pub(crate) base: usize,
}

impl Sink for Offset<'_> {
    fn accept(&mut self, idx: usize, properties: PropertyList) -> Result<(), CodecError> {
        self.sink.accept(self.base + idx, properties)
    }
}
