//! Entity codec.
//!
//! Typed records travel through the cache as [`PropertyList`]s. This module defines how a record turns into a field
//! list ([`Entity`]), how a field list turns into a cache payload ([`encode`]/[`decode`]), and a serde-based struct
//! marshaling convention for records that don't want to implement [`Entity`] by hand.

use serde::de;
use serde::de::value::MapDeserializer;
use serde::de::value::SeqDeserializer;
use serde::de::DeserializeOwned;
use serde::de::IntoDeserializer;
use serde::de::Visitor;
use serde::forward_to_deserialize_any;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Map;
use serde_json::Number;
use serde_json::Value;
use std::any::Any;

use crate::error::CodecError;
use crate::property::Property;
use crate::property::PropertyList;
use crate::property::PropertyValue;

/// Payload format marker. Anything else found in the cache is treated as corrupt.
const FORMAT_V1: u8 = 1;

/// A record that can read and write itself as a field list.
pub trait Entity: Sized + Send + Sync + 'static {
    fn load(properties: PropertyList) -> Result<Self, CodecError>;
    fn save(&self) -> Result<PropertyList, CodecError>;
}

impl Entity for PropertyList {
    fn load(properties: PropertyList) -> Result<Self, CodecError> {
        Ok(properties)
    }

    fn save(&self) -> Result<PropertyList, CodecError> {
        Ok(self.clone())
    }
}

/// Object-safe form of [`Entity`] for heterogeneous result containers.
pub trait EntityObject: Send + Sync {
    fn load_into(&mut self, properties: PropertyList) -> Result<(), CodecError>;
    fn save_from(&self) -> Result<PropertyList, CodecError>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Entity> EntityObject for T {
    fn load_into(&mut self, properties: PropertyList) -> Result<(), CodecError> {
        *self = T::load(properties)?;
        Ok(())
    }

    fn save_from(&self) -> Result<PropertyList, CodecError> {
        self.save()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn encode(properties: &PropertyList) -> Result<Vec<u8>, CodecError> {
    let mut payload = vec![FORMAT_V1];
    let body = postcard::to_allocvec(properties).map_err(|err| CodecError::Unsupported(err.to_string()))?;
    payload.extend_from_slice(&body);
    Ok(payload)
}

pub fn decode(payload: &[u8]) -> Result<PropertyList, CodecError> {
    match payload.split_first() {
        Some((&FORMAT_V1, body)) => postcard::from_bytes(body).map_err(|err| CodecError::Malformed(err.to_string())),
        Some((format, _)) => Err(CodecError::Malformed(format!("unknown payload format {format}"))),
        None => Err(CodecError::Malformed("empty payload".to_string())),
    }
}

/// Marshals a serializable struct into a field list. Sequences become repeated properties, an empty sequence becomes
/// no property at all. Nested structures and unsigned integers above `i64::MAX` are not supported.
pub fn to_properties<T: Serialize + ?Sized>(record: &T) -> Result<PropertyList, CodecError> {
    let value = serde_json::to_value(record).map_err(|err| CodecError::Unsupported(err.to_string()))?;
    let Value::Object(fields) = value
    else {
        return Err(CodecError::Unsupported(format!(
            "{} is not a struct",
            std::any::type_name::<T>()
        )));
    };

    let mut properties = PropertyList::new();
    for (name, value) in fields {
        match value {
            Value::Array(items) => {
                for item in items {
                    properties.push(Property::repeated(name.clone(), scalar_to_property(&name, item)?));
                }
            }
            value => properties.push(Property::new(name.clone(), scalar_to_property(&name, value)?)),
        }
    }
    Ok(properties)
}

/// Counterpart of [`to_properties`]. A sequence field without properties loads as empty, even without a serde default.
pub fn from_properties<T: DeserializeOwned>(properties: PropertyList) -> Result<T, CodecError> {
    let mut fields = Map::new();
    for property in properties {
        let value = property_to_json(property.value)?;
        if property.multiple {
            match fields
                .entry(property.name.clone())
                .or_insert_with(|| Value::Array(Vec::new()))
            {
                Value::Array(items) => items.push(value),
                _ => {
                    return Err(CodecError::FieldMismatch(format!(
                        "'{}' is both single and repeated",
                        property.name
                    )))
                }
            }
        }
        else if fields.insert(property.name.clone(), value).is_some() {
            return Err(CodecError::FieldMismatch(format!(
                "duplicate single-valued property '{}'",
                property.name
            )));
        }
    }

    serde_json::from_value(Value::Object(fields.clone()))
        .or_else(|err| T::deserialize(Fields(fields)).map_err(|_| CodecError::FieldMismatch(err.to_string())))
}

/// Field map of a record that knows which of the record's fields have no properties.
struct Fields(Map<String, Value>);

impl<'de> Deserializer<'de> for Fields {
    type Error = serde_json::Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        Value::Object(self.0).deserialize_any(visitor)
    }

    fn deserialize_struct<V: Visitor<'de>>(
        mut self,
        _name: &'static str,
        names: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        let mut entries = Vec::with_capacity(names.len() + self.0.len());
        for &name in names {
            let field = match self.0.remove(name) {
                Some(value) => Field::Present(value),
                None => Field::Absent(name),
            };
            entries.push((name.to_string(), field));
        }
        entries.extend(self.0.into_iter().map(|(name, value)| (name, Field::Present(value))));

        let mut map: MapDeserializer<'de, _, serde_json::Error> = MapDeserializer::new(entries.into_iter());
        let record = visitor.visit_map(&mut map)?;
        map.end()?;
        Ok(record)
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map enum identifier ignored_any
    }
}

/// A struct field value. An absent field reads as an empty sequence or as `None`, anything else it is missing.
enum Field {
    Present(Value),
    Absent(&'static str),
}

macro_rules! present_only {
    ($($method:ident($($arg:ident: $ty:ty),*);)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, $($arg: $ty,)* visitor: V) -> Result<V::Value, Self::Error> {
                match self {
                    Field::Present(value) => value.$method($($arg,)* visitor),
                    Field::Absent(name) => Err(de::Error::missing_field(name)),
                }
            }
        )*
    };
}

impl<'de> Deserializer<'de> for Field {
    type Error = serde_json::Error;

    present_only! {
        deserialize_any();
        deserialize_bool();
        deserialize_i8();
        deserialize_i16();
        deserialize_i32();
        deserialize_i64();
        deserialize_u8();
        deserialize_u16();
        deserialize_u32();
        deserialize_u64();
        deserialize_f32();
        deserialize_f64();
        deserialize_char();
        deserialize_str();
        deserialize_string();
        deserialize_bytes();
        deserialize_byte_buf();
        deserialize_unit();
        deserialize_unit_struct(name: &'static str);
        deserialize_newtype_struct(name: &'static str);
        deserialize_tuple(len: usize);
        deserialize_tuple_struct(name: &'static str, len: usize);
        deserialize_map();
        deserialize_struct(name: &'static str, fields: &'static [&'static str]);
        deserialize_enum(name: &'static str, variants: &'static [&'static str]);
        deserialize_identifier();
        deserialize_ignored_any();
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self {
            Field::Present(value) => value.deserialize_option(visitor),
            Field::Absent(_) => visitor.visit_none(),
        }
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self {
            Field::Present(value) => value.deserialize_seq(visitor),
            Field::Absent(_) => {
                visitor.visit_seq(SeqDeserializer::<_, serde_json::Error>::new(std::iter::empty::<()>()))
            }
        }
    }
}

impl<'de> IntoDeserializer<'de, serde_json::Error> for Field {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

fn scalar_to_property(name: &str, value: Value) -> Result<PropertyValue, CodecError> {
    Ok(match value {
        Value::Null => PropertyValue::Null,
        Value::Bool(b) => PropertyValue::Bool(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                PropertyValue::Int(i)
            }
            else if n.is_u64() {
                return Err(CodecError::Unsupported(format!(
                    "'{name}': {n} does not fit a signed 64-bit integer"
                )));
            }
            else if let Some(f) = n.as_f64() {
                PropertyValue::Float(f)
            }
            else {
                return Err(CodecError::Unsupported(format!("'{name}': number {n} out of range")));
            }
        }
        Value::String(s) => PropertyValue::String(s),
        Value::Array(_) => return Err(CodecError::Unsupported(format!("'{name}': nested sequences"))),
        Value::Object(_) => return Err(CodecError::Unsupported(format!("'{name}': nested structures"))),
    })
}

fn property_to_json(value: PropertyValue) -> Result<Value, CodecError> {
    Ok(match value {
        PropertyValue::Null => Value::Null,
        PropertyValue::Bool(b) => Value::Bool(b),
        PropertyValue::Int(i) => Value::Number(i.into()),
        PropertyValue::Float(f) => Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| CodecError::Unsupported(format!("non-finite float {f}")))?,
        PropertyValue::String(s) => Value::String(s),
        PropertyValue::Bytes(bytes) => Value::Array(bytes.into_iter().map(|b| Value::Number(b.into())).collect()),
        PropertyValue::Time(t) => Value::String(t.to_rfc3339()),
        PropertyValue::Key(k) => serde_json::to_value(k).map_err(|err| CodecError::Unsupported(err.to_string()))?,
    })
}
