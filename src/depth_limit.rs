//! Nesting ceiling enforced while a value is being serialized.
//!
//! `DepthLimited` wraps any `serde::Serializer` and fails as soon as a
//! container would open past the ceiling, before its contents are visited.
//! A hostile payload nested a million levels deep therefore costs at most
//! `max` stack frames instead of one per level.
//!
//! Levels follow the JSON tree the inner serializer produces: every object
//! or array is one level, and an externally tagged enum variant
//! (`{"Variant": ...}`) adds the wrapping object as well.

use serde::ser::{self, Serialize};
use std::cell::Cell;

/// Shared state for one serialization pass.
#[derive(Debug)]
pub struct DepthGuard {
    max: usize,
    exceeded: Cell<Option<usize>>,
}

impl DepthGuard {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            exceeded: Cell::new(None),
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// The level that tripped the ceiling, if it was tripped.
    pub fn exceeded(&self) -> Option<usize> {
        self.exceeded.get()
    }

    fn enter<E: ser::Error>(&self, parent: usize) -> Result<usize, E> {
        let level = parent + 1;
        if level > self.max {
            self.exceeded.set(Some(level));
            return Err(E::custom(format!(
                "nesting depth {level} exceeds ceiling {}",
                self.max
            )));
        }
        Ok(level)
    }
}

/// A serializer that counts container levels on the way down.
pub struct DepthLimited<'g, S> {
    inner: S,
    level: usize,
    guard: &'g DepthGuard,
}

impl<'g, S> DepthLimited<'g, S> {
    /// Starts at the root; the first container opened is level 1.
    pub fn new(inner: S, guard: &'g DepthGuard) -> Self {
        Self {
            inner,
            level: 0,
            guard,
        }
    }
}

/// A child value, serialized one level below its container.
struct Nested<'a, 'g, T: ?Sized> {
    value: &'a T,
    level: usize,
    guard: &'g DepthGuard,
}

impl<T: Serialize + ?Sized> Serialize for Nested<'_, '_, T> {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(DepthLimited {
            inner: serializer,
            level: self.level,
            guard: self.guard,
        })
    }
}

/// Compound state of an open container.
pub struct Compound<'g, C> {
    inner: C,
    level: usize,
    guard: &'g DepthGuard,
}

impl<'g, C> Compound<'g, C> {
    fn nested<'a, T: ?Sized>(&self, value: &'a T) -> Nested<'a, 'g, T> {
        Nested {
            value,
            level: self.level,
            guard: self.guard,
        }
    }
}

impl<'g, S: ser::Serializer> ser::Serializer for DepthLimited<'g, S> {
    type Ok = S::Ok;
    type Error = S::Error;
    type SerializeSeq = Compound<'g, S::SerializeSeq>;
    type SerializeTuple = Compound<'g, S::SerializeTuple>;
    type SerializeTupleStruct = Compound<'g, S::SerializeTupleStruct>;
    type SerializeTupleVariant = Compound<'g, S::SerializeTupleVariant>;
    type SerializeMap = Compound<'g, S::SerializeMap>;
    type SerializeStruct = Compound<'g, S::SerializeStruct>;
    type SerializeStructVariant = Compound<'g, S::SerializeStructVariant>;

    fn serialize_bool(self, v: bool) -> Result<S::Ok, S::Error> {
        self.inner.serialize_bool(v)
    }

    fn serialize_i8(self, v: i8) -> Result<S::Ok, S::Error> {
        self.inner.serialize_i8(v)
    }

    fn serialize_i16(self, v: i16) -> Result<S::Ok, S::Error> {
        self.inner.serialize_i16(v)
    }

    fn serialize_i32(self, v: i32) -> Result<S::Ok, S::Error> {
        self.inner.serialize_i32(v)
    }

    fn serialize_i64(self, v: i64) -> Result<S::Ok, S::Error> {
        self.inner.serialize_i64(v)
    }

    fn serialize_i128(self, v: i128) -> Result<S::Ok, S::Error> {
        self.inner.serialize_i128(v)
    }

    fn serialize_u8(self, v: u8) -> Result<S::Ok, S::Error> {
        self.inner.serialize_u8(v)
    }

    fn serialize_u16(self, v: u16) -> Result<S::Ok, S::Error> {
        self.inner.serialize_u16(v)
    }

    fn serialize_u32(self, v: u32) -> Result<S::Ok, S::Error> {
        self.inner.serialize_u32(v)
    }

    fn serialize_u64(self, v: u64) -> Result<S::Ok, S::Error> {
        self.inner.serialize_u64(v)
    }

    fn serialize_u128(self, v: u128) -> Result<S::Ok, S::Error> {
        self.inner.serialize_u128(v)
    }

    fn serialize_f32(self, v: f32) -> Result<S::Ok, S::Error> {
        self.inner.serialize_f32(v)
    }

    fn serialize_f64(self, v: f64) -> Result<S::Ok, S::Error> {
        self.inner.serialize_f64(v)
    }

    fn serialize_char(self, v: char) -> Result<S::Ok, S::Error> {
        self.inner.serialize_char(v)
    }

    fn serialize_str(self, v: &str) -> Result<S::Ok, S::Error> {
        self.inner.serialize_str(v)
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<S::Ok, S::Error> {
        // Rendered as an array of numbers
        self.guard.enter::<S::Error>(self.level)?;
        self.inner.serialize_bytes(v)
    }

    fn serialize_none(self) -> Result<S::Ok, S::Error> {
        self.inner.serialize_none()
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<S::Ok, S::Error> {
        let child = Nested {
            value,
            level: self.level,
            guard: self.guard,
        };
        self.inner.serialize_some(&child)
    }

    fn serialize_unit(self) -> Result<S::Ok, S::Error> {
        self.inner.serialize_unit()
    }

    fn serialize_unit_struct(self, name: &'static str) -> Result<S::Ok, S::Error> {
        self.inner.serialize_unit_struct(name)
    }

    fn serialize_unit_variant(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
    ) -> Result<S::Ok, S::Error> {
        self.inner.serialize_unit_variant(name, variant_index, variant)
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<S::Ok, S::Error> {
        let child = Nested {
            value,
            level: self.level,
            guard: self.guard,
        };
        self.inner.serialize_newtype_struct(name, &child)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<S::Ok, S::Error> {
        let level = self.guard.enter::<S::Error>(self.level)?;
        let child = Nested {
            value,
            level,
            guard: self.guard,
        };
        self.inner
            .serialize_newtype_variant(name, variant_index, variant, &child)
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq, S::Error> {
        let level = self.guard.enter::<S::Error>(self.level)?;
        let guard = self.guard;
        let inner = self.inner.serialize_seq(len)?;
        Ok(Compound { inner, level, guard })
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple, S::Error> {
        let level = self.guard.enter::<S::Error>(self.level)?;
        let guard = self.guard;
        let inner = self.inner.serialize_tuple(len)?;
        Ok(Compound { inner, level, guard })
    }

    fn serialize_tuple_struct(
        self,
        name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct, S::Error> {
        let level = self.guard.enter::<S::Error>(self.level)?;
        let guard = self.guard;
        let inner = self.inner.serialize_tuple_struct(name, len)?;
        Ok(Compound { inner, level, guard })
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleVariant, S::Error> {
        // Wrapping object, then the array
        let outer = self.guard.enter::<S::Error>(self.level)?;
        let level = self.guard.enter::<S::Error>(outer)?;
        let guard = self.guard;
        let inner = self
            .inner
            .serialize_tuple_variant(name, variant_index, variant, len)?;
        Ok(Compound { inner, level, guard })
    }

    fn serialize_map(self, len: Option<usize>) -> Result<Self::SerializeMap, S::Error> {
        let level = self.guard.enter::<S::Error>(self.level)?;
        let guard = self.guard;
        let inner = self.inner.serialize_map(len)?;
        Ok(Compound { inner, level, guard })
    }

    fn serialize_struct(
        self,
        name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStruct, S::Error> {
        let level = self.guard.enter::<S::Error>(self.level)?;
        let guard = self.guard;
        let inner = self.inner.serialize_struct(name, len)?;
        Ok(Compound { inner, level, guard })
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStructVariant, S::Error> {
        let outer = self.guard.enter::<S::Error>(self.level)?;
        let level = self.guard.enter::<S::Error>(outer)?;
        let guard = self.guard;
        let inner = self
            .inner
            .serialize_struct_variant(name, variant_index, variant, len)?;
        Ok(Compound { inner, level, guard })
    }

    fn is_human_readable(&self) -> bool {
        self.inner.is_human_readable()
    }
}

impl<C: ser::SerializeSeq> ser::SerializeSeq for Compound<'_, C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), C::Error> {
        let child = self.nested(value);
        self.inner.serialize_element(&child)
    }

    fn end(self) -> Result<C::Ok, C::Error> {
        self.inner.end()
    }
}

impl<C: ser::SerializeTuple> ser::SerializeTuple for Compound<'_, C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), C::Error> {
        let child = self.nested(value);
        self.inner.serialize_element(&child)
    }

    fn end(self) -> Result<C::Ok, C::Error> {
        self.inner.end()
    }
}

impl<C: ser::SerializeTupleStruct> ser::SerializeTupleStruct for Compound<'_, C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), C::Error> {
        let child = self.nested(value);
        self.inner.serialize_field(&child)
    }

    fn end(self) -> Result<C::Ok, C::Error> {
        self.inner.end()
    }
}

impl<C: ser::SerializeTupleVariant> ser::SerializeTupleVariant for Compound<'_, C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), C::Error> {
        let child = self.nested(value);
        self.inner.serialize_field(&child)
    }

    fn end(self) -> Result<C::Ok, C::Error> {
        self.inner.end()
    }
}

impl<C: ser::SerializeMap> ser::SerializeMap for Compound<'_, C> {
    type Ok = C::Ok;
    type Error = C::Error;

    // Keys end up as JSON strings; only values can nest.
    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), C::Error> {
        self.inner.serialize_key(key)
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), C::Error> {
        let child = self.nested(value);
        self.inner.serialize_value(&child)
    }

    fn end(self) -> Result<C::Ok, C::Error> {
        self.inner.end()
    }
}

impl<C: ser::SerializeStruct> ser::SerializeStruct for Compound<'_, C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), C::Error> {
        let child = self.nested(value);
        self.inner.serialize_field(key, &child)
    }

    fn skip_field(&mut self, key: &'static str) -> Result<(), C::Error> {
        self.inner.skip_field(key)
    }

    fn end(self) -> Result<C::Ok, C::Error> {
        self.inner.end()
    }
}

impl<C: ser::SerializeStructVariant> ser::SerializeStructVariant for Compound<'_, C> {
    type Ok = C::Ok;
    type Error = C::Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), C::Error> {
        let child = self.nested(value);
        self.inner.serialize_field(key, &child)
    }

    fn skip_field(&mut self, key: &'static str) -> Result<(), C::Error> {
        self.inner.skip_field(key)
    }

    fn end(self) -> Result<C::Ok, C::Error> {
        self.inner.end()
    }
}

/// Serializes `value` to a `serde_json::Value`, refusing anything nested
/// deeper than the guard allows.
pub fn to_value_limited<T: Serialize + ?Sized>(
    value: &T,
    guard: &DepthGuard,
) -> Result<serde_json::Value, serde_json::Error> {
    value.serialize(DepthLimited::new(serde_json::value::Serializer, guard))
}
