// Copyright © 2024 Pathway

#![allow(clippy::non_canonical_partial_ord_impl)] // False positive with Derivative

use std::cmp::Ordering;
use std::fmt::{self, Debug, Display};
use std::mem::{align_of, size_of};
use std::ops::Deref;
use std::sync::Arc;

use super::error::{DynError, DynResult};
use super::time::DateTime;
use super::Error;

use arcstr::ArcStr;
use derivative::Derivative;
use itertools::Itertools as _;
use once_cell::sync::Lazy;
use ordered_float::OrderedFloat;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use xxhash_rust::xxh3::Xxh3 as Hasher;

const BASE32_ALPHABET: base32::Alphabet = base32::Alphabet::Crockford;

pub type KeyImpl = u64;

// Fixed once per process, so keys are stable within a run but not across runs.
static HASH_SEED: Lazy<KeyImpl> = Lazy::new(|| rand::thread_rng().gen());

fn new_hasher() -> Hasher {
    Hasher::with_seed(*HASH_SEED)
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(pub KeyImpl);

impl Key {
    const FOR_EMPTY_TUPLE: Self = Self(0x44_65_6C_74_61); // C5T6RSA4

    pub(crate) fn from_hasher(hasher: &Hasher) -> Self {
        Self(hasher.digest())
    }

    pub fn for_value(value: &Value) -> Self {
        let mut hasher = new_hasher();
        value.hash_into(&mut hasher);
        Self::from_hasher(&hasher)
    }

    pub fn for_values(values: &[Value]) -> Self {
        if values.is_empty() {
            return Self::FOR_EMPTY_TUPLE;
        }
        let mut hasher = new_hasher();
        values.iter().for_each(|v| v.hash_into(&mut hasher));
        Self::from_hasher(&hasher)
    }

    pub fn random() -> Self {
        Self(rand::thread_rng().gen())
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let encoded = base32::encode(BASE32_ALPHABET, &self.0.to_le_bytes());
        write!(f, "^{encoded}")
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

#[derive(Debug, Serialize, Deserialize, Derivative)]
#[derivative(PartialEq, Eq, PartialOrd, Ord, Hash)]
struct HandleInner<T> {
    key: Key,

    #[derivative(
        PartialEq = "ignore",
        PartialOrd = "ignore",
        Ord = "ignore",
        Hash = "ignore"
    )]
    data: T,
}

impl<T: HashInto> HandleInner<T> {
    pub fn new(inner: T) -> Self {
        let mut hasher = new_hasher();
        inner.hash_into(&mut hasher);
        let key = Key::from_hasher(&hasher);
        Self { key, data: inner }
    }
}

/// Shared immutable payload carrying its structural key, computed once at
/// construction. Comparisons and hashing use the key only, so repeated
/// hashing of the same composite value never walks the payload again.
#[derive(Debug, Serialize, Deserialize, Derivative)]
#[derivative(
    Clone(bound = ""),
    PartialEq(bound = ""),
    Eq(bound = ""),
    PartialOrd(bound = ""),
    Ord(bound = ""),
    Hash(bound = "")
)]
pub struct Handle<T>(Arc<HandleInner<T>>);

impl<T> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0.data
    }
}

impl<T: HashInto> Handle<T> {
    fn new(inner: T) -> Self {
        Self(Arc::new(HandleInner::new(inner)))
    }
}

impl<T> Handle<T> {
    pub fn key(&self) -> Key {
        self.0.key
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    BigInt(i128),
    Float(OrderedFloat<f64>),
    Pointer(Key),
    String(ArcStr),
    Bytes(Handle<Box<[u8]>>),
    DateTime(DateTime),
    Tuple(Handle<Box<[Self]>>),
    Object(Handle<Vec<(ArcStr, Self)>>),
}

const _: () = assert!(align_of::<Value>() <= 16);
const _: () = assert!(size_of::<Value>() <= 32);

// Tuples order by their elements, not by their handle key, so sorted
// output does not depend on the per-process hash seed.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(lhs), Self::Bool(rhs)) => lhs.cmp(rhs),
            (Self::Int(lhs), Self::Int(rhs)) => lhs.cmp(rhs),
            (Self::BigInt(lhs), Self::BigInt(rhs)) => lhs.cmp(rhs),
            (Self::Float(lhs), Self::Float(rhs)) => lhs.cmp(rhs),
            (Self::Pointer(lhs), Self::Pointer(rhs)) => lhs.cmp(rhs),
            (Self::String(lhs), Self::String(rhs)) => lhs.cmp(rhs),
            (Self::Bytes(lhs), Self::Bytes(rhs)) => lhs.cmp(rhs),
            (Self::DateTime(lhs), Self::DateTime(rhs)) => lhs.cmp(rhs),
            (Self::Tuple(lhs), Self::Tuple(rhs)) => lhs.iter().cmp(rhs.iter()),
            (Self::Object(lhs), Self::Object(rhs)) => lhs.cmp(rhs),
            _ => (self.simple_type() as u8).cmp(&(other.simple_type() as u8)),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Value {
    pub fn pair(key: Self, value: Self) -> Self {
        Self::from(vec![key, value])
    }

    /// Key-sorted object construction; later duplicates win.
    pub fn object(fields: impl IntoIterator<Item = (ArcStr, Self)>) -> Self {
        let mut fields: Vec<_> = fields.into_iter().collect();
        fields.reverse();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        fields.dedup_by(|a, b| a.0 == b.0);
        Self::Object(Handle::new(fields))
    }

    pub fn bytes(data: impl Into<Box<[u8]>>) -> Self {
        Self::Bytes(Handle::new(data.into()))
    }

    pub fn from_isize(i: isize) -> Self {
        match i.try_into() {
            Ok(i) => Self::Int(i),
            Err(_) => Self::None,
        }
    }

    #[inline(never)]
    #[cold]
    fn type_mismatch(&self, expected: &'static str) -> DynError {
        DynError::from(Error::TypeMismatch {
            expected,
            value: self.clone(),
        })
    }

    pub fn as_pointer(&self) -> DynResult<Key> {
        if let Self::Pointer(key) = self {
            Ok(*key)
        } else {
            Err(self.type_mismatch("pointer"))
        }
    }

    pub fn as_bool(&self) -> DynResult<bool> {
        if let Self::Bool(b) = self {
            Ok(*b)
        } else {
            Err(self.type_mismatch("bool"))
        }
    }

    pub fn as_int(&self) -> DynResult<i64> {
        if let Self::Int(i) = self {
            Ok(*i)
        } else {
            Err(self.type_mismatch("integer"))
        }
    }

    pub fn as_big_int(&self) -> DynResult<i128> {
        match self {
            Self::Int(i) => Ok(i128::from(*i)),
            Self::BigInt(i) => Ok(*i),
            _ => Err(self.type_mismatch("integer")),
        }
    }

    pub fn as_float(&self) -> DynResult<f64> {
        if let Self::Float(f) = self {
            Ok(f.into_inner())
        } else {
            Err(self.type_mismatch("float"))
        }
    }

    pub fn as_ordered_float(&self) -> DynResult<OrderedFloat<f64>> {
        if let Self::Float(f) = self {
            Ok(*f)
        } else {
            Err(self.type_mismatch("float"))
        }
    }

    pub fn as_string(&self) -> DynResult<&ArcStr> {
        if let Self::String(s) = self {
            Ok(s)
        } else {
            Err(self.type_mismatch("string"))
        }
    }

    pub fn as_bytes(&self) -> DynResult<&[u8]> {
        if let Self::Bytes(b) = self {
            Ok(b)
        } else {
            Err(self.type_mismatch("bytes"))
        }
    }

    pub fn as_date_time(&self) -> DynResult<DateTime> {
        if let Self::DateTime(dt) = self {
            Ok(*dt)
        } else {
            Err(self.type_mismatch("DateTime"))
        }
    }

    pub fn as_tuple(&self) -> DynResult<&[Self]> {
        if let Self::Tuple(t) = self {
            Ok(t)
        } else {
            Err(self.type_mismatch("tuple"))
        }
    }

    pub fn as_object(&self) -> DynResult<&[(ArcStr, Self)]> {
        if let Self::Object(fields) = self {
            Ok(fields)
        } else {
            Err(self.type_mismatch("object"))
        }
    }

    /// The `[key, value]` shape flowing through keyed operators.
    pub fn as_pair(&self) -> Option<(&Self, &Self)> {
        if let Self::Tuple(t) = self {
            if let [key, value] = &***t {
                return Some((key, value));
            }
        }
        None
    }

    pub fn from_json(json: &JsonValue) -> Self {
        match json {
            JsonValue::Null => Self::None,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Self::BigInt(i128::from(u))
                } else {
                    Self::from(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => Self::String(s.as_str().into()),
            JsonValue::Array(values) => {
                Self::from(values.iter().map(Self::from_json).collect::<Vec<_>>())
            }
            JsonValue::Object(fields) => Self::object(
                fields
                    .iter()
                    .map(|(k, v)| (k.as_str().into(), Self::from_json(v))),
            ),
        }
    }

    pub fn to_json(&self) -> DynResult<JsonValue> {
        Ok(match self {
            Self::None => JsonValue::Null,
            Self::Bool(b) => (*b).into(),
            Self::Int(i) => (*i).into(),
            Self::BigInt(i) => match i64::try_from(*i) {
                Ok(i) => i.into(),
                Err(_) => i.to_string().into(),
            },
            Self::Float(f) => {
                serde_json::Number::from_f64(f.into_inner()).map_or(JsonValue::Null, Into::into)
            }
            Self::Pointer(p) => p.to_string().into(),
            Self::String(s) => s.as_str().into(),
            Self::DateTime(dt) => dt.to_string().into(),
            Self::Tuple(values) => JsonValue::Array(
                values.iter().map(Self::to_json).collect::<DynResult<_>>()?,
            ),
            Self::Object(fields) => JsonValue::Object(
                fields
                    .iter()
                    .map(|(k, v)| Ok((k.to_string(), v.to_json()?)))
                    .collect::<DynResult<serde_json::Map<_, _>>>()?,
            ),
            Self::Bytes(_) => return Err(self.type_mismatch("JSON-representable value")),
        })
    }
}

impl Display for Value {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::None => write!(fmt, "None"),
            Self::Bool(b) => write!(fmt, "{}", if *b { "True" } else { "False" }),
            Self::Int(i) => write!(fmt, "{i}"),
            Self::BigInt(i) => write!(fmt, "{i}"),
            Self::Float(OrderedFloat(f)) => write!(fmt, "{f:?}"),
            Self::Pointer(p) => write!(fmt, "{p}"),
            Self::String(s) => write!(fmt, "{s:?}"),
            Self::Bytes(b) => write!(fmt, "{:?}", &**b),
            Self::DateTime(dt) => write!(fmt, "{dt}"),
            Self::Tuple(values) => write!(fmt, "({})", values.iter().format(", ")),
            Self::Object(fields) => write!(
                fmt,
                "{{{}}}",
                fields
                    .iter()
                    .format_with(", ", |(k, v), f| f(&format_args!("{k:?}: {v}"))),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i.into())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i128> for Value {
    fn from(i: i128) -> Self {
        Self::BigInt(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(OrderedFloat(f))
    }
}

impl From<OrderedFloat<f64>> for Value {
    fn from(f: OrderedFloat<f64>) -> Self {
        Self::Float(f)
    }
}

impl From<Key> for Value {
    fn from(k: Key) -> Self {
        Self::Pointer(k)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s.into())
    }
}

impl From<ArcStr> for Value {
    fn from(s: ArcStr) -> Self {
        Self::String(s)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Self::bytes(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::bytes(b)
    }
}

impl From<DateTime> for Value {
    fn from(dt: DateTime) -> Self {
        Self::DateTime(dt)
    }
}

impl From<Vec<Self>> for Value {
    fn from(values: Vec<Self>) -> Self {
        Self::Tuple(Handle::new(values.into_boxed_slice()))
    }
}

impl From<&[Self]> for Value {
    fn from(values: &[Self]) -> Self {
        Self::Tuple(Handle::new(values.into()))
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Self>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => Self::None,
        }
    }
}

// Please only append to this list, as the values here are used in hashing,
// so changing them will result in changed IDs
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SimpleType {
    None,
    Bool,
    Int,
    BigInt,
    Float,
    Pointer,
    String,
    Bytes,
    DateTime,
    Tuple,
    Object,
}

impl Value {
    #[must_use]
    pub fn simple_type(&self) -> SimpleType {
        match self {
            Self::None => SimpleType::None,
            Self::Bool(_) => SimpleType::Bool,
            Self::Int(_) => SimpleType::Int,
            Self::BigInt(_) => SimpleType::BigInt,
            Self::Float(_) => SimpleType::Float,
            Self::Pointer(_) => SimpleType::Pointer,
            Self::String(_) => SimpleType::String,
            Self::Bytes(_) => SimpleType::Bytes,
            Self::DateTime(_) => SimpleType::DateTime,
            Self::Tuple(_) => SimpleType::Tuple,
            Self::Object(_) => SimpleType::Object,
        }
    }

    /// Cheap to compare and hash; the kinds usable as fast-path batch keys
    /// and index prefixes.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Bytes(_) | Self::Tuple(_) | Self::Object(_))
    }
}

pub trait HashInto {
    fn hash_into(&self, hasher: &mut Hasher);
}

impl<T: HashInto> HashInto for &T {
    fn hash_into(&self, hasher: &mut Hasher) {
        (*self).hash_into(hasher);
    }
}

impl HashInto for f64 {
    fn hash_into(&self, hasher: &mut Hasher) {
        #[allow(clippy::float_cmp)]
        let raw = if self.is_nan() {
            !0
        } else if self == &0.0 {
            0 // -0.0 and 0.0 should hash to the same value
        } else {
            self.to_bits()
        };
        raw.hash_into(hasher);
    }
}

impl HashInto for OrderedFloat<f64> {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.0.hash_into(hasher);
    }
}

macro_rules! impl_hash_into_int {
    ($($type:path),+) => {
        $(impl HashInto for $type {
            fn hash_into(&self, hasher: &mut Hasher) {
                hasher.update(&self.to_le_bytes());
            }
        })+
    };
}

impl_hash_into_int!(i8, i16, i32, i64, i128);
impl_hash_into_int!(u8, u16, u32, u64, u128);

impl HashInto for usize {
    fn hash_into(&self, hasher: &mut Hasher) {
        u64::try_from(*self)
            .expect("usize fitting in 64 bits")
            .hash_into(hasher);
    }
}

impl HashInto for bool {
    fn hash_into(&self, hasher: &mut Hasher) {
        u8::from(*self).hash_into(hasher);
    }
}

impl<T> HashInto for HandleInner<T> {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.key.hash_into(hasher);
    }
}

impl<T> HashInto for Handle<T> {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.0.hash_into(hasher);
    }
}

impl HashInto for Key {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.0.hash_into(hasher);
    }
}

impl HashInto for str {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.len().hash_into(hasher);
        hasher.update(self.as_bytes());
    }
}

impl HashInto for String {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.as_str().hash_into(hasher);
    }
}

impl HashInto for ArcStr {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.as_str().hash_into(hasher);
    }
}

impl<T: HashInto> HashInto for [T] {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.len().hash_into(hasher);
        self.iter().for_each(|x| x.hash_into(hasher));
    }
}

impl<T: HashInto> HashInto for Vec<T> {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.as_slice().hash_into(hasher);
    }
}

impl<T: HashInto> HashInto for Box<[T]> {
    fn hash_into(&self, hasher: &mut Hasher) {
        (**self).hash_into(hasher);
    }
}

impl HashInto for DateTime {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.timestamp_ns().hash_into(hasher);
    }
}

// Object fields, already in their key-sorted order.
impl HashInto for (ArcStr, Value) {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.0.hash_into(hasher);
        self.1.hash_into(hasher);
    }
}

impl HashInto for Value {
    fn hash_into(&self, hasher: &mut Hasher) {
        (self.simple_type() as u8).hash_into(hasher);
        match self {
            Self::None => {}
            Self::Bool(b) => b.hash_into(hasher),
            Self::Int(i) => i.hash_into(hasher),
            Self::BigInt(i) => i.hash_into(hasher),
            Self::Float(f) => f.hash_into(hasher),
            Self::Pointer(p) => p.hash_into(hasher),
            Self::String(s) => s.hash_into(hasher),
            Self::Bytes(handle) => handle.hash_into(hasher),
            Self::DateTime(dt) => dt.hash_into(hasher),
            Self::Tuple(handle) => handle.hash_into(hasher),
            Self::Object(handle) => handle.hash_into(hasher),
        }
    }
}
