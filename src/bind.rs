//! Type binder: populate typed destinations from a decoded [`Node`].
//!
//! Destinations fall into a closed set of [`Shape`]s. Scalars decode a leaf
//! through the [`Codec`]; records look up their fields by tag; mappings decode
//! every child; indirections (`Option`, `Box`, `Arc`) are allocated or
//! dereferenced before the inner rules apply.
//!
//! Records declare their field tags once with [`bind_record!`](crate::bind_record):
//!
//! ```rust
//! use univrs_config::{bind_record, Bind, JsonCodec, KeyPath};
//!
//! #[derive(Debug, Default)]
//! struct Redis {
//!     address: String,
//!     timeout: u32,
//! }
//!
//! bind_record!(Redis {
//!     "address" => address,
//!     "timeout" => timeout,
//! });
//!
//! let base = KeyPath::normalize("/call/redis").unwrap();
//! let node = univrs_config::tree::build(
//!     &base,
//!     [("/call/redis/address", "localhost"), ("/call/redis/timeout", "30")],
//! );
//! let redis = Redis::materialize(&node, &JsonCodec).unwrap();
//! assert_eq!(redis.address, "localhost");
//! assert_eq!(redis.timeout, 30);
//! ```

use std::any::type_name;
use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::codec::Codec;
use crate::error::{ConfigError, Result};
use crate::tree::Node;

/// Shape of a destination type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Decoded from a single leaf.
    Scalar,
    /// Named fields looked up by tag.
    Record,
    /// Homogeneous key to value collection.
    Mapping,
    /// `Option`, `Box` or `Arc` around another shape.
    Indirection,
}

impl Shape {
    pub fn name(self) -> &'static str {
        match self {
            Shape::Scalar => "scalar",
            Shape::Record => "record",
            Shape::Mapping => "mapping",
            Shape::Indirection => "indirection",
        }
    }

    /// Whether values of this shape are read from a subtree scan rather than
    /// a single key.
    pub fn is_subtree(self) -> bool {
        matches!(self, Shape::Record | Shape::Mapping)
    }
}

/// A destination that can be populated from a [`Node`].
pub trait Bind: Sized {
    fn shape() -> Shape;

    /// Shape seen through any indirection.
    fn target_shape() -> Shape {
        Self::shape()
    }

    /// Zero value used when a fresh destination is needed, `None` if the type
    /// cannot be allocated.
    fn allocate() -> Option<Self> {
        None
    }

    /// Populate `self` in place.
    fn bind<C: Codec>(&mut self, node: &Node, codec: &C) -> Result<()>;

    /// Allocate a fresh value and bind it.
    fn materialize<C: Codec>(node: &Node, codec: &C) -> Result<Self> {
        let mut value =
            Self::allocate().ok_or(ConfigError::NilDestination(type_name::<Self>()))?;
        value.bind(node, codec)?;
        Ok(value)
    }
}

/// A mapping key decoded from a path segment.
pub trait BindKey: Sized {
    fn from_segment<C: Codec>(segment: &str, codec: &C) -> Result<Self>;
}

fn mismatch<T>(node: &Node, expected: Shape) -> ConfigError {
    ConfigError::UnknownResultShape {
        found: node.kind(),
        expected: expected.name(),
        type_name: type_name::<T>(),
    }
}

/// Decode a leaf through the codec; branches are rejected.
pub fn decode_leaf<T: DeserializeOwned, C: Codec>(node: &Node, codec: &C) -> Result<T> {
    match node {
        Node::Leaf(raw) => codec.decode(raw),
        Node::Branch(_) => Err(mismatch::<T>(node, Shape::Scalar)),
    }
}

/// Children of a node bound onto the record type `T`.
///
/// Used by [`bind_record!`](crate::bind_record).
pub fn record_children<T>(node: &Node) -> Result<&BTreeMap<String, Node>> {
    node.children().ok_or_else(|| mismatch::<T>(node, Shape::Record))
}

fn reject_nested<Outer, Inner: Bind>() -> Result<()> {
    if Inner::shape() == Shape::Indirection {
        return Err(ConfigError::DoubleIndirection(type_name::<Outer>()));
    }
    Ok(())
}

macro_rules! bind_scalar {
    ($($ty:ty),* $(,)?) => {$(
        impl Bind for $ty {
            fn shape() -> Shape {
                Shape::Scalar
            }

            fn allocate() -> Option<Self> {
                Some(<$ty>::default())
            }

            fn bind<C: Codec>(&mut self, node: &Node, codec: &C) -> Result<()> {
                *self = decode_leaf(node, codec)?;
                Ok(())
            }

            fn materialize<C: Codec>(node: &Node, codec: &C) -> Result<Self> {
                decode_leaf(node, codec)
            }
        }
    )*};
}

macro_rules! bind_key {
    ($($ty:ty),* $(,)?) => {$(
        impl BindKey for $ty {
            fn from_segment<C: Codec>(segment: &str, codec: &C) -> Result<Self> {
                codec.decode(segment)
            }
        }
    )*};
}

bind_scalar!(bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);
bind_key!(bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl Bind for String {
    fn shape() -> Shape {
        Shape::Scalar
    }

    fn allocate() -> Option<Self> {
        Some(String::new())
    }

    fn bind<C: Codec>(&mut self, node: &Node, codec: &C) -> Result<()> {
        *self = Self::materialize(node, codec)?;
        Ok(())
    }

    /// Plain text that is not a valid encoded string is taken verbatim.
    fn materialize<C: Codec>(node: &Node, codec: &C) -> Result<Self> {
        match node {
            Node::Leaf(raw) => Ok(codec.decode(raw).unwrap_or_else(|_| raw.clone())),
            Node::Branch(_) => Err(mismatch::<Self>(node, Shape::Scalar)),
        }
    }
}

impl BindKey for String {
    fn from_segment<C: Codec>(segment: &str, codec: &C) -> Result<Self> {
        Ok(codec
            .decode(segment)
            .unwrap_or_else(|_| segment.to_string()))
    }
}

/// Lists are stored as a single encoded leaf.
impl<T: DeserializeOwned> Bind for Vec<T> {
    fn shape() -> Shape {
        Shape::Scalar
    }

    fn allocate() -> Option<Self> {
        Some(Vec::new())
    }

    fn bind<C: Codec>(&mut self, node: &Node, codec: &C) -> Result<()> {
        *self = decode_leaf(node, codec)?;
        Ok(())
    }

    fn materialize<C: Codec>(node: &Node, codec: &C) -> Result<Self> {
        decode_leaf(node, codec)
    }
}

/// Any deserializable type stored as a single encoded leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Encoded<T>(pub T);

impl<T> Encoded<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Encoded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Encoded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T: DeserializeOwned> Bind for Encoded<T> {
    fn shape() -> Shape {
        Shape::Scalar
    }

    fn bind<C: Codec>(&mut self, node: &Node, codec: &C) -> Result<()> {
        self.0 = decode_leaf(node, codec)?;
        Ok(())
    }

    fn materialize<C: Codec>(node: &Node, codec: &C) -> Result<Self> {
        decode_leaf(node, codec).map(Encoded)
    }
}

impl<T: Bind> Bind for Option<T> {
    fn shape() -> Shape {
        Shape::Indirection
    }

    fn target_shape() -> Shape {
        T::target_shape()
    }

    fn allocate() -> Option<Self> {
        Some(None)
    }

    fn bind<C: Codec>(&mut self, node: &Node, codec: &C) -> Result<()> {
        reject_nested::<Self, T>()?;
        match self {
            Some(inner) => inner.bind(node, codec),
            None => {
                *self = Some(T::materialize(node, codec)?);
                Ok(())
            }
        }
    }

    fn materialize<C: Codec>(node: &Node, codec: &C) -> Result<Self> {
        reject_nested::<Self, T>()?;
        T::materialize(node, codec).map(Some)
    }
}

impl<T: Bind> Bind for Box<T> {
    fn shape() -> Shape {
        Shape::Indirection
    }

    fn target_shape() -> Shape {
        T::target_shape()
    }

    fn allocate() -> Option<Self> {
        T::allocate().map(Box::new)
    }

    fn bind<C: Codec>(&mut self, node: &Node, codec: &C) -> Result<()> {
        reject_nested::<Self, T>()?;
        (**self).bind(node, codec)
    }

    fn materialize<C: Codec>(node: &Node, codec: &C) -> Result<Self> {
        reject_nested::<Self, T>()?;
        T::materialize(node, codec).map(Box::new)
    }
}

/// A shared `Arc` cannot be written through and is rejected.
impl<T: Bind> Bind for Arc<T> {
    fn shape() -> Shape {
        Shape::Indirection
    }

    fn target_shape() -> Shape {
        T::target_shape()
    }

    fn allocate() -> Option<Self> {
        T::allocate().map(Arc::new)
    }

    fn bind<C: Codec>(&mut self, node: &Node, codec: &C) -> Result<()> {
        reject_nested::<Self, T>()?;
        Arc::get_mut(self)
            .ok_or(ConfigError::NonAssignable(type_name::<Self>()))?
            .bind(node, codec)
    }

    fn materialize<C: Codec>(node: &Node, codec: &C) -> Result<Self> {
        reject_nested::<Self, T>()?;
        T::materialize(node, codec).map(Arc::new)
    }
}

impl<K, V, S> Bind for HashMap<K, V, S>
where
    K: BindKey + Eq + Hash,
    V: Bind,
    S: BuildHasher + Default,
{
    fn shape() -> Shape {
        Shape::Mapping
    }

    fn allocate() -> Option<Self> {
        Some(HashMap::default())
    }

    fn bind<C: Codec>(&mut self, node: &Node, codec: &C) -> Result<()> {
        let children = node
            .children()
            .ok_or_else(|| mismatch::<Self>(node, Shape::Mapping))?;
        for (segment, child) in children {
            let key = K::from_segment(segment, codec)?;
            self.insert(key, V::materialize(child, codec)?);
        }
        Ok(())
    }
}

impl<K, V> Bind for BTreeMap<K, V>
where
    K: BindKey + Ord,
    V: Bind,
{
    fn shape() -> Shape {
        Shape::Mapping
    }

    fn allocate() -> Option<Self> {
        Some(BTreeMap::new())
    }

    fn bind<C: Codec>(&mut self, node: &Node, codec: &C) -> Result<()> {
        let children = node
            .children()
            .ok_or_else(|| mismatch::<Self>(node, Shape::Mapping))?;
        for (segment, child) in children {
            let key = K::from_segment(segment, codec)?;
            self.insert(key, V::materialize(child, codec)?);
        }
        Ok(())
    }
}

/// The generic destination: a copy of the subtree itself.
impl Bind for Node {
    fn shape() -> Shape {
        Shape::Mapping
    }

    fn allocate() -> Option<Self> {
        Some(Node::default())
    }

    fn bind<C: Codec>(&mut self, node: &Node, _codec: &C) -> Result<()> {
        *self = node.clone();
        Ok(())
    }
}

/// Implement [`Bind`] for a record type by listing its field tags.
///
/// The type must implement `Default`. Tags absent from the subtree leave the
/// corresponding field untouched.
#[macro_export]
macro_rules! bind_record {
    ($ty:ty { $($tag:literal => $field:ident),* $(,)? }) => {
        impl $crate::bind::Bind for $ty {
            fn shape() -> $crate::bind::Shape {
                $crate::bind::Shape::Record
            }

            fn allocate() -> ::std::option::Option<Self> {
                ::std::option::Option::Some(<Self as ::std::default::Default>::default())
            }

            #[allow(unused_variables)]
            fn bind<C: $crate::codec::Codec>(
                &mut self,
                node: &$crate::tree::Node,
                codec: &C,
            ) -> $crate::error::Result<()> {
                let children = $crate::bind::record_children::<Self>(node)?;
                $(
                    if let ::std::option::Option::Some(child) = children.get($tag) {
                        $crate::bind::Bind::bind(&mut self.$field, child, codec)?;
                    }
                )*
                ::std::result::Result::Ok(())
            }
        }
    };
}
