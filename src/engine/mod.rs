// too sensitive for `Box<dyn FnMut(...)>`
#![allow(clippy::type_complexity)]

pub mod error;
pub use self::error::{DynError, DynResult, Error, Result};

pub mod value;
pub use self::value::{Handle, HashInto, Key, KeyImpl, SimpleType, Value};

pub mod time;
pub use self::time::DateTime;

pub mod multiset;
pub use self::multiset::{Diff, MultiSet};

pub mod index;
pub use self::index::Index;

pub mod fractional;
pub use self::fractional::key_between;

pub mod btree;
pub use self::btree::RankTree;

pub mod reduce;
pub use self::reduce::{Aggregate, Reducer};

pub mod graph;
pub use self::graph::{DataflowGraph, InputSession, Operator, Stream};

pub mod operators;
pub use self::operators::{
    FractionalTopKOptions, JoinType, TopKBacking, TopKOptions, TopKWindowHandle,
};
