//! # Path Expression Module
//!
//! A deliberately small addressing language for reading values out of, and writing
//! values into, JSON trees. It is used by the transform engine and by enrichment.
//!
//! ## Supported forms
//!
//! | Expression                 | Read                                   | Write                                          |
//! |----------------------------|----------------------------------------|------------------------------------------------|
//! | `$`                        | whole document                         | replace whole document                         |
//! | `a.b.c`                    | nested field, `None` if any part missing | create missing objects, then set             |
//! | `arr[*].f`                 | `f` of every object element            | elements with an `…id` field equal to the drive value |
//! | `arr[?(@.k=v)].f`          | `f` of elements whose `k` equals `v`    | same elements                                  |
//! | `arr[N].f`                 | `f` of element `N`                     | element `N` only; out of range is a no-op     |
//!
//! A leading `$` or `$.` is optional everywhere. This is not a general JSONPath
//! implementation: one array selector per expression, no recursive descent, no slices.
//!
//! ## Rust Concepts Used
//!
//! - Expressions are parsed once into an enum (`PathExpr`) and evaluated many times
//! - Reads borrow the tree (`&Value`) and writes take `&mut Value`, so the borrow checker
//!   guarantees a read never observes a half-finished write

pub mod eval;
pub mod parser;

pub use eval::{placeholder_name, stringify_scalar, substitute_placeholder, WriteOutcome};
pub use parser::{ExpressionError, PathExpr, Selector};
