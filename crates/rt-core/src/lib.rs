//! rt-core: Core library for rolling on CSV roll tables
//!
//! This library provides functionality to:
//! - Load CSV tables with `#!include` directives and weighted roll ranges
//! - Parse `${...}` expressions (dice arithmetic and cross-table references)
//!   into replacement templates
//! - Evaluate dice arithmetic without a general-purpose interpreter
//! - Roll rows and resolve their templates through a caching table manager

pub mod arith;
pub mod diagnostic;
pub mod directive;
pub mod error;
pub mod expression;
pub mod loader;
pub mod manager;
pub mod resolver;
pub mod table;

pub use arith::{dice_range, eval_dice_arithmetic, roll_dice, DiceArith, Number, UnsafeExpressionError, MAX_DICE};
pub use diagnostic::{CollectingSink, Diagnostic, DiagnosticSink, NullSink, Severity, TracingSink};
pub use directive::{DirectiveParseError, Namespace};
pub use error::{Error, Result};
pub use expression::{Element, Expression, ExpressionParseError, Origin, Reference, ReplacementTemplate, Value};
pub use loader::{load_table, parse_table_str};
pub use manager::TableManager;
pub use resolver::{resolve, RowSource, DEFAULT_DEPTH};
pub use table::{is_magic_field, RangeLookup, RollRange, Row, Table, INDEX_FIELD, LINE_FIELD, MAGIC_FIELDS};
