pub mod ast;
pub mod ir;
pub mod schema;
pub mod source_map;
pub mod template;

pub use ast::{Program, SourcePosition};
pub use ir::{CompiledUnit, FlowUnit, HandlerUnit, Op, UnitRef};
pub use schema::{FieldType, SchemaRegistry, StructuredType};
pub use source_map::{SourceMap, SourceMapping};
