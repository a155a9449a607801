pub mod error;
pub mod reader;
pub mod source;
pub mod table;

pub use error::{DocumentError, ReadError, TableFailure, TableKind};
pub use reader::{
    BasicEdgeFactory, BasicNodeFactory, DocumentReader, EdgeFactory, Materialized, NodeFactory,
    NonDuplicating, ReadSummary,
};
pub use source::Position;
pub use table::{read_table, Row, TableSeed, TableSink};
