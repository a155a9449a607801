pub mod attributes;
pub mod error;
pub mod graph;
pub mod network;

pub use attributes::AttributeStore;
pub use error::StoreError;
pub use graph::{EdgeRecord, Graph};
pub use network::Network;
