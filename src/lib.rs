//! Control-plane core for an OpenFlow network managed through an OpenDaylight
//! controller: topology discovery, constrained path search and flow
//! programming.

pub mod controller;
pub mod criteria;
pub mod discovery;
pub mod error;
pub mod flow;
pub mod graph;
pub mod instruction;
pub mod models;
pub mod node;
pub mod path;
pub mod programmer;
pub mod registry;
pub mod topology;

pub use error::SdnError;
