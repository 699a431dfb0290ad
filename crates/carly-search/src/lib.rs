//! Worldline search for the test-carly harness: immutable search nodes,
//! the shared best-first frontier, the visited table, and the linear and
//! parallel search engines.

pub mod engine;
pub mod frontier;
pub mod visited;
pub mod world;

pub use engine::{search, SearchError, SearchReport};
pub use frontier::Frontier;
pub use visited::Visited;
pub use world::{Futures, VisitKey, World};
