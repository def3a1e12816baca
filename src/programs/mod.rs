//! Reference vertex programs and queries.

mod bfs;
mod query;
mod shortest_path;

pub use bfs::Bfs;
pub use query::{DistanceSum, Reachability};
pub use shortest_path::ShortestPath;
