mod buffer;
mod builder;
mod entity;
mod error;
mod frame;
mod player;
mod reconstructor;
mod world;

pub use buffer::{Sequenced, SnapshotRing};
pub use builder::{ConnectionState, EncodedSnapshot, SentFrame, SnapshotBuilder, SnapshotConfig};
pub use entity::{EntityFlags, EntityState, EntityType};
pub use error::SnapshotError;
pub use frame::{Snapshot, SnapshotDiff};
pub use player::PlayerState;
pub use reconstructor::SnapshotReconstructor;
pub use world::{EntityWorld, WorldSource};
