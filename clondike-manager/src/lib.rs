pub mod connection;
pub mod manager;
pub mod peerlink;
pub mod state;
pub mod table;

pub use manager::{MigrationManager, NodeRole};
pub use peerlink::ManagerPeerLink;
pub use state::{ManagerState, ManagerStateCell};
pub use table::TaskTable;
