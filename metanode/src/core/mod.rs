pub mod directory;
pub mod health;
pub mod meta;
pub mod namespace;
pub mod node;
pub mod notify;
pub mod placement;
pub mod recovery;
pub mod registry;
pub mod replicate;
pub mod routes;
pub mod state;
