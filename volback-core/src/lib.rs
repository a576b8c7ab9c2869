pub mod config;
pub mod db;
pub mod error;
pub mod keymgr;
pub mod types;


pub use config::*;
pub use db::{StateDb, VolumeDb};
pub use error::*;
pub use keymgr::{KeyManager, LocalKeyManager};
pub use types::*;
