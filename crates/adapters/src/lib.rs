pub mod d1;
pub mod keyring_store;
pub mod sqlite;
