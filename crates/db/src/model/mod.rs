//! Caller-facing operation API

pub mod collection;
pub mod cursor;
pub mod find;
pub mod session;

pub use collection::Collection;
pub use cursor::Cursor;
pub use find::FindResult;
pub use session::TxSession;
