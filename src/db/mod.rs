//! Database access layer.
//!
//! This module contains the connection handle, the transactional executors,
//! the cursor and the row scanner, together with the per-engine plumbing
//! they run on.

pub mod backend;
pub mod cursor;
pub mod macros;
pub(crate) mod params;
pub mod pool;
pub mod scanner;
pub mod transaction;
pub mod types;

pub use backend::{Backend, RowStream};
pub use cursor::Cursor;
pub use pool::{Conn, DbConn};
pub use scanner::Scanner;
pub use transaction::Tx;
pub use types::{TypeCategory, categorize_type};
