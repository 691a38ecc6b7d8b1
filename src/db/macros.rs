//! Backend dispatch macro.
//!
//! Generates the match over [`DbConn`](crate::db::DbConn) variants so that
//! engine-agnostic callers can hand each arm to generic code written against
//! [`Backend`](crate::db::Backend).

/// Macro for generating database dispatch match arms.
///
/// This macro generates match arms for `DbConn` variants, reducing the need
/// to manually write repetitive match statements.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(conn, {
///     MySql(c) => run(c).await,
///     Postgres(c) => run(c).await,
///     SQLite(c) => run(c).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($conn:expr, { $($variant:ident($c:pat) => $body:expr),+ $(,)? }) => {
        match $conn {
            $(
                $crate::db::DbConn::$variant($c) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
