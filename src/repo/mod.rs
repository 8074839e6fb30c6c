//! Record mapping and predicate queries over the SQLite schema.
//!
//! Every function takes a plain `&Connection` so it composes inside a
//! [`crate::db::Store::atomic`] unit of work as well as a read.

pub mod books;
pub mod branches;
pub mod reservations;
pub mod stocktakes;
