pub mod history;
pub mod list;
pub mod persistence;
pub mod tune;
