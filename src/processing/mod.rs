pub mod control;
pub mod csv_writer;
pub mod records;
pub mod summary;
pub mod trajectory;
