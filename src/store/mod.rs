pub mod keyvalue;
pub mod postgres;
