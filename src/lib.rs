pub mod alarm;
pub mod command;
