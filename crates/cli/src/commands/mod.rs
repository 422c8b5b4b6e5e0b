pub mod catalog;
pub mod config_cmd;
pub mod run;
