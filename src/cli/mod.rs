// Subcommand handlers

pub mod apply;
pub mod status;
