//! CSV surfaces of the command line tool: the input manifest and the final
//! transfer table.

pub mod manifest_reader;
pub mod transfer_writer;
