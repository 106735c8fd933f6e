//! Component C4: Block Parser.

pub mod block_parser;

pub use block_parser::parse_block;
