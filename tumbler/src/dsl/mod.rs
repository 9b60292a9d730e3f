//! The pipeline language: tokenizer and parser.
//!
//! ```
//! use tumbler::dsl::parse_pipeline;
//!
//! let pipeline = parse_pipeline(
//!     "pipeline { agent none stages { stage('build') { steps { echo 'hi' } } } }",
//! )
//! .unwrap();
//! assert_eq!(pipeline.stages[0].name, "build");
//! ```

mod lexer;
mod parser;

pub use lexer::{tokenize, Token, TokenKind};
pub use parser::parse_pipeline;
