//! Execution tokens
//!
//! Tokens are the dynamic half of the runtime: one token per thread of
//! control, kept in a flat [`TokenTree`] arena with explicit parent links.

mod token;

pub use token::{ExecutionToken, TokenError, TokenId, TokenState, TokenTree};
