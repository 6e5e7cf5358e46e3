pub mod scanner;
pub mod token;

pub use scanner::{ScanError, Scanner};
pub use token::{Token, TokenKind};
