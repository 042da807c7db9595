pub mod hash;
pub mod token_cipher;

pub use token_cipher::TokenCipher;
