pub mod password;

pub use password::{Argon2Hasher, Password, PasswordHashString, PasswordHasher};
