//! Random bundle passwords.

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Length of generated bundle passwords.
pub const PASSWORD_LENGTH: usize = 16;

/// Generate a random alphanumeric token of the given length.
pub fn create_token(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Generate a bundle password.
pub fn bundle_password() -> String {
    create_token(PASSWORD_LENGTH)
}
