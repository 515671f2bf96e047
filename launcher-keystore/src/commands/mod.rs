//! CLI Commands
//!
//! Implementation of all keystore CLI commands.

pub mod change_password;
pub mod create;
pub mod list;
pub mod login;
pub mod recover;
pub mod remove;

use anyhow::{anyhow, Result};
use std::io::{self, Write};
use zeroize::Zeroizing;

use launcher_keystore::{Address, SessionController};

/// Prompt for password input (hidden)
pub fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let password = rpassword::read_password()?;
    Ok(Zeroizing::new(password))
}

/// Prompt for a new password and its confirmation
pub fn prompt_new_password() -> Result<(Zeroizing<String>, Zeroizing<String>)> {
    let password = prompt_password("Enter new password: ")?;
    if password.len() < 8 {
        print_warning("Passwords shorter than 8 characters are easy to guess");
    }
    let confirm = prompt_password("Confirm password: ")?;
    Ok((password, confirm))
}

/// Prompt for confirmation
pub fn prompt_confirm(message: &str) -> Result<bool> {
    print!("{} [y/N]: ", message);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case("y") || input.trim().eq_ignore_ascii_case("yes"))
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("\x1b[31mError:\x1b[0m {}", message);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("\x1b[32m{}\x1b[0m", message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("\x1b[33mWarning:\x1b[0m {}", message);
}

/// Parse `address`, or fall back to the selected account.
pub fn resolve_address(controller: &SessionController, address: Option<&str>) -> Result<Address> {
    match address {
        Some(address) => address
            .parse()
            .map_err(|e| anyhow!("{}", e)),
        None => controller
            .snapshot()
            .selected_address
            .ok_or_else(|| anyhow!("No accounts found. Run 'launcher-keystore create' first.")),
    }
}

/// Prompt for the password of `address` and unlock it.
pub async fn unlock_with_prompt(controller: &SessionController, address: Address) -> Result<()> {
    println!("Account: {}", address);
    let password = prompt_password("Enter password: ")?;

    match controller.unlock(address, &password).await {
        Ok(_) => Ok(()),
        Err(e) => {
            print_error(&e.to_string());
            Err(e.into())
        }
    }
}
