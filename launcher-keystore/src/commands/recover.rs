//! Private key recovery command

use anyhow::Result;

use launcher_keystore::SessionController;

use super::{print_error, print_success, prompt_new_password, prompt_password};

/// Run the recover command
pub async fn run(controller: &SessionController) -> Result<()> {
    println!("Enter the account's private key (64 hex characters, input is hidden).");
    let key_hex = prompt_password("Private key: ")?;

    println!();
    let address = loop {
        let (password, confirm) = prompt_new_password()?;
        match controller
            .recover_with_private_key(&key_hex, &password, &confirm)
            .await
        {
            Err(e) if e.is_validation() => print_error(&e.to_string()),
            result => break result?,
        }
    };
    controller.logout().await;

    println!();
    print_success("Account restored successfully!");
    println!("  {}", address);
    Ok(())
}
