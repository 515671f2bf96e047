//! Password change command

use anyhow::Result;

use launcher_keystore::SessionController;

use super::{print_error, print_success, prompt_new_password, resolve_address, unlock_with_prompt};

/// Run the change-password command
pub async fn run(controller: &SessionController, address: Option<&str>) -> Result<()> {
    let address = resolve_address(controller, address)?;
    unlock_with_prompt(controller, address).await?;

    println!();
    let result = loop {
        let (password, confirm) = prompt_new_password()?;
        match controller.reset_password(address, &password, &confirm).await {
            Err(e) if e.is_validation() => print_error(&e.to_string()),
            result => break result,
        }
    };
    controller.logout().await;
    result?;

    println!();
    print_success("Password changed successfully!");
    Ok(())
}
