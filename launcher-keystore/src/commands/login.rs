//! Login command

use anyhow::Result;

use launcher_keystore::SessionController;

use super::{print_success, print_warning, resolve_address, unlock_with_prompt};

/// Run the login command
pub async fn run(controller: &SessionController, address: Option<&str>, show_key: bool) -> Result<()> {
    let address = resolve_address(controller, address)?;
    unlock_with_prompt(controller, address).await?;

    println!();
    print_success("Account unlocked");

    if show_key {
        println!();
        print_warning("Anyone with this key controls the account. Never share it.");
        controller
            .with_private_key(|key| println!("  0x{}", hex::encode(key)))
            .await;
    }

    controller.logout().await;
    Ok(())
}
