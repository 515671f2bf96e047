//! Account removal command

use anyhow::{anyhow, Result};

use launcher_keystore::{Address, SessionController};

use super::{print_success, print_warning, prompt_confirm};

/// Run the remove command
pub async fn run(controller: &SessionController, address: &str, yes: bool) -> Result<()> {
    let address: Address = address.parse().map_err(|e| anyhow!("{}", e))?;

    if !controller.snapshot().addresses.contains(&address) {
        println!("No account {} in this keystore.", address);
        return Ok(());
    }

    print_warning("The encrypted key will be deleted. Without a copy of the private key the account is lost.");
    if !yes && !prompt_confirm(&format!("Remove {}?", address))? {
        println!("Aborted.");
        return Ok(());
    }

    controller.remove_account(address).await?;
    print_success("Account removed");
    Ok(())
}
