//! Account creation command

use anyhow::Result;

use launcher_keystore::SessionController;

use super::{print_error, print_success, print_warning, prompt_new_password};

/// Run the create command
pub async fn run(controller: &SessionController) -> Result<()> {
    let address = loop {
        let (password, confirm) = prompt_new_password()?;
        match controller.create_account(&password, &confirm).await {
            Err(e) if e.is_validation() => print_error(&e.to_string()),
            result => break result?,
        }
    };

    println!();
    print_success("Account created successfully!");
    println!();
    println!("Your address:");
    println!("  {}", address);
    println!();
    print_warning("There is no way to recover a forgotten password without the private key.");
    print_warning("Run 'launcher-keystore login --show-key' and store the key safely.");

    controller.logout().await;
    Ok(())
}
