//! Account listing command

use anyhow::Result;
use std::path::Path;

use launcher_keystore::SessionController;

/// Run the list command
pub async fn run(controller: &SessionController, keystore_dir: &Path) -> Result<()> {
    let snapshot = controller.snapshot();

    if snapshot.addresses.is_empty() {
        println!("No accounts found in {}", keystore_dir.display());
        println!("Run 'launcher-keystore create' to create one.");
        return Ok(());
    }

    println!("Accounts in {}:", keystore_dir.display());
    println!();
    for address in &snapshot.addresses {
        let marker = if snapshot.selected_address == Some(*address) {
            "*"
        } else {
            " "
        };
        println!("{} {}", marker, address);
    }

    Ok(())
}
