use aps::{ids::strip_b_prefix, init_logging, Aps, Options};
use clap::Parser;
use std::io::{self, BufRead, Write};

/// Look up the Autodesk user ID of the account admin.
///
/// Prints an `ACC_ADMIN_ID=<id>` line which can be copied into the deployment configuration.
#[derive(Clone, Debug, Parser)]
struct Args {
    #[clap(flatten)]
    aps: Options,
}

#[async_std::main]
async fn main() -> Result<(), anyhow::Error> {
    init_logging();
    let args = Args::parse();
    println!("--- Admin ID Finder ---");

    if args.aps.client_id.is_none() || args.aps.client_secret.is_none() {
        println!("Error: APS_CLIENT_ID or APS_CLIENT_SECRET is missing.");
        println!("Export them before running this tool, e.g.:");
        println!("  export APS_CLIENT_ID='...'");
        println!("  export APS_CLIENT_SECRET='...'");
        return Ok(());
    }

    let email = match &args.aps.admin_email {
        Some(email) => {
            println!("Using configured email: {email}");
            email.clone()
        }
        None => {
            println!("ACC_ADMIN_EMAIL is not set.");
            let email = prompt("Please enter the Admin Email address to look up: ")?;
            if email.is_empty() {
                println!("No email provided. Exiting.");
                return Ok(());
            }
            email
        }
    };

    let aps = Aps::new(&args.aps)?;
    println!("Authenticating...");
    if let Err(err) = aps.authenticate().await {
        println!("Authentication failed: {err}");
        return Ok(());
    }
    println!("Authentication successful (token obtained).");

    println!("Finding Account ID...");
    let hub_id = match aps.hub_id().await {
        Ok(Some(hub_id)) => hub_id,
        Ok(None) => {
            println!("Could not find any Hubs/Accounts for this App.");
            return Ok(());
        }
        Err(err) => {
            println!("Could not list hubs: {err}");
            return Ok(());
        }
    };
    let account_id = strip_b_prefix(&hub_id);
    println!("Found Account ID: {account_id}");

    println!("Searching for User ID for '{email}'...");
    let rule = "=".repeat(40);
    match aps.user_id_by_email(account_id, &email).await {
        Ok(user_id) => {
            println!("\n{rule}");
            println!("SUCCESS! Found User ID.");
            println!("{rule}");
            println!("ACC_ADMIN_ID={user_id}");
            println!("{rule}");
            println!("Copy the line above into your deployment configuration.");
        }
        Err(err) => {
            println!("\n{rule}");
            println!("FAILURE. User not found.");
            println!("{rule}");
            println!("Could not find user '{email}' in Account '{account_id}': {err}");
            println!(
                "Verify the email address is correct and the user is an active member of the \
                 account."
            );
        }
    }
    Ok(())
}

fn prompt(message: &str) -> io::Result<String> {
    print!("{message}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
