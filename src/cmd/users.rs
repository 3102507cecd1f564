//! Login management — `packflow users`.

use anyhow::Result;
use packflow::config::PackflowToml;
use packflow::dashboard::Workflow;
use packflow::dashboard::workflow::{Actor, NewUser};

use super::super::UsersCommands;

pub async fn cmd_users(settings: PackflowToml, command: UsersCommands) -> Result<()> {
    let store = super::open_store(&settings, false)?;
    let workflow = Workflow::new(store, settings);
    let actor = Actor::system("cli");

    match command {
        UsersCommands::Add {
            username,
            role,
            password,
            name,
        } => {
            let user = workflow
                .save_user(
                    &actor,
                    NewUser {
                        username,
                        role,
                        name,
                        password,
                    },
                )
                .await?;
            println!("Saved user '{}' ({})", user.username, user.role);
        }
        UsersCommands::List => {
            let users = workflow.list_users(&actor).await?;
            if users.is_empty() {
                println!("No users stored. Only the configured default admin can log in.");
                return Ok(());
            }
            for user in users {
                println!("{:<16} {:<12} {}", user.username, user.role, user.name);
            }
        }
    }
    Ok(())
}
