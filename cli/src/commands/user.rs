use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Style, object::Columns, Alignment, Modify},
};

use pantry_core::db::Database;
use pantry_core::models::{NewUser, PageRequest, MAX_PAGE_SIZE};

use super::helpers::{resolve_user, truncate};

pub(crate) struct UserArgs {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub admin: bool,
}

pub(crate) fn cmd_user_create(db: &Database, args: UserArgs, json: bool) -> Result<()> {
    let (user, token) = db.create_user(&NewUser {
        username: args.username,
        email: args.email,
        first_name: args.first_name,
        last_name: args.last_name,
        is_admin: args.admin,
    })?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "user": user, "token": token })
        );
    } else {
        let role = if user.is_admin { " (admin)" } else { "" };
        println!("Created user {} (id: {}){role}", user.username, user.id);
        println!("Token (shown once): {token}");
        println!("Send it as: Authorization: Bearer {token}");
    }
    Ok(())
}

pub(crate) fn cmd_user_token(db: &Database, user_ref: &str, json: bool) -> Result<()> {
    let user = resolve_user(db, user_ref)?;
    let token = db.reissue_token(user.id)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "user_id": user.id, "token": token })
        );
    } else {
        println!("New token for {}: {token}", user.username);
        println!("The previous token no longer works.");
    }
    Ok(())
}

pub(crate) fn cmd_user_list(db: &Database, page: u32, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct UserRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Username")]
        username: String,
        #[tabled(rename = "Email")]
        email: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Admin")]
        admin: String,
    }

    let request = PageRequest::new(Some(page), Some(MAX_PAGE_SIZE), MAX_PAGE_SIZE)?;
    let users = db.list_users(request)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }
    if users.results.is_empty() {
        eprintln!("No users found");
        return Ok(());
    }

    let rows: Vec<UserRow> = users
        .results
        .iter()
        .map(|u| UserRow {
            id: u.id,
            username: u.username.clone(),
            email: truncate(&u.email, 30),
            name: truncate(&format!("{} {}", u.first_name, u.last_name), 30),
            admin: if u.is_admin { "yes".into() } else { String::new() },
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::first()).with(Alignment::right()))
        .to_string();
    println!("{table}");
    if let Some(next) = users.next {
        println!("{} users total. Next page: --page {next}", users.count);
    }
    Ok(())
}
