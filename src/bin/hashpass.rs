use skinclinic_server::auth::hash_password;
use skinclinic_server::models::Role;

/// Usage:
///   hashpass <password>
///   hashpass <password> <email> <name> [ROLE]
///
/// With an email the output is an `app_user` INSERT ready for psql.
fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let password = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("Usage: hashpass <password> [<email> <name> [ROLE]]"))?;
    let phc = hash_password(&password).map_err(|e| anyhow::anyhow!(e))?;

    let Some(email) = args.next() else {
        println!("{phc}");
        return Ok(());
    };
    let name = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("a name is required together with the email"))?;
    let role = match args.next() {
        Some(r) => r.parse::<Role>().map_err(|e| anyhow::anyhow!("{e}"))?,
        None => Role::Admin,
    };

    let quote = |s: &str| s.replace('\'', "''");
    println!(
        "INSERT INTO app_user (email, name, role, password_hash) VALUES ('{}', '{}', '{}', '{}');",
        quote(&email.to_lowercase()),
        quote(&name),
        role.as_str(),
        quote(&phc)
    );
    Ok(())
}
