//! Walk-through of a small ledger: one customer, one credit account, a few movements.
//!
//! Prints every read model as JSON; `RUST_LOG=debug` also shows projection updates.

use serde_json::json;

use bankbook_bank::{AccountValues, Bank, CustomerValues, MovementValues, from_json};

fn main() -> anyhow::Result<()> {
    let bank = Bank::from_env()?;
    bankbook_observability::init_with_filter(&bank.config().log_filter);

    let customer = bank.create_customer(from_json::<CustomerValues>(json!({
        "name": "Lucía Pérez",
        "login": "lucia@example.com",
        "city": "Madrid",
        "zip": "28001",
    }))?)?;

    let account = bank.create_account(
        customer.customer_id,
        from_json::<AccountValues>(json!({
            "name": "Everyday",
            "beginBalance": "100.00",
            "creditLine": "200.00",
            "typeAccount": "CREDIT",
        }))?,
    )?;

    for (kind, amount) in [("deposit", "50.00"), ("payment", "300.00"), ("payment", "60.00")] {
        let values = from_json::<MovementValues>(json!({
            "account": account.account_id,
            "kind": kind,
            "amount": amount,
        }))?;
        if let Err(err) = bank.create_movement(values) {
            println!("{}", serde_json::to_string_pretty(&err.to_json())?);
        }
    }

    println!("{}", serde_json::to_string_pretty(&bank.account(account.account_id)?)?);
    println!("{}", serde_json::to_string_pretty(&bank.movements(account.account_id)?)?);
    println!("{}", serde_json::to_string_pretty(&bank.customers()?)?);
    Ok(())
}
