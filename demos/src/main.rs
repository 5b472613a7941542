//! Minimal end-to-end usage of [`dbwire::Client`]: ping, a streaming
//! query, and a batch insert.
use dbwire::{common::ByteStr, Client};

#[derive(Debug, dbwire::FromRow)]
struct User {
    id: i32,
    name: String,
}

#[tokio::main]
async fn main() -> dbwire::Result<()> {
    let client = Client::connect("tcp://default:@localhost:2849/default")?;

    client.ping().await?;

    let mut batch = client.prepare_batch("INSERT INTO users (id,name) VALUES")?;
    batch.append([ByteStr::from(1i32), ByteStr::from("Alice")])?;
    batch.append([ByteStr::from(2i32), ByteStr::from("Bob")])?;
    batch.close().await?;

    let mut rows = client.query("SELECT id,name FROM users").await?;
    while rows.next() {
        let user: User = rows.decode()?;
        println!("{user:?}");
    }
    if let Some(err) = rows.err() {
        eprintln!("query reported a server exception: {err}");
    }

    Ok(())
}
