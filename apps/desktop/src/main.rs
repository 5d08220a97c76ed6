use anyhow::Result;
use clap::Parser;
use client_core::{ChatClient, ClientConfig, ClientEvent};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser, Debug)]
struct Args {
    /// Gateway base URL, e.g. http://localhost:8080
    #[arg(long)]
    base_url: String,
    #[arg(long)]
    username: String,
    #[arg(long)]
    password: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let client = ChatClient::new(ClientConfig::new(&args.base_url)?);
    let identity = client.login(&args.username, &args.password).await?;
    println!("Logged in as {} (user_id={})", identity.username, identity.id);

    let store = client.store().await;
    println!(
        "{} contacts, {} groups, {} pending invites",
        store.contacts.len(),
        store.groups.len(),
        store.pending_invites.len()
    );

    let mut events = client.subscribe_events();
    loop {
        match events.recv().await {
            Ok(ClientEvent::StoreUpdated) => {
                let store = client.store().await;
                let unread: u32 = store.unread.direct.values().sum::<u32>()
                    + store.unread.groups.values().sum::<u32>();
                tracing::debug!(unread, online = store.online.len(), "store updated");
            }
            Ok(ClientEvent::Notification) => println!("new message"),
            Ok(ClientEvent::Channel { kind, state }) => {
                tracing::info!(channel = kind.as_str(), ?state, "channel state changed");
            }
            Ok(ClientEvent::Error(message)) => eprintln!("error: {message}"),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event stream lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }

    Ok(())
}
