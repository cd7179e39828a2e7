use anyhow::Result;
use cipherline::{ClientEvent, EncryptionState, Message, Messenger, NoticeLevel};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;

const HELP: &str = "\
commands:
  register <username> <email> <password>
  login <username> <password>
  logout
  users                      list other users
  select <peer>              open a conversation
  close                      leave the active conversation
  init [peer]                start a key exchange (defaults to the active peer)
  complete <peer> <value>    finish a key exchange with the peer's public value
  reset [peer]               discard the shared key
  pending [peer]             show this side's public value
  send <text>                send to the active peer
  refresh                    fetch the active conversation now
  status
  help
  quit";

/// Read commands from stdin until `quit` or end of input.
pub async fn run(messenger: Messenger) -> Result<()> {
    let printer = spawn_printer(&messenger);
    println!("type 'help' for commands");

    let mut lines = BufReader::new(io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        if matches!(command, "quit" | "exit") {
            break;
        }
        if let Err(e) = dispatch(&messenger, command, rest.trim()).await {
            debug!(%command, error = %e, "command failed");
            println!("error: {}", e);
        }
    }

    printer.abort();
    Ok(())
}

async fn dispatch(messenger: &Messenger, command: &str, rest: &str) -> Result<()> {
    let args: Vec<&str> = rest.split_whitespace().collect();
    match (command, args.as_slice()) {
        ("help", _) => println!("{}", HELP),
        ("register", [username, email, password]) => {
            messenger.register(username, email, password).await?
        }
        ("login", [username, password]) => messenger.login(username, password).await?,
        ("logout", []) => messenger.logout(),
        ("users", []) => {
            for user in messenger.list_users().await? {
                let state = messenger.encryption_state_of(&user.username);
                println!("  {} [{}]", user.username, state_label(state));
            }
        }
        ("select", [peer]) => messenger.select(peer)?,
        ("close", []) => messenger.deselect(),
        ("init", args) => {
            let peer = peer_arg(messenger, args)?;
            let value = messenger.initiate(&peer).await?;
            println!("give {} this value: {}", peer, value);
        }
        ("complete", [peer, value]) => messenger.complete(peer, value).await?,
        ("reset", args) => messenger.reset(&peer_arg(messenger, args)?)?,
        ("pending", args) => {
            let peer = peer_arg(messenger, args)?;
            match messenger.pending_exchange(&peer) {
                Some(pending) => println!(
                    "{} (since {})",
                    pending.public_value,
                    pending.started_at.format("%H:%M:%S")
                ),
                None => println!("no pending exchange with {}", peer),
            }
        }
        ("send", _) if !rest.is_empty() => messenger.send_message(rest).await?,
        ("refresh", []) => messenger.refresh_messages().await?,
        ("status", []) => print_status(messenger),
        _ => println!("unknown command or wrong arguments; type 'help'"),
    }
    Ok(())
}

fn peer_arg(messenger: &Messenger, args: &[&str]) -> Result<String> {
    match args {
        [peer] => Ok(peer.to_string()),
        [] => messenger
            .active_peer()
            .ok_or_else(|| anyhow::anyhow!("no active conversation; name a peer")),
        _ => anyhow::bail!("expected at most one peer"),
    }
}

fn print_status(messenger: &Messenger) {
    match messenger.identity() {
        Some(identity) => println!("logged in as {}", identity.username),
        None => {
            println!("not logged in");
            return;
        }
    }
    for (peer, state) in messenger.encryption_states() {
        println!("  {} [{}]", peer, state_label(state));
    }
    if let Some(view) = messenger.conversation() {
        println!(
            "active: {} [{}], {} messages",
            view.peer,
            state_label(view.encryption_state),
            view.messages.len()
        );
    }
}

fn state_label(state: EncryptionState) -> &'static str {
    match state {
        EncryptionState::None => "not encrypted",
        EncryptionState::InProgress => "exchange in progress",
        EncryptionState::Established => "encrypted",
    }
}

/// Print events as they arrive. Polling replaces the whole list every tick,
/// so only messages past the previously shown prefix are printed.
fn spawn_printer(messenger: &Messenger) -> JoinHandle<()> {
    let mut events = messenger.subscribe();
    tokio::spawn(async move {
        let mut shown: Vec<Message> = Vec::new();
        loop {
            match events.recv().await {
                Ok(ClientEvent::Notice(notice)) => {
                    let prefix = match notice.level {
                        NoticeLevel::Info => "info",
                        NoticeLevel::Success => "ok",
                        NoticeLevel::Error => "error",
                    };
                    println!("[{}] {}", prefix, notice.message);
                }
                Ok(ClientEvent::EncryptionChanged { peer, state }) => {
                    println!("[{}] {}", peer, state_label(state));
                }
                Ok(ClientEvent::ActivePeerChanged { peer }) => {
                    shown.clear();
                    match peer {
                        Some(peer) => println!("-- conversation with {} --", peer),
                        None => println!("-- no active conversation --"),
                    }
                }
                Ok(ClientEvent::MessagesUpdated { messages, .. }) => {
                    let fresh = if messages.starts_with(&shown) {
                        &messages[shown.len()..]
                    } else {
                        &messages[..]
                    };
                    for message in fresh {
                        println!(
                            "{} {}: {}",
                            message.timestamp.format("%H:%M"),
                            message.sender,
                            message.body
                        );
                    }
                    shown = messages;
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}
