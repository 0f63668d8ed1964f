use clap::{Args, Parser, Subcommand};
use snapshare_cli::application::HELP;
use snapshare_cli::{describe, CliError, Inbox, InputCommand, LogConfig, Result};
use snapshare_core::{PeerIdentity, TextFraming};
use snapshare_p2p::infrastructure::tcp::DEFAULT_PORT;
use snapshare_p2p::{
    DiscoveryFacade, EventSubscription, ServiceType, SessionConfig, SessionEvent, SessionManager,
    TcpDiscovery, DEFAULT_SERVICE_TYPE,
};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "snapshare")]
#[command(version, about = "SnapShare - share photos and messages with nearby peers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// More log output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Args)]
struct SessionArgs {
    /// Name shown to other peers
    #[arg(short = 'n', long, env = "SNAPSHARE_NAME")]
    name: String,

    /// Service type to advertise or browse for
    #[arg(long, default_value = DEFAULT_SERVICE_TYPE)]
    service: String,

    /// Directory received images are saved to
    #[arg(long, default_value = "inbox")]
    inbox: PathBuf,

    /// Send unescaped text frames, for peers running older builds
    #[arg(long)]
    legacy_framing: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Host a session and accept everyone who joins
    Host {
        #[command(flatten)]
        session: SessionArgs,

        /// Port to listen on
        #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0")]
        bind: IpAddr,
    },

    /// Look for hosts and join one of them
    Join {
        #[command(flatten)]
        session: SessionArgs,

        /// Host address to try (repeatable), e.g. 192.168.1.20:47365
        #[arg(long = "host", required = true)]
        hosts: Vec<SocketAddr>,

        /// Join the n-th host that answered instead of the first
        #[arg(long)]
        pick: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    LogConfig::from_verbosity(cli.verbose).init()?;

    match cli.command {
        Commands::Host {
            session,
            port,
            bind,
        } => host(session, SocketAddr::new(bind, port)).await,
        Commands::Join {
            session,
            hosts,
            pick,
        } => join(session, hosts, pick).await,
    }
}

fn start_session(args: &SessionArgs) -> Result<(SessionManager, EventSubscription, ServiceType)> {
    let service = ServiceType::parse(&args.service)?;
    let identity = PeerIdentity::new(args.name.trim())?;
    let framing = if args.legacy_framing {
        TextFraming::Legacy
    } else {
        TextFraming::Escaped
    };

    let session = SessionManager::new(SessionConfig::default().with_text_framing(framing));
    let events = session.subscribe();
    session.start(identity)?;
    Ok((session, events, service))
}

async fn host(args: SessionArgs, listen: SocketAddr) -> Result<()> {
    let (session, events, service) = start_session(&args)?;
    let mut discovery = DiscoveryFacade::new(session.clone(), TcpDiscovery::new(listen));
    discovery.start_hosting(service).await?;

    println!(
        "Hosting as {} on {}",
        args.name.trim(),
        discovery.hosting_address().unwrap_or("an unknown address")
    );
    println!(
        "Others can join with: snapshare join --name <name> --host <this-machine>:{}",
        listen.port()
    );

    let result = run_interactive(&session, events, Inbox::new(args.inbox)).await;
    discovery.stop();
    session.leave().await;
    result
}

async fn join(args: SessionArgs, hosts: Vec<SocketAddr>, pick: Option<usize>) -> Result<()> {
    let (session, events, service) = start_session(&args)?;
    let listen = SocketAddr::from(([0, 0, 0, 0], 0));
    let mut discovery = DiscoveryFacade::new(
        session.clone(),
        TcpDiscovery::new(listen).with_hosts(hosts.iter().copied()),
    );

    let mut browser = discovery.start_browsing(service).await?;
    println!("Looking for hosts...");
    // ends once every address has been tried
    while let Ok(candidate) = browser.next_candidate().await {
        println!(
            "  {}. {} at {}",
            browser.candidates().len(),
            candidate.identity.display_name(),
            candidate.address
        );
    }

    let found = browser.candidates().len();
    if found == 0 {
        session.leave().await;
        let tried: Vec<String> = hosts.iter().map(ToString::to_string).collect();
        return Err(CliError::NoHostFound(tried.join(", ")));
    }

    let pick = pick.unwrap_or(1);
    let candidate = pick
        .checked_sub(1)
        .and_then(|index| browser.candidates().get(index))
        .cloned()
        .ok_or(CliError::NoSuchHost { pick, found })?;

    let host = browser.select(&candidate).await?;
    browser.cancel();
    discovery.stop();
    println!("Joined {}'s session", host.display_name());

    let result = run_interactive(&session, events, Inbox::new(args.inbox)).await;
    session.leave().await;
    result
}

async fn run_interactive(
    session: &SessionManager,
    mut events: EventSubscription,
    mut inbox: Inbox,
) -> Result<()> {
    println!("Type /help for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match InputCommand::parse(&line) {
                    Ok(command) => {
                        if !handle_command(session, command).await {
                            break;
                        }
                    }
                    Err(e) => eprintln!("{}", e),
                }
            }
            event = events.next() => {
                let Some(event) = event else {
                    break;
                };
                show_event(event, &mut inbox).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    Ok(())
}

/// Returns `false` when the user asked to leave
async fn handle_command(session: &SessionManager, command: InputCommand) -> bool {
    match command {
        InputCommand::Nothing => {}
        InputCommand::Help => println!("{}", HELP),
        InputCommand::Leave => return false,
        InputCommand::Peers => {
            let peers = session.connected_peers();
            if peers.is_empty() {
                println!("No peers connected");
            }
            for peer in peers {
                println!("  {}", peer);
            }
        }
        InputCommand::Text(body) => match session.send_text(&body) {
            Ok(0) => println!("No peers connected"),
            Ok(_) => {}
            Err(e) => eprintln!("{}", e),
        },
        InputCommand::SendImage(path) => {
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(source) => {
                    eprintln!("{}", CliError::ReadFile { path, source });
                    return true;
                }
            };
            match session.send_payload(bytes) {
                Ok(0) => println!("No peers connected"),
                Ok(count) => println!("Sent {} to {} peer(s)", path.display(), count),
                Err(e) => eprintln!("{}", e),
            }
        }
    }
    true
}

async fn show_event(event: SessionEvent, inbox: &mut Inbox) {
    if let SessionEvent::PayloadReceived {
        from,
        bytes,
        format,
    } = &event
    {
        match inbox.save(from, bytes, *format).await {
            Ok(path) => println!(
                "📷 {} sent a photo, saved to {}",
                from.display_name(),
                path.display()
            ),
            Err(e) => {
                warn!("{}", e);
                eprintln!("{}", e);
            }
        }
    } else if let Some(line) = describe(&event) {
        println!("{}", line);
    }
}
