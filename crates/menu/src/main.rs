//! LAN lobby demo: one host and one client on an in-memory LAN segment.
//!
//! The host creates a session and travels to the lobby; the client searches,
//! joins the first session with the same match type, and travels to the host.

use std::cell::RefCell;
use std::process::ExitCode;
use std::rc::Rc;

use clap::Parser;
use log::{error, info};
use matchlobby_menu::{
    DEFAULT_LOBBY_PATH, DEFAULT_MATCH_TYPE, DEFAULT_MAX_SEARCH_RESULTS, MenuConfig,
    MenuController, Travel,
};
use matchlobby_session::{LanSegment, LoopbackProvider, OrchestratorConfig, SessionOrchestrator};

/// Host and join a session over an in-memory LAN
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Public connections the host offers
    #[arg(short, long, default_value = "4")]
    players: u32,

    /// Match type the host advertises and the client looks for
    #[arg(short, long, default_value = DEFAULT_MATCH_TYPE)]
    match_type: String,

    /// Lobby map the host travels to
    #[arg(short, long, default_value = DEFAULT_LOBBY_PATH)]
    lobby_path: String,

    /// Build version used for compatibility matching
    #[arg(long)]
    build_version: Option<String>,
}

/// Remembers where a peer travelled.
#[derive(Default)]
struct LoggedTravel {
    peer: String,
    destination: RefCell<Option<String>>,
}

impl Travel for LoggedTravel {
    fn server_travel(&self, url: &str) {
        info!("{}: server travel to {url}", self.peer);
        *self.destination.borrow_mut() = Some(url.to_string());
    }

    fn client_travel(&self, address: &str) {
        info!("{}: client travel to {address}", self.peer);
        *self.destination.borrow_mut() = Some(address.to_string());
    }
}

struct Peer {
    provider: Rc<LoopbackProvider>,
    orchestrator: SessionOrchestrator,
    travel: Rc<LoggedTravel>,
    menu: Rc<MenuController>,
}

fn peer(name: &str, lan: &Rc<LanSegment>, args: &Args) -> Peer {
    let provider = Rc::new(LoopbackProvider::new(
        name,
        format!("{name}.lan:7777"),
        Rc::clone(lan),
    ));
    let config = match &args.build_version {
        Some(version) => OrchestratorConfig::for_build(version),
        None => OrchestratorConfig::default(),
    };
    let orchestrator = SessionOrchestrator::new(provider.clone(), config);
    let travel = Rc::new(LoggedTravel {
        peer: name.to_string(),
        ..Default::default()
    });
    let menu = MenuController::setup(
        orchestrator.clone(),
        MenuConfig {
            num_public_connections: args.players,
            match_type: args.match_type.clone(),
            lobby_path: args.lobby_path.clone(),
            max_search_results: DEFAULT_MAX_SEARCH_RESULTS,
        },
        travel.clone(),
    );
    Peer {
        provider,
        orchestrator,
        travel,
        menu,
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let lan = LanSegment::new();
    let host = peer("host", &lan, &args);
    let client = peer("client", &lan, &args);

    host.menu.host_clicked();
    host.provider.pump();
    if host.travel.destination.borrow().is_none() {
        error!("host failed to create a session");
        return ExitCode::FAILURE;
    }

    host.orchestrator.start_session();
    host.provider.pump();

    client.menu.join_clicked();
    client.provider.pump();

    match client.travel.destination.borrow().as_deref() {
        Some(address) => {
            info!("client joined host at {address}");
            ExitCode::SUCCESS
        }
        None => {
            error!("client found no joinable '{}' session", args.match_type);
            ExitCode::FAILURE
        }
    }
}
