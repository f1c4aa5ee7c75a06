use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use std::time::Duration;
use webconf_rtc::calls::{CallSession, SessionState};
use webconf_rtc::config::SessionConfig;
use webconf_rtc::sim::SimNetwork;
use wccore::Call;
use wccore::call::GROUP_CALL_PREFIX;

// Loopback call between simulated participants over an in-memory bus.
//
// Usage:
//   cargo run                                   # one-on-one call u1 -> u2
//   cargo run -- --participants 4 --group       # group call of four
//   cargo run -- -g -p 3 --call-id g/team-sync  # custom group call id

#[derive(Parser, Debug)]
#[command(name = "webconf-rtc", about = "Run a loopback call between simulated participants")]
struct Args {
    /// Number of participants; the first one is the caller.
    #[arg(short, long, default_value_t = 2)]
    participants: usize,

    /// Run a group call.
    #[arg(short, long)]
    group: bool,

    #[arg(short, long)]
    call_id: Option<String>,

    /// How long to wait for every peer to negotiate.
    #[arg(short, long, default_value_t = 10)]
    timeout_secs: u64,
}

fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    rt.block_on(run(args));
}

async fn run(args: Args) {
    let mut group = args.group;
    if !group && args.participants != 2 {
        warn!("One-on-one calls take two participants, running a group call instead");
        group = true;
    }
    if args.participants < 2 {
        error!("A call needs at least two participants");
        return;
    }
    let call_id = args.call_id.unwrap_or_else(|| {
        if group {
            format!("{GROUP_CALL_PREFIX}loopback")
        } else {
            "abc123".to_string()
        }
    });

    let network = SimNetwork::new();
    let users: Vec<String> = (1..=args.participants).map(|n| format!("u{n}")).collect();
    let mut sessions = Vec::with_capacity(users.len());

    for user in &users {
        let participant = network.participant(user);
        let call = Call::new(call_id.as_str(), user.as_str()).with_caller("u1");
        let session = CallSession::new(call, SessionConfig::default(), participant.collaborators());
        if let Err(e) = session.join().await {
            error!("{user} failed to join {call_id}: {e}");
            return;
        }
        sessions.push((participant, session));
    }

    let timeout = Duration::from_secs(args.timeout_secs);
    let expected = users.len() - 1;
    let negotiated = tokio::time::timeout(timeout, async {
        loop {
            let mut done = true;
            for (_, session) in &sessions {
                let phases = session.peer_phases().await;
                done &= phases.len() == expected && phases.iter().all(|(_, p)| p.is_negotiated());
            }
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    match negotiated {
        Ok(()) => info!("All {} participants negotiated on {call_id}", users.len()),
        Err(_) => warn!("Not every peer negotiated within {timeout:?}"),
    }

    for (participant, session) in &sessions {
        println!("{} ({:?}):", participant.user_id, session.state());
        for (peer, phase) in session.peer_phases().await {
            println!("  {peer}: {}", phase.name());
        }
    }

    if group {
        for (_, session) in &sessions {
            session.hang_up().await;
        }
    } else if let Some((_, caller)) = sessions.first() {
        caller.hang_up().await;
    }
    for (participant, session) in &sessions {
        let state = match tokio::time::timeout(timeout, session.stopped()).await {
            Ok(state) => state,
            Err(_) => session.state(),
        };
        let released = session.peer_ids().await.is_empty();
        println!(
            "{} finished {:?} (peers released: {released}, window closed: {})",
            participant.user_id,
            state,
            participant.view.closed_window()
        );
        if state != SessionState::Stopped {
            warn!("{} ended in {state:?}", participant.user_id);
        }
    }
    println!("Registry: {:?}", network.registry.calls());
}
