//! Entry point for `lapb-arq`.
//!
//! Runs the link engine over UDP in one of two modes: **listen** echoes every
//! message back to whoever connects, **connect** links stdin and stdout to a
//! remote station. All protocol work is delegated to the library; `main.rs`
//! owns only process setup (logging, argument parsing, the UDP socket).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use lapb_arq::socket::UdpMedium;
use lapb_arq::{
    Address, Dispatcher, LinkConfig, LinkError, LinkEvent, LinkHandle, LinkSender, Modulus,
    RetransmitPolicy,
};

/// How long to wait before retrying a send the link reported busy.
const BUSY_BACKOFF: Duration = Duration::from_millis(100);

/// Reliable message links over UDP, LAPB style.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Local UDP address to bind.
    #[arg(short, long, default_value = "0.0.0.0:9000")]
    bind: SocketAddr,

    /// Link address of this station (up to 7 printable ASCII characters).
    #[arg(short, long)]
    address: Address,

    #[command(flatten)]
    link: LinkArgs,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Args)]
struct LinkArgs {
    /// Maximum number of unacknowledged frames.
    #[arg(short, long, default_value_t = 3)]
    window: u8,

    /// Use modulo 128 sequence numbers.
    #[arg(short, long)]
    extended: bool,

    /// Base retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 3000)]
    t1_ms: u64,

    /// Delayed-acknowledgment period in milliseconds (0 = immediate).
    #[arg(long, default_value_t = 1000)]
    t2_ms: u64,

    /// T1 expirations without progress before the link fails.
    #[arg(long, default_value_t = 10)]
    n2: u32,

    /// Keepalive period in seconds (0 disables).
    #[arg(long, default_value_t = 30)]
    idle_secs: u64,

    /// Largest payload per data frame.
    #[arg(long, default_value_t = 256)]
    max_payload: usize,

    /// Resend unacknowledged frames in place on T1 instead of going back.
    #[arg(long)]
    resend: bool,
}

impl LinkArgs {
    fn config(&self) -> LinkConfig {
        LinkConfig {
            modulus: if self.extended {
                Modulus::Extended
            } else {
                Modulus::Normal
            },
            window: self.window,
            t1: Duration::from_millis(self.t1_ms),
            t2: Duration::from_millis(self.t2_ms),
            n2: self.n2,
            idle: (self.idle_secs > 0).then(|| Duration::from_secs(self.idle_secs)),
            max_payload: self.max_payload,
            retransmit: if self.resend {
                RetransmitPolicy::Resend
            } else {
                RetransmitPolicy::GoBack
            },
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Mode {
    /// Accept connections and echo every message back.
    Listen,
    /// Connect to a remote station; stdin lines are sent, received data is
    /// written to stdout.
    Connect {
        /// UDP address of the remote station.
        #[arg(short, long)]
        peer: SocketAddr,
        /// Link address of the remote station.
        #[arg(short, long)]
        remote: Address,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.link.config();
    config.validate().context("invalid link parameters")?;

    let medium = Arc::new(
        UdpMedium::bind(cli.bind)
            .await
            .with_context(|| format!("binding {}", cli.bind))?,
    );
    log::info!("{} on {}", cli.address, medium.local_addr()?);
    let dispatcher = Dispatcher::new(medium.clone(), config);

    let io = {
        let medium = medium.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { medium.run(dispatcher).await })
    };

    let result = match cli.mode {
        Mode::Listen => listen(&dispatcher, cli.address).await,
        Mode::Connect { peer, remote } => {
            medium.add_route(remote, peer);
            connect(&dispatcher, cli.address, remote).await
        }
    };
    io.abort();
    result
}

async fn listen(dispatcher: &Dispatcher, local: Address) -> anyhow::Result<()> {
    let mut listener = dispatcher.listen(local)?;
    while let Some(handle) = listener.accept().await {
        tokio::spawn(echo(handle));
    }
    Ok(())
}

async fn echo(mut handle: LinkHandle) {
    let remote = handle.remote();
    log::info!("accepted {remote}");
    loop {
        match handle.recv().await {
            Ok(data) => {
                if let Err(err) = send_when_ready(&handle.sender(), data).await {
                    log::warn!("echo to {remote} failed: {err}");
                }
            }
            Err(err) => {
                log::info!("{remote}: {err}");
                break;
            }
        }
    }
}

async fn connect(dispatcher: &Dispatcher, local: Address, remote: Address) -> anyhow::Result<()> {
    let mut handle = dispatcher.establish_with(local, remote, dispatcher.config().clone())?;
    handle
        .wait_connected()
        .await
        .with_context(|| format!("connecting to {remote}"))?;
    log::info!("connected to {remote}");

    let sender = handle.sender();
    let input = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            send_when_ready(&sender, Bytes::from(line + "\n")).await?;
        }
        sender.disconnect().await?;
        Ok::<(), anyhow::Error>(())
    });

    let mut stdout = tokio::io::stdout();
    while let Some(event) = handle.next_event().await {
        match event {
            LinkEvent::Data(data) => {
                stdout.write_all(&data).await?;
                stdout.flush().await?;
            }
            LinkEvent::Disconnected { reason, discarded } => {
                log::info!("disconnected from {remote}: {reason} ({discarded} unsent)");
                break;
            }
            other => log::debug!("{remote}: {other:?}"),
        }
    }
    input.abort();
    Ok(())
}

/// Send, waiting out the busy condition.
async fn send_when_ready(sender: &LinkSender, data: Bytes) -> Result<(), LinkError> {
    loop {
        match sender.send(data.clone()).await {
            Err(LinkError::Busy) => tokio::time::sleep(BUSY_BACKOFF).await,
            other => return other,
        }
    }
}
