use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parley_config::{ParleyConfig, ShmSection};
use parley_events::MessageRecord;
use parley_icc::{ChannelConfig, ChannelError, RingConfig, ShmChannel};
use parley_proto::{ChatLine, Frame};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parley-shm")]
#[command(about = "send to and drain the shared-memory chat ring")]
struct Args {
    #[arg(short, long, help = "configuration file path (toml format)")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Publish one message, blocking while the ring is full.
    Send {
        user: String,
        text: String,
        #[arg(long, default_value_t = 5000, help = "give up after this many milliseconds")]
        timeout_ms: u64,
    },
    /// Print pending messages as chat lines, oldest first.
    Drain {
        #[arg(short, long, help = "keep waiting for new messages until interrupted or terminated")]
        follow: bool,
        #[arg(long, default_value_t = 250, help = "wake-up interval while following")]
        timeout_ms: u64,
    },
    /// Show cursors, semaphore counts and attached users.
    Status,
    /// Remove the shared memory object and its semaphores.
    Unlink,
}

fn channel_config(shm: &ShmSection) -> ChannelConfig {
    ChannelConfig {
        shm_dir: PathBuf::from(&shm.shm_dir),
        shm_name: shm.shm_name.clone(),
        mutex_sem: shm.mutex_sem.clone(),
        free_sem: shm.free_sem.clone(),
        filled_sem: shm.filled_sem.clone(),
        ring: RingConfig::new(shm.capacity),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = ParleyConfig::load_or_default(args.config.as_deref())
        .with_context(|| format!("failed to load config path={:?}", args.config))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cfg = channel_config(&config.shm);

    match args.command {
        Command::Send {
            user,
            text,
            timeout_ms,
        } => send(&cfg, &user, &text, Duration::from_millis(timeout_ms)),
        Command::Drain { follow, timeout_ms } => {
            drain(&cfg, follow, Duration::from_millis(timeout_ms.max(1)))
        }
        Command::Status => status(&cfg),
        Command::Unlink => {
            ShmChannel::unlink(&cfg)?;
            tracing::info!(shm = %cfg.shm_name, "unlinked channel objects");
            Ok(())
        }
    }
}

fn send(cfg: &ChannelConfig, user: &str, text: &str, timeout: Duration) -> Result<()> {
    let channel = ShmChannel::open(cfg)?;
    channel.join()?;
    let record = MessageRecord::stamped(user, text);
    let published = channel.publish_timeout(&record, timeout);
    channel.leave()?;
    published.with_context(|| format!("failed to publish as {user}"))?;
    tracing::debug!(user = record.username(), "published");
    Ok(())
}

fn drain(cfg: &ChannelConfig, follow: bool, wake: Duration) -> Result<()> {
    let channel = ShmChannel::open(cfg)?;
    channel.join()?;

    let running = Arc::new(AtomicBool::new(true));
    if follow {
        let r = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("received stop signal, stopping drain");
            r.store(false, Ordering::SeqCst);
        })?;
    }

    let drained = drain_loop(&channel, follow, wake, &running);
    channel.leave()?;
    let count = drained?;
    tracing::info!(count, "drained messages");
    Ok(())
}

fn drain_loop(
    channel: &ShmChannel,
    follow: bool,
    wake: Duration,
    running: &AtomicBool,
) -> Result<usize> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut count = 0usize;
    while running.load(Ordering::SeqCst) {
        let next = if follow {
            match channel.recv_timeout(wake) {
                Ok(record) => Some(record),
                Err(ChannelError::Timeout(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        } else {
            channel.poll()?
        };
        let Some(record) = next else { break };
        let line = Frame::Chat(ChatLine::from(&record)).encode()?;
        out.write_all(line.as_bytes())?;
        out.flush()?;
        count += 1;
    }
    Ok(count)
}

fn status(cfg: &ChannelConfig) -> Result<()> {
    let channel = ShmChannel::open(cfg)?;
    let stats = channel.stats()?;
    println!("name          {}", cfg.shm_name);
    println!("capacity      {}", stats.capacity);
    println!("write_index   {}", stats.write_index);
    println!("read_index    {}", stats.read_index);
    println!("filled        {}", stats.filled);
    println!("free          {}", stats.free);
    println!("active_users  {}", stats.active_users);
    Ok(())
}
