//! Multi-process end-to-end test for the shared-memory chat channel.
//!
//! The test binary re-executes itself: the orchestrator attaches as the
//! consumer, then spawns several producer processes that each attach on their
//! own and publish a numbered run of records. With more records in flight than
//! the ring holds, producers must block on a full ring and be released by the
//! consumer across process boundaries.
//!
//! ```text
//! [producer 0] --publish--\
//! [producer 1] --publish---+--> [ shared ring, 16 slots ] --recv--> [orchestrator]
//! [producer 2] --publish--/
//! ```
//!
//! ```bash
//! cargo test -p parley-icc --test e2e_shm -- --nocapture
//! ```

use parley_events::MessageRecord;
use parley_icc::{ChannelConfig, ShmChannel};
use std::env;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

macro_rules! log {
    ($($arg:tt)*) => {{
        let _ = writeln!(std::io::stderr(), $($arg)*);
        let _ = std::io::stderr().flush();
    }};
}

const ENV_ROLE: &str = "PARLEY_E2E_ROLE";
const ENV_PREFIX: &str = "PARLEY_E2E_PREFIX";
const ENV_PRODUCER: &str = "PARLEY_E2E_PRODUCER";

const ROLE_PRODUCER: &str = "producer";

const PRODUCERS: usize = 3;
const PER_PRODUCER: usize = 200;
const RING_CAPACITY: usize = 16;

fn config(prefix: &str) -> ChannelConfig {
    ChannelConfig::with_prefix(prefix).capacity(RING_CAPACITY)
}

fn run_producer(prefix: &str, id: usize) {
    let ch = ShmChannel::open(&config(prefix)).expect("producer: failed to open channel");
    ch.join().expect("producer: join");
    for seq in 0..PER_PRODUCER {
        let record = MessageRecord::stamped(&format!("producer-{id}"), &seq.to_string());
        ch.publish_timeout(&record, Duration::from_secs(10))
            .expect("producer: publish");
    }
    ch.leave().expect("producer: leave");
    log!("[PRODUCER {id}] published {PER_PRODUCER} records");
}

#[test]
fn e2e_multi_process_producers_single_consumer() {
    if let Ok(role) = env::var(ENV_ROLE) {
        let prefix = env::var(ENV_PREFIX).expect("prefix not set");
        match role.as_str() {
            ROLE_PRODUCER => {
                let id = env::var(ENV_PRODUCER)
                    .expect("producer id not set")
                    .parse()
                    .expect("producer id");
                run_producer(&prefix, id);
            }
            other => panic!("Unknown role: {other}"),
        }
        return;
    }

    let prefix = format!("/parley_e2e_{}", std::process::id());
    let cfg = config(&prefix);
    let _ = ShmChannel::unlink(&cfg);

    // Attach first so the consumer owns initialisation; producers validate.
    let consumer = ShmChannel::open(&cfg).expect("consumer: failed to open channel");
    let exe = env::current_exe().expect("Failed to get current executable path");

    let mut children: Vec<_> = (0..PRODUCERS)
        .map(|id| {
            Command::new(&exe)
                .arg("--exact")
                .arg("e2e_multi_process_producers_single_consumer")
                .env(ENV_ROLE, ROLE_PRODUCER)
                .env(ENV_PREFIX, &prefix)
                .env(ENV_PRODUCER, id.to_string())
                .stderr(Stdio::inherit())
                .spawn()
                .expect("Failed to spawn producer process")
        })
        .collect();

    let mut next_seq = [0usize; PRODUCERS];
    for _ in 0..PRODUCERS * PER_PRODUCER {
        let r = consumer
            .recv_timeout(Duration::from_secs(20))
            .expect("consumer: producers stalled");
        let id: usize = r
            .username()
            .strip_prefix("producer-")
            .and_then(|s| s.parse().ok())
            .expect("unexpected sender");
        let seq: usize = r.text().parse().expect("sequence number");
        assert_eq!(seq, next_seq[id], "producer {id} delivered out of order");
        assert_eq!(r.timestamp().len(), 19);
        next_seq[id] += 1;
    }

    for child in &mut children {
        let status = child.wait().expect("Failed to wait for producer");
        assert!(status.success(), "producer failed with status: {status}");
    }

    assert_eq!(next_seq, [PER_PRODUCER; PRODUCERS]);
    assert!(consumer.poll().unwrap().is_none());
    let stats = consumer.stats().unwrap();
    assert_eq!(stats.write_index, stats.read_index);
    assert_eq!(stats.filled, 0);
    assert_eq!(stats.free as usize, RING_CAPACITY);
    assert_eq!(stats.active_users, 0);

    ShmChannel::unlink(&cfg).unwrap();
    log!("[ORCHESTRATOR] {} records delivered in order", PRODUCERS * PER_PRODUCER);
}
