//! Ping/pong liveness timer for one task channel.
//!
//! The heartbeat does not own a timer task. The channel's I/O loop polls
//! [`Heartbeat::tick`] inside its `select!`, and acts on the returned
//! [`Beat`]: send a ping frame, or treat the connection as dead. All state
//! changes happen after the sleep completes, so dropping a pending `tick`
//! future (because a frame arrived first) loses nothing.

use std::time::Duration;
use tokio::time::{Instant, sleep_until};

use crate::config::HeartbeatConfig;

/// What the owning channel must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Interval elapsed: send a ping. A pong deadline is now armed.
    SendPing,
    /// The armed ping got no pong in time. Fires once; the heartbeat is
    /// stopped afterwards.
    TimedOut,
}

#[derive(Debug)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    next_ping: Option<Instant>,
    pong_deadline: Option<Instant>,
}

impl Heartbeat {
    /// Create a stopped heartbeat.
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            next_ping: None,
            pong_deadline: None,
        }
    }

    /// Start (or restart) the ping schedule from now.
    pub fn start(&mut self) {
        self.next_ping = Some(Instant::now() + self.config.interval);
        self.pong_deadline = None;
    }

    pub fn on_pong(&mut self) {
        self.pong_deadline = None;
    }

    pub fn stop(&mut self) {
        self.next_ping = None;
        self.pong_deadline = None;
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    pub fn is_running(&self) -> bool {
        self.next_ping.is_some()
    }

    pub fn awaiting_pong(&self) -> bool {
        self.pong_deadline.is_some()
    }

    /// Wait for the next heartbeat action. Never resolves while stopped.
    pub async fn tick(&mut self) -> Beat {
        let Some(next_ping) = self.next_ping else {
            return std::future::pending().await;
        };

        match self.pong_deadline {
            Some(deadline) if deadline <= next_ping => {
                sleep_until(deadline).await;
                self.stop();
                Beat::TimedOut
            }
            _ => {
                sleep_until(next_ping).await;
                self.next_ping = Some(next_ping + self.config.interval);
                // Re-arm from scratch: a late pong for an older ping must not
                // count for this one.
                self.pong_deadline = Some(Instant::now() + self.config.timeout);
                Beat::SendPing
            }
        }
    }
}
