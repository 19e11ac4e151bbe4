// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Keepalive scheduling.
//!
//! Pure bookkeeping over caller-supplied instants; the engine owns the
//! actual timer and feeds one [`Keepalive::poll`] per tick.

use std::time::{Duration, Instant};

/// What the engine must do on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeepaliveEvent {
    /// The session deadline is within one tick; send a ping request.
    PingDue,

    /// The server failed to answer a ping request in time; tear the
    /// session down as if the peer closed.
    PingTimeout,
}

#[derive(Debug)]
pub(crate) struct Keepalive {
    /// None disables keepalive entirely.
    interval: Option<Duration>,
    timer_tick: Duration,
    ping_timeout: Duration,

    /// Instant by which the client must have transmitted something.
    deadline: Instant,

    ping_outstanding: bool,
    ping_sent_at: Instant,
}

impl Keepalive {
    pub fn new(keep_alive_secs: u16, timer_tick: Duration, ping_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            interval: (keep_alive_secs > 0)
                .then(|| Duration::from_secs(u64::from(keep_alive_secs))),
            timer_tick,
            ping_timeout,
            deadline: now,
            ping_outstanding: false,
            ping_sent_at: now,
        }
    }

    /// Arm the timer at session establishment.
    pub fn start(&mut self, now: Instant) {
        self.ping_outstanding = false;
        if let Some(interval) = self.interval {
            self.deadline = now + interval;
        }
    }

    /// A control packet was written; the next ping is deferred.
    pub fn refresh(&mut self, now: Instant) {
        if let Some(interval) = self.interval {
            self.deadline = now + interval;
        }
    }

    /// A ping request was written. A ping already outstanding keeps its
    /// original send time, so a re-sent ping cannot defer its timeout.
    pub fn ping_sent(&mut self, now: Instant) {
        if !self.ping_outstanding {
            self.ping_outstanding = true;
            self.ping_sent_at = now;
        }
    }

    /// A ping response arrived.
    pub fn pong_received(&mut self) {
        self.ping_outstanding = false;
    }

    pub fn poll(&self, now: Instant) -> Option<KeepaliveEvent> {
        self.interval?;

        if self.ping_outstanding
            && now.duration_since(self.ping_sent_at) >= self.ping_timeout
        {
            return Some(KeepaliveEvent::PingTimeout);
        }
        if self.deadline.saturating_duration_since(now) <= self.timer_tick {
            return Some(KeepaliveEvent::PingDue);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_secs(1);

    fn keepalive(secs: u16) -> (Keepalive, Instant) {
        let mut keepalive = Keepalive::new(secs, TICK, TICK);
        let now = Instant::now();
        keepalive.start(now);
        (keepalive, now)
    }

    #[test]
    fn test_disabled_when_zero() {
        let (keepalive, now) = keepalive(0);
        assert_eq!(keepalive.poll(now + Duration::from_secs(3600)), None);
    }

    #[test]
    fn test_ping_due_within_one_tick_of_deadline() {
        let (keepalive, now) = keepalive(60);
        assert_eq!(keepalive.poll(now + Duration::from_secs(58)), None);
        assert_eq!(
            keepalive.poll(now + Duration::from_secs(59)),
            Some(KeepaliveEvent::PingDue)
        );
    }

    #[test]
    fn test_activity_defers_ping() {
        let (mut keepalive, now) = keepalive(60);
        keepalive.refresh(now + Duration::from_secs(30));
        assert_eq!(keepalive.poll(now + Duration::from_secs(59)), None);
        assert_eq!(
            keepalive.poll(now + Duration::from_secs(89)),
            Some(KeepaliveEvent::PingDue)
        );
    }

    #[test]
    fn test_ping_timeout() {
        let (mut keepalive, now) = keepalive(1);
        let t1 = now + Duration::from_secs(1);
        assert_eq!(keepalive.poll(t1), Some(KeepaliveEvent::PingDue));
        keepalive.ping_sent(t1);

        let t2 = t1 + Duration::from_secs(1);
        assert_eq!(keepalive.poll(t2), Some(KeepaliveEvent::PingTimeout));
    }

    #[test]
    fn test_resent_ping_keeps_first_send_time() {
        let (mut keepalive, now) = keepalive(1);
        let t1 = now + Duration::from_secs(1);
        keepalive.ping_sent(t1);
        // A second ping half a tick later must not move the timeout.
        keepalive.ping_sent(t1 + Duration::from_millis(500));
        assert_eq!(
            keepalive.poll(t1 + Duration::from_secs(1)),
            Some(KeepaliveEvent::PingTimeout)
        );
    }

    #[test]
    fn test_pong_clears_outstanding() {
        let (mut keepalive, now) = keepalive(60);
        let t1 = now + Duration::from_secs(59);
        keepalive.ping_sent(t1);
        keepalive.pong_received();
        keepalive.refresh(t1);
        assert_eq!(keepalive.poll(t1 + Duration::from_secs(2)), None);
    }
}
