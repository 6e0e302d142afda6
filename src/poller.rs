//! Thin wrapper over `mio::Poll`, mirroring `epoller.cpp`'s
//! add/modify/delete/wait shape over the readiness-notification facility.

use std::io;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};

pub struct Poller {
    poll: Poll,
    events: Events,
}

impl Poller {
    pub fn new(event_capacity: usize) -> io::Result<Self> {
        Ok(Self { poll: Poll::new()?, events: Events::with_capacity(event_capacity) })
    }

    pub fn add(&self, source: &mut impl Source, token: Token, interest: Interest) -> io::Result<()> {
        self.poll.registry().register(source, token, interest)
    }

    pub fn modify(&self, source: &mut impl Source, token: Token, interest: Interest) -> io::Result<()> {
        self.poll.registry().reregister(source, token, interest)
    }

    pub fn remove(&self, source: &mut impl Source) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    /// Blocks up to `timeout_ms` (`None` waits forever); returns the number
    /// of ready events, retrievable via `events()`.
    pub fn wait(&mut self, timeout_ms: i64) -> io::Result<usize> {
        let timeout = if timeout_ms < 0 { None } else { Some(Duration::from_millis(timeout_ms as u64)) };
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => return Ok(self.events.iter().count()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &mio::event::Event> {
        self.events.iter()
    }
}
