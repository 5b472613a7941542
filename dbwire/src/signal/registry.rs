//! Signal registry and factory.
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};

use super::{Signal, SignalType};

/// Which side of the wire originates a [`SignalType`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Client,
    Server,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Client => "client",
            Direction::Server => "server",
        }
    }
}

/// Metadata recorded alongside a registered [`SignalType`].
#[derive(Clone, Debug)]
pub struct SignalInfo {
    pub name: &'static str,
    pub direction: Direction,
    pub version: u32,
}

type Constructor = fn() -> Box<dyn Signal>;

/// `SignalType → prototype info`, partitioned by [`Direction`].
///
/// A given `SignalType` may appear in at most one of the two tables;
/// registering it twice (in either direction) is rejected.
#[derive(Default)]
pub struct Registry {
    client: HashMap<SignalType, SignalInfo>,
    server: HashMap<SignalType, SignalInfo>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `info` under `ty`. Errors if `ty` is already registered in
    /// either direction.
    pub fn register(&mut self, ty: SignalType, info: SignalInfo) -> Result<()> {
        if self.client.contains_key(&ty) || self.server.contains_key(&ty) {
            return Err(ProtocolError::Malformed(
                crate::common::general!("signal type {ty} registered twice").into(),
            )
            .into());
        }
        match info.direction {
            Direction::Client => self.client.insert(ty, info),
            Direction::Server => self.server.insert(ty, info),
        };
        Ok(())
    }

    pub fn info(&self, ty: SignalType) -> Option<&SignalInfo> {
        self.client.get(&ty).or_else(|| self.server.get(&ty))
    }

    pub fn direction_of(&self, ty: SignalType) -> Option<Direction> {
        if self.client.contains_key(&ty) {
            Some(Direction::Client)
        } else if self.server.contains_key(&ty) {
            Some(Direction::Server)
        } else {
            None
        }
    }
}

/// `SignalType → constructor`, used by the codec to produce a blank
/// instance before calling [`Signal::unpack`].
#[derive(Default)]
pub struct Factory {
    constructors: HashMap<SignalType, Constructor>,
}

impl Factory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, ty: SignalType, ctor: Constructor) {
        self.constructors.insert(ty, ctor);
    }

    pub fn construct(&self, ty: SignalType) -> Option<Box<dyn Signal>> {
        self.constructors.get(&ty).map(|ctor| ctor())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_duplicate_registration() {
        let mut registry = Registry::new();
        let info = SignalInfo { name: "Test", direction: Direction::Client, version: 1 };
        registry.register(7, info.clone()).unwrap();
        assert!(registry.register(7, info).is_err());
    }

    #[test]
    fn direction_is_derivable_after_registration() {
        let mut registry = Registry::new();
        registry
            .register(9, SignalInfo { name: "Test", direction: Direction::Server, version: 1 })
            .unwrap();
        assert_eq!(registry.direction_of(9), Some(Direction::Server));
        assert_eq!(registry.direction_of(10), None);
    }
}
