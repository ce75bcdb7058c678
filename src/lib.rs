//! A distributed trainer for evolving simulated creatures.
//!
//! The trainer owns a population of candidate creatures and hands out
//! evaluation work to untrusted physics workers over a line-delimited JSON
//! protocol. Workers return fitness results; once every slot has one, the
//! population advances a generation through tournament selection, crossover
//! and mutation.

pub mod config;
pub mod controller;
pub mod creature;
pub mod messages;
pub mod persist;
pub mod population;
pub mod server;
pub mod structure;
pub mod trainer;

use rand::Rng;

pub(crate) fn uuid4() -> String {
    let rng = &mut rand::rng();
    let uuid = rng.random::<u128>();
    format!("{uuid:032X}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid4_len() {
        for _ in 0..100 {
            assert_eq!(uuid4().len(), 32);
        }
    }

    #[test]
    fn uuid4_unique() {
        use std::collections::HashSet;
        let unique = 1000;
        assert_eq!((0..unique).map(|_| uuid4()).collect::<HashSet<String>>().len(), unique);
    }
}
